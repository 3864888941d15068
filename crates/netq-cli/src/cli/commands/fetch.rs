//! `netq fetch` – download URLs through a request queue and print progress.

use anyhow::{Context, Result};
use netq_core::config::NetqConfig;
use netq_core::http::HttpRequest;
use netq_core::{QueueObserver, QueueStatus, Request, RequestError, RequestQueue};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug)]
pub struct FetchOptions {
    pub urls: Vec<String>,
    pub max_concurrent: Option<usize>,
    pub accurate_progress: bool,
    pub keep_going: bool,
    pub output_dir: PathBuf,
}

/// Prints one line per request lifecycle event and counts failures.
#[derive(Default)]
struct PrintObserver {
    finished: AtomicUsize,
    failed: AtomicUsize,
}

impl QueueObserver for PrintObserver {
    fn request_started(&self, request: &dyn Request) {
        println!("  started    {}", request.label());
    }

    fn request_finished(&self, request: &dyn Request) {
        self.finished.fetch_add(1, Ordering::Relaxed);
        println!("  done       {}", request.label());
    }

    fn request_failed(&self, request: &dyn Request, error: &RequestError) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        println!("  failed     {}: {}", request.label(), error);
    }

    fn request_cancelled(&self, request: &dyn Request) {
        println!("  cancelled  {}", request.label());
    }

    fn queue_finished(&self, queue: &RequestQueue) {
        tracing::info!(
            bytes = queue.bytes_downloaded_so_far(),
            "fetch queue finished"
        );
    }
}

/// File name for a URL: its last non-empty path segment, or `download-<n>.bin`.
/// Names already taken get a numeric suffix.
fn output_name(url: &str, index: usize, taken: &mut HashSet<String>) -> String {
    let base = url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|segs| segs.filter(|s| !s.is_empty()).last().map(str::to_string))
        })
        .unwrap_or_else(|| format!("download-{}.bin", index + 1));

    let mut name = base.clone();
    let mut n = 1;
    while !taken.insert(name.clone()) {
        name = format!("{}.{}", base, n);
        n += 1;
    }
    name
}

fn print_progress(queue: &RequestQueue, started: Instant) {
    let p = queue.progress();
    let done_mib = p.bytes_downloaded_so_far as f64 / 1_048_576.0;
    let total_mib = p.total_bytes_to_download as f64 / 1_048_576.0;
    let elapsed = started.elapsed().as_secs_f64();
    let rate_mib = if elapsed > 0.0 { done_mib / elapsed } else { 0.0 };
    println!(
        "  {:.1} / {:.1} MiB ({:.1}%)  {:.2} MiB/s  [{} running, {} waiting]",
        done_mib,
        total_mib,
        p.download_fraction() * 100.0,
        rate_mib,
        queue.running_count(),
        queue.pending_count()
    );
}

pub async fn run_fetch(cfg: &NetqConfig, opts: FetchOptions) -> Result<()> {
    std::fs::create_dir_all(&opts.output_dir)
        .with_context(|| format!("create output dir {}", opts.output_dir.display()))?;

    let queue = RequestQueue::with_config(cfg);
    if let Some(max) = opts.max_concurrent {
        queue.set_max_concurrent_requests(max);
    }
    if opts.accurate_progress {
        queue.set_show_accurate_progress(true);
    }
    if opts.keep_going {
        queue.set_should_cancel_all_requests_on_failure(false);
    }
    let observer = Arc::new(PrintObserver::default());
    queue.set_observer(observer.clone());

    let mut taken = HashSet::new();
    for (i, url) in opts.urls.iter().enumerate() {
        let path = opts.output_dir.join(output_name(url, i, &mut taken));
        let request = HttpRequest::get(url)?.with_config(cfg).save_to(&path);
        tracing::debug!(url = %url, path = %path.display(), "queueing download");
        queue.add(Arc::new(request))?;
    }

    println!(
        "fetching {} URL(s) into {} (max {} at once)",
        opts.urls.len(),
        opts.output_dir.display(),
        match queue.max_concurrent_requests() {
            0 => "unbounded".to_string(),
            n => n.to_string(),
        }
    );

    let started = Instant::now();
    queue.start()?;
    let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
    let wait = queue.wait();
    tokio::pin!(wait);
    let status = loop {
        tokio::select! {
            status = &mut wait => break status,
            _ = ticker.tick() => print_progress(&queue, started),
        }
    };
    print_progress(&queue, started);

    let finished = observer.finished.load(Ordering::Relaxed);
    let failed = observer.failed.load(Ordering::Relaxed);
    tracing::info!(?status, finished, failed, "fetch run ended");
    match status {
        QueueStatus::Finished if failed == 0 => {
            println!("all {} request(s) finished", finished);
            Ok(())
        }
        QueueStatus::Finished => anyhow::bail!("{} of {} request(s) failed", failed, opts.urls.len()),
        QueueStatus::Failed => anyhow::bail!("a request failed; remaining requests were cancelled"),
        other => anyhow::bail!("queue ended as {:?}", other),
    }
}
