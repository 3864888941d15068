//! A request the test drives by hand.
//!
//! `start` only records the reporter; the test then calls `send_progress`,
//! `finish`, `fail`, or `finish_silently` to play out the transfer. Requests
//! built with `auto` finish on their own from a background thread; those
//! built with `slow_start` block inside `start` for a while.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use netq_core::{Reporter, Request, RequestError, RequestId, RequestState, TransferProgress};

/// Counts how many requests of a group are running at once.
#[derive(Default)]
pub struct ConcurrencyTracker {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyTracker {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub struct ScriptedRequest {
    id: RequestId,
    name: String,
    /// Size revealed by `probe_size` when not known up front.
    probed_size: Option<u64>,
    auto: bool,
    start_delay: Option<Duration>,
    state: Mutex<RequestState>,
    progress: Mutex<TransferProgress>,
    reporter: Mutex<Option<Reporter>>,
    starts: AtomicUsize,
    starts_after_cancel: AtomicUsize,
    probes: AtomicUsize,
    cancelled: AtomicBool,
    tracker: Option<Arc<ConcurrencyTracker>>,
}

impl ScriptedRequest {
    fn build(name: &str, progress: TransferProgress, probed_size: Option<u64>, auto: bool) -> Self {
        Self {
            id: RequestId::next(),
            name: name.to_string(),
            probed_size,
            auto,
            start_delay: None,
            state: Mutex::new(RequestState::Pending),
            progress: Mutex::new(progress),
            reporter: Mutex::new(None),
            starts: AtomicUsize::new(0),
            starts_after_cancel: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
            cancelled: AtomicBool::new(false),
            tracker: None,
        }
    }

    /// A download of `size` bytes, known up front.
    pub fn download(name: &str, size: u64) -> Arc<Self> {
        Arc::new(Self::build(
            name,
            TransferProgress {
                download_expected: Some(size),
                ..Default::default()
            },
            None,
            false,
        ))
    }

    /// A download whose size is only learned by probing.
    pub fn unknown_size(name: &str, probed_size: Option<u64>) -> Arc<Self> {
        Arc::new(Self::build(name, TransferProgress::default(), probed_size, false))
    }

    /// An upload of `size` bytes.
    pub fn upload(name: &str, size: u64) -> Arc<Self> {
        Arc::new(Self::build(
            name,
            TransferProgress {
                upload_expected: Some(size),
                ..Default::default()
            },
            None,
            false,
        ))
    }

    /// A download that completes by itself shortly after starting.
    pub fn auto(name: &str, size: u64, tracker: Option<Arc<ConcurrencyTracker>>) -> Arc<Self> {
        let mut req = Self::build(
            name,
            TransferProgress {
                download_expected: Some(size),
                ..Default::default()
            },
            None,
            true,
        );
        req.tracker = tracker;
        Arc::new(req)
    }

    /// A download whose `start` takes `delay` before returning.
    pub fn slow_start(name: &str, size: u64, delay: Duration) -> Arc<Self> {
        let mut req = Self::build(
            name,
            TransferProgress {
                download_expected: Some(size),
                ..Default::default()
            },
            None,
            false,
        );
        req.start_delay = Some(delay);
        Arc::new(req)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// `start` calls that arrived after `cancel`.
    pub fn starts_after_cancel(&self) -> usize {
        self.starts_after_cancel.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn reporter(&self) -> Reporter {
        self.reporter
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| panic!("{} was never started", self.name))
    }

    pub fn send_headers(&self) {
        self.reporter().headers_received();
    }

    /// Reports `received` download bytes so far.
    pub fn send_progress(&self, received: u64) {
        let p = {
            let mut p = self.progress.lock().unwrap();
            p.bytes_received = received;
            *p
        };
        self.reporter().progress(p);
    }

    pub fn send_upload_progress(&self, sent: u64) {
        let p = {
            let mut p = self.progress.lock().unwrap();
            p.bytes_sent = sent;
            *p
        };
        self.reporter().progress(p);
    }

    fn complete_counters(&self) {
        let mut p = self.progress.lock().unwrap();
        p.bytes_received = p.download_expected.unwrap_or(p.bytes_received);
        p.bytes_sent = p.upload_expected.unwrap_or(p.bytes_sent);
    }

    fn leave(&self) {
        if let Some(t) = &self.tracker {
            t.leave();
        }
    }

    pub fn finish(&self) {
        self.complete_counters();
        *self.state.lock().unwrap() = RequestState::Finished;
        self.leave();
        self.reporter().finished();
    }

    pub fn fail(&self, error: RequestError) {
        *self.state.lock().unwrap() = RequestState::Failed;
        self.leave();
        self.reporter().failed(error);
    }

    /// Ends the transfer without telling the queue.
    pub fn finish_silently(&self, state: RequestState) {
        if state == RequestState::Finished {
            self.complete_counters();
        }
        *self.state.lock().unwrap() = state;
        self.leave();
    }
}

impl Request for ScriptedRequest {
    fn id(&self) -> RequestId {
        self.id
    }

    fn state(&self) -> RequestState {
        *self.state.lock().unwrap()
    }

    fn progress(&self) -> TransferProgress {
        *self.progress.lock().unwrap()
    }

    fn start(&self, reporter: Reporter) {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.was_cancelled() {
            self.starts_after_cancel.fetch_add(1, Ordering::SeqCst);
        }
        if let Some(delay) = self.start_delay {
            thread::sleep(delay);
        }
        *self.state.lock().unwrap() = RequestState::Running;
        if let Some(t) = &self.tracker {
            t.enter();
        }
        reporter.started();
        if self.auto {
            let size = self.progress().download_expected.unwrap_or(0);
            let tracker = self.tracker.clone();
            let progress = TransferProgress {
                bytes_received: size,
                download_expected: Some(size),
                ..Default::default()
            };
            *self.progress.lock().unwrap() = progress;
            *self.state.lock().unwrap() = RequestState::Finished;
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(2));
                reporter.progress(progress);
                if let Some(t) = tracker {
                    t.leave();
                }
                reporter.finished();
            });
        } else {
            *self.reporter.lock().unwrap() = Some(reporter);
        }
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if !state.is_terminal() {
            *state = RequestState::Cancelled;
        }
    }

    fn rearm(&self) {
        let mut state = self.state.lock().unwrap();
        if *state != RequestState::Running {
            *state = RequestState::Pending;
        }
    }

    fn probe_size(&self) -> Result<(), RequestError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if let Some(size) = self.probed_size {
            self.progress.lock().unwrap().download_expected = Some(size);
        }
        Ok(())
    }

    fn label(&self) -> String {
        self.name.clone()
    }
}
