//! `netq probe` – show what a HEAD request reports for a URL.

use anyhow::{Context, Result};
use netq_core::config::NetqConfig;
use netq_core::fetch_head;
use netq_core::http::HttpOptions;

pub async fn run_probe(cfg: &NetqConfig, url: &str) -> Result<()> {
    let options = HttpOptions::from(&cfg.http_or_default());
    let target = url.to_string();
    let head = tokio::task::spawn_blocking(move || fetch_head::probe(&target, &[], &options))
        .await
        .context("probe task")??;

    match head.content_length {
        Some(len) => println!("size:           {} bytes", len),
        None => println!("size:           unknown"),
    }
    println!("accept-ranges:  {}", if head.accept_ranges { "bytes" } else { "none" });
    if let Some(etag) = &head.etag {
        println!("etag:           {}", etag);
    }
    if let Some(modified) = &head.last_modified {
        println!("last-modified:  {}", modified);
    }
    if let Some(disposition) = &head.content_disposition {
        println!("disposition:    {}", disposition);
    }
    Ok(())
}
