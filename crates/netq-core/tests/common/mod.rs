#![allow(dead_code)]

pub mod http_server;
pub mod recorder;
pub mod scripted;

use std::time::Duration;

/// Polls `cond` until it holds, failing the test after 5s.
pub async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Gives the queue driver a chance to run anything it has queued.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
