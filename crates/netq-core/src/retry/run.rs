//! Retry loop: run a closure until success or policy says stop.

use crate::request::RequestError;

use super::classify;
use super::policy::{RetryDecision, RetryPolicy};

/// Runs `f` until it succeeds or the policy says to stop. `f` receives the
/// 1-based attempt number. Cancellation is returned at once.
pub fn run_with_retry<T, F>(policy: &RetryPolicy, mut f: F) -> Result<T, RequestError>
where
    F: FnMut(u32) -> Result<T, RequestError>,
{
    let mut attempt = 1u32;
    loop {
        match f(attempt) {
            Ok(v) => return Ok(v),
            Err(RequestError::Cancelled) => return Err(RequestError::Cancelled),
            Err(e) => {
                let kind = classify::classify(&e);
                match policy.decide(attempt, kind) {
                    RetryDecision::NoRetry => return Err(e),
                    RetryDecision::RetryAfter(d) => {
                        tracing::debug!(attempt, ?kind, delay_ms = d.as_millis() as u64, "retrying after {}", e);
                        std::thread::sleep(d);
                        attempt += 1;
                    }
                }
            }
        }
    }
}
