//! Retry and backoff policy for request collaborators.
//!
//! The queue itself never retries. `HttpRequest` uses this module to classify
//! transfer errors (timeouts, throttling, connection failures) and back off
//! before re-running a transfer.

mod classify;
mod policy;
mod run;

pub use classify::{classify, classify_curl_error, classify_http_status};
pub use policy::{ErrorKind, RetryDecision, RetryPolicy};
pub use run::run_with_retry;
