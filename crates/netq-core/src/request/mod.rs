//! The unit of work the queue schedules.
//!
//! A [`Request`] is owned by the caller and shared with the queue as
//! `Arc<dyn Request>` while it is pending or running. The queue starts and
//! cancels it and reads its byte counters; the request reports lifecycle and
//! progress back through the [`Reporter`] it is handed in `start`.

mod error;
mod reporter;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

pub use error::RequestError;
pub use reporter::{Reporter, RequestEvent};

/// Process-unique request identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    /// Allocate a fresh id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Pending,
    Running,
    Finished,
    Failed,
    Cancelled,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestState::Finished | RequestState::Failed | RequestState::Cancelled
        )
    }
}

/// Byte counters of one request. Expected sizes are `None` until known
/// (e.g. before response headers or a size probe).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferProgress {
    pub bytes_sent: u64,
    pub upload_expected: Option<u64>,
    pub bytes_received: u64,
    pub download_expected: Option<u64>,
}

/// Collaborator contract consumed by [`crate::RequestQueue`].
///
/// `start` and `cancel` must not block: the transfer runs on its own thread
/// or task and reports through the reporter. `cancel` is cooperative; the
/// queue forgets the request immediately and ignores anything it reports
/// afterwards.
pub trait Request: Send + Sync + 'static {
    fn id(&self) -> RequestId;

    fn state(&self) -> RequestState;

    fn progress(&self) -> TransferProgress;

    fn start(&self, reporter: Reporter);

    fn cancel(&self);

    /// Called when a queue accepts the request. Clears a cancellation or
    /// outcome left over from an earlier run so `start` works again.
    fn rearm(&self) {}

    /// Whether accurate-progress mode should probe this request before starting.
    fn needs_size_probe(&self) -> bool {
        self.progress().download_expected.is_none()
    }

    /// Learn the transfer size without transferring the body (e.g. HEAD).
    /// Blocking; the queue calls it on the blocking pool.
    fn probe_size(&self) -> Result<(), RequestError> {
        Ok(())
    }

    /// Short human-readable label for logs.
    fn label(&self) -> String {
        format!("request {}", self.id())
    }
}
