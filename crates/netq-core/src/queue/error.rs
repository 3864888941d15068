use thiserror::Error;

use crate::request::RequestId;

/// Rejected queue operations. The queue's state is unchanged when one is returned.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is already running")]
    AlreadyRunning,
    #[error("request {0} is already in the queue")]
    DuplicateRequest(RequestId),
    #[error("starting the queue requires a Tokio runtime")]
    NoRuntime,
}
