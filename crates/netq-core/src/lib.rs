pub mod config;
pub mod logging;

pub mod fetch_head;
pub mod http;
pub mod queue;
pub mod request;
pub mod retry;

pub use queue::{
    ProgressObserver, QueueError, QueueObserver, QueueProgress, QueueStatus, RequestQueue,
};
pub use request::{Request, RequestError, RequestId, RequestState, Reporter, TransferProgress};
