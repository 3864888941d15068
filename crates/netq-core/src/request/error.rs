//! Per-request failure type surfaced to the queue observer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("invalid URL {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    /// Curl reported an error (timeout, connection, etc.).
    #[error("{0}")]
    Curl(#[from] curl::Error),
    /// HTTP response had a non-2xx status.
    #[error("HTTP {0}")]
    Http(u32),
    /// Reading the upload body or writing the response sink failed.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("request cancelled")]
    Cancelled,
    /// The request reached a failed state without delivering its error.
    #[error("request failed without reporting an error")]
    Unreported,
    #[error("size probe failed: {source}")]
    Probe {
        #[source]
        source: anyhow::Error,
    },
}
