//! libcurl-backed [`Request`] implementation.
//!
//! Each started request runs its transfer on a dedicated OS thread (curl's
//! easy interface is blocking) and reports lifecycle and byte counts through
//! the queue's [`Reporter`]. Cancellation sets an abort token that the
//! transfer's progress callback checks, which makes libcurl stop the transfer.

mod options;
mod transfer;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use crate::config::NetqConfig;
use crate::fetch_head;
use crate::request::{Reporter, Request, RequestError, RequestId, RequestState, TransferProgress};
use crate::retry::RetryPolicy;

use self::transfer::{TransferSpec, TransferState};

pub use options::HttpOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
        })
    }
}

/// An HTTP GET or POST.
///
/// Built with [`HttpRequest::get`] or [`HttpRequest::post`], configured with
/// the builder methods, then wrapped in an `Arc` and handed to a queue:
///
/// ```no_run
/// use std::sync::Arc;
/// use netq_core::http::HttpRequest;
/// use netq_core::RequestQueue;
///
/// # fn demo(queue: &RequestQueue) -> anyhow::Result<()> {
/// let req = HttpRequest::get("https://example.com/file.iso")?.save_to("/tmp/file.iso");
/// queue.add(Arc::new(req))?;
/// # Ok(())
/// # }
/// ```
pub struct HttpRequest {
    id: RequestId,
    spec: TransferSpec,
    state: Arc<TransferState>,
}

impl HttpRequest {
    pub fn get(url: &str) -> Result<Self, RequestError> {
        Self::build(url, Method::Get, None)
    }

    /// POST `body`. The upload size is known up front.
    pub fn post(url: &str, body: impl Into<Vec<u8>>) -> Result<Self, RequestError> {
        let body: Vec<u8> = body.into();
        Self::build(url, Method::Post, Some(Arc::from(body)))
    }

    fn build(url: &str, method: Method, body: Option<Arc<[u8]>>) -> Result<Self, RequestError> {
        url::Url::parse(url).map_err(|source| RequestError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        let state = TransferState::new(body.as_ref().map(|b| b.len() as u64));
        Ok(Self {
            id: RequestId::next(),
            spec: TransferSpec {
                url: url.to_string(),
                method,
                headers: Vec::new(),
                body,
                output: None,
                options: HttpOptions::default(),
                retry: RetryPolicy::none(),
            },
            state: Arc::new(state),
        })
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.headers.push((name.into(), value.into()));
        self
    }

    /// Stream the response body to `path` (created or truncated) instead of memory.
    pub fn save_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.spec.output = Some(path.into());
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.spec.retry = policy;
        self
    }

    pub fn options(mut self, options: HttpOptions) -> Self {
        self.spec.options = options;
        self
    }

    /// Applies the `[http]` and `[retry]` sections of `cfg`.
    pub fn with_config(self, cfg: &NetqConfig) -> Self {
        let retry = cfg
            .retry
            .as_ref()
            .map(|r| r.to_policy())
            .unwrap_or_else(RetryPolicy::none);
        self.options(HttpOptions::from(&cfg.http_or_default()))
            .retry(retry)
    }

    pub fn url(&self) -> &str {
        &self.spec.url
    }

    pub fn method(&self) -> Method {
        self.spec.method
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.spec.output.as_deref()
    }

    /// Status code of the last response, once one was received.
    pub fn response_code(&self) -> Option<u32> {
        self.state.response_code()
    }

    /// The body of a finished in-memory request; empty when saved to a file.
    pub fn response_body(&self) -> Vec<u8> {
        self.state.body()
    }
}

impl Request for HttpRequest {
    fn id(&self) -> RequestId {
        self.id
    }

    fn state(&self) -> RequestState {
        self.state.get()
    }

    fn progress(&self) -> TransferProgress {
        self.state.snapshot()
    }

    fn start(&self, reporter: Reporter) {
        if !self.state.prepare_run() {
            match self.state.get() {
                RequestState::Running => {
                    tracing::warn!(id = %self.id, "start ignored: {} already running", self.label())
                }
                _ => tracing::debug!(id = %self.id, "start ignored: {} was cancelled", self.label()),
            }
            return;
        }

        let spec = self.spec.clone();
        let state = Arc::clone(&self.state);
        let fallback = reporter.clone();
        let spawned = thread::Builder::new()
            .name(format!("netq-http-{}", self.id.get()))
            .spawn(move || transfer::run(spec, state, reporter));
        if let Err(e) = spawned {
            tracing::error!(id = %self.id, "could not spawn transfer thread: {}", e);
            self.state.set(RequestState::Failed);
            fallback.failed(RequestError::Io(e));
        }
    }

    fn cancel(&self) {
        self.state.abort();
    }

    fn rearm(&self) {
        self.state.rearm();
    }

    fn needs_size_probe(&self) -> bool {
        self.spec.method == Method::Get && self.state.snapshot().download_expected.is_none()
    }

    fn probe_size(&self) -> Result<(), RequestError> {
        let head = fetch_head::probe(&self.spec.url, &self.spec.headers, &self.spec.options)
            .map_err(|source| RequestError::Probe { source })?;
        match head.content_length {
            Some(len) => {
                tracing::debug!(id = %self.id, len, "probed size of {}", self.spec.url);
                self.state.expect_download(len);
            }
            None => tracing::debug!(id = %self.id, "no Content-Length for {}", self.spec.url),
        }
        Ok(())
    }

    fn label(&self) -> String {
        format!("{} {}", self.spec.method, self.spec.url)
    }
}
