//! The blocking curl transfer behind an [`HttpRequest`](super::HttpRequest).

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use curl::easy::{Easy, List};

use crate::fetch_head::parse_headers;
use crate::request::{Reporter, RequestError, RequestState, TransferProgress};
use crate::retry::{run_with_retry, RetryPolicy};

use super::{HttpOptions, Method};

/// Sentinel for "size not known yet" in the expected-size atomics.
const UNKNOWN: u64 = u64::MAX;

/// What to transfer. Cloned into the transfer thread on each start.
#[derive(Clone)]
pub(super) struct TransferSpec {
    pub(super) url: String,
    pub(super) method: Method,
    pub(super) headers: Vec<(String, String)>,
    pub(super) body: Option<Arc<[u8]>>,
    pub(super) output: Option<PathBuf>,
    pub(super) options: HttpOptions,
    pub(super) retry: RetryPolicy,
}

/// State shared between the request handle and its transfer thread.
pub(super) struct TransferState {
    state: AtomicU8,
    abort: AtomicBool,
    headers_reported: AtomicBool,
    bytes_sent: AtomicU64,
    upload_expected: AtomicU64,
    bytes_received: AtomicU64,
    download_expected: AtomicU64,
    response_code: AtomicU32,
    body: Mutex<Vec<u8>>,
}

fn encode(state: RequestState) -> u8 {
    match state {
        RequestState::Pending => 0,
        RequestState::Running => 1,
        RequestState::Finished => 2,
        RequestState::Failed => 3,
        RequestState::Cancelled => 4,
    }
}

fn decode(raw: u8) -> RequestState {
    match raw {
        0 => RequestState::Pending,
        1 => RequestState::Running,
        2 => RequestState::Finished,
        3 => RequestState::Failed,
        _ => RequestState::Cancelled,
    }
}

fn known(raw: u64) -> Option<u64> {
    (raw != UNKNOWN).then_some(raw)
}

impl TransferState {
    pub(super) fn new(upload_expected: Option<u64>) -> Self {
        Self {
            state: AtomicU8::new(encode(RequestState::Pending)),
            abort: AtomicBool::new(false),
            headers_reported: AtomicBool::new(false),
            bytes_sent: AtomicU64::new(0),
            upload_expected: AtomicU64::new(upload_expected.unwrap_or(UNKNOWN)),
            bytes_received: AtomicU64::new(0),
            download_expected: AtomicU64::new(UNKNOWN),
            response_code: AtomicU32::new(0),
            body: Mutex::new(Vec::new()),
        }
    }

    pub(super) fn get(&self) -> RequestState {
        decode(self.state.load(Ordering::Acquire))
    }

    pub(super) fn set(&self, state: RequestState) {
        self.state.store(encode(state), Ordering::Release);
    }

    /// Marks the request running and clears per-run counters. False, with
    /// nothing changed, if it is already running or was cancelled.
    pub(super) fn prepare_run(&self) -> bool {
        let claimed = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| match decode(raw) {
                RequestState::Running | RequestState::Cancelled => None,
                _ => Some(encode(RequestState::Running)),
            })
            .is_ok();
        if claimed {
            self.headers_reported.store(false, Ordering::Relaxed);
            self.rewind();
            self.response_code.store(0, Ordering::Relaxed);
        }
        claimed
    }

    /// Back to `Pending` with the abort token cleared, so an ended or
    /// cancelled request can run again. Ignored while running.
    pub(super) fn rearm(&self) {
        if self.get() == RequestState::Running {
            return;
        }
        self.abort.store(false, Ordering::Relaxed);
        self.headers_reported.store(false, Ordering::Relaxed);
        self.rewind();
        self.response_code.store(0, Ordering::Relaxed);
        self.set(RequestState::Pending);
    }

    /// Zeroes the transferred counts before a retry attempt. Expected sizes stay.
    fn rewind(&self) {
        self.bytes_sent.store(0, Ordering::Relaxed);
        self.bytes_received.store(0, Ordering::Relaxed);
    }

    pub(super) fn abort(&self) {
        self.abort.store(true, Ordering::Relaxed);
        let _ = self.state.compare_exchange(
            encode(RequestState::Pending),
            encode(RequestState::Cancelled),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    fn aborted(&self) -> bool {
        self.abort.load(Ordering::Relaxed)
    }

    pub(super) fn expect_download(&self, len: u64) {
        self.download_expected.store(len, Ordering::Relaxed);
    }

    pub(super) fn snapshot(&self) -> TransferProgress {
        TransferProgress {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            upload_expected: known(self.upload_expected.load(Ordering::Relaxed)),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            download_expected: known(self.download_expected.load(Ordering::Relaxed)),
        }
    }

    pub(super) fn response_code(&self) -> Option<u32> {
        match self.response_code.load(Ordering::Relaxed) {
            0 => None,
            code => Some(code),
        }
    }

    pub(super) fn body(&self) -> Vec<u8> {
        self.body.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Folds a libcurl progress callback into the counters. Returns whether anything changed.
    fn observe(&self, dltotal: f64, dlnow: f64, ultotal: f64, ulnow: f64) -> bool {
        let mut changed = false;
        changed |= self.bytes_received.swap(dlnow as u64, Ordering::Relaxed) != dlnow as u64;
        changed |= self.bytes_sent.swap(ulnow as u64, Ordering::Relaxed) != ulnow as u64;
        if dltotal > 0.0 {
            changed |= self.download_expected.swap(dltotal as u64, Ordering::Relaxed) != dltotal as u64;
        }
        if ultotal > 0.0 {
            changed |= self.upload_expected.swap(ultotal as u64, Ordering::Relaxed) != ultotal as u64;
        }
        changed
    }

    /// A finished transfer's totals are what it actually moved when no size was ever learned.
    fn settle(&self) {
        let received = self.bytes_received.load(Ordering::Relaxed);
        let _ = self.download_expected.compare_exchange(
            UNKNOWN,
            received,
            Ordering::Relaxed,
            Ordering::Relaxed,
        );
    }
}

/// Where the response body goes.
enum Sink {
    Memory(Vec<u8>),
    File(BufWriter<File>),
}

impl Sink {
    fn open(path: Option<&Path>) -> io::Result<Self> {
        match path {
            Some(path) => Ok(Sink::File(BufWriter::new(File::create(path)?))),
            None => Ok(Sink::Memory(Vec::new())),
        }
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            Sink::Memory(buf) => {
                buf.extend_from_slice(data);
                Ok(())
            }
            Sink::File(file) => file.write_all(data),
        }
    }

    /// Flushes a file sink; returns the bytes of a memory sink.
    fn finish(self) -> io::Result<Option<Vec<u8>>> {
        match self {
            Sink::Memory(buf) => Ok(Some(buf)),
            Sink::File(mut file) => {
                file.flush()?;
                Ok(None)
            }
        }
    }
}

/// Transfer thread body: runs attempts under the retry policy and reports the outcome.
pub(super) fn run(spec: TransferSpec, state: Arc<TransferState>, reporter: Reporter) {
    reporter.started();
    let outcome = run_with_retry(&spec.retry, |attempt| {
        if attempt > 1 {
            tracing::debug!(id = %reporter.id(), attempt, "retrying {} {}", spec.method, spec.url);
            state.rewind();
        }
        perform(&spec, &state, &reporter)
    });

    match outcome {
        Ok(()) => {
            state.settle();
            state.set(RequestState::Finished);
            reporter.progress(state.snapshot());
            reporter.finished();
        }
        Err(RequestError::Cancelled) => {
            tracing::debug!(id = %reporter.id(), "{} {} cancelled", spec.method, spec.url);
            state.set(RequestState::Cancelled);
            reporter.failed(RequestError::Cancelled);
        }
        Err(e) => {
            state.set(RequestState::Failed);
            reporter.failed(e);
        }
    }
}

/// One attempt.
fn perform(spec: &TransferSpec, state: &TransferState, reporter: &Reporter) -> Result<(), RequestError> {
    if state.aborted() {
        return Err(RequestError::Cancelled);
    }
    let mut sink = Sink::open(spec.output.as_deref())?;

    let mut easy = Easy::new();
    easy.url(&spec.url)?;
    spec.options.apply(&mut easy)?;
    easy.progress(true)?;

    let mut list = List::new();
    for (k, v) in &spec.headers {
        list.append(&format!("{}: {}", k.trim(), v.trim()))?;
    }
    if !spec.headers.is_empty() {
        easy.http_headers(list)?;
    }

    let mut upload: &[u8] = spec.body.as_deref().unwrap_or(&[]);
    match spec.method {
        Method::Get => easy.get(true)?,
        Method::Post => {
            easy.post(true)?;
            easy.post_field_size(upload.len() as u64)?;
        }
    }

    let mut header_lines: Vec<String> = Vec::new();
    let mut status = 0u32;
    let mut redirected = false;
    let mut write_error: Option<io::Error> = None;

    let performed = {
        let mut transfer = easy.transfer();
        transfer.header_function(|data| {
            let Ok(line) = str::from_utf8(data) else {
                return true;
            };
            let line = line.trim_end();
            if line.starts_with("HTTP/") {
                header_lines.clear();
                redirected = false;
                status = line
                    .split_whitespace()
                    .nth(1)
                    .and_then(|c| c.parse().ok())
                    .unwrap_or(0);
            } else if line.is_empty() {
                // End of one response's headers. Interim and followed redirect
                // responses are not the one the caller asked about.
                let interim = (100..200).contains(&status) || ((300..400).contains(&status) && redirected);
                if !interim {
                    if let Some(len) = parse_headers(&header_lines).content_length {
                        state.expect_download(len);
                    }
                    if !state.headers_reported.swap(true, Ordering::Relaxed) {
                        reporter.headers_received();
                    }
                }
            } else if line
                .split_once(':')
                .is_some_and(|(name, _)| name.trim().eq_ignore_ascii_case("location"))
            {
                redirected = true;
            }
            header_lines.push(line.to_string());
            true
        })?;
        transfer.write_function(|data| match sink.write(data) {
            Ok(()) => Ok(data.len()),
            Err(e) => {
                tracing::warn!(id = %reporter.id(), "response write failed: {}", e);
                write_error = Some(e);
                Ok(0) // abort transfer
            }
        })?;
        if spec.method == Method::Post {
            transfer.read_function(|buf| {
                let n = buf.len().min(upload.len());
                buf[..n].copy_from_slice(&upload[..n]);
                upload = &upload[n..];
                Ok(n)
            })?;
        }
        transfer.progress_function(|dltotal, dlnow, ultotal, ulnow| {
            if state.aborted() {
                return false;
            }
            if state.observe(dltotal, dlnow, ultotal, ulnow) {
                reporter.progress(state.snapshot());
            }
            true
        })?;
        transfer.perform()
    };

    if let Err(e) = performed {
        if state.aborted() {
            return Err(RequestError::Cancelled);
        }
        if let Some(io) = write_error {
            return Err(RequestError::Io(io));
        }
        return Err(RequestError::Curl(e));
    }

    let code = easy.response_code()?;
    state.response_code.store(code, Ordering::Relaxed);
    let body = sink.finish()?;
    if !(200..300).contains(&code) {
        return Err(RequestError::Http(code));
    }
    if let Some(body) = body {
        *state.body.lock().unwrap_or_else(PoisonError::into_inner) = body;
    }
    Ok(())
}
