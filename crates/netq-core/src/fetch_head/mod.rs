//! HTTP HEAD size probing.
//!
//! Uses the curl crate (libcurl) to fetch response headers without the body.
//! Accurate-progress mode runs this for every queued GET so the queue's
//! download total is known before any transfer starts.

mod parse;

use anyhow::{Context, Result};
use std::str;
use std::time::Duration;

use crate::http::HttpOptions;

pub(crate) use parse::parse_headers;

/// Upper bound for a HEAD round trip regardless of the transfer timeout.
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Headers of interest from a HEAD response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadResult {
    /// Total size in bytes, if `Content-Length` is present.
    pub content_length: Option<u64>,
    /// True if server sent `Accept-Ranges: bytes`.
    pub accept_ranges: bool,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    /// `Content-Disposition` value if present (filename hint).
    pub content_disposition: Option<String>,
}

/// Performs a HEAD request and returns parsed metadata of the final response.
///
/// Follows redirects. Runs in the current thread; call from `spawn_blocking`
/// if used from async code.
pub fn probe(url: &str, custom_headers: &[(String, String)], options: &HttpOptions) -> Result<HeadResult> {
    let mut lines: Vec<String> = Vec::new();

    let mut easy = curl::easy::Easy::new();
    easy.url(url).context("invalid URL")?;
    easy.nobody(true)?;
    options.apply(&mut easy)?;
    easy.timeout(options.timeout.map_or(PROBE_TIMEOUT, |t| t.min(PROBE_TIMEOUT)))?;

    let mut list = curl::easy::List::new();
    for (k, v) in custom_headers {
        list.append(&format!("{}: {}", k.trim(), v.trim()))?;
    }
    if !custom_headers.is_empty() {
        easy.http_headers(list)?;
    }

    {
        let mut transfer = easy.transfer();
        transfer.header_function(|data| {
            if let Ok(s) = str::from_utf8(data) {
                let line = s.trim_end();
                // A new status line starts the headers of a redirect target.
                if line.starts_with("HTTP/") {
                    lines.clear();
                }
                lines.push(line.to_string());
            }
            true
        })?;
        transfer.perform().context("HEAD request failed")?;
    }

    let code = easy.response_code().context("no response code")?;
    if !(200..300).contains(&code) {
        anyhow::bail!("HEAD {} returned HTTP {}", url, code);
    }

    Ok(parse_headers(&lines))
}
