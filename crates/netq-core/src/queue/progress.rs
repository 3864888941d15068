//! Aggregate byte progress of a queue run.

/// Snapshot of the queue's aggregate counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueProgress {
    /// Bytes uploaded so far by all requests in this run.
    pub bytes_uploaded_so_far: u64,
    /// Bytes to upload, as far as requests have reported their sizes.
    pub total_bytes_to_upload: u64,
    pub bytes_downloaded_so_far: u64,
    /// Bytes to download; grows as requests learn their `Content-Length`.
    pub total_bytes_to_download: u64,
}

fn fraction(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (done as f64 / total as f64).clamp(0.0, 1.0)
}

impl QueueProgress {
    /// Upload fraction in [0.0, 1.0]; 0 while the total is unknown.
    pub fn upload_fraction(&self) -> f64 {
        fraction(self.bytes_uploaded_so_far, self.total_bytes_to_upload)
    }

    /// Download fraction in [0.0, 1.0]; 0 while the total is unknown.
    pub fn download_fraction(&self) -> f64 {
        fraction(self.bytes_downloaded_so_far, self.total_bytes_to_download)
    }
}
