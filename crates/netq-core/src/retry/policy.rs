use std::time::Duration;

/// Why a transfer attempt failed, as far as retrying is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connect or transfer timeout.
    Timeout,
    /// The server asked for less traffic (429, 503).
    Throttled,
    /// Connection refused/reset, DNS failure, truncated response.
    Connection,
    Http5xx(u16),
    /// Cancellation, client errors, local I/O. Never retried.
    Other,
}

impl ErrorKind {
    pub fn is_transient(self) -> bool {
        !matches!(self, ErrorKind::Other)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    NoRetry,
    RetryAfter(Duration),
}

/// How often one request may run and how long to wait between runs.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts including the first; 1 disables retrying.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay after failed attempt `attempt` (1-based): `base * 2^(attempt-1)`, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    pub fn decide(&self, attempt: u32, kind: ErrorKind) -> RetryDecision {
        if !kind.is_transient() || attempt >= self.max_attempts {
            return RetryDecision::NoRetry;
        }
        let mut delay = self.backoff(attempt);
        if kind == ErrorKind::Throttled {
            delay = delay.saturating_mul(2).min(self.max_delay);
        }
        RetryDecision::RetryAfter(delay)
    }
}
