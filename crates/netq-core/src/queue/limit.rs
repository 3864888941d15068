//! Concurrency bound for running requests.

/// Maximum number of requests running at once. Zero means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConcurrencyLimit(usize);

impl ConcurrencyLimit {
    pub fn new(max: usize) -> Self {
        Self(max)
    }

    pub fn unbounded() -> Self {
        Self(0)
    }

    /// The bound, or `None` when unbounded.
    pub fn max(&self) -> Option<usize> {
        (self.0 > 0).then_some(self.0)
    }

    /// Free slots given `in_use` running requests.
    pub fn available(&self, in_use: usize) -> usize {
        match self.max() {
            Some(max) => max.saturating_sub(in_use),
            None => usize::MAX,
        }
    }
}
