//! RAII guard over the queue lock that reports holds exceeding the bookkeeping budget.

use std::ops::{Deref, DerefMut};
use std::sync::MutexGuard;
use std::time::{Duration, Instant};

use super::state::QueueState;

pub(crate) struct BudgetedGuard<'a> {
    guard: MutexGuard<'a, QueueState>,
    acquired: Instant,
    budget: Duration,
}

impl<'a> BudgetedGuard<'a> {
    pub(crate) fn new(guard: MutexGuard<'a, QueueState>, budget: Duration) -> Self {
        Self {
            guard,
            acquired: Instant::now(),
            budget,
        }
    }
}

impl Deref for BudgetedGuard<'_> {
    type Target = QueueState;

    fn deref(&self) -> &QueueState {
        &self.guard
    }
}

impl DerefMut for BudgetedGuard<'_> {
    fn deref_mut(&mut self) -> &mut QueueState {
        &mut self.guard
    }
}

impl Drop for BudgetedGuard<'_> {
    fn drop(&mut self) {
        let held = self.acquired.elapsed();
        if held > self.budget {
            tracing::warn!(
                held_us = held.as_micros() as u64,
                budget_us = self.budget.as_micros() as u64,
                "queue bookkeeping held the lock past its budget"
            );
        }
    }
}
