//! Queue bookkeeping: pending/running collections, aggregate counters, run status.
//!
//! Everything here runs under the queue's single lock and never calls
//! `start`/`cancel` on a request; callers collect the returned requests and
//! act on them after releasing the lock.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::request::{Request, RequestId, RequestState, TransferProgress};

use super::driver::DriverInputs;
use super::error::QueueError;
use super::limit::ConcurrencyLimit;
use super::observer::Observers;
use super::progress::QueueProgress;

/// Run status of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    /// Never started, or reset after a run.
    Idle,
    Active,
    /// Pending and running drained without a cascading failure.
    Finished,
    /// A failure cancelled the rest of the run.
    Failed,
    /// `cancel_all_requests` drained the run.
    Cancelled,
}

impl QueueStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            QueueStatus::Finished | QueueStatus::Failed | QueueStatus::Cancelled
        )
    }
}

/// Byte counts of one request already folded into the aggregate counters.
#[derive(Debug, Clone, Copy, Default)]
struct Counted {
    sent: u64,
    upload_total: u64,
    received: u64,
    download_total: u64,
}

/// Adds the growth of `value` over `seen` to `total`. Shrinking values
/// (a transfer restarted by a retry) are ignored so totals never go down.
fn bump(seen: &mut u64, total: &mut u64, value: u64) -> bool {
    if value > *seen {
        *total = total.saturating_add(value - *seen);
        *seen = value;
        true
    } else {
        false
    }
}

/// Only the expected sizes of `p`. Bytes a request moved before it was
/// (re)added belong to an earlier run and are not counted.
fn sizes_only(p: TransferProgress) -> TransferProgress {
    TransferProgress {
        bytes_sent: 0,
        bytes_received: 0,
        ..p
    }
}

pub(crate) struct Tracked {
    request: Arc<dyn Request>,
    counted: Counted,
    /// Consecutive status polls that saw a terminal state with no event.
    stale_polls: u32,
    /// Set when the request is drained; a pending `start` must then be skipped.
    withdrawn: Arc<AtomicBool>,
}

/// A request moved into running, to be started once the lock is released.
pub(crate) struct Promoted {
    pub(crate) request: Arc<dyn Request>,
    withdrawn: Arc<AtomicBool>,
}

impl Promoted {
    /// True once the request left running without having been started.
    pub(crate) fn withdrawn(&self) -> bool {
        self.withdrawn.load(Ordering::Acquire)
    }
}

impl Tracked {
    fn new(request: Arc<dyn Request>) -> Self {
        Self {
            request,
            counted: Counted::default(),
            stale_polls: 0,
            withdrawn: Arc::new(AtomicBool::new(false)),
        }
    }

    fn id(&self) -> RequestId {
        self.request.id()
    }

    fn account(&mut self, counters: &mut QueueProgress, p: TransferProgress) -> bool {
        let c = &mut self.counted;
        let mut changed = bump(&mut c.sent, &mut counters.bytes_uploaded_so_far, p.bytes_sent);
        changed |= bump(
            &mut c.upload_total,
            &mut counters.total_bytes_to_upload,
            p.upload_expected.unwrap_or(0),
        );
        changed |= bump(
            &mut c.received,
            &mut counters.bytes_downloaded_so_far,
            p.bytes_received,
        );
        changed |= bump(
            &mut c.download_total,
            &mut counters.total_bytes_to_download,
            p.download_expected.unwrap_or(0),
        );
        changed
    }

    /// A finished request counts as fully transferred: so-far and total both
    /// settle on the larger of what was expected and what actually moved.
    fn settle(&mut self, counters: &mut QueueProgress) {
        let c = &mut self.counted;
        let up = c.sent.max(c.upload_total);
        bump(&mut c.sent, &mut counters.bytes_uploaded_so_far, up);
        bump(&mut c.upload_total, &mut counters.total_bytes_to_upload, up);
        let down = c.received.max(c.download_total);
        bump(&mut c.received, &mut counters.bytes_downloaded_so_far, down);
        bump(&mut c.download_total, &mut counters.total_bytes_to_download, down);
    }
}

pub(crate) struct QueueState {
    pub(crate) status: QueueStatus,
    /// Incremented per run; stale `Start` commands compare against it.
    pub(crate) generation: u64,
    /// Set between `start()` and the end of size probing; nothing is promoted meanwhile.
    pub(crate) warming_up: bool,
    pending: VecDeque<Tracked>,
    running: Vec<Tracked>,
    pub(crate) counters: QueueProgress,
    pub(crate) limit: ConcurrencyLimit,
    pub(crate) cancel_on_failure: bool,
    pub(crate) accurate_progress: bool,
    pub(crate) observers: Observers,
    pub(crate) user_info: Option<Arc<dyn Any + Send + Sync>>,
    /// Channel ends handed to the driver task when it is spawned on first start.
    pub(crate) driver_inputs: Option<DriverInputs>,
}

impl QueueState {
    pub(crate) fn new(
        limit: ConcurrencyLimit,
        cancel_on_failure: bool,
        accurate_progress: bool,
        driver_inputs: Option<DriverInputs>,
    ) -> Self {
        Self {
            status: QueueStatus::Idle,
            generation: 0,
            warming_up: false,
            pending: VecDeque::new(),
            running: Vec::new(),
            counters: QueueProgress::default(),
            limit,
            cancel_on_failure,
            accurate_progress,
            observers: Observers::default(),
            user_info: None,
            driver_inputs,
        }
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn running_len(&self) -> usize {
        self.running.len()
    }

    pub(crate) fn contains(&self, id: RequestId) -> bool {
        self.pending.iter().any(|t| t.id() == id) || self.running.iter().any(|t| t.id() == id)
    }

    pub(crate) fn running_request(&self, id: RequestId) -> Option<Arc<dyn Request>> {
        self.running
            .iter()
            .find(|t| t.id() == id)
            .map(|t| Arc::clone(&t.request))
    }

    /// Clears counters after a run so the queue can be reused.
    pub(crate) fn reset(&mut self) -> Result<(), QueueError> {
        if self.status == QueueStatus::Active {
            return Err(QueueError::AlreadyRunning);
        }
        self.status = QueueStatus::Idle;
        self.counters = QueueProgress::default();
        self.warming_up = false;
        Ok(())
    }

    pub(crate) fn push_pending(&mut self, request: Arc<dyn Request>) -> Result<(), QueueError> {
        let id = request.id();
        if self.contains(id) {
            return Err(QueueError::DuplicateRequest(id));
        }
        if self.status.is_terminal() {
            self.reset()?;
        }
        let mut tracked = Tracked::new(request);
        let progress = sizes_only(tracked.request.progress());
        tracked.account(&mut self.counters, progress);
        self.pending.push_back(tracked);
        Ok(())
    }

    /// Idle/terminal → Active. Returns the new run generation.
    pub(crate) fn begin_run(&mut self) -> Result<u64, QueueError> {
        if self.status == QueueStatus::Active {
            return Err(QueueError::AlreadyRunning);
        }
        if self.status.is_terminal() {
            self.reset()?;
        }
        self.status = QueueStatus::Active;
        self.warming_up = true;
        self.generation += 1;
        Ok(self.generation)
    }

    pub(crate) fn is_current_run(&self, generation: u64) -> bool {
        self.status == QueueStatus::Active && self.generation == generation
    }

    /// Pending requests whose size is unknown, for accurate-progress probing.
    pub(crate) fn probe_candidates(&self) -> Vec<Arc<dyn Request>> {
        self.pending
            .iter()
            .filter(|t| t.request.needs_size_probe())
            .map(|t| Arc::clone(&t.request))
            .collect()
    }

    /// Re-reads sizes of every pending request (after probing). True if counters moved.
    pub(crate) fn refresh_pending(&mut self) -> bool {
        let mut changed = false;
        for t in self.pending.iter_mut() {
            let p = sizes_only(t.request.progress());
            changed |= t.account(&mut self.counters, p);
        }
        changed
    }

    fn can_promote(&self) -> bool {
        self.status == QueueStatus::Active
            && !self.warming_up
            && !self.pending.is_empty()
            && self.limit.available(self.running.len()) > 0
    }

    /// Moves up to `max` pending requests into running, respecting the limit.
    /// The caller starts the returned requests once the lock is released.
    pub(crate) fn promote(&mut self, max: usize) -> Vec<Promoted> {
        let mut started = Vec::new();
        while started.len() < max && self.can_promote() {
            let Some(tracked) = self.pending.pop_front() else {
                break;
            };
            started.push(Promoted {
                request: Arc::clone(&tracked.request),
                withdrawn: Arc::clone(&tracked.withdrawn),
            });
            self.running.push(tracked);
        }
        started
    }

    /// Whether another scheduling pass would promote more requests.
    pub(crate) fn wants_more_promotions(&self) -> bool {
        self.can_promote()
    }

    /// Active → Finished once both collections are empty. True on the transition.
    pub(crate) fn try_finish(&mut self) -> bool {
        if self.status == QueueStatus::Active
            && !self.warming_up
            && self.pending.is_empty()
            && self.running.is_empty()
        {
            self.status = QueueStatus::Finished;
            return true;
        }
        false
    }

    pub(crate) fn record_progress(&mut self, id: RequestId, p: TransferProgress) -> bool {
        let counters = &mut self.counters;
        if let Some(t) = self.running.iter_mut().find(|t| t.id() == id) {
            return t.account(counters, p);
        }
        match self.pending.iter_mut().find(|t| t.id() == id) {
            Some(t) => t.account(counters, sizes_only(p)),
            None => false,
        }
    }

    fn take_running(&mut self, id: RequestId) -> Option<Tracked> {
        let pos = self.running.iter().position(|t| t.id() == id)?;
        Some(self.running.swap_remove(pos))
    }

    /// Removes a finished request and settles its byte counts.
    pub(crate) fn complete(&mut self, id: RequestId) -> Option<Arc<dyn Request>> {
        let mut tracked = self.take_running(id)?;
        let p = tracked.request.progress();
        tracked.account(&mut self.counters, p);
        tracked.settle(&mut self.counters);
        Some(tracked.request)
    }

    /// Removes a failed request. What it transferred stays counted.
    pub(crate) fn fail(&mut self, id: RequestId) -> Option<Arc<dyn Request>> {
        let mut tracked = self.take_running(id)?;
        let p = tracked.request.progress();
        tracked.account(&mut self.counters, p);
        Some(tracked.request)
    }

    /// Empties both collections, running first then pending in queue order.
    pub(crate) fn drain(&mut self) -> Vec<Arc<dyn Request>> {
        self.running
            .drain(..)
            .chain(self.pending.drain(..))
            .map(|t| {
                t.withdrawn.store(true, Ordering::Release);
                t.request
            })
            .collect()
    }

    /// Running requests whose own state has been terminal for two polls
    /// without the queue receiving their completion event.
    pub(crate) fn poll_stale(&mut self) -> Vec<(RequestId, RequestState)> {
        let mut stale = Vec::new();
        for t in self.running.iter_mut() {
            let state = t.request.state();
            if state.is_terminal() {
                t.stale_polls += 1;
                if t.stale_polls >= 2 {
                    stale.push((t.id(), state));
                }
            } else {
                t.stale_polls = 0;
            }
        }
        stale
    }
}
