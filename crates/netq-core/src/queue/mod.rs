//! Concurrency-bounded request queue.
//!
//! Requests are added to a FIFO pending list and promoted into the running
//! set up to `max_concurrent_requests` at a time. Their byte counts are
//! folded into two aggregate fractions (upload, download) and their
//! lifecycle events are re-emitted to a [`QueueObserver`].
//!
//! All bookkeeping lives behind one mutex. Request events arrive over a
//! channel and are applied by a single driver task, which is also the only
//! place observer callbacks and `Request::start` are invoked; nothing calls
//! into a request or an observer while the lock is held.

mod driver;
mod error;
mod guard;
mod limit;
mod observer;
mod progress;
mod state;

use std::any::Any;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::config::NetqConfig;
use crate::request::{Request, RequestEvent, RequestId};

use self::driver::{Command, DriverInputs};
use self::guard::BudgetedGuard;
use self::observer::{Notification, Observers};
use self::state::QueueState;

pub use error::QueueError;
pub use limit::ConcurrencyLimit;
pub use observer::{ProgressObserver, QueueObserver};
pub use progress::QueueProgress;
pub use state::QueueStatus;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);
const DEFAULT_BOOKKEEPING_BUDGET: Duration = Duration::from_millis(5);

pub(crate) struct Shared {
    state: Mutex<QueueState>,
    status_tx: watch::Sender<QueueStatus>,
    events_tx: mpsc::UnboundedSender<(RequestId, RequestEvent)>,
    commands_tx: mpsc::UnboundedSender<Command>,
    poll_interval: Duration,
    budget: Duration,
}

impl Shared {
    fn lock(&self) -> BudgetedGuard<'_> {
        let guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        BudgetedGuard::new(guard, self.budget)
    }

    /// Publishes the current status to `wait()`ers. Called after observers
    /// have been notified, so a resolved `wait()` sees every callback of the run.
    fn publish_status(&self) {
        let status = self.lock().status;
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

/// A queue of [`Request`]s run with bounded concurrency.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct RequestQueue {
    shared: Arc<Shared>,
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestQueue {
    /// An empty, idle queue: unbounded concurrency, cancel-on-failure on,
    /// accurate progress off.
    pub fn new() -> Self {
        Self::build(
            ConcurrencyLimit::unbounded(),
            true,
            false,
            DEFAULT_POLL_INTERVAL,
            DEFAULT_BOOKKEEPING_BUDGET,
        )
    }

    pub fn with_config(cfg: &NetqConfig) -> Self {
        Self::build(
            ConcurrencyLimit::new(cfg.max_concurrent_requests),
            cfg.cancel_all_on_failure,
            cfg.show_accurate_progress,
            cfg.status_poll_interval(),
            cfg.bookkeeping_budget(),
        )
    }

    fn build(
        limit: ConcurrencyLimit,
        cancel_on_failure: bool,
        accurate_progress: bool,
        poll_interval: Duration,
        budget: Duration,
    ) -> Self {
        let (events_tx, events) = mpsc::unbounded_channel();
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (status_tx, _) = watch::channel(QueueStatus::Idle);
        let inputs = DriverInputs { events, commands };
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::new(
                    limit,
                    cancel_on_failure,
                    accurate_progress,
                    Some(inputs),
                )),
                status_tx,
                events_tx,
                commands_tx,
                poll_interval,
                budget,
            }),
        }
    }

    /// Appends `request` to the pending list.
    ///
    /// Sizes the request already knows count toward the totals immediately.
    /// On an active queue the request is picked up by the next scheduling
    /// pass; adding to a queue whose run has ended starts a fresh run's
    /// bookkeeping.
    pub fn add(&self, request: Arc<dyn Request>) -> Result<(), QueueError> {
        let id = request.id();
        if self.shared.lock().contains(id) {
            return Err(QueueError::DuplicateRequest(id));
        }
        request.rearm();
        let active = {
            let mut st = self.shared.lock();
            st.push_pending(request)?;
            st.status == QueueStatus::Active
        };
        tracing::debug!(%id, active, "request queued");
        if active {
            let _ = self.shared.commands_tx.send(Command::Schedule);
        }
        self.shared.publish_status();
        Ok(())
    }

    /// Starts a run. Must be called within a Tokio runtime the first time,
    /// since it spawns the queue's driver task.
    pub fn start(&self) -> Result<(), QueueError> {
        let runtime = tokio::runtime::Handle::try_current().ok();
        let (generation, spawn) = {
            let mut st = self.shared.lock();
            if st.status == QueueStatus::Active {
                return Err(QueueError::AlreadyRunning);
            }
            if st.driver_inputs.is_some() && runtime.is_none() {
                return Err(QueueError::NoRuntime);
            }
            let generation = st.begin_run()?;
            let spawn = match runtime {
                Some(handle) => st.driver_inputs.take().map(|inputs| (handle, inputs)),
                None => None,
            };
            tracing::info!(
                pending = st.pending_len(),
                limit = ?st.limit.max(),
                accurate_progress = st.accurate_progress,
                "queue run {} started",
                generation
            );
            (generation, spawn)
        };

        if let Some((handle, inputs)) = spawn {
            handle.spawn(driver::run(
                Arc::downgrade(&self.shared),
                inputs,
                self.shared.poll_interval,
            ));
        }
        let _ = self.shared.commands_tx.send(Command::Start { generation });
        self.shared.publish_status();
        Ok(())
    }

    /// Cancels every pending and running request and clears both lists.
    ///
    /// Returns without waiting for requests to stop. Observers get one
    /// `request_cancelled` per request and nothing else from them. No-op on
    /// an empty queue.
    pub fn cancel_all_requests(&self) {
        let (victims, driver_running, observers) = {
            let mut st = self.shared.lock();
            let victims = st.drain();
            if st.status == QueueStatus::Active {
                st.status = QueueStatus::Cancelled;
            }
            (victims, st.driver_inputs.is_none(), st.observers.clone())
        };

        if !victims.is_empty() {
            tracing::info!(count = victims.len(), "cancelling all requests");
            for request in &victims {
                request.cancel();
            }
            let notes: Vec<_> = victims.into_iter().map(Notification::Cancelled).collect();
            if driver_running {
                let _ = self.shared.commands_tx.send(Command::Notify(notes));
            } else {
                observers.deliver(self, notes);
            }
        }
        self.shared.publish_status();
    }

    /// Returns an ended queue to `Idle` with zeroed counters.
    pub fn reset(&self) -> Result<(), QueueError> {
        self.shared.lock().reset()?;
        self.shared.publish_status();
        Ok(())
    }

    /// Resolves once the current run ends, with how it ended.
    /// Returns the current status at once if the queue is not active.
    pub async fn wait(&self) -> QueueStatus {
        let mut rx = self.shared.status_tx.subscribe();
        let ended = match rx.wait_for(|s| *s != QueueStatus::Active).await {
            Ok(status) => *status,
            Err(_) => self.status(),
        };
        ended
    }

    pub fn status(&self) -> QueueStatus {
        self.shared.lock().status
    }

    pub fn progress(&self) -> QueueProgress {
        self.shared.lock().counters
    }

    pub fn bytes_uploaded_so_far(&self) -> u64 {
        self.progress().bytes_uploaded_so_far
    }

    pub fn total_bytes_to_upload(&self) -> u64 {
        self.progress().total_bytes_to_upload
    }

    pub fn bytes_downloaded_so_far(&self) -> u64 {
        self.progress().bytes_downloaded_so_far
    }

    pub fn total_bytes_to_download(&self) -> u64 {
        self.progress().total_bytes_to_download
    }

    pub fn pending_count(&self) -> usize {
        self.shared.lock().pending_len()
    }

    pub fn running_count(&self) -> usize {
        self.shared.lock().running_len()
    }

    /// Total requests still in the queue (pending plus running).
    pub fn request_count(&self) -> usize {
        let st = self.shared.lock();
        st.pending_len() + st.running_len()
    }

    pub fn max_concurrent_requests(&self) -> usize {
        self.shared.lock().limit.max().unwrap_or(0)
    }

    /// Sets the concurrency bound (0 = unbounded). Raising it on an active
    /// queue promotes waiting requests right away; lowering it lets running
    /// requests finish without starting new ones until under the bound.
    pub fn set_max_concurrent_requests(&self, max: usize) {
        let active = {
            let mut st = self.shared.lock();
            st.limit = ConcurrencyLimit::new(max);
            st.status == QueueStatus::Active
        };
        if active {
            let _ = self.shared.commands_tx.send(Command::Schedule);
        }
    }

    pub fn should_cancel_all_requests_on_failure(&self) -> bool {
        self.shared.lock().cancel_on_failure
    }

    pub fn set_should_cancel_all_requests_on_failure(&self, cancel: bool) {
        self.shared.lock().cancel_on_failure = cancel;
    }

    pub fn show_accurate_progress(&self) -> bool {
        self.shared.lock().accurate_progress
    }

    /// Takes effect at the next `start()`.
    pub fn set_show_accurate_progress(&self, accurate: bool) {
        self.shared.lock().accurate_progress = accurate;
    }

    pub fn set_observer(&self, observer: Arc<dyn QueueObserver>) {
        self.shared.lock().observers.delegate = Some(observer);
    }

    pub fn set_upload_progress_observer(&self, observer: Arc<dyn ProgressObserver>) {
        self.shared.lock().observers.upload = Some(observer);
    }

    pub fn set_download_progress_observer(&self, observer: Arc<dyn ProgressObserver>) {
        self.shared.lock().observers.download = Some(observer);
    }

    pub fn clear_observers(&self) {
        self.shared.lock().observers = Observers::default();
    }

    /// Attaches caller-defined data. The queue never looks at it.
    pub fn set_user_info<T: Any + Send + Sync>(&self, info: T) {
        self.shared.lock().user_info = Some(Arc::new(info));
    }

    /// The attached data, if any was set and it is a `T`.
    pub fn user_info<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let info = self.shared.lock().user_info.clone()?;
        info.downcast::<T>().ok()
    }
}
