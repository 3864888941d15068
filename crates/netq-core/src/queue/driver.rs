//! The queue's driver task: the single execution context that applies request
//! events, runs scheduling passes, polls request status, and calls observers.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::request::{Reporter, Request, RequestError, RequestEvent, RequestId, RequestState};

use super::observer::Notification;
use super::{QueueStatus, RequestQueue, Shared};

/// Requests promoted per lock hold; the rest go to a follow-up pass.
pub(crate) const MAX_PROMOTIONS_PER_PASS: usize = 64;

pub(crate) enum Command {
    /// Begin run `generation`: probe sizes if asked, then schedule.
    Start { generation: u64 },
    Schedule,
    /// Deliver notifications produced outside the driver (cancellation).
    Notify(Vec<Notification>),
}

pub(crate) struct DriverInputs {
    pub(crate) events: mpsc::UnboundedReceiver<(RequestId, RequestEvent)>,
    pub(crate) commands: mpsc::UnboundedReceiver<Command>,
}

/// Runs until the queue is dropped.
pub(crate) async fn run(queue: Weak<Shared>, mut inputs: DriverInputs, poll_every: Duration) {
    let mut ticker = tokio::time::interval(poll_every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::debug!(poll_ms = poll_every.as_millis() as u64, "queue driver started");

    loop {
        tokio::select! {
            biased;
            Some(cmd) = inputs.commands.recv() => {
                let Some(shared) = queue.upgrade() else { break };
                shared.handle_command(cmd).await;
            }
            Some((id, event)) = inputs.events.recv() => {
                let Some(shared) = queue.upgrade() else { break };
                shared.handle_event(id, event);
            }
            _ = ticker.tick() => {
                let Some(shared) = queue.upgrade() else { break };
                shared.poll_status();
            }
        }
    }
    tracing::debug!("queue driver stopped");
}

impl Shared {
    fn queue_handle(self: &Arc<Self>) -> RequestQueue {
        RequestQueue {
            shared: Arc::clone(self),
        }
    }

    fn notify(self: &Arc<Self>, notes: Vec<Notification>) {
        if notes.is_empty() {
            return;
        }
        let observers = self.lock().observers.clone();
        observers.deliver(&self.queue_handle(), notes);
    }

    async fn handle_command(self: &Arc<Self>, cmd: Command) {
        match cmd {
            Command::Start { generation } => self.begin(generation).await,
            Command::Schedule => self.schedule(),
            Command::Notify(notes) => self.notify(notes),
        }
        self.publish_status();
    }

    async fn begin(self: &Arc<Self>, generation: u64) {
        let candidates = {
            let st = self.lock();
            if !st.is_current_run(generation) {
                return;
            }
            if st.accurate_progress {
                st.probe_candidates()
            } else {
                Vec::new()
            }
        };

        if !candidates.is_empty() {
            probe_sizes(candidates).await;
        }

        let notes = {
            let mut st = self.lock();
            if !st.is_current_run(generation) {
                return;
            }
            st.warming_up = false;
            if st.refresh_pending() {
                vec![Notification::Progress(st.counters)]
            } else {
                Vec::new()
            }
        };
        self.notify(notes);
        self.schedule();
    }

    /// Promotes pending requests into free slots and finishes the run once drained.
    pub(crate) fn schedule(self: &Arc<Self>) {
        let (to_start, more, finished) = {
            let mut st = self.lock();
            let to_start = st.promote(MAX_PROMOTIONS_PER_PASS);
            let more = st.wants_more_promotions();
            let finished = st.try_finish();
            (to_start, more, finished)
        };

        for promoted in to_start {
            let request = &promoted.request;
            if promoted.withdrawn() {
                tracing::debug!(id = %request.id(), "not starting {}: drained", request.label());
                continue;
            }
            tracing::debug!(id = %request.id(), "starting {}", request.label());
            request.start(Reporter::new(request.id(), self.events_tx.clone()));
        }
        if more {
            let _ = self.commands_tx.send(Command::Schedule);
        }
        if finished {
            tracing::info!("queue finished");
            self.notify(vec![Notification::QueueFinished]);
        }
    }

    fn handle_event(self: &Arc<Self>, id: RequestId, event: RequestEvent) {
        match event {
            RequestEvent::Started | RequestEvent::HeadersReceived => {
                let request = self.lock().running_request(id);
                let Some(request) = request else {
                    tracing::trace!(%id, "event from untracked request ignored");
                    return;
                };
                let note = match event {
                    RequestEvent::Started => Notification::Started(request),
                    _ => Notification::HeadersReceived(request),
                };
                self.notify(vec![note]);
            }
            RequestEvent::Progress(p) => {
                let counters = {
                    let mut st = self.lock();
                    st.record_progress(id, p).then_some(st.counters)
                };
                if let Some(counters) = counters {
                    self.notify(vec![Notification::Progress(counters)]);
                }
            }
            RequestEvent::Finished => {
                let done = {
                    let mut st = self.lock();
                    st.complete(id).map(|r| (r, st.counters))
                };
                let Some((request, counters)) = done else {
                    tracing::trace!(%id, "finish from untracked request ignored");
                    return;
                };
                tracing::debug!(%id, "{} finished", request.label());
                self.notify(vec![
                    Notification::Progress(counters),
                    Notification::Finished(request),
                ]);
                self.schedule();
            }
            RequestEvent::Failed(error) => self.fail_request(id, error),
        }
        self.publish_status();
    }

    fn fail_request(self: &Arc<Self>, id: RequestId, error: RequestError) {
        let (request, cascade, victims) = {
            let mut st = self.lock();
            let Some(request) = st.fail(id) else {
                tracing::trace!(%id, "failure from untracked request ignored: {}", error);
                return;
            };
            let cascade = st.cancel_on_failure;
            let victims = if cascade {
                st.status = QueueStatus::Failed;
                st.drain()
            } else {
                Vec::new()
            };
            (request, cascade, victims)
        };

        tracing::warn!(%id, "{} failed: {}", request.label(), error);
        if cascade {
            tracing::info!(
                cancelled = victims.len(),
                "cancelling remaining requests after failure"
            );
        }
        for victim in &victims {
            victim.cancel();
        }

        let mut notes = vec![Notification::Failed(request, error)];
        notes.extend(victims.into_iter().map(Notification::Cancelled));
        self.notify(notes);

        if !cascade {
            self.schedule();
        }
    }

    /// Liveness backstop: complete requests that ended without signalling, then schedule.
    fn poll_status(self: &Arc<Self>) {
        let stale = self.lock().poll_stale();
        for (id, state) in stale {
            tracing::warn!(%id, ?state, "status poll found a request that ended without signalling");
            let event = match state {
                RequestState::Finished => RequestEvent::Finished,
                RequestState::Cancelled => RequestEvent::Failed(RequestError::Cancelled),
                _ => RequestEvent::Failed(RequestError::Unreported),
            };
            self.handle_event(id, event);
        }
        self.schedule();
        self.publish_status();
    }
}

/// Runs every size probe on the blocking pool and waits for all of them.
async fn probe_sizes(requests: Vec<Arc<dyn Request>>) {
    tracing::debug!(count = requests.len(), "probing request sizes");
    let mut probes = tokio::task::JoinSet::new();
    for request in requests {
        probes.spawn_blocking(move || {
            let result = request.probe_size();
            (request, result)
        });
    }
    while let Some(joined) = probes.join_next().await {
        match joined {
            Ok((request, Err(e))) => {
                tracing::warn!(id = %request.id(), "size probe for {} failed: {}", request.label(), e);
            }
            Ok((_, Ok(()))) => {}
            Err(e) => tracing::warn!("size probe task join: {}", e),
        }
    }
}
