//! Observer interfaces the queue reports to.

use std::sync::Arc;

use crate::request::{Request, RequestError};

use super::progress::QueueProgress;
use super::RequestQueue;

/// Lifecycle callbacks. Every method is optional.
///
/// Callbacks are delivered one at a time from the queue's driver task, never
/// while the queue lock is held, so an observer may call back into the queue.
pub trait QueueObserver: Send + Sync {
    fn request_started(&self, _request: &dyn Request) {}

    fn response_headers_received(&self, _request: &dyn Request) {}

    fn request_finished(&self, _request: &dyn Request) {}

    /// Fires exactly once per failed request.
    fn request_failed(&self, _request: &dyn Request, _error: &RequestError) {}

    /// The queue cancelled this request (explicit cancel or cancel-on-failure).
    fn request_cancelled(&self, _request: &dyn Request) {}

    /// Both collections drained without a cascading failure. Once per run.
    fn queue_finished(&self, _queue: &RequestQueue) {}
}

/// Receives an aggregate fraction in [0.0, 1.0], e.g. to drive a progress bar.
pub trait ProgressObserver: Send + Sync {
    fn set_progress(&self, fraction: f64);
}

impl<F> ProgressObserver for F
where
    F: Fn(f64) + Send + Sync,
{
    fn set_progress(&self, fraction: f64) {
        self(fraction)
    }
}

#[derive(Clone, Default)]
pub(crate) struct Observers {
    pub(crate) delegate: Option<Arc<dyn QueueObserver>>,
    pub(crate) upload: Option<Arc<dyn ProgressObserver>>,
    pub(crate) download: Option<Arc<dyn ProgressObserver>>,
}

/// Something to tell the observers, collected under the lock and delivered after it.
pub(crate) enum Notification {
    Started(Arc<dyn Request>),
    HeadersReceived(Arc<dyn Request>),
    Finished(Arc<dyn Request>),
    Failed(Arc<dyn Request>, RequestError),
    Cancelled(Arc<dyn Request>),
    QueueFinished,
    Progress(QueueProgress),
}

impl Observers {
    pub(crate) fn deliver(&self, queue: &RequestQueue, notes: Vec<Notification>) {
        for note in notes {
            match note {
                Notification::Progress(p) => {
                    if let Some(o) = &self.upload {
                        o.set_progress(p.upload_fraction());
                    }
                    if let Some(o) = &self.download {
                        o.set_progress(p.download_fraction());
                    }
                }
                note => {
                    let Some(d) = &self.delegate else {
                        continue;
                    };
                    match note {
                        Notification::Started(r) => d.request_started(r.as_ref()),
                        Notification::HeadersReceived(r) => d.response_headers_received(r.as_ref()),
                        Notification::Finished(r) => d.request_finished(r.as_ref()),
                        Notification::Failed(r, e) => d.request_failed(r.as_ref(), &e),
                        Notification::Cancelled(r) => d.request_cancelled(r.as_ref()),
                        Notification::QueueFinished => d.queue_finished(queue),
                        Notification::Progress(_) => {}
                    }
                }
            }
        }
    }
}
