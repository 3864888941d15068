//! Observers that record what the queue told them.

use std::sync::{Arc, Mutex};

use netq_core::{QueueObserver, Request, RequestError, RequestQueue};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seen {
    Started(String),
    Headers(String),
    Finished(String),
    Failed(String),
    Cancelled(String),
    QueueFinished,
}

#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<Seen>>,
    errors: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Seen> {
        self.events.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Seen) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }

    pub fn queue_finished_count(&self) -> usize {
        self.count(|e| *e == Seen::QueueFinished)
    }

    fn push(&self, seen: Seen) {
        self.events.lock().unwrap().push(seen);
    }
}

impl QueueObserver for Recorder {
    fn request_started(&self, request: &dyn Request) {
        self.push(Seen::Started(request.label()));
    }

    fn response_headers_received(&self, request: &dyn Request) {
        self.push(Seen::Headers(request.label()));
    }

    fn request_finished(&self, request: &dyn Request) {
        self.push(Seen::Finished(request.label()));
    }

    fn request_failed(&self, request: &dyn Request, error: &RequestError) {
        self.errors.lock().unwrap().push(error.to_string());
        self.push(Seen::Failed(request.label()));
    }

    fn request_cancelled(&self, request: &dyn Request) {
        self.push(Seen::Cancelled(request.label()));
    }

    fn queue_finished(&self, _queue: &RequestQueue) {
        self.push(Seen::QueueFinished);
    }
}

/// Collects every fraction a progress observer receives.
pub fn fractions() -> (Arc<Mutex<Vec<f64>>>, Arc<dyn netq_core::ProgressObserver>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let observer: Arc<dyn netq_core::ProgressObserver> =
        Arc::new(move |f: f64| sink.lock().unwrap().push(f));
    (seen, observer)
}
