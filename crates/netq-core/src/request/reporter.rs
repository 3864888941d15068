use tokio::sync::mpsc;

use super::{RequestError, RequestId, TransferProgress};

/// Lifecycle and progress notifications a request sends to its queue.
#[derive(Debug)]
pub enum RequestEvent {
    Started,
    HeadersReceived,
    Progress(TransferProgress),
    Finished,
    Failed(RequestError),
}

/// Handle a running request uses to report into its queue.
///
/// Sending never blocks. Reports after the queue is gone are dropped.
#[derive(Debug, Clone)]
pub struct Reporter {
    id: RequestId,
    tx: mpsc::UnboundedSender<(RequestId, RequestEvent)>,
}

impl Reporter {
    pub(crate) fn new(id: RequestId, tx: mpsc::UnboundedSender<(RequestId, RequestEvent)>) -> Self {
        Self { id, tx }
    }

    /// A reporter not attached to any queue, for driving a request directly.
    pub fn channel(id: RequestId) -> (Self, mpsc::UnboundedReceiver<(RequestId, RequestEvent)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { id, tx }, rx)
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn started(&self) {
        self.send(RequestEvent::Started);
    }

    pub fn headers_received(&self) {
        self.send(RequestEvent::HeadersReceived);
    }

    pub fn progress(&self, progress: TransferProgress) {
        self.send(RequestEvent::Progress(progress));
    }

    pub fn finished(&self) {
        self.send(RequestEvent::Finished);
    }

    pub fn failed(&self, error: RequestError) {
        self.send(RequestEvent::Failed(error));
    }

    fn send(&self, event: RequestEvent) {
        if self.tx.send((self.id, event)).is_err() {
            tracing::trace!(id = %self.id, "queue gone, dropping request event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_reporter_delivers_in_order() {
        let id = RequestId::next();
        let (reporter, mut rx) = Reporter::channel(id);
        reporter.started();
        reporter.progress(TransferProgress {
            bytes_received: 10,
            ..Default::default()
        });
        reporter.finished();

        assert!(matches!(rx.try_recv(), Ok((i, RequestEvent::Started)) if i == id));
        assert!(matches!(
            rx.try_recv(),
            Ok((_, RequestEvent::Progress(p))) if p.bytes_received == 10
        ));
        assert!(matches!(rx.try_recv(), Ok((_, RequestEvent::Finished))));
    }

    #[test]
    fn send_after_receiver_dropped_is_silent() {
        let (reporter, rx) = Reporter::channel(RequestId::next());
        drop(rx);
        reporter.failed(RequestError::Cancelled);
    }
}
