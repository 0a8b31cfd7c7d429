//! Outbound sinks a [`Channel`](super::Channel) writes into.

use futures::Stream;
use ssenotify_core::NotificationEvent;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;

/// A writable, cancelable output sink for one subscriber connection.
///
/// `send` must not block: the hub calls it while holding the session lock.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, event: NotificationEvent) -> Result<(), TransportError>;

    /// Close the sink. The reading side must observe end-of-stream promptly.
    fn close(&self);
}

/// Create an unbounded, ordered event queue.
///
/// The [`QueueTransport`] half is registered with the hub; the
/// [`EventQueue`] half is drained by the task that owns the connection.
#[must_use]
pub fn event_queue() -> (QueueTransport, EventQueue) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    (
        QueueTransport {
            sender,
            cancel: cancel.clone(),
        },
        EventQueue { receiver, cancel },
    )
}

/// Write half of [`event_queue`]
#[derive(Debug, Clone)]
pub struct QueueTransport {
    sender: mpsc::UnboundedSender<NotificationEvent>,
    cancel: CancellationToken,
}

impl Transport for QueueTransport {
    fn send(&self, event: NotificationEvent) -> Result<(), TransportError> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.sender.send(event).map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        self.cancel.cancel();
    }
}

/// Read half of [`event_queue`]
#[derive(Debug)]
pub struct EventQueue {
    receiver: mpsc::UnboundedReceiver<NotificationEvent>,
    cancel: CancellationToken,
}

impl EventQueue {
    /// Wait for the next event.
    ///
    /// Returns `None` once the transport is closed; events still queued at
    /// that point are discarded.
    pub async fn recv(&mut self) -> Option<NotificationEvent> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            event = self.receiver.recv() => event,
        }
    }

    /// Token cancelled when the transport is closed
    #[must_use]
    pub fn closed_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Turn the queue into a stream that ends when the transport closes
    pub fn into_stream(self) -> impl Stream<Item = NotificationEvent> + Send + 'static {
        futures::stream::unfold(self, |mut queue| async move {
            queue.recv().await.map(|event| (event, queue))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use ssenotify_core::SessionId;
    use std::time::Duration;

    fn event(payload: &str, sequence: u64) -> NotificationEvent {
        NotificationEvent::new(SessionId::parse("abc123").unwrap(), payload, sequence)
    }

    #[tokio::test]
    async fn test_queue_preserves_order() {
        let (transport, mut queue) = event_queue();
        transport.send(event("a", 1)).unwrap();
        transport.send(event("b", 2)).unwrap();

        assert_eq!(queue.recv().await.unwrap().payload, "a");
        assert_eq!(queue.recv().await.unwrap().payload, "b");
    }

    #[tokio::test]
    async fn test_close_ends_pending_recv() {
        let (transport, mut queue) = event_queue();

        let waiter = tokio::spawn(async move { queue.recv().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        transport.close();

        let received = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(received.is_none());
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (transport, queue) = event_queue();
        transport.close();

        assert!(queue.is_closed());
        assert_eq!(transport.send(event("late", 1)), Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn test_send_after_reader_dropped_fails() {
        let (transport, queue) = event_queue();
        drop(queue);

        assert_eq!(transport.send(event("orphan", 1)), Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn test_stream_ends_on_close() {
        let (transport, queue) = event_queue();
        transport.send(event("only", 1)).unwrap();

        let mut stream = Box::pin(queue.into_stream());
        assert_eq!(stream.next().await.unwrap().sequence, 1);

        transport.close();
        assert!(stream.next().await.is_none());
    }
}
