//! Broadcast + history hub for transport events.

use std::{
    collections::VecDeque,
    sync::{PoisonError, RwLock},
};

use futures::{StreamExt, future};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};

use crate::TransportEvent;

/// Default history size limit (100 MB).
const HISTORY_BYTES: usize = 100_000 * 1024;

#[derive(Clone)]
struct StoredEvent {
    event: TransportEvent,
    bytes: usize,
}

struct Inner {
    history: VecDeque<StoredEvent>,
    total_bytes: usize,
}

/// Event hub with broadcast and history support.
///
/// Transports start emitting as soon as they connect, usually before the
/// job and the session persister subscribe. Subscribers therefore receive
/// the retained history first, then live events.
pub struct EventHub {
    inner: RwLock<Inner>,
    sender: broadcast::Sender<TransportEvent>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    /// Create a new event hub.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            inner: RwLock::new(Inner {
                history: VecDeque::with_capacity(32),
                total_bytes: 0,
            }),
            sender,
        }
    }

    /// Push an event to both live subscribers and history.
    pub fn push(&self, event: TransportEvent) {
        let bytes = event.approx_bytes();

        // Held across the send so `subscribe` never sees an event in neither
        // the snapshot nor the live receiver.
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        while inner.total_bytes.saturating_add(bytes) > HISTORY_BYTES {
            if let Some(front) = inner.history.pop_front() {
                inner.total_bytes = inner.total_bytes.saturating_sub(front.bytes);
            } else {
                break;
            }
        }
        inner.history.push_back(StoredEvent {
            event: event.clone(),
            bytes,
        });
        inner.total_bytes = inner.total_bytes.saturating_add(bytes);
        let _ = self.sender.send(event);
    }

    /// Push the terminal `Closed` event.
    pub fn push_closed(&self) {
        self.push(TransportEvent::Closed);
    }

    /// Get a snapshot of the history.
    #[must_use]
    pub fn history(&self) -> Vec<TransportEvent> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .iter()
            .map(|s| s.event.clone())
            .collect()
    }

    /// Whether the terminal `Closed` event has been pushed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .back()
            .is_some_and(|s| s.event == TransportEvent::Closed)
    }

    /// Stream that yields history first, then live events, ending before `Closed`.
    #[must_use]
    pub fn subscribe(&self) -> futures::stream::BoxStream<'static, TransportEvent> {
        let (history, rx) = {
            let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            let history: Vec<TransportEvent> =
                inner.history.iter().map(|s| s.event.clone()).collect();
            (history, self.sender.subscribe())
        };

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).filter_map(|res| async move {
            match res {
                Ok(event) => Some(event),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event subscriber lagged, events dropped");
                    None
                }
            }
        });

        hist.chain(live)
            .take_while(|event| future::ready(*event != TransportEvent::Closed))
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AckLevel, MessageId};

    #[tokio::test]
    async fn test_late_subscriber_sees_history() {
        let hub = EventHub::new();
        hub.push(TransportEvent::Authenticated);
        hub.push(TransportEvent::Ready);

        let mut stream = hub.subscribe();
        assert_eq!(stream.next().await, Some(TransportEvent::Authenticated));
        assert_eq!(stream.next().await, Some(TransportEvent::Ready));

        hub.push(TransportEvent::MessageAck {
            id: MessageId::new("m1"),
            level: AckLevel::Server,
        });
        assert!(matches!(
            stream.next().await,
            Some(TransportEvent::MessageAck { .. })
        ));
    }

    #[tokio::test]
    async fn test_stream_ends_at_closed() {
        let hub = EventHub::new();
        let mut stream = hub.subscribe();
        hub.push(TransportEvent::Ready);
        hub.push_closed();

        assert_eq!(stream.next().await, Some(TransportEvent::Ready));
        assert_eq!(stream.next().await, None);
        assert!(hub.is_closed());
    }

    #[test]
    fn test_history_is_bounded() {
        let hub = EventHub::new();
        let big = bytes::Bytes::from(vec![0u8; HISTORY_BYTES / 2]);
        for _ in 0..4 {
            hub.push(TransportEvent::SessionUpdated(big.clone()));
        }
        let total: usize = hub.history().iter().map(TransportEvent::approx_bytes).sum();
        assert!(total <= HISTORY_BYTES);
    }
}
