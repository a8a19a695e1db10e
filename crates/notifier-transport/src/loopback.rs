//! In-process transport for dry runs and tests.
//!
//! Nothing leaves the process: sends are recorded and optionally
//! acknowledged right away on the event hub.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use notifier_core::{
    AckLevel, ChatInfo, EventHub, MessageId, OutboundMessage, Transport, TransportError,
    TransportEvent,
};

/// Session blob the loopback hands out when started without one.
const FRESH_SESSION: &[u8] = b"loopback-session";

/// Transport that delivers to an in-memory log.
pub struct LoopbackTransport {
    hub: Arc<EventHub>,
    sent: Mutex<Vec<OutboundMessage>>,
    chats: HashMap<String, ChatInfo>,
    ack_level: Option<AckLevel>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl LoopbackTransport {
    /// Start a loopback session.
    ///
    /// Emits `Authenticated`, `SessionUpdated` and `Ready` immediately. The
    /// session blob is the one passed in, or a fresh one.
    #[must_use]
    pub fn start(session: Option<Bytes>) -> Self {
        let hub = Arc::new(EventHub::new());
        hub.push(TransportEvent::Authenticated);
        hub.push(TransportEvent::SessionUpdated(
            session.unwrap_or_else(|| Bytes::from_static(FRESH_SESSION)),
        ));
        hub.push(TransportEvent::Ready);
        Self::with_hub(hub)
    }

    /// Wrap an existing hub without emitting anything.
    ///
    /// Tests drive the lifecycle by pushing events onto the hub.
    #[must_use]
    pub fn with_hub(hub: Arc<EventHub>) -> Self {
        Self {
            hub,
            sent: Mutex::new(Vec::new()),
            chats: HashMap::new(),
            ack_level: Some(AckLevel::Server),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Acknowledge each send at `level`, or never when `None`.
    #[must_use]
    pub fn with_ack_level(mut self, level: Option<AckLevel>) -> Self {
        self.ack_level = level;
        self
    }

    /// Make a chat known to `find_chat`.
    #[must_use]
    pub fn with_chat(mut self, chat: ChatInfo) -> Self {
        self.chats.insert(chat.id.clone(), chat);
        self
    }

    /// The event hub this transport emits on.
    #[must_use]
    pub fn hub(&self) -> Arc<EventHub> {
        Arc::clone(&self.hub)
    }

    /// Messages sent so far, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether `shutdown` has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn subscribe(&self) -> BoxStream<'static, TransportEvent> {
        self.hub.subscribe()
    }

    async fn send_text(&self, chat_id: &str, body: &str) -> Result<MessageId, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        let id = MessageId::new(format!(
            "loopback-{}",
            self.next_id.fetch_add(1, Ordering::SeqCst)
        ));
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(OutboundMessage {
                chat_id: chat_id.to_string(),
                body: body.to_string(),
            });
        tracing::info!(chat_id, message_id = %id, body, "Loopback send");

        if let Some(level) = self.ack_level {
            self.hub.push(TransportEvent::MessageAck {
                id: id.clone(),
                level,
            });
        }
        Ok(id)
    }

    async fn find_chat(&self, chat_id: &str) -> Result<Option<ChatInfo>, TransportError> {
        Ok(self.chats.get(chat_id).cloned())
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.hub.push_closed();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    #[tokio::test]
    async fn test_start_emits_lifecycle() {
        let transport = LoopbackTransport::start(None);
        let events: Vec<_> = transport.subscribe().take(3).collect().await;
        assert_eq!(
            events,
            vec![
                TransportEvent::Authenticated,
                TransportEvent::SessionUpdated(Bytes::from_static(FRESH_SESSION)),
                TransportEvent::Ready,
            ]
        );
    }

    #[tokio::test]
    async fn test_send_records_and_acks() {
        let transport = LoopbackTransport::start(Some(Bytes::from_static(b"stored")));
        let id = transport.send_text("123@g.us", "hello").await.unwrap();

        assert_eq!(transport.sent().len(), 1);
        assert_eq!(transport.sent()[0].body, "hello");
        assert!(transport.hub().history().contains(&TransportEvent::MessageAck {
            id,
            level: AckLevel::Server,
        }));
    }

    #[tokio::test]
    async fn test_shutdown_closes_stream_and_rejects_sends() {
        let transport = LoopbackTransport::with_hub(Arc::new(EventHub::new()));
        let mut events = transport.subscribe();

        tokio_test::assert_ok!(transport.shutdown().await);
        tokio_test::assert_ok!(transport.shutdown().await);

        assert!(transport.is_shut_down());
        assert_eq!(events.next().await, None);
        assert!(matches!(
            transport.send_text("x", "y").await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_find_chat() {
        let transport = LoopbackTransport::with_hub(Arc::new(EventHub::new())).with_chat(ChatInfo {
            id: "123@g.us".to_string(),
            name: "Family".to_string(),
            is_group: true,
        });

        assert_eq!(
            transport.find_chat("123@g.us").await.unwrap().unwrap().name,
            "Family"
        );
        assert!(transport.find_chat("999@c.us").await.unwrap().is_none());
    }
}
