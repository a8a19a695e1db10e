//! WebSocket client for a messaging bridge.
//!
//! The bridge owns the actual network session (browser, login, encryption).
//! We speak the JSON protocol in [`crate::protocol`]: one writer task drains
//! outbound frames, one reader task dispatches inbound frames either to the
//! request that is waiting for them or onto the event hub.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt, stream::BoxStream};
use notifier_core::{ChatInfo, EventHub, MessageId, Transport, TransportError, TransportEvent};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::{
    LaunchOptions,
    protocol::{ClientMessage, ServerMessage},
};

/// Default time to wait for a reply to a bridge request.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How long `shutdown` waits for the close frame to be flushed.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<ServerMessage>>>>;

/// Bridge connection settings.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// WebSocket URL of the bridge (`ws://` or `wss://`).
    pub url: String,
    /// Browser launch options forwarded in the hello frame.
    pub launch: LaunchOptions,
    /// Resolve `launch.executable_path` on this host before connecting.
    /// Only meaningful when the bridge runs on the same machine.
    pub resolve_launch: bool,
    /// Time to wait for a reply to a request.
    pub request_timeout: Duration,
}

impl BridgeConfig {
    /// Create a config with default launch options and request timeout.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            launch: LaunchOptions::default(),
            resolve_launch: false,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Transport backed by a messaging bridge over WebSocket.
pub struct BridgeTransport {
    hub: Arc<EventHub>,
    outgoing: mpsc::UnboundedSender<ClientMessage>,
    pending: Pending,
    next_request_id: AtomicU64,
    request_timeout: Duration,
    closing: Arc<AtomicBool>,
    tasks: Mutex<Option<(JoinHandle<()>, JoinHandle<()>)>>,
}

impl BridgeTransport {
    /// Connect to the bridge and start the session.
    ///
    /// `session` is the stored blob to resume; `None` asks the bridge for a
    /// fresh login, which surfaces as `TransportEvent::LoginChallenge`.
    ///
    /// # Errors
    /// Returns error if the bridge is unreachable, or if `resolve_launch` is
    /// set and the executable cannot be found locally.
    pub async fn connect(
        config: BridgeConfig,
        session: Option<Bytes>,
    ) -> Result<Self, TransportError> {
        let launch = if config.resolve_launch {
            config.launch.clone().resolve().await?
        } else {
            config.launch.clone()
        };

        tracing::info!(url = %config.url, resume = session.is_some(), "Connecting to bridge");
        let (ws, _) = connect_async(&config.url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        let hub = Arc::new(EventHub::new());
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let closing = Arc::new(AtomicBool::new(false));
        let (outgoing, mut rx) = mpsc::unbounded_channel::<ClientMessage>();

        // Writer: forward outbound frames until closed
        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let is_close = matches!(msg, ClientMessage::Close);
                let json = match serde_json::to_string(&msg) {
                    Ok(j) => j,
                    Err(e) => {
                        tracing::error!("Failed to serialize bridge message: {e}");
                        continue;
                    }
                };
                if sink.send(Message::Text(json.into())).await.is_err() || is_close {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // Reader: the single dispatch loop
        let reader = {
            let hub = Arc::clone(&hub);
            let pending = Arc::clone(&pending);
            let closing = Arc::clone(&closing);
            tokio::spawn(async move {
                while let Some(frame) = stream.next().await {
                    let text = match frame {
                        Ok(Message::Text(text)) => text.as_str().to_owned(),
                        Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                            Ok(s) => s,
                            Err(_) => continue,
                        },
                        Ok(Message::Close(_)) => break,
                        Ok(_) => continue,
                        Err(e) => {
                            tracing::error!("Bridge WebSocket error: {e}");
                            break;
                        }
                    };
                    dispatch(&text, &hub, &pending);
                }

                // Dropping the senders fails every waiting request.
                pending.lock().unwrap_or_else(PoisonError::into_inner).clear();
                if !closing.load(Ordering::SeqCst) {
                    hub.push(TransportEvent::Disconnected(
                        "bridge connection closed".to_string(),
                    ));
                }
                hub.push_closed();
            })
        };

        outgoing
            .send(ClientMessage::hello(session.as_deref(), launch))
            .map_err(|_| TransportError::Closed)?;

        Ok(Self {
            hub,
            outgoing,
            pending,
            next_request_id: AtomicU64::new(1),
            request_timeout: config.request_timeout,
            closing,
            tasks: Mutex::new(Some((writer, reader))),
        })
    }

    async fn request(
        &self,
        build: impl FnOnce(u64) -> ClientMessage,
    ) -> Result<ServerMessage, TransportError> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending_map().insert(request_id, tx);

        if self.outgoing.send(build(request_id)).is_err() {
            self.pending_map().remove(&request_id);
            return Err(TransportError::Closed);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(ServerMessage::RequestFailed { error, .. })) => {
                Err(TransportError::Rejected(error))
            }
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                self.pending_map().remove(&request_id);
                Err(TransportError::Timeout(self.request_timeout))
            }
        }
    }

    fn pending_map(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<ServerMessage>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Route one inbound frame to its waiting request or onto the hub.
fn dispatch(text: &str, hub: &EventHub, pending: &Pending) {
    let msg: ServerMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!("Invalid bridge message: {e}");
            return;
        }
    };

    if let Some(request_id) = msg.request_id() {
        let waiter = pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&request_id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(msg);
            }
            None => tracing::warn!(request_id, "No pending request for bridge reply"),
        }
        return;
    }

    match msg.into_event() {
        Ok(Some(event)) => hub.push(event),
        Ok(None) => {}
        Err(e) => tracing::warn!("Dropped bridge event: {e}"),
    }
}

#[async_trait]
impl Transport for BridgeTransport {
    fn subscribe(&self) -> BoxStream<'static, TransportEvent> {
        self.hub.subscribe()
    }

    async fn send_text(&self, chat_id: &str, body: &str) -> Result<MessageId, TransportError> {
        let reply = self
            .request(|request_id| ClientMessage::SendText {
                request_id,
                chat_id: chat_id.to_string(),
                body: body.to_string(),
            })
            .await?;

        match reply {
            ServerMessage::SendResult { message_id, .. } => Ok(MessageId::from(message_id)),
            other => Err(TransportError::Protocol(format!(
                "unexpected reply to send_text: {other:?}"
            ))),
        }
    }

    async fn find_chat(&self, chat_id: &str) -> Result<Option<ChatInfo>, TransportError> {
        let reply = self
            .request(|request_id| ClientMessage::FindChat {
                request_id,
                chat_id: chat_id.to_string(),
            })
            .await?;

        match reply {
            ServerMessage::ChatInfo { chat, .. } => Ok(chat),
            other => Err(TransportError::Protocol(format!(
                "unexpected reply to find_chat: {other:?}"
            ))),
        }
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        if self.closing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let tasks = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let _ = self.outgoing.send(ClientMessage::Close);

        if let Some((writer, reader)) = tasks {
            if tokio::time::timeout(CLOSE_GRACE, writer).await.is_err() {
                tracing::warn!("Bridge writer did not finish within {CLOSE_GRACE:?}");
            }
            reader.abort();
        }

        self.pending_map().clear();
        if !self.hub.is_closed() {
            self.hub.push_closed();
        }
        tracing::info!("Bridge transport shut down");
        Ok(())
    }
}
