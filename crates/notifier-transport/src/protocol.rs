//! Wire protocol between the notifier and a messaging bridge.
//!
//! JSON text frames tagged by `type`. Session blobs travel base64 encoded.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use notifier_core::{AckLevel, ChatInfo, MessageId, TransportEvent};
use serde::{Deserialize, Serialize};

use crate::LaunchOptions;

/// Message from the notifier to the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start the connection, resuming `session` when present.
    Hello {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session: Option<String>,
        #[serde(default)]
        launch: LaunchOptions,
    },
    /// Send a text message.
    SendText {
        request_id: u64,
        chat_id: String,
        body: String,
    },
    /// Look up a chat.
    FindChat { request_id: u64, chat_id: String },
    /// Close the connection without logging out.
    Close,
}

impl ClientMessage {
    /// Create a hello message, encoding the session blob.
    #[must_use]
    pub fn hello(session: Option<&[u8]>, launch: LaunchOptions) -> Self {
        Self::Hello {
            session: session.map(|s| BASE64.encode(s)),
            launch,
        }
    }

    /// Decode the hello session blob from base64.
    #[must_use]
    pub fn decode_session(&self) -> Option<Vec<u8>> {
        if let Self::Hello {
            session: Some(data),
            ..
        } = self
        {
            BASE64.decode(data).ok()
        } else {
            None
        }
    }
}

/// Message from the bridge to the notifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Login challenge to render as a QR code.
    Qr { code: String },
    /// Credentials accepted.
    Authenticated,
    /// Credentials rejected.
    AuthFailure { reason: String },
    /// Ready to send.
    Ready,
    /// Connection to the network dropped.
    Disconnected { reason: String },
    /// Session changed and should be persisted (base64 encoded).
    SessionUpdated { data: String },
    /// Delivery acknowledgment.
    MessageAck { message_id: String, ack: i8 },
    /// Reply to `SendText`.
    SendResult { request_id: u64, message_id: String },
    /// Reply to `FindChat`.
    ChatInfo {
        request_id: u64,
        #[serde(default)]
        chat: Option<ChatInfo>,
    },
    /// A request failed on the bridge side.
    RequestFailed { request_id: u64, error: String },
}

/// Frame that could not be turned into an event.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid session encoding: {0}")]
    Session(#[from] base64::DecodeError),
    #[error("unknown ack level {0}")]
    AckLevel(i8),
}

impl ServerMessage {
    /// Create a session update from raw bytes.
    #[must_use]
    pub fn session_updated(data: &[u8]) -> Self {
        Self::SessionUpdated {
            data: BASE64.encode(data),
        }
    }

    /// Request this message answers, if it is a reply.
    #[must_use]
    pub const fn request_id(&self) -> Option<u64> {
        match self {
            Self::SendResult { request_id, .. }
            | Self::ChatInfo { request_id, .. }
            | Self::RequestFailed { request_id, .. } => Some(*request_id),
            _ => None,
        }
    }

    /// Convert a non-reply message into a transport event.
    ///
    /// Replies yield `Ok(None)`.
    ///
    /// # Errors
    /// Returns error for undecodable session data or unknown ack levels.
    pub fn into_event(self) -> Result<Option<TransportEvent>, DecodeError> {
        let event = match self {
            Self::Qr { code } => TransportEvent::LoginChallenge(code),
            Self::Authenticated => TransportEvent::Authenticated,
            Self::AuthFailure { reason } => TransportEvent::AuthFailure(reason),
            Self::Ready => TransportEvent::Ready,
            Self::Disconnected { reason } => TransportEvent::Disconnected(reason),
            Self::SessionUpdated { data } => {
                TransportEvent::SessionUpdated(Bytes::from(BASE64.decode(data)?))
            }
            Self::MessageAck { message_id, ack } => TransportEvent::MessageAck {
                id: MessageId::from(message_id),
                level: AckLevel::from_code(ack).ok_or(DecodeError::AckLevel(ack))?,
            },
            Self::SendResult { .. } | Self::ChatInfo { .. } | Self::RequestFailed { .. } => {
                return Ok(None);
            }
        };
        Ok(Some(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_session_roundtrip() {
        let original = b"PK\x03\x04zip";
        let msg = ClientMessage::hello(Some(original), LaunchOptions::default());
        assert_eq!(msg.decode_session().unwrap(), original);

        let fresh = ClientMessage::hello(None, LaunchOptions::default());
        let json = serde_json::to_string(&fresh).unwrap();
        assert!(!json.contains("session"));
    }

    #[test]
    fn test_session_update_becomes_event() {
        let msg = ServerMessage::session_updated(b"blob");
        let event = msg.into_event().unwrap();
        assert_eq!(
            event,
            Some(TransportEvent::SessionUpdated(Bytes::from_static(b"blob")))
        );
    }

    #[test]
    fn test_ack_parsing() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"message_ack","message_id":"true_1@c.us_ABC","ack":2}"#)
                .unwrap();
        assert_eq!(
            msg.into_event().unwrap(),
            Some(TransportEvent::MessageAck {
                id: MessageId::new("true_1@c.us_ABC"),
                level: AckLevel::Device,
            })
        );

        let bad = ServerMessage::MessageAck {
            message_id: "x".to_string(),
            ack: 7,
        };
        assert!(matches!(bad.into_event(), Err(DecodeError::AckLevel(7))));
    }

    #[test]
    fn test_replies_carry_request_id() {
        let msg: ServerMessage = serde_json::from_str(
            r#"{"type":"send_result","request_id":4,"message_id":"m4"}"#,
        )
        .unwrap();
        assert_eq!(msg.request_id(), Some(4));
        assert_eq!(ServerMessage::Ready.request_id(), None);
        assert!(msg.into_event().unwrap().is_none());
    }

    #[test]
    fn test_keepalive_frames_are_not_part_of_the_protocol() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"ping"}"#).is_err());
        assert!(serde_json::from_str::<ServerMessage>(r#"{"type":"pong"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"close"}"#).is_ok());
    }

    #[test]
    fn test_message_serialization() {
        let msg = ClientMessage::SendText {
            request_id: 1,
            chat_id: "123@g.us".to_string(),
            body: "hi".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("send_text"));

        let parsed: ClientMessage = serde_json::from_str(&json).unwrap();
        if let ClientMessage::SendText { request_id, chat_id, .. } = parsed {
            assert_eq!(request_id, 1);
            assert_eq!(chat_id, "123@g.us");
        } else {
            panic!("Wrong message type");
        }
    }
}
