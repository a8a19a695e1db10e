//! Transport lifecycle events.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Identifier the transport assigns to an outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Create a message identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// How far an outbound message has travelled.
///
/// Ordered, so `level > AckLevel::Pending` means the server has it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AckLevel {
    /// Delivery failed.
    Error,
    /// Queued locally, not yet accepted by the server.
    Pending,
    /// Accepted by the server.
    Server,
    /// Delivered to the recipient's device.
    Device,
    /// Read by the recipient.
    Read,
    /// Media played by the recipient.
    Played,
}

impl AckLevel {
    /// Map the network's integer ack code to a level.
    #[must_use]
    pub const fn from_code(code: i8) -> Option<Self> {
        match code {
            -1 => Some(Self::Error),
            0 => Some(Self::Pending),
            1 => Some(Self::Server),
            2 => Some(Self::Device),
            3 => Some(Self::Read),
            4 => Some(Self::Played),
            _ => None,
        }
    }

    /// The network's integer ack code.
    #[must_use]
    pub const fn code(self) -> i8 {
        match self {
            Self::Error => -1,
            Self::Pending => 0,
            Self::Server => 1,
            Self::Device => 2,
            Self::Read => 3,
            Self::Played => 4,
        }
    }

    /// Whether the message reached at least the server.
    #[must_use]
    pub fn is_confirmed(self) -> bool {
        self > Self::Pending
    }
}

impl fmt::Display for AckLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Error => "error",
            Self::Pending => "pending",
            Self::Server => "server",
            Self::Device => "device",
            Self::Read => "read",
            Self::Played => "played",
        };
        f.write_str(name)
    }
}

/// Chat metadata returned by a destination lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatInfo {
    /// Chat identifier (e.g. `1203630@g.us`).
    pub id: String,
    /// Display name of the chat.
    pub name: String,
    /// Whether the chat is a group.
    #[serde(default)]
    pub is_group: bool,
}

/// Event emitted by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A login challenge (QR payload) must be shown to a human.
    LoginChallenge(String),
    /// The network accepted our credentials.
    Authenticated,
    /// The network rejected our credentials.
    AuthFailure(String),
    /// Connected and ready to send.
    Ready,
    /// Connection dropped.
    Disconnected(String),
    /// The transport wants its session blob persisted.
    SessionUpdated(Bytes),
    /// Delivery acknowledgment for an outbound message.
    MessageAck {
        /// Message the ack refers to.
        id: MessageId,
        /// Delivery stage reached.
        level: AckLevel,
    },
    /// The transport shut down; no further events follow.
    Closed,
}

impl TransportEvent {
    /// Approximate payload size, used to bound event history.
    #[must_use]
    pub fn approx_bytes(&self) -> usize {
        const OVERHEAD: usize = 16;
        match self {
            Self::LoginChallenge(s) | Self::AuthFailure(s) | Self::Disconnected(s) => {
                OVERHEAD + s.len()
            }
            Self::SessionUpdated(blob) => OVERHEAD + blob.len(),
            Self::MessageAck { id, .. } => OVERHEAD + id.as_str().len(),
            Self::Authenticated | Self::Ready | Self::Closed => OVERHEAD,
        }
    }
}
