//! Collaborator traits: session storage, transport and record source.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::{ChatInfo, MessageId, Record, TransportEvent};

/// Storage error.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Storage request failed with status {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Session blob truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: u64, actual: usize },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Storage error: {0}")]
    Internal(String),
}

/// Durable key-blob persistence for named authentication sessions.
///
/// Implementations never retry; failures surface as `StorageError`.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Whether a blob is stored for the session. "Not found" is `Ok(false)`.
    async fn exists(&self, session_id: &str) -> Result<bool, StorageError>;

    /// Persist a blob, replacing any previous one.
    async fn save(&self, session_id: &str, blob: Bytes) -> Result<(), StorageError>;

    /// The complete last-saved blob, or `None`.
    async fn extract(&self, session_id: &str) -> Result<Option<Bytes>, StorageError>;

    /// Remove the blob. Removing an absent blob succeeds.
    async fn delete(&self, session_id: &str) -> Result<(), StorageError>;
}

/// Transport error.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Transport closed")]
    Closed,
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Request rejected: {0}")]
    Rejected(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Launch configuration error: {0}")]
    Launch(String),
}

/// Connection to the messaging network.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Event stream: retained history first, then live events, ending on close.
    fn subscribe(&self) -> futures::stream::BoxStream<'static, TransportEvent>;

    /// Send a text message, returning the identifier the network assigned.
    async fn send_text(&self, chat_id: &str, body: &str) -> Result<MessageId, TransportError>;

    /// Look up a chat by identifier.
    async fn find_chat(&self, chat_id: &str) -> Result<Option<ChatInfo>, TransportError>;

    /// Release the connection. Idempotent.
    async fn shutdown(&self) -> Result<(), TransportError>;
}

/// Record query error.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Invalid row: {0}")]
    Decode(String),
    #[error("Invalid date: month {month}, day {day}")]
    InvalidDate { month: u32, day: u32 },
}

/// Source of records keyed by calendar month/day.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Records whose date matches, in the order the source yields them.
    async fn records_for_date(&self, month: u32, day: u32) -> Result<Vec<Record>, QueryError>;

    /// Release the underlying connection. Idempotent.
    async fn close(&self) -> Result<(), QueryError>;
}
