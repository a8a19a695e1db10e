//! Core abstractions for the daily notifier.
//!
//! This crate provides the fundamental building blocks:
//! - `EventHub` - Broadcast + history of transport events
//! - `TransportEvent` / `AckLevel` - Typed transport lifecycle events
//! - `Record` / `OutboundMessage` - What gets sent, and to whom
//! - `SessionStore`, `Transport` and `RecordSource` traits

pub mod event;
pub mod event_hub;
pub mod record;
pub mod traits;

pub use event::{AckLevel, ChatInfo, MessageId, TransportEvent};
pub use event_hub::EventHub;
pub use record::{OutboundMessage, Record, validate_month_day};
pub use traits::{
    QueryError, RecordSource, SessionStore, StorageError, Transport, TransportError,
};
