//! Remote session persistence for the daily notifier.
//!
//! Provides:
//! - `SessionPersister` - Resolve a stored session at startup and persist updates
//! - Storage implementations (memory, Supabase-compatible bucket)

pub mod persister;
pub mod storage;

pub use persister::SessionPersister;
