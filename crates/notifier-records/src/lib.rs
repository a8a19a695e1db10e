//! Record sources for the daily notifier.
//!
//! Provides:
//! - `PgRecordSource` - Records from a Postgres table (feature: postgres)
//! - `StaticRecordSource` - In-memory records keyed by month/day

#[cfg(feature = "postgres")]
pub mod postgres;
pub mod memory;

pub use memory::StaticRecordSource;
#[cfg(feature = "postgres")]
pub use postgres::PgRecordSource;
