//! Storage implementations.

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "bucket")]
pub mod bucket;

#[cfg(feature = "memory")]
pub use memory::MemorySessionStore;

#[cfg(feature = "bucket")]
pub use bucket::BucketSessionStore;
