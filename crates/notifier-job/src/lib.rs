//! Daily birthday notification job.
//!
//! Provides:
//! - `NotificationJob` - One run: resume session, await readiness, query, send, drain
//! - `AckTracker` - Correlates sent messages with their delivery acks
//! - `Config` - Layered configuration (defaults, TOML file, environment)

pub mod ack;
pub mod config;
pub mod job;

pub use ack::{AckOutcome, AckTracker, AckWaiter};
pub use config::{Config, ConfigError, run_date};
pub use job::{JobError, JobPhase, JobSettings, NotificationJob, RunReport};
