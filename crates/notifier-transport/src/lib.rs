//! Messaging transports for the daily notifier.
//!
//! Provides:
//! - Bridge wire protocol (JSON + base64)
//! - `BridgeTransport` - WebSocket client to a messaging bridge (feature: bridge)
//! - `LoopbackTransport` - In-process transport for dry runs and tests
//! - Launch option resolution for the bridge's browser

pub mod launch;
pub mod loopback;
pub mod protocol;

#[cfg(feature = "bridge")]
pub mod bridge;

#[cfg(feature = "bridge")]
pub use bridge::{BridgeConfig, BridgeTransport};
pub use launch::LaunchOptions;
pub use loopback::LoopbackTransport;
pub use protocol::{ClientMessage, ServerMessage};
