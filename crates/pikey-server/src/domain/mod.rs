//! Domain layer for pikey-server.
//!
//! Plain configuration types with no I/O, no async and no framework types.
//! Command and key types live in `pikey-core` and are shared with tests and
//! benches from there.

pub mod config;

pub use config::{BatchOrder, ChannelConfig, DispatchConfig, DriverSelection, ServerConfig};
