//! pikey-server library crate.
//!
//! Accepts keyboard and pointer commands over HTTP and a WebSocket channel
//! and injects them on the host through a USB HID gadget or OS automation.
//!
//! # Architecture
//!
//! ```text
//!  HTTP client ──▶ http_api ─┐
//!                            ├──▶ Dispatcher ──▶ InputDriver ──▶ /dev/hidg0 | osascript | keybd_event
//!  WS client ───▶ channel ───┘        │
//!                                     └──▶ Telemetry ──▶ /stats
//! ```
//!
//! - `domain` holds configuration types and performs no I/O.
//! - `application` holds the driver capability, the dispatcher and
//!   telemetry.  It depends on `domain` and `pikey-core` only.
//! - `infrastructure` holds the drivers and both network surfaces.

/// Configuration types.
pub mod domain;

/// Driver capability, admission control, telemetry.
pub mod application;

/// Drivers, HTTP API and realtime channel.
pub mod infrastructure;
