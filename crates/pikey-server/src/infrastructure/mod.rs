//! Infrastructure layer: everything that performs I/O.
//!
//! - `drivers`: concrete [`InputDriver`](crate::application::driver::InputDriver)
//!   backends and the factory that picks one at startup
//! - `http_api`: the request/response surface (axum)
//! - `channel`: persistent WebSocket sessions (tokio-tungstenite)
//!
//! Both network surfaces talk to the device only through the
//! [`Dispatcher`](crate::application::dispatch::Dispatcher).

pub mod channel;
pub mod drivers;
pub mod http_api;

pub use channel::{bind_channel_listener, run_channel_server, ChannelManager, ChannelStats};
pub use http_api::ApiState;
