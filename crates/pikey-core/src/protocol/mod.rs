//! Realtime channel protocol: JSON envelopes and their codec.

pub mod codec;
pub mod messages;

pub use codec::{decode_envelope, encode_envelope, ProtocolError};
pub use messages::*;
