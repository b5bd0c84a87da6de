//! Text-frame codec for the realtime channel.

use thiserror::Error;

use super::messages::{InboundEnvelope, MessageKind, OutboundEnvelope};

/// Errors that can occur while decoding or encoding channel frames.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The frame is not a JSON object with a string `type` field.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The `type` field names no known message.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// The `data` field does not match the message type.
    #[error("invalid {} data: {reason}", .kind.as_str())]
    InvalidData { kind: MessageKind, reason: String },

    #[error("failed to encode message: {0}")]
    Encode(String),
}

impl ProtocolError {
    /// Short machine-readable code carried in error envelopes.
    pub fn code(&self) -> String {
        match self {
            Self::Malformed(_) => "invalid_message".to_string(),
            Self::UnknownType(_) => "unknown_message_type".to_string(),
            Self::InvalidData { kind, .. } => format!("invalid_{}_data", kind.as_str()),
            Self::Encode(_) => "encode_failed".to_string(),
        }
    }
}

/// Parses a text frame into an envelope.
///
/// # Errors
///
/// Returns [`ProtocolError::Malformed`] if the frame is not a JSON envelope.
pub fn decode_envelope(text: &str) -> Result<InboundEnvelope, ProtocolError> {
    serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Serializes an outbound envelope into a text frame.
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if serialization fails.
pub fn encode_envelope(envelope: &OutboundEnvelope) -> Result<String, ProtocolError> {
    serde_json::to_string(envelope).map_err(|e| ProtocolError::Encode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_rejects_non_json() {
        let err = decode_envelope("not json").expect_err("must fail");
        assert_eq!(err.code(), "invalid_message");
    }

    #[test]
    fn test_decode_rejects_missing_type() {
        assert!(decode_envelope(r#"{"data":{}}"#).is_err());
    }

    #[test]
    fn test_decode_keeps_request_id_for_unknown_type() {
        let env = decode_envelope(r#"{"type":"nope","request_id":"abc"}"#).expect("envelope");
        assert_eq!(env.request_id.as_deref(), Some("abc"));
        assert_eq!(
            env.request().expect_err("unknown").code(),
            "unknown_message_type"
        );
    }

    #[test]
    fn test_encode_produces_type_field() {
        let text = encode_envelope(&OutboundEnvelope::error("boom", None)).expect("encodes");
        assert!(text.contains(r#""type":"error""#));
        assert!(text.contains(r#""message":"boom""#));
    }
}
