//! JSON message types for the realtime channel.
//!
//! Every frame in either direction is a JSON envelope:
//!
//! ```json
//! {"type":"key_press","data":{"key":"a","duration":50},"timestamp":"...","request_id":"r1"}
//! ```
//!
//! Inbound envelopes are parsed in two steps.  [`InboundEnvelope`] captures
//! the `type` and the raw `data` so that the `request_id` is known even when
//! the payload turns out to be malformed; [`InboundEnvelope::request`] then
//! types the payload into a [`ChannelRequest`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::report::{ClickKind, PointerButton};

use super::codec::ProtocolError;

/// Message types a client may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    PointerMove,
    PointerClick,
    PointerScroll,
    KeyPress,
    TypeText,
    Ping,
}

impl MessageKind {
    /// Parses a `type` field.  The `touchpad_*` names are accepted for
    /// pointer messages.
    pub fn from_type(value: &str) -> Option<Self> {
        match value {
            "pointer_move" | "touchpad_move" => Some(Self::PointerMove),
            "pointer_click" | "touchpad_click" => Some(Self::PointerClick),
            "pointer_scroll" | "touchpad_scroll" => Some(Self::PointerScroll),
            "key_press" => Some(Self::KeyPress),
            "type_text" => Some(Self::TypeText),
            "ping" => Some(Self::Ping),
            _ => None,
        }
    }

    /// Canonical wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PointerMove => "pointer_move",
            Self::PointerClick => "pointer_click",
            Self::PointerScroll => "pointer_scroll",
            Self::KeyPress => "key_press",
            Self::TypeText => "type_text",
            Self::Ping => "ping",
        }
    }

    /// Type of the acknowledgement envelope, or `None` for fire-and-forget
    /// messages.
    pub fn ack_type(self) -> Option<&'static str> {
        match self {
            Self::PointerMove => None,
            Self::PointerClick => Some("pointer_click_success"),
            Self::PointerScroll => Some("pointer_scroll_success"),
            Self::KeyPress => Some("key_press_success"),
            Self::TypeText => Some("type_text_success"),
            Self::Ping => Some("pong"),
        }
    }
}

fn default_dpi() -> f64 {
    1.0
}

/// Largest pointer or wheel delta, in device units, accepted from one
/// message.  Larger values are clamped to this bound.
pub const MAX_POINTER_DELTA: i32 = 32_767;

/// Rounds a client delta to device units within `±MAX_POINTER_DELTA`.
/// `NaN` becomes zero.
fn to_device_units(value: f64) -> i32 {
    if value.is_nan() {
        return 0;
    }
    let bound = f64::from(MAX_POINTER_DELTA);
    value.round().clamp(-bound, bound) as i32
}

/// Payload of `pointer_move`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointerMoveData {
    #[serde(rename = "deltaX", alias = "dx")]
    pub delta_x: f64,
    #[serde(rename = "deltaY", alias = "dy")]
    pub delta_y: f64,
    /// Multiplier applied to both deltas.
    #[serde(default = "default_dpi")]
    pub dpi: f64,
}

impl PointerMoveData {
    /// Deltas after DPI scaling, rounded to device units and clamped to
    /// [`MAX_POINTER_DELTA`].
    pub fn scaled(&self) -> (i32, i32) {
        let scale = if self.dpi.is_finite() && self.dpi > 0.0 {
            self.dpi
        } else {
            1.0
        };
        (
            to_device_units(self.delta_x * scale),
            to_device_units(self.delta_y * scale),
        )
    }
}

/// Payload of `pointer_click`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PointerClickData {
    #[serde(default)]
    pub button: PointerButton,
    #[serde(rename = "type", default)]
    pub kind: ClickKind,
}

/// Payload of `pointer_scroll`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointerScrollData {
    #[serde(rename = "deltaX", alias = "dx", default)]
    pub delta_x: f64,
    #[serde(rename = "deltaY", alias = "dy", default)]
    pub delta_y: f64,
}

impl PointerScrollData {
    /// Wheel deltas rounded to device units and clamped to
    /// [`MAX_POINTER_DELTA`].
    pub fn steps(&self) -> (i32, i32) {
        (to_device_units(self.delta_x), to_device_units(self.delta_y))
    }
}

/// Payload of `key_press`.  `duration` is the hold time in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyPressData {
    pub key: String,
    #[serde(default)]
    pub duration: Option<u64>,
}

/// Payload of `type_text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeTextData {
    pub text: String,
}

/// A typed inbound request.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelRequest {
    PointerMove(PointerMoveData),
    PointerClick(PointerClickData),
    PointerScroll(PointerScrollData),
    KeyPress(KeyPressData),
    TypeText(TypeTextData),
    Ping,
}

impl ChannelRequest {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::PointerMove(_) => MessageKind::PointerMove,
            Self::PointerClick(_) => MessageKind::PointerClick,
            Self::PointerScroll(_) => MessageKind::PointerScroll,
            Self::KeyPress(_) => MessageKind::KeyPress,
            Self::TypeText(_) => MessageKind::TypeText,
            Self::Ping => MessageKind::Ping,
        }
    }
}

/// An inbound envelope with its payload still untyped.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InboundEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    /// Client clock; informational only, any JSON value is accepted.
    #[serde(default)]
    pub timestamp: Value,
    #[serde(default, alias = "requestId")]
    pub request_id: Option<String>,
}

impl InboundEnvelope {
    /// Types the payload according to `kind`.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::UnknownType`] for an unrecognised `type`,
    /// [`ProtocolError::InvalidData`] when `data` does not fit the type.
    pub fn request(&self) -> Result<ChannelRequest, ProtocolError> {
        let kind = MessageKind::from_type(&self.kind)
            .ok_or_else(|| ProtocolError::UnknownType(self.kind.clone()))?;
        let data = self.data.clone();
        let invalid = |e: serde_json::Error| ProtocolError::InvalidData {
            kind,
            reason: e.to_string(),
        };
        Ok(match kind {
            MessageKind::PointerMove => {
                ChannelRequest::PointerMove(serde_json::from_value(data).map_err(invalid)?)
            }
            MessageKind::PointerClick => {
                // A bare click with no payload is a left click.
                if data.is_null() {
                    ChannelRequest::PointerClick(PointerClickData::default())
                } else {
                    ChannelRequest::PointerClick(serde_json::from_value(data).map_err(invalid)?)
                }
            }
            MessageKind::PointerScroll => {
                ChannelRequest::PointerScroll(serde_json::from_value(data).map_err(invalid)?)
            }
            MessageKind::KeyPress => {
                ChannelRequest::KeyPress(serde_json::from_value(data).map_err(invalid)?)
            }
            MessageKind::TypeText => {
                ChannelRequest::TypeText(serde_json::from_value(data).map_err(invalid)?)
            }
            MessageKind::Ping => ChannelRequest::Ping,
        })
    }
}

/// An outbound envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl OutboundEnvelope {
    pub fn new(kind: impl Into<String>, data: Value, request_id: Option<String>) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: Utc::now(),
            request_id,
        }
    }

    /// Success acknowledgement for `kind`; `None` for fire-and-forget kinds.
    pub fn ack(kind: MessageKind, request_id: Option<String>) -> Option<Self> {
        kind.ack_type()
            .map(|ack| Self::new(ack, Value::Null, request_id))
    }

    /// `{"type":"error","data":{"message":...}}`.
    pub fn error(message: impl Into<String>, request_id: Option<String>) -> Self {
        Self::new(
            "error",
            serde_json::json!({ "message": message.into() }),
            request_id,
        )
    }

    /// Error message text, if this is an error envelope.
    pub fn error_message(&self) -> Option<&str> {
        if self.kind != "error" {
            return None;
        }
        self.data.get("message").and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inbound(value: Value) -> InboundEnvelope {
        serde_json::from_value(value).expect("valid envelope")
    }

    #[test]
    fn test_touchpad_aliases_map_to_pointer_kinds() {
        assert_eq!(MessageKind::from_type("touchpad_move"), Some(MessageKind::PointerMove));
        assert_eq!(MessageKind::from_type("touchpad_click"), Some(MessageKind::PointerClick));
        assert_eq!(MessageKind::from_type("touchpad_scroll"), Some(MessageKind::PointerScroll));
        assert_eq!(MessageKind::from_type("mouse_move"), None);
    }

    #[test]
    fn test_pointer_move_has_no_ack() {
        assert_eq!(MessageKind::PointerMove.ack_type(), None);
        assert!(OutboundEnvelope::ack(MessageKind::PointerMove, None).is_none());
        assert_eq!(MessageKind::Ping.ack_type(), Some("pong"));
    }

    #[test]
    fn test_key_press_request_parses_with_default_duration() {
        let env = inbound(json!({"type": "key_press", "data": {"key": "a"}, "request_id": "r1"}));
        let request = env.request().expect("typed");
        match request {
            ChannelRequest::KeyPress(data) => {
                assert_eq!(data.key, "a");
                assert_eq!(data.duration, None);
            }
            other => panic!("unexpected request {other:?}"),
        }
        assert_eq!(env.request_id.as_deref(), Some("r1"));
    }

    #[test]
    fn test_pointer_move_scales_by_dpi() {
        let env = inbound(json!({"type": "touchpad_move", "data": {"deltaX": 10, "deltaY": -4, "dpi": 1.5}}));
        match env.request().expect("typed") {
            ChannelRequest::PointerMove(data) => assert_eq!(data.scaled(), (15, -6)),
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn test_non_positive_dpi_is_ignored() {
        let data = PointerMoveData {
            delta_x: 3.0,
            delta_y: 4.0,
            dpi: 0.0,
        };
        assert_eq!(data.scaled(), (3, 4));
    }

    #[test]
    fn test_huge_pointer_move_is_clamped() {
        // Arrange
        let data = PointerMoveData {
            delta_x: 1e12,
            delta_y: -1e12,
            dpi: 1e6,
        };

        // Act
        let (dx, dy) = data.scaled();

        // Assert
        assert_eq!(dx, MAX_POINTER_DELTA);
        assert_eq!(dy, -MAX_POINTER_DELTA);
        assert_eq!(crate::report::MouseReport::motion(0, dx, dy).len(), 259);
    }

    #[test]
    fn test_non_finite_pointer_deltas_are_bounded() {
        let data = PointerMoveData {
            delta_x: f64::NAN,
            delta_y: f64::INFINITY,
            dpi: 1.0,
        };
        assert_eq!(data.scaled(), (0, MAX_POINTER_DELTA));
    }

    #[test]
    fn test_scroll_steps_are_rounded_and_clamped() {
        let env = inbound(json!({"type": "pointer_scroll", "data": {"deltaX": 1.6, "deltaY": -1e12}}));
        match env.request().expect("typed") {
            ChannelRequest::PointerScroll(data) => {
                assert_eq!(data.steps(), (2, -MAX_POINTER_DELTA))
            }
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn test_click_without_data_is_left_click() {
        let env = inbound(json!({"type": "pointer_click"}));
        assert_eq!(
            env.request(),
            Ok(ChannelRequest::PointerClick(PointerClickData {
                button: PointerButton::Left,
                kind: ClickKind::Click
            }))
        );
    }

    #[test]
    fn test_unknown_type_is_reported() {
        let env = inbound(json!({"type": "reboot", "data": {}}));
        assert_eq!(env.request(), Err(ProtocolError::UnknownType("reboot".into())));
    }

    #[test]
    fn test_invalid_data_names_the_kind() {
        let env = inbound(json!({"type": "key_press", "data": {"duration": 5}}));
        match env.request() {
            Err(err @ ProtocolError::InvalidData { .. }) => {
                assert_eq!(err.code(), "invalid_key_press_data");
            }
            other => panic!("expected invalid data, got {other:?}"),
        }
    }

    #[test]
    fn test_error_envelope_shape() {
        let env = OutboundEnvelope::error("unknown_message_type", Some("r9".into()));
        let value = serde_json::to_value(&env).expect("serializes");
        assert_eq!(value["type"], "error");
        assert_eq!(value["data"]["message"], "unknown_message_type");
        assert_eq!(value["request_id"], "r9");
        assert!(value["timestamp"].is_string());
        assert_eq!(env.error_message(), Some("unknown_message_type"));
    }

    #[test]
    fn test_ack_omits_missing_request_id() {
        let env = OutboundEnvelope::ack(MessageKind::KeyPress, None).expect("acked kind");
        let value = serde_json::to_value(&env).expect("serializes");
        assert_eq!(value["type"], "key_press_success");
        assert!(value.get("request_id").is_none());
    }
}
