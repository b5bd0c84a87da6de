//! Commands accepted by the dispatcher.
//!
//! Each command is created once at the request boundary and never mutated:
//! fields are private and exposed through getters.  The `submitted_at`
//! instant is the start of the queue phase in latency accounting.

use std::time::{Duration, Instant};

use crate::report::{ClickKind, PointerButton};

/// Hold time used when a request does not specify one.
pub const DEFAULT_HOLD: Duration = Duration::from_millis(50);

/// Pause between characters when text is typed key by key.
pub const TYPE_CHAR_DELAY: Duration = Duration::from_millis(10);

/// A single key press: key down, hold, key up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PressCommand {
    key: String,
    hold: Duration,
    origin: String,
    submitted_at: Instant,
}

impl PressCommand {
    /// Creates a press for `key` (lower-cased) held for `hold`.
    pub fn new(key: impl Into<String>, hold: Duration, origin: impl Into<String>) -> Self {
        Self {
            key: key.into().to_ascii_lowercase(),
            hold,
            origin: origin.into(),
            submitted_at: Instant::now(),
        }
    }

    /// Creates a press with [`DEFAULT_HOLD`], or `hold_ms` when given.
    pub fn with_hold_ms(key: impl Into<String>, hold_ms: Option<u64>, origin: impl Into<String>) -> Self {
        let hold = hold_ms.map_or(DEFAULT_HOLD, Duration::from_millis);
        Self::new(key, hold, origin)
    }

    /// Backdates the submission instant, for commands derived from an
    /// earlier request (one press per character of a text).
    pub fn with_submitted_at(mut self, submitted_at: Instant) -> Self {
        self.submitted_at = submitted_at;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn hold(&self) -> Duration {
        self.hold
    }

    /// Client address or channel session id the command came from.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }
}

/// Text to be typed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextCommand {
    text: String,
    origin: String,
    submitted_at: Instant,
}

impl TextCommand {
    pub fn new(text: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            origin: origin.into(),
            submitted_at: Instant::now(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }
}

/// The pointer action to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerAction {
    /// Relative movement in device units.
    Move { dx: i32, dy: i32 },
    Click { button: PointerButton, kind: ClickKind },
    /// Wheel movement; positive `dy` scrolls content down.
    Scroll { dx: i32, dy: i32 },
}

impl PointerAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Move { .. } => "move",
            Self::Click { .. } => "click",
            Self::Scroll { .. } => "scroll",
        }
    }
}

/// A pointer command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerCommand {
    action: PointerAction,
    origin: String,
    submitted_at: Instant,
}

impl PointerCommand {
    pub fn new(action: PointerAction, origin: impl Into<String>) -> Self {
        Self {
            action,
            origin: origin.into(),
            submitted_at: Instant::now(),
        }
    }

    pub fn action(&self) -> PointerAction {
        self.action
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_press_key_is_lowercased() {
        let cmd = PressCommand::new("Enter", DEFAULT_HOLD, "127.0.0.1:5000");
        assert_eq!(cmd.key(), "enter");
        assert_eq!(cmd.origin(), "127.0.0.1:5000");
    }

    #[test]
    fn test_missing_hold_defaults_to_fifty_ms() {
        let cmd = PressCommand::with_hold_ms("a", None, "test");
        assert_eq!(cmd.hold(), Duration::from_millis(50));

        let cmd = PressCommand::with_hold_ms("a", Some(120), "test");
        assert_eq!(cmd.hold(), Duration::from_millis(120));
    }

    #[test]
    fn test_submitted_at_is_not_in_future() {
        let before = Instant::now();
        let cmd = TextCommand::new("hi", "test");
        assert!(cmd.submitted_at() >= before);
        assert!(cmd.submitted_at() <= Instant::now());
    }

    #[test]
    fn test_pointer_action_names() {
        assert_eq!(PointerAction::Move { dx: 1, dy: 2 }.name(), "move");
        assert_eq!(
            PointerAction::Click {
                button: PointerButton::Left,
                kind: ClickKind::Click
            }
            .name(),
            "click"
        );
        assert_eq!(PointerAction::Scroll { dx: 0, dy: 3 }.name(), "scroll");
    }
}
