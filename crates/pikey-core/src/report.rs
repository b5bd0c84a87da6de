//! USB HID boot-protocol report encoding.
//!
//! # Keyboard report (8 bytes)
//!
//! ```text
//!  byte 0     byte 1     bytes 2..8
//! ┌──────────┬──────────┬───────────────────────────┐
//! │ modifier │ reserved │ key slots k1..k6          │
//! │ bitmask  │ (0x00)   │ (HID usage, 0 = empty)    │
//! └──────────┴──────────┴───────────────────────────┘
//! ```
//!
//! A pressed modifier sets its bit in byte 0 and leaves the key slots empty;
//! an ordinary key occupies slot k1.  The all-zero report means "nothing held".
//!
//! # Relative mouse report (4 bytes)
//!
//! `[buttons, dx, dy, wheel]`, the last three as signed bytes.  Motion larger
//! than ±127 in one step is split into several reports.

use serde::{Deserialize, Serialize};

use crate::keymap::HidKeyCode;

/// Length of a boot keyboard report in bytes.
pub const KEYBOARD_REPORT_LEN: usize = 8;

/// Length of a relative mouse report in bytes.
pub const MOUSE_REPORT_LEN: usize = 4;

/// Largest per-report displacement the signed-byte fields can carry.
pub const MAX_MOUSE_STEP: i32 = 127;

/// One boot-protocol keyboard report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyboardReport {
    modifiers: u8,
    keys: [u8; 6],
}

impl KeyboardReport {
    /// The "all keys up" report.
    pub const fn released() -> Self {
        Self {
            modifiers: 0,
            keys: [0; 6],
        }
    }

    /// Report with exactly `key` held.
    pub fn pressed(key: HidKeyCode) -> Self {
        let mut report = Self::released();
        match key.modifier_bit() {
            Some(bit) => report.modifiers = bit,
            None => report.keys[0] = key.as_u8(),
        }
        report
    }

    /// Report for the currently held key, if any.
    pub fn for_state(held: Option<HidKeyCode>) -> Self {
        held.map_or_else(Self::released, Self::pressed)
    }

    pub fn modifiers(&self) -> u8 {
        self.modifiers
    }

    pub fn keys(&self) -> [u8; 6] {
        self.keys
    }

    /// Returns `true` when no modifier and no key is set.
    pub fn is_released(&self) -> bool {
        self.modifiers == 0 && self.keys.iter().all(|&k| k == 0)
    }

    /// Encodes the report for writing to the gadget device.
    pub fn to_bytes(&self) -> [u8; KEYBOARD_REPORT_LEN] {
        let mut out = [0u8; KEYBOARD_REPORT_LEN];
        out[0] = self.modifiers;
        out[2..].copy_from_slice(&self.keys);
        out
    }
}

/// Mouse buttons understood by pointer commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointerButton {
    #[default]
    Left,
    Right,
    Middle,
}

impl PointerButton {
    /// Bit this button occupies in the report's button byte.
    pub fn bit(self) -> u8 {
        match self {
            Self::Left => 0x01,
            Self::Right => 0x02,
            Self::Middle => 0x04,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
            Self::Middle => "middle",
        }
    }
}

/// What a click command does with its button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClickKind {
    /// Press and release.
    #[default]
    Click,
    /// Two clicks in succession.
    Double,
    /// Press only.
    Down,
    /// Release only.
    Up,
}

/// One relative mouse report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MouseReport {
    pub buttons: u8,
    pub dx: i8,
    pub dy: i8,
    pub wheel: i8,
}

impl MouseReport {
    /// Report carrying only a button state.
    pub fn buttons(buttons: u8) -> Self {
        Self {
            buttons,
            ..Self::default()
        }
    }

    /// Splits a relative movement into reports of at most ±127 per axis.
    ///
    /// `buttons` is repeated in every report so a held button stays held
    /// while dragging.  A zero movement yields no reports.
    pub fn motion(buttons: u8, dx: i32, dy: i32) -> Vec<Self> {
        let mut reports = Vec::new();
        let (mut rem_x, mut rem_y) = (dx, dy);
        while rem_x != 0 || rem_y != 0 {
            let step_x = rem_x.clamp(-MAX_MOUSE_STEP, MAX_MOUSE_STEP);
            let step_y = rem_y.clamp(-MAX_MOUSE_STEP, MAX_MOUSE_STEP);
            reports.push(Self {
                buttons,
                dx: step_x as i8,
                dy: step_y as i8,
                wheel: 0,
            });
            rem_x -= step_x;
            rem_y -= step_y;
        }
        reports
    }

    /// Splits a vertical wheel movement into reports.
    ///
    /// `delta` follows the browser convention (positive scrolls content
    /// down), which is the negated HID wheel direction.
    pub fn wheel(buttons: u8, delta: i32) -> Vec<Self> {
        let mut reports = Vec::new();
        let mut remaining = delta.saturating_neg();
        while remaining != 0 {
            let step = remaining.clamp(-MAX_MOUSE_STEP, MAX_MOUSE_STEP);
            reports.push(Self {
                buttons,
                dx: 0,
                dy: 0,
                wheel: step as i8,
            });
            remaining -= step;
        }
        reports
    }

    pub fn to_bytes(&self) -> [u8; MOUSE_REPORT_LEN] {
        [self.buttons, self.dx as u8, self.dy as u8, self.wheel as u8]
    }
}
