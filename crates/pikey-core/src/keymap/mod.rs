//! Key naming and translation.
//!
//! Clients refer to keys by short lower-case names (`"a"`, `"enter"`,
//! `"ctrl"`, `"f5"`).  The [`KeyTable`] resolves those names to USB HID usage
//! codes; the submodules translate HID codes onward for the OS automation
//! drivers.
//!
//! The table is built once at startup and shared behind an `Arc`.  It is never
//! mutated afterwards, so lookups need no locking.

pub mod hid;
pub mod macos_cg;
pub mod windows_vk;

use std::collections::HashMap;

use thiserror::Error;

pub use hid::HidKeyCode;

/// Errors produced when resolving key names.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyTableError {
    /// The name is not in the table.
    #[error("unsupported key: {0}")]
    Unsupported(String),
}

/// Named keys beyond the generated letter and digit ranges.
///
/// Several names may resolve to the same code (`esc`/`escape`, `cmd`/`meta`).
const NAMED_KEYS: &[(&str, HidKeyCode)] = &[
    ("enter", HidKeyCode::Enter),
    ("return", HidKeyCode::Enter),
    ("esc", HidKeyCode::Escape),
    ("escape", HidKeyCode::Escape),
    ("backspace", HidKeyCode::Backspace),
    ("tab", HidKeyCode::Tab),
    ("space", HidKeyCode::Space),
    ("capslock", HidKeyCode::CapsLock),
    ("caps lock", HidKeyCode::CapsLock),
    // Modifiers default to the left-hand key
    ("shift", HidKeyCode::ShiftLeft),
    ("ctrl", HidKeyCode::ControlLeft),
    ("control", HidKeyCode::ControlLeft),
    ("alt", HidKeyCode::AltLeft),
    ("option", HidKeyCode::AltLeft),
    ("cmd", HidKeyCode::MetaLeft),
    ("command", HidKeyCode::MetaLeft),
    ("meta", HidKeyCode::MetaLeft),
    ("win", HidKeyCode::MetaLeft),
    ("rshift", HidKeyCode::ShiftRight),
    ("rctrl", HidKeyCode::ControlRight),
    ("ralt", HidKeyCode::AltRight),
    ("rcmd", HidKeyCode::MetaRight),
    ("f1", HidKeyCode::F1),
    ("f2", HidKeyCode::F2),
    ("f3", HidKeyCode::F3),
    ("f4", HidKeyCode::F4),
    ("f5", HidKeyCode::F5),
    ("f6", HidKeyCode::F6),
    ("f7", HidKeyCode::F7),
    ("f8", HidKeyCode::F8),
    ("f9", HidKeyCode::F9),
    ("f10", HidKeyCode::F10),
    ("f11", HidKeyCode::F11),
    ("f12", HidKeyCode::F12),
    ("up", HidKeyCode::ArrowUp),
    ("down", HidKeyCode::ArrowDown),
    ("left", HidKeyCode::ArrowLeft),
    ("right", HidKeyCode::ArrowRight),
    ("insert", HidKeyCode::Insert),
    ("delete", HidKeyCode::Delete),
    ("home", HidKeyCode::Home),
    ("end", HidKeyCode::End),
    ("pageup", HidKeyCode::PageUp),
    ("page up", HidKeyCode::PageUp),
    ("pagedown", HidKeyCode::PageDown),
    ("page down", HidKeyCode::PageDown),
    ("printscreen", HidKeyCode::PrintScreen),
    ("scrolllock", HidKeyCode::ScrollLock),
    ("pause", HidKeyCode::Pause),
    ("numlock", HidKeyCode::NumLock),
    ("menu", HidKeyCode::ContextMenu),
    // Punctuation is named by the unshifted character it produces
    ("-", HidKeyCode::Minus),
    ("=", HidKeyCode::Equal),
    ("[", HidKeyCode::BracketLeft),
    ("]", HidKeyCode::BracketRight),
    ("\\", HidKeyCode::Backslash),
    (";", HidKeyCode::Semicolon),
    ("'", HidKeyCode::Quote),
    ("`", HidKeyCode::Backquote),
    (",", HidKeyCode::Comma),
    (".", HidKeyCode::Period),
    ("/", HidKeyCode::Slash),
];

/// Immutable mapping from key names to HID usage codes.
///
/// Lookups are case-insensitive.  Unknown names produce
/// [`KeyTableError::Unsupported`]; nothing in this type panics on input.
#[derive(Debug, Clone)]
pub struct KeyTable {
    by_name: HashMap<String, HidKeyCode>,
}

impl KeyTable {
    /// Builds the standard US-layout table: `a`–`z`, `0`–`9` and [`NAMED_KEYS`].
    pub fn standard() -> Self {
        let mut by_name = HashMap::with_capacity(26 + 10 + NAMED_KEYS.len());
        for (i, letter) in ('a'..='z').enumerate() {
            if let Some(code) = HidKeyCode::letter(i as u8) {
                by_name.insert(letter.to_string(), code);
            }
        }
        for digit in 0..=9u8 {
            if let Some(code) = HidKeyCode::digit(digit) {
                by_name.insert(digit.to_string(), code);
            }
        }
        for (name, code) in NAMED_KEYS {
            by_name.insert((*name).to_string(), *code);
        }
        Self { by_name }
    }

    /// Resolves `name` to its HID usage code.
    ///
    /// # Errors
    ///
    /// Returns [`KeyTableError::Unsupported`] carrying the name as given.
    pub fn lookup(&self, name: &str) -> Result<HidKeyCode, KeyTableError> {
        self.by_name
            .get(&name.to_ascii_lowercase())
            .copied()
            .ok_or_else(|| KeyTableError::Unsupported(name.to_string()))
    }

    /// Returns `true` if `name` resolves.
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(&name.to_ascii_lowercase())
    }

    /// Number of names in the table (aliases counted separately).
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Iterates all names in unspecified order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    /// Maps a typed character to the key name that produces it unshifted.
    ///
    /// Letters are lower-cased first; space, newline and tab map to their
    /// named keys.  Returns `None` for characters with no table entry
    /// (shifted symbols, non-ASCII).
    pub fn key_for_char(&self, c: char) -> Option<String> {
        let name = match c {
            ' ' => "space".to_string(),
            '\n' => "enter".to_string(),
            '\t' => "tab".to_string(),
            other => other.to_lowercase().collect::<String>(),
        };
        self.contains(&name).then_some(name)
    }

    /// Expands `text` into the key names to press, in order.
    ///
    /// Characters without a mapping are skipped, so the result may be
    /// shorter than the input or empty.
    pub fn expand_text(&self, text: &str) -> Vec<String> {
        text.chars().filter_map(|c| self.key_for_char(c)).collect()
    }
}

impl Default for KeyTable {
    fn default() -> Self {
        Self::standard()
    }
}
