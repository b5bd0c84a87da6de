//! HID Usage ID to macOS `CGKeyCode` translation.
//!
//! The macOS automation driver sends non-printable keys through System Events
//! as `key code N`, where `N` is the virtual key code from
//! `HIToolbox/Events.h`.  These codes follow the physical ANSI layout and
//! bear no relation to ASCII, hence the lookup tables below.

use super::hid::HidKeyCode;

/// `kVK_ANSI_A` through `kVK_ANSI_Z`, indexed by letter offset.
const LETTER_CODES: [u16; 26] = [
    0x00, 0x0B, 0x08, 0x02, 0x0E, 0x03, 0x05, 0x04, 0x22, 0x26, 0x28, 0x25, 0x2E, 0x2D, 0x1F,
    0x23, 0x0C, 0x0F, 0x01, 0x11, 0x20, 0x09, 0x0D, 0x07, 0x10, 0x06,
];

/// `kVK_ANSI_1` through `kVK_ANSI_9` followed by `kVK_ANSI_0`, in HID order.
const DIGIT_CODES: [u16; 10] = [0x12, 0x13, 0x14, 0x15, 0x17, 0x16, 0x1A, 0x1C, 0x19, 0x1D];

/// `kVK_F1` through `kVK_F12`.
const FUNCTION_CODES: [u16; 12] = [
    0x7A, 0x78, 0x63, 0x76, 0x60, 0x61, 0x62, 0x64, 0x65, 0x6D, 0x67, 0x6F,
];

/// Translates a [`HidKeyCode`] to a macOS `CGKeyCode`.
///
/// Returns `None` for keys Apple keyboards do not have (Insert, NumLock,
/// the context-menu key).
pub fn hid_to_cgkeycode(hid: HidKeyCode) -> Option<u16> {
    let code = hid.as_u8() as usize;
    match code {
        0x04..=0x1D => return Some(LETTER_CODES[code - 0x04]),
        0x1E..=0x27 => return Some(DIGIT_CODES[code - 0x1E]),
        0x3A..=0x45 => return Some(FUNCTION_CODES[code - 0x3A]),
        _ => {}
    }
    match hid {
        HidKeyCode::Enter => Some(0x24),     // kVK_Return
        HidKeyCode::Escape => Some(0x35),    // kVK_Escape
        HidKeyCode::Backspace => Some(0x33), // kVK_Delete
        HidKeyCode::Tab => Some(0x30),
        HidKeyCode::Space => Some(0x31),
        HidKeyCode::CapsLock => Some(0x39),
        HidKeyCode::PrintScreen => Some(0x69), // kVK_F13
        HidKeyCode::ScrollLock => Some(0x6B),  // kVK_F14
        HidKeyCode::Pause => Some(0x71),       // kVK_F15
        HidKeyCode::Home => Some(0x73),
        HidKeyCode::PageUp => Some(0x74),
        HidKeyCode::Delete => Some(0x75), // kVK_ForwardDelete
        HidKeyCode::End => Some(0x77),
        HidKeyCode::PageDown => Some(0x79),
        HidKeyCode::ArrowLeft => Some(0x7B),
        HidKeyCode::ArrowRight => Some(0x7C),
        HidKeyCode::ArrowDown => Some(0x7D),
        HidKeyCode::ArrowUp => Some(0x7E),

        HidKeyCode::Minus => Some(0x1B),
        HidKeyCode::Equal => Some(0x18),
        HidKeyCode::BracketLeft => Some(0x21),
        HidKeyCode::BracketRight => Some(0x1E),
        HidKeyCode::Backslash => Some(0x2A),
        HidKeyCode::Semicolon => Some(0x29),
        HidKeyCode::Quote => Some(0x27),
        HidKeyCode::Backquote => Some(0x32), // kVK_ANSI_Grave
        HidKeyCode::Comma => Some(0x2B),
        HidKeyCode::Period => Some(0x2F),
        HidKeyCode::Slash => Some(0x2C),

        HidKeyCode::ControlLeft => Some(0x3B),
        HidKeyCode::ShiftLeft => Some(0x38),
        HidKeyCode::AltLeft => Some(0x3A), // kVK_Option
        HidKeyCode::MetaLeft => Some(0x37), // kVK_Command
        HidKeyCode::ControlRight => Some(0x3E),
        HidKeyCode::ShiftRight => Some(0x3C),
        HidKeyCode::AltRight => Some(0x3D),
        HidKeyCode::MetaRight => Some(0x36),

        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use HidKeyCode::*;

    #[test]
    fn test_letters_use_ansi_position_codes() {
        assert_eq!(hid_to_cgkeycode(KeyA), Some(0x00));
        assert_eq!(hid_to_cgkeycode(KeyS), Some(0x01));
        assert_eq!(hid_to_cgkeycode(KeyZ), Some(0x06));
    }

    #[test]
    fn test_digit_zero_is_last_in_hid_order() {
        assert_eq!(hid_to_cgkeycode(Digit1), Some(0x12));
        assert_eq!(hid_to_cgkeycode(Digit0), Some(0x1D));
    }

    #[test]
    fn test_function_keys_map() {
        assert_eq!(hid_to_cgkeycode(F1), Some(0x7A));
        assert_eq!(hid_to_cgkeycode(F5), Some(0x60));
        assert_eq!(hid_to_cgkeycode(F12), Some(0x6F));
    }

    #[test]
    fn test_special_keys_map() {
        assert_eq!(hid_to_cgkeycode(Enter), Some(0x24));
        assert_eq!(hid_to_cgkeycode(Escape), Some(0x35));
        assert_eq!(hid_to_cgkeycode(ArrowUp), Some(0x7E));
        assert_eq!(hid_to_cgkeycode(MetaLeft), Some(0x37));
    }

    #[test]
    fn test_keys_missing_on_apple_keyboards_return_none() {
        assert_eq!(hid_to_cgkeycode(Insert), None);
        assert_eq!(hid_to_cgkeycode(NumLock), None);
        assert_eq!(hid_to_cgkeycode(ContextMenu), None);
    }
}
