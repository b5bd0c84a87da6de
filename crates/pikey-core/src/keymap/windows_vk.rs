//! HID Usage ID to Windows Virtual-Key code translation.
//!
//! The Windows automation driver feeds these codes to `keybd_event`.
//! Letters and digits share their ASCII upper-case value with the VK code
//! (`VK_A = 0x41`, `VK_0 = 0x30`), so they are computed; everything else is
//! listed.
//!
//! Reference: <https://learn.microsoft.com/windows/win32/inputdev/virtual-key-codes>

use super::hid::HidKeyCode;

/// Translates a [`HidKeyCode`] to a Windows Virtual-Key code.
///
/// Returns `None` when Windows has no virtual key for the usage.
pub fn hid_to_vk(hid: HidKeyCode) -> Option<u8> {
    let code = hid.as_u8();
    match hid {
        _ if (0x04..=0x1D).contains(&code) => Some(b'A' + (code - 0x04)),
        HidKeyCode::Digit0 => Some(b'0'),
        _ if (0x1E..=0x26).contains(&code) => Some(b'1' + (code - 0x1E)),
        _ if (0x3A..=0x45).contains(&code) => Some(0x70 + (code - 0x3A)), // VK_F1..VK_F12

        HidKeyCode::Enter => Some(0x0D),     // VK_RETURN
        HidKeyCode::Escape => Some(0x1B),    // VK_ESCAPE
        HidKeyCode::Backspace => Some(0x08), // VK_BACK
        HidKeyCode::Tab => Some(0x09),       // VK_TAB
        HidKeyCode::Space => Some(0x20),     // VK_SPACE
        HidKeyCode::CapsLock => Some(0x14),  // VK_CAPITAL

        HidKeyCode::PrintScreen => Some(0x2C), // VK_SNAPSHOT
        HidKeyCode::ScrollLock => Some(0x91),
        HidKeyCode::Pause => Some(0x13),
        HidKeyCode::Insert => Some(0x2D),
        HidKeyCode::Home => Some(0x24),
        HidKeyCode::PageUp => Some(0x21), // VK_PRIOR
        HidKeyCode::Delete => Some(0x2E),
        HidKeyCode::End => Some(0x23),
        HidKeyCode::PageDown => Some(0x22), // VK_NEXT
        HidKeyCode::ArrowLeft => Some(0x25),
        HidKeyCode::ArrowUp => Some(0x26),
        HidKeyCode::ArrowRight => Some(0x27),
        HidKeyCode::ArrowDown => Some(0x28),
        HidKeyCode::NumLock => Some(0x90),
        HidKeyCode::ContextMenu => Some(0x5D), // VK_APPS

        // OEM keys follow the US layout
        HidKeyCode::Minus => Some(0xBD),
        HidKeyCode::Equal => Some(0xBB),
        HidKeyCode::BracketLeft => Some(0xDB),
        HidKeyCode::BracketRight => Some(0xDD),
        HidKeyCode::Backslash => Some(0xDC),
        HidKeyCode::Semicolon => Some(0xBA),
        HidKeyCode::Quote => Some(0xDE),
        HidKeyCode::Backquote => Some(0xC0),
        HidKeyCode::Comma => Some(0xBC),
        HidKeyCode::Period => Some(0xBE),
        HidKeyCode::Slash => Some(0xBF),

        // The generic VK_CONTROL/VK_SHIFT/VK_MENU codes are what most
        // applications watch for; the sided variants are kept for the right hand.
        HidKeyCode::ControlLeft => Some(0x11),
        HidKeyCode::ShiftLeft => Some(0x10),
        HidKeyCode::AltLeft => Some(0x12),
        HidKeyCode::MetaLeft => Some(0x5B), // VK_LWIN
        HidKeyCode::ControlRight => Some(0xA3),
        HidKeyCode::ShiftRight => Some(0xA1),
        HidKeyCode::AltRight => Some(0xA5),
        HidKeyCode::MetaRight => Some(0x5C),

        _ => None,
    }
}
