//! # pikey-core
//!
//! Shared building blocks for the PiKey input-injection service.  Nothing in
//! this crate touches devices, processes or sockets.
//!
//! - **`keymap`** – The [`KeyTable`] that turns key names such as `"enter"`
//!   into USB HID usage codes, plus HID → Windows VK and HID → macOS
//!   `CGKeyCode` translation for the OS automation drivers.
//!
//! - **`report`** – Byte layouts of the boot keyboard report (8 bytes) and the
//!   relative mouse report (4 bytes) written to a USB gadget.
//!
//! - **`command`** – Immutable press, text and pointer commands with their
//!   submission instant, as handed to the dispatcher.
//!
//! - **`protocol`** – JSON envelopes exchanged over the realtime channel.

pub mod command;
pub mod keymap;
pub mod protocol;
pub mod report;

pub use command::{PointerAction, PointerCommand, PressCommand, TextCommand, DEFAULT_HOLD, TYPE_CHAR_DELAY};
pub use keymap::{HidKeyCode, KeyTable, KeyTableError};
pub use protocol::{ChannelRequest, InboundEnvelope, MessageKind, OutboundEnvelope, ProtocolError};
pub use report::{ClickKind, KeyboardReport, MouseReport, PointerButton};
