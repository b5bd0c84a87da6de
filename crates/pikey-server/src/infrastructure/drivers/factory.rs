//! Driver discovery and construction.
//!
//! `auto` picks the first usable backend in this order:
//!
//! 1. HID gadget, when the keyboard device node is writable (Linux only)
//! 2. macOS automation, on macOS
//! 3. Windows automation, on Windows
//!
//! The mock driver is never picked automatically; it has to be asked for.

use std::sync::Arc;

use pikey_core::KeyTable;
use tracing::info;

use crate::application::driver::{DriverError, DriverKind, InputDriver};
use crate::domain::{DriverSelection, ServerConfig};

use super::hid_gadget::{self, HidGadgetDriver};
use super::macos::MacosAutomationDriver;
use super::mock::RecordingDriver;
use super::windows::{KeySender, WindowsAutomationDriver};

/// Backends usable on this host with this configuration, in preference
/// order.  Always ends with [`DriverKind::Mock`].
pub fn available_drivers(config: &ServerConfig) -> Vec<DriverKind> {
    let mut kinds = Vec::new();
    if cfg!(target_os = "linux") && hid_gadget::is_writable(&config.keyboard_device) {
        kinds.push(DriverKind::HidGadget);
    }
    if cfg!(target_os = "macos") {
        kinds.push(DriverKind::MacosAutomation);
    }
    if cfg!(target_os = "windows") {
        kinds.push(DriverKind::WindowsAutomation);
    }
    kinds.push(DriverKind::Mock);
    kinds
}

/// Resolves a selection against what is available.
///
/// Explicit selections are returned as-is; construction reports whether
/// they actually work.
///
/// # Errors
///
/// [`DriverError::Device`] when `auto` finds no real backend.
pub fn resolve_selection(
    selection: DriverSelection,
    available: &[DriverKind],
) -> Result<DriverKind, DriverError> {
    match selection {
        DriverSelection::HidGadget => Ok(DriverKind::HidGadget),
        DriverSelection::MacosAutomation => Ok(DriverKind::MacosAutomation),
        DriverSelection::WindowsAutomation => Ok(DriverKind::WindowsAutomation),
        DriverSelection::Mock => Ok(DriverKind::Mock),
        DriverSelection::Auto => available
            .iter()
            .copied()
            .find(|kind| *kind != DriverKind::Mock)
            .ok_or_else(|| {
                DriverError::Device(
                    "no input driver available on this host; check the HID gadget device \
                     or run with --driver mock"
                        .into(),
                )
            }),
    }
}

/// Builds the driver selected by `config`.
///
/// # Errors
///
/// Propagates resolution failures, a missing gadget device, or an unknown
/// Windows key sender.
pub fn create_driver(
    config: &ServerConfig,
    keys: Arc<KeyTable>,
) -> Result<Arc<dyn InputDriver>, DriverError> {
    let kind = resolve_selection(config.driver, &available_drivers(config))?;
    info!("using {} input driver", kind.as_str());
    let driver: Arc<dyn InputDriver> = match kind {
        DriverKind::HidGadget => Arc::new(HidGadgetDriver::open(
            keys,
            &config.keyboard_device,
            config.mouse_device.as_deref(),
        )?),
        DriverKind::MacosAutomation => Arc::new(MacosAutomationDriver::new(keys)),
        DriverKind::WindowsAutomation => {
            let sender: KeySender = config.windows_sender.parse().map_err(DriverError::Device)?;
            Arc::new(WindowsAutomationDriver::new(keys, sender))
        }
        DriverKind::Mock => Arc::new(RecordingDriver::new(keys)),
    };
    Ok(driver)
}
