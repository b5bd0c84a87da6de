//! Windows automation driver.
//!
//! Calls `user32!keybd_event` through a helper interpreter, one process per
//! key transition.  A press is a key-down process, a sleep for the hold
//! time, then a key-up process, so holds are honoured and `key_down` /
//! `key_up` are available on their own.
//!
//! Keys left down (by `key_down`, or by a press whose key-up failed) are
//! tracked and released by `close`.
//!
//! Two helpers are supported: Python (`ctypes`) and PowerShell (`Add-Type`
//! P/Invoke).  Python starts noticeably faster; PowerShell is always
//! present.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use pikey_core::keymap::windows_vk::hid_to_vk;
use pikey_core::KeyTable;
use tracing::{info, warn};

use crate::application::driver::{
    ConcurrencyClass, DriverCapabilities, DriverError, DriverKind, InputDriver,
};

use super::process::{CommandRunner, SystemRunner};
use super::type_by_presses;

/// `KEYEVENTF_KEYUP`.
const KEYEVENTF_KEYUP: u32 = 0x0002;

/// Interpreter used to reach `keybd_event`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeySender {
    #[default]
    Python,
    PowerShell,
}

impl KeySender {
    fn command(self, vk: u8, flags: u32) -> (&'static str, Vec<String>) {
        match self {
            Self::Python => (
                "python",
                vec![
                    "-c".to_string(),
                    format!(
                        "import ctypes;u=ctypes.windll.user32;u.keybd_event({vk:#04x},0,{flags},0)"
                    ),
                ],
            ),
            Self::PowerShell => (
                "powershell",
                vec![
                    "-NoProfile".to_string(),
                    "-NonInteractive".to_string(),
                    "-Command".to_string(),
                    format!(
                        "Add-Type -Namespace PiKey -Name U32 -MemberDefinition \
                         '[DllImport(\"user32.dll\")] public static extern void \
                         keybd_event(byte vk, byte scan, uint flags, System.UIntPtr extra);'; \
                         [PiKey.U32]::keybd_event({vk:#04x}, 0, {flags}, [System.UIntPtr]::Zero)"
                    ),
                ],
            ),
        }
    }
}

impl fmt::Display for KeySender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Python => "python",
            Self::PowerShell => "powershell",
        })
    }
}

impl FromStr for KeySender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "python" | "py" => Ok(Self::Python),
            "powershell" | "pwsh" | "ps" => Ok(Self::PowerShell),
            other => Err(format!(
                "unknown key sender '{other}' (expected python or powershell)"
            )),
        }
    }
}

pub struct WindowsAutomationDriver {
    keys: Arc<KeyTable>,
    sender: KeySender,
    runner: Box<dyn CommandRunner>,
    /// Virtual-key codes whose last transition left them down.
    held: Mutex<BTreeSet<u8>>,
}

impl WindowsAutomationDriver {
    pub fn new(keys: Arc<KeyTable>, sender: KeySender) -> Self {
        Self::with_runner(keys, sender, Box::new(SystemRunner))
    }

    pub fn with_runner(keys: Arc<KeyTable>, sender: KeySender, runner: Box<dyn CommandRunner>) -> Self {
        Self {
            keys,
            sender,
            runner,
            held: Mutex::new(BTreeSet::new()),
        }
    }

    fn vk_for(&self, key: &str) -> Result<u8, DriverError> {
        let code = self.keys.lookup(key)?;
        hid_to_vk(code).ok_or_else(|| DriverError::UnsupportedKey(key.to_string()))
    }

    async fn send(&self, vk: u8, flags: u32) -> Result<(), DriverError> {
        let (program, args) = self.sender.command(vk, flags);
        self.runner.run(program, &args).await
    }

    async fn down(&self, vk: u8) -> Result<(), DriverError> {
        self.send(vk, 0).await?;
        self.held().insert(vk);
        Ok(())
    }

    async fn up(&self, vk: u8) -> Result<(), DriverError> {
        self.send(vk, KEYEVENTF_KEYUP).await?;
        self.held().remove(&vk);
        Ok(())
    }

    fn held(&self) -> MutexGuard<'_, BTreeSet<u8>> {
        self.held.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl InputDriver for WindowsAutomationDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::WindowsAutomation
    }

    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities {
            split_key_events: true,
            pointer: false,
            native_text: false,
            concurrency: ConcurrencyClass::Shared,
        }
    }

    fn is_key_supported(&self, key: &str) -> bool {
        self.vk_for(key).is_ok()
    }

    async fn press(&self, key: &str, hold: Duration) -> Result<(), DriverError> {
        let vk = self.vk_for(key)?;
        self.down(vk).await?;
        tokio::time::sleep(hold).await;
        self.up(vk).await.map_err(|e| {
            warn!("key {key} may be stuck down until close: {e}");
            e
        })
    }

    async fn key_down(&self, key: &str) -> Result<(), DriverError> {
        let vk = self.vk_for(key)?;
        self.down(vk).await
    }

    async fn key_up(&self, key: &str) -> Result<(), DriverError> {
        let vk = self.vk_for(key)?;
        self.up(vk).await
    }

    async fn type_text(&self, text: &str) -> Result<(), DriverError> {
        type_by_presses(self, &self.keys, text).await
    }

    /// Sends a key-up for every key still down.  Every key is attempted;
    /// the first failure is returned.
    async fn close(&self) -> Result<(), DriverError> {
        let held: Vec<u8> = std::mem::take(&mut *self.held()).into_iter().collect();
        if !held.is_empty() {
            info!("releasing {} held key(s)", held.len());
        }
        let mut first_error = None;
        for vk in held {
            if let Err(e) = self.send(vk, KEYEVENTF_KEYUP).await {
                warn!("could not release key {vk:#04x}: {e}");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
