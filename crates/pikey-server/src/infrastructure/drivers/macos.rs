//! macOS automation driver.
//!
//! Injects keystrokes into the local session through System Events, one
//! `osascript` process per action.  System Events has no separate key-down
//! and key-up, so `hold` is not honoured: every press is a complete tap.
//!
//! Single letters and digits are sent with `keystroke`, everything else with
//! `key code N` using the ANSI virtual key code.  Text goes out as a single
//! `keystroke` of the whole string.
//!
//! The process needs the Accessibility permission for the terminal or
//! service it runs under; without it `osascript` exits non-zero and the
//! action fails with a device error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pikey_core::keymap::macos_cg::hid_to_cgkeycode;
use pikey_core::KeyTable;

use crate::application::driver::{
    ConcurrencyClass, DriverCapabilities, DriverError, DriverKind, InputDriver,
};

use super::process::{CommandRunner, SystemRunner};

const OSASCRIPT: &str = "osascript";

pub struct MacosAutomationDriver {
    keys: Arc<KeyTable>,
    runner: Box<dyn CommandRunner>,
}

impl MacosAutomationDriver {
    pub fn new(keys: Arc<KeyTable>) -> Self {
        Self::with_runner(keys, Box::new(SystemRunner))
    }

    pub fn with_runner(keys: Arc<KeyTable>, runner: Box<dyn CommandRunner>) -> Self {
        Self { keys, runner }
    }

    /// AppleScript statement that taps `key`.
    fn key_script(&self, key: &str) -> Result<String, DriverError> {
        let name = key.to_ascii_lowercase();
        let code = self.keys.lookup(&name)?;
        if name.len() == 1 && name.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Ok(system_events(&format!("keystroke \"{name}\"")));
        }
        let cg = hid_to_cgkeycode(code).ok_or_else(|| DriverError::UnsupportedKey(name.clone()))?;
        Ok(system_events(&format!("key code {cg}")))
    }

    async fn run_script(&self, script: String) -> Result<(), DriverError> {
        self.runner.run(OSASCRIPT, &["-e".to_string(), script]).await
    }
}

fn system_events(statement: &str) -> String {
    format!("tell application \"System Events\" to {statement}")
}

/// Escapes `text` for use inside an AppleScript string literal.
fn applescript_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

#[async_trait]
impl InputDriver for MacosAutomationDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::MacosAutomation
    }

    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities {
            split_key_events: false,
            pointer: false,
            native_text: true,
            concurrency: ConcurrencyClass::Shared,
        }
    }

    fn is_key_supported(&self, key: &str) -> bool {
        self.keys
            .lookup(key)
            .ok()
            .and_then(hid_to_cgkeycode)
            .is_some()
    }

    async fn press(&self, key: &str, _hold: Duration) -> Result<(), DriverError> {
        let script = self.key_script(key)?;
        self.run_script(script).await
    }

    async fn type_text(&self, text: &str) -> Result<(), DriverError> {
        if text.is_empty() {
            return Ok(());
        }
        let script = system_events(&format!("keystroke {}", applescript_literal(text)));
        self.run_script(script).await
    }

    async fn close(&self) -> Result<(), DriverError> {
        Ok(())
    }
}
