//! The input driver capability.
//!
//! Every backend (USB HID gadget, macOS automation, Windows automation, the
//! recording mock) implements [`InputDriver`].  The dispatcher only ever sees
//! an `Arc<dyn InputDriver>` and decides how to admit work from the
//! driver's [`DriverCapabilities`].
//!
//! Optional operations have default bodies that return
//! [`DriverError::CapabilityUnavailable`], so a backend only implements what
//! it can actually do.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use pikey_core::{ClickKind, KeyTableError, PointerButton};
use thiserror::Error;

/// Errors reported by input drivers.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("unsupported key: {0}")]
    UnsupportedKey(String),

    #[error("device write to {path} failed: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Any other device or automation failure.
    #[error("device error: {0}")]
    Device(String),

    #[error("capability not available: {0}")]
    CapabilityUnavailable(&'static str),
}

impl From<KeyTableError> for DriverError {
    fn from(err: KeyTableError) -> Self {
        match err {
            KeyTableError::Unsupported(key) => Self::UnsupportedKey(key),
        }
    }
}

/// Backend identity, reported in stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverKind {
    HidGadget,
    MacosAutomation,
    WindowsAutomation,
    Mock,
}

impl DriverKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HidGadget => "linux_otg",
            Self::MacosAutomation => "macos_automation",
            Self::WindowsAutomation => "windows_automation",
            Self::Mock => "mock",
        }
    }
}

/// Whether a driver tolerates overlapping calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencyClass {
    /// One operation at a time; overlapping calls would interleave reports on
    /// a single device.
    Exclusive,
    /// Each call is self-contained (for example one child process per call).
    Shared,
}

/// What a driver can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverCapabilities {
    /// `key_down`/`key_up` are available as separate operations.
    ///
    /// Informational only: dispatch never gates on it, because no request
    /// type reaches `key_down`/`key_up` directly.  Drivers that set it must
    /// still release keys left down in [`InputDriver::close`].
    pub split_key_events: bool,
    /// Pointer move, click and scroll are available.
    pub pointer: bool,
    /// `type_text` injects a whole string in one operation instead of
    /// pressing key by key.
    pub native_text: bool,
    pub concurrency: ConcurrencyClass,
}

/// An input injection backend.
///
/// Key names are lower-case entries of the shared key table.  Implementations
/// must resolve names through [`is_key_supported`](Self::is_key_supported)'s
/// rules and return [`DriverError::UnsupportedKey`] rather than panic.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InputDriver: Send + Sync {
    fn kind(&self) -> DriverKind;

    fn capabilities(&self) -> DriverCapabilities;

    fn is_key_supported(&self, key: &str) -> bool;

    /// Presses `key`, holds it for `hold`, releases it.
    async fn press(&self, key: &str, hold: Duration) -> Result<(), DriverError>;

    async fn key_down(&self, _key: &str) -> Result<(), DriverError> {
        Err(DriverError::CapabilityUnavailable("split key events"))
    }

    async fn key_up(&self, _key: &str) -> Result<(), DriverError> {
        Err(DriverError::CapabilityUnavailable("split key events"))
    }

    async fn type_text(&self, text: &str) -> Result<(), DriverError>;

    async fn move_pointer(&self, _dx: i32, _dy: i32) -> Result<(), DriverError> {
        Err(DriverError::CapabilityUnavailable("pointer"))
    }

    async fn click(&self, _button: PointerButton, _kind: ClickKind) -> Result<(), DriverError> {
        Err(DriverError::CapabilityUnavailable("pointer"))
    }

    async fn scroll(&self, _dx: i32, _dy: i32) -> Result<(), DriverError> {
        Err(DriverError::CapabilityUnavailable("pointer"))
    }

    /// Releases anything held.  Idempotent and best-effort.
    async fn close(&self) -> Result<(), DriverError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_kind_names() {
        assert_eq!(DriverKind::HidGadget.as_str(), "linux_otg");
        assert_eq!(DriverKind::MacosAutomation.as_str(), "macos_automation");
        assert_eq!(DriverKind::WindowsAutomation.as_str(), "windows_automation");
        assert_eq!(DriverKind::Mock.as_str(), "mock");
    }

    #[test]
    fn test_key_table_error_becomes_unsupported_key() {
        let err: DriverError = KeyTableError::Unsupported("zz".into()).into();
        assert!(matches!(err, DriverError::UnsupportedKey(ref k) if k == "zz"));
    }

    struct PressOnly;

    #[async_trait]
    impl InputDriver for PressOnly {
        fn kind(&self) -> DriverKind {
            DriverKind::Mock
        }
        fn capabilities(&self) -> DriverCapabilities {
            DriverCapabilities {
                split_key_events: false,
                pointer: false,
                native_text: false,
                concurrency: ConcurrencyClass::Shared,
            }
        }
        fn is_key_supported(&self, _key: &str) -> bool {
            true
        }
        async fn press(&self, _key: &str, _hold: Duration) -> Result<(), DriverError> {
            Ok(())
        }
        async fn type_text(&self, _text: &str) -> Result<(), DriverError> {
            Ok(())
        }
        async fn close(&self) -> Result<(), DriverError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_optional_operations_default_to_capability_unavailable() {
        let driver = PressOnly;
        assert!(matches!(
            driver.key_down("a").await,
            Err(DriverError::CapabilityUnavailable("split key events"))
        ));
        assert!(matches!(
            driver.move_pointer(1, 1).await,
            Err(DriverError::CapabilityUnavailable("pointer"))
        ));
        assert!(matches!(
            driver.click(PointerButton::Left, ClickKind::Click).await,
            Err(DriverError::CapabilityUnavailable("pointer"))
        ));
    }
}
