//! USB HID gadget driver.
//!
//! On a Linux board configured as a USB gadget (Raspberry Pi Zero and
//! friends), `/dev/hidg0` is a boot keyboard function: every 8-byte write is
//! one keyboard report delivered to the host the board is plugged into.  An
//! optional second function (usually `/dev/hidg1`) accepts 4-byte relative
//! mouse reports.
//!
//! # Write discipline
//!
//! Each report is written with its own open/write/close cycle.  The gadget
//! node is never created: a missing device is an error, not a new file.
//!
//! # Held-key state
//!
//! The driver tracks the one key it currently holds.  The report written is
//! always derived from that state, so a press is "set state, write, wait,
//! clear state, write" and a failed write leaves the state cleared.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pikey_core::{ClickKind, HidKeyCode, KeyTable, KeyboardReport, MouseReport, PointerButton};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::application::driver::{
    ConcurrencyClass, DriverCapabilities, DriverError, DriverKind, InputDriver,
};

use super::type_by_presses;

/// Destination for raw HID reports.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn write_report(&self, report: &[u8]) -> Result<(), DriverError>;

    /// Human-readable destination, for logs.
    fn describe(&self) -> String;
}

/// A gadget device node, opened per report.
#[derive(Debug, Clone)]
pub struct DeviceFile {
    path: PathBuf,
}

impl DeviceFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ReportSink for DeviceFile {
    async fn write_report(&self, report: &[u8]) -> Result<(), DriverError> {
        let io = |source| DriverError::Io {
            path: self.path.clone(),
            source,
        };
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(io)?;
        file.write_all(report).await.map_err(io)?;
        // tokio's File completes writes in the background; flush waits for it.
        file.flush().await.map_err(io)?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Returns `true` if `path` exists and can be opened for writing.
pub fn is_writable(path: &Path) -> bool {
    std::fs::OpenOptions::new().write(true).open(path).is_ok()
}

/// Injects input by writing boot-protocol reports to gadget devices.
pub struct HidGadgetDriver {
    keys: Arc<KeyTable>,
    keyboard: Box<dyn ReportSink>,
    mouse: Option<Box<dyn ReportSink>>,
    held: Mutex<Option<HidKeyCode>>,
    buttons: AtomicU8,
}

impl HidGadgetDriver {
    /// Opens the driver on device nodes.
    ///
    /// # Errors
    ///
    /// [`DriverError::Io`] if either device node does not exist.
    pub fn open(
        keys: Arc<KeyTable>,
        keyboard_path: &Path,
        mouse_path: Option<&Path>,
    ) -> Result<Self, DriverError> {
        let exists = |path: &Path| {
            std::fs::metadata(path)
                .map(|_| ())
                .map_err(|source| DriverError::Io {
                    path: path.to_path_buf(),
                    source,
                })
        };
        exists(keyboard_path)?;
        if let Some(path) = mouse_path {
            exists(path)?;
        }
        info!(
            "HID gadget driver on {} (mouse: {})",
            keyboard_path.display(),
            mouse_path.map_or_else(|| "none".to_string(), |p| p.display().to_string())
        );
        Ok(Self::with_sinks(
            keys,
            Box::new(DeviceFile::new(keyboard_path)),
            mouse_path.map(|p| Box::new(DeviceFile::new(p)) as Box<dyn ReportSink>),
        ))
    }

    /// Builds the driver on arbitrary sinks.
    pub fn with_sinks(
        keys: Arc<KeyTable>,
        keyboard: Box<dyn ReportSink>,
        mouse: Option<Box<dyn ReportSink>>,
    ) -> Self {
        Self {
            keys,
            keyboard,
            mouse,
            held: Mutex::new(None),
            buttons: AtomicU8::new(0),
        }
    }

    fn set_held(&self, key: Option<HidKeyCode>) {
        *self.held.lock().unwrap_or_else(|e| e.into_inner()) = key;
    }

    fn held(&self) -> Option<HidKeyCode> {
        *self.held.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sets the held key and writes the matching report.  On failure the
    /// held state is cleared.
    async fn hold_key(&self, key: Option<HidKeyCode>) -> Result<(), DriverError> {
        self.set_held(key);
        let report = KeyboardReport::for_state(self.held());
        let result = self.keyboard.write_report(&report.to_bytes()).await;
        if result.is_err() {
            self.set_held(None);
        }
        result
    }

    fn mouse(&self) -> Result<&dyn ReportSink, DriverError> {
        self.mouse
            .as_deref()
            .ok_or(DriverError::CapabilityUnavailable("pointer"))
    }

    async fn write_mouse(&self, reports: &[MouseReport]) -> Result<(), DriverError> {
        let sink = self.mouse()?;
        for report in reports {
            sink.write_report(&report.to_bytes()).await?;
        }
        Ok(())
    }

    async fn set_buttons(&self, buttons: u8) -> Result<(), DriverError> {
        self.buttons.store(buttons, Ordering::SeqCst);
        self.write_mouse(&[MouseReport::buttons(buttons)]).await
    }
}

#[async_trait]
impl InputDriver for HidGadgetDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::HidGadget
    }

    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities {
            split_key_events: true,
            pointer: self.mouse.is_some(),
            native_text: false,
            concurrency: ConcurrencyClass::Exclusive,
        }
    }

    fn is_key_supported(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    async fn press(&self, key: &str, hold: Duration) -> Result<(), DriverError> {
        let code = self.keys.lookup(key)?;
        self.hold_key(Some(code)).await?;
        tokio::time::sleep(hold).await;
        self.hold_key(None).await
    }

    async fn key_down(&self, key: &str) -> Result<(), DriverError> {
        let code = self.keys.lookup(key)?;
        self.hold_key(Some(code)).await
    }

    async fn key_up(&self, key: &str) -> Result<(), DriverError> {
        self.keys.lookup(key)?;
        self.hold_key(None).await
    }

    async fn type_text(&self, text: &str) -> Result<(), DriverError> {
        type_by_presses(self, &self.keys, text).await
    }

    async fn move_pointer(&self, dx: i32, dy: i32) -> Result<(), DriverError> {
        let buttons = self.buttons.load(Ordering::SeqCst);
        self.write_mouse(&MouseReport::motion(buttons, dx, dy)).await
    }

    async fn click(&self, button: PointerButton, kind: ClickKind) -> Result<(), DriverError> {
        self.mouse()?;
        let current = self.buttons.load(Ordering::SeqCst);
        let down = current | button.bit();
        let up = current & !button.bit();
        match kind {
            ClickKind::Down => self.set_buttons(down).await,
            ClickKind::Up => self.set_buttons(up).await,
            ClickKind::Click => {
                self.set_buttons(down).await?;
                self.set_buttons(up).await
            }
            ClickKind::Double => {
                for _ in 0..2 {
                    self.set_buttons(down).await?;
                    self.set_buttons(up).await?;
                }
                Ok(())
            }
        }
    }

    async fn scroll(&self, dx: i32, dy: i32) -> Result<(), DriverError> {
        if dx != 0 {
            debug!("horizontal scroll of {dx} dropped: boot mouse has no pan axis");
        }
        let buttons = self.buttons.load(Ordering::SeqCst);
        self.write_mouse(&MouseReport::wheel(buttons, dy)).await
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.set_held(None);
        if let Err(e) = self
            .keyboard
            .write_report(&KeyboardReport::released().to_bytes())
            .await
        {
            warn!("release on close failed for {}: {e}", self.keyboard.describe());
        }
        if self.buttons.swap(0, Ordering::SeqCst) != 0 {
            if let Some(mouse) = &self.mouse {
                if let Err(e) = mouse.write_report(&MouseReport::buttons(0).to_bytes()).await {
                    warn!("button release on close failed for {}: {e}", mouse.describe());
                }
            }
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    /// Shared log of every report written.
    #[derive(Clone, Default)]
    struct RecordingSink {
        writes: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl RecordingSink {
        fn writes(&self) -> Vec<Vec<u8>> {
            self.writes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ReportSink for RecordingSink {
        async fn write_report(&self, report: &[u8]) -> Result<(), DriverError> {
            self.writes.lock().unwrap().push(report.to_vec());
            Ok(())
        }
        fn describe(&self) -> String {
            "recording".into()
        }
    }

    /// Fails the first `failures` writes, records the rest.
    struct FlakySink {
        inner: RecordingSink,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl ReportSink for FlakySink {
        async fn write_report(&self, report: &[u8]) -> Result<(), DriverError> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(DriverError::Device("endpoint stalled".into()));
            }
            self.inner.write_report(report).await
        }
        fn describe(&self) -> String {
            "flaky".into()
        }
    }

    fn driver_with(keyboard: RecordingSink, mouse: Option<RecordingSink>) -> HidGadgetDriver {
        HidGadgetDriver::with_sinks(
            Arc::new(KeyTable::standard()),
            Box::new(keyboard),
            mouse.map(|m| Box::new(m) as Box<dyn ReportSink>),
        )
    }

    const RELEASED: [u8; 8] = [0; 8];

    #[tokio::test]
    async fn test_press_a_writes_report_then_release() {
        // Arrange
        let sink = RecordingSink::default();
        let driver = driver_with(sink.clone(), None);

        // Act
        driver.press("a", Duration::from_millis(1)).await.expect("press");

        // Assert
        assert_eq!(
            sink.writes(),
            vec![vec![0x00, 0x00, 0x04, 0, 0, 0, 0, 0], RELEASED.to_vec()]
        );
    }

    #[tokio::test]
    async fn test_modifier_press_uses_modifier_byte() {
        let sink = RecordingSink::default();
        let driver = driver_with(sink.clone(), None);

        driver.press("shift", Duration::from_millis(1)).await.expect("press");

        assert_eq!(sink.writes()[0], vec![0x02, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_unsupported_key_writes_nothing() {
        let sink = RecordingSink::default();
        let driver = driver_with(sink.clone(), None);

        let result = driver.press("zz", Duration::from_millis(1)).await;

        assert!(matches!(result, Err(DriverError::UnsupportedKey(ref k)) if k == "zz"));
        assert!(sink.writes().is_empty());
        assert!(!driver.is_key_supported("zz"));
        assert!(driver.is_key_supported("Enter"));
    }

    #[tokio::test]
    async fn test_close_with_nothing_held_writes_single_release() {
        let sink = RecordingSink::default();
        let driver = driver_with(sink.clone(), None);

        driver.close().await.expect("close");
        assert_eq!(sink.writes(), vec![RELEASED.to_vec()]);

        driver.close().await.expect("close is idempotent");
        assert_eq!(sink.writes().len(), 2);
    }

    #[tokio::test]
    async fn test_close_tolerates_write_failure() {
        let driver = HidGadgetDriver::with_sinks(
            Arc::new(KeyTable::standard()),
            Box::new(FlakySink {
                inner: RecordingSink::default(),
                failures: AtomicUsize::new(1),
            }),
            None,
        );
        assert!(driver.close().await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_press_write_clears_held_state() {
        // Arrange: the key-down write fails, later writes succeed.
        let inner = RecordingSink::default();
        let driver = HidGadgetDriver::with_sinks(
            Arc::new(KeyTable::standard()),
            Box::new(FlakySink {
                inner: inner.clone(),
                failures: AtomicUsize::new(1),
            }),
            None,
        );

        // Act
        let result = driver.press("a", Duration::from_millis(1)).await;

        // Assert: error surfaced, no retry, state cleared
        assert!(matches!(result, Err(DriverError::Device(_))));
        assert!(inner.writes().is_empty());
        assert_eq!(driver.held(), None);
    }

    #[tokio::test]
    async fn test_split_key_events() {
        let sink = RecordingSink::default();
        let driver = driver_with(sink.clone(), None);
        assert!(driver.capabilities().split_key_events);

        driver.key_down("enter").await.expect("down");
        assert_eq!(driver.held(), Some(HidKeyCode::Enter));
        driver.key_up("enter").await.expect("up");

        assert_eq!(sink.writes(), vec![vec![0, 0, 0x28, 0, 0, 0, 0, 0], RELEASED.to_vec()]);
    }

    #[tokio::test]
    async fn test_pointer_requires_mouse_device() {
        let driver = driver_with(RecordingSink::default(), None);
        assert!(!driver.capabilities().pointer);
        assert!(matches!(
            driver.move_pointer(5, 5).await,
            Err(DriverError::CapabilityUnavailable("pointer"))
        ));
        assert!(matches!(
            driver.click(PointerButton::Left, ClickKind::Click).await,
            Err(DriverError::CapabilityUnavailable("pointer"))
        ));
    }

    #[tokio::test]
    async fn test_large_move_is_split_into_reports() {
        let mouse = RecordingSink::default();
        let driver = driver_with(RecordingSink::default(), Some(mouse.clone()));

        driver.move_pointer(200, -10).await.expect("move");

        let writes = mouse.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], vec![0, 127, (-10i8) as u8, 0]);
        assert_eq!(writes[1], vec![0, 73, 0, 0]);
    }

    #[tokio::test]
    async fn test_click_presses_and_releases_button() {
        let mouse = RecordingSink::default();
        let driver = driver_with(RecordingSink::default(), Some(mouse.clone()));

        driver.click(PointerButton::Right, ClickKind::Click).await.expect("click");

        assert_eq!(mouse.writes(), vec![vec![0x02, 0, 0, 0], vec![0, 0, 0, 0]]);
    }

    #[tokio::test]
    async fn test_drag_keeps_button_held_during_motion() {
        let mouse = RecordingSink::default();
        let driver = driver_with(RecordingSink::default(), Some(mouse.clone()));

        driver.click(PointerButton::Left, ClickKind::Down).await.expect("down");
        driver.move_pointer(3, 4).await.expect("move");
        driver.close().await.expect("close");

        assert_eq!(
            mouse.writes(),
            vec![vec![0x01, 0, 0, 0], vec![0x01, 3, 4, 0], vec![0, 0, 0, 0]]
        );
    }

    #[tokio::test]
    async fn test_scroll_writes_wheel_reports() {
        let mouse = RecordingSink::default();
        let driver = driver_with(RecordingSink::default(), Some(mouse.clone()));

        driver.scroll(0, 2).await.expect("scroll");

        assert_eq!(mouse.writes(), vec![vec![0, 0, 0, (-2i8) as u8]]);
    }

    #[tokio::test]
    async fn test_device_file_appends_each_report() {
        // Arrange
        let file = tempfile::NamedTempFile::new().expect("temp file");
        let driver = HidGadgetDriver::open(Arc::new(KeyTable::standard()), file.path(), None)
            .expect("open on existing file");

        // Act
        driver.press("b", Duration::from_millis(1)).await.expect("press");

        // Assert
        let bytes = std::fs::read(file.path()).expect("read back");
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[..8], &[0, 0, 0x05, 0, 0, 0, 0, 0]);
        assert_eq!(&bytes[8..], &RELEASED);
        assert!(is_writable(file.path()));
    }

    #[test]
    fn test_open_missing_device_fails() {
        let dir = tempfile::tempdir().expect("temp dir");
        let missing = dir.path().join("hidg0");

        let result = HidGadgetDriver::open(Arc::new(KeyTable::standard()), &missing, None);

        assert!(matches!(result, Err(DriverError::Io { .. })));
        assert!(!missing.exists(), "the device node must not be created");
        assert!(!is_writable(&missing));
    }

    #[tokio::test]
    async fn test_write_to_vanished_device_is_io_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let sink = DeviceFile::new(dir.path().join("gone"));

        let result = sink.write_report(&RELEASED).await;

        assert!(matches!(result, Err(DriverError::Io { .. })));
        assert!(!sink.path().exists());
    }
}
