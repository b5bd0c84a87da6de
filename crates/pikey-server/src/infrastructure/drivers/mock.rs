//! In-memory recording driver.
//!
//! `RecordingDriver` performs no I/O.  It keeps an ordered log of every
//! action so tests can assert on exactly what reached the driver, and it is
//! also selectable at runtime (`--driver mock`) for running the service on a
//! machine with no gadget and no desktop session.
//!
//! # Re-entry detection
//!
//! The driver counts calls that are in flight at the same moment.  When it
//! is declared [`ConcurrencyClass::Exclusive`], any overlap is a dispatcher
//! bug and is counted in [`reentry_count`](RecordingDriver::reentry_count).
//!
//! # Failure injection
//!
//! [`set_failure`](RecordingDriver::set_failure) makes every later call fail
//! with [`DriverError::Device`] until cleared.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pikey_core::{ClickKind, KeyTable, PointerButton};
use tracing::debug;

use crate::application::driver::{
    ConcurrencyClass, DriverCapabilities, DriverError, DriverKind, InputDriver,
};

/// One recorded driver call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedAction {
    Press { key: String, hold: Duration },
    KeyDown(String),
    KeyUp(String),
    Text(String),
    Move { dx: i32, dy: i32 },
    Click { button: PointerButton, kind: ClickKind },
    Scroll { dx: i32, dy: i32 },
    Close,
}

/// A driver that records calls instead of injecting input.
pub struct RecordingDriver {
    keys: Arc<KeyTable>,
    capabilities: DriverCapabilities,
    actions: Mutex<Vec<RecordedAction>>,
    failure: Mutex<Option<String>>,
    in_flight: AtomicUsize,
    max_concurrent: AtomicUsize,
    reentries: AtomicUsize,
}

impl RecordingDriver {
    /// Exclusive driver with split key events and pointer support.
    pub fn new(keys: Arc<KeyTable>) -> Self {
        Self {
            keys,
            capabilities: DriverCapabilities {
                split_key_events: true,
                pointer: true,
                native_text: false,
                concurrency: ConcurrencyClass::Exclusive,
            },
            actions: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
            in_flight: AtomicUsize::new(0),
            max_concurrent: AtomicUsize::new(0),
            reentries: AtomicUsize::new(0),
        }
    }

    /// Overrides the advertised capabilities.
    pub fn with_capabilities(mut self, capabilities: DriverCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Makes every subsequent call fail with `message`, or succeed again
    /// with `None`.
    pub fn set_failure(&self, message: Option<String>) {
        *lock(&self.failure) = message;
    }

    /// All recorded actions, oldest first.
    pub fn actions(&self) -> Vec<RecordedAction> {
        lock(&self.actions).clone()
    }

    /// Keys of recorded presses, in order.
    pub fn pressed_keys(&self) -> Vec<String> {
        lock(&self.actions)
            .iter()
            .filter_map(|a| match a {
                RecordedAction::Press { key, .. } => Some(key.clone()),
                _ => None,
            })
            .collect()
    }

    /// Highest number of calls observed in flight at once.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    /// Overlapping calls observed while declared exclusive.
    pub fn reentry_count(&self) -> usize {
        self.reentries.load(Ordering::SeqCst)
    }

    fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(now, Ordering::SeqCst);
        if now > 1 && self.capabilities.concurrency == ConcurrencyClass::Exclusive {
            self.reentries.fetch_add(1, Ordering::SeqCst);
        }
        InFlight { driver: self }
    }

    fn check_failure(&self) -> Result<(), DriverError> {
        match lock(&self.failure).as_ref() {
            Some(message) => Err(DriverError::Device(message.clone())),
            None => Ok(()),
        }
    }

    fn record(&self, action: RecordedAction) {
        debug!("mock driver: {action:?}");
        lock(&self.actions).push(action);
    }

    fn require_pointer(&self) -> Result<(), DriverError> {
        if self.capabilities.pointer {
            Ok(())
        } else {
            Err(DriverError::CapabilityUnavailable("pointer"))
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

struct InFlight<'a> {
    driver: &'a RecordingDriver,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.driver.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl InputDriver for RecordingDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Mock
    }

    fn capabilities(&self) -> DriverCapabilities {
        self.capabilities
    }

    fn is_key_supported(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    async fn press(&self, key: &str, hold: Duration) -> Result<(), DriverError> {
        let _guard = self.enter();
        self.check_failure()?;
        self.keys.lookup(key)?;
        tokio::time::sleep(hold).await;
        self.record(RecordedAction::Press {
            key: key.to_ascii_lowercase(),
            hold,
        });
        Ok(())
    }

    async fn key_down(&self, key: &str) -> Result<(), DriverError> {
        let _guard = self.enter();
        self.check_failure()?;
        self.keys.lookup(key)?;
        self.record(RecordedAction::KeyDown(key.to_ascii_lowercase()));
        Ok(())
    }

    async fn key_up(&self, key: &str) -> Result<(), DriverError> {
        let _guard = self.enter();
        self.check_failure()?;
        self.keys.lookup(key)?;
        self.record(RecordedAction::KeyUp(key.to_ascii_lowercase()));
        Ok(())
    }

    async fn type_text(&self, text: &str) -> Result<(), DriverError> {
        let _guard = self.enter();
        self.check_failure()?;
        self.record(RecordedAction::Text(text.to_string()));
        Ok(())
    }

    async fn move_pointer(&self, dx: i32, dy: i32) -> Result<(), DriverError> {
        let _guard = self.enter();
        self.require_pointer()?;
        self.check_failure()?;
        self.record(RecordedAction::Move { dx, dy });
        Ok(())
    }

    async fn click(&self, button: PointerButton, kind: ClickKind) -> Result<(), DriverError> {
        let _guard = self.enter();
        self.require_pointer()?;
        self.check_failure()?;
        self.record(RecordedAction::Click { button, kind });
        Ok(())
    }

    async fn scroll(&self, dx: i32, dy: i32) -> Result<(), DriverError> {
        let _guard = self.enter();
        self.require_pointer()?;
        self.check_failure()?;
        self.record(RecordedAction::Scroll { dx, dy });
        Ok(())
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.record(RecordedAction::Close);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver() -> RecordingDriver {
        RecordingDriver::new(Arc::new(KeyTable::standard()))
    }

    #[tokio::test]
    async fn test_records_actions_in_order() {
        let d = driver();

        d.press("A", Duration::from_millis(1)).await.expect("press");
        d.type_text("hi").await.expect("type");
        d.move_pointer(3, -2).await.expect("move");
        d.close().await.expect("close");

        assert_eq!(
            d.actions(),
            vec![
                RecordedAction::Press {
                    key: "a".into(),
                    hold: Duration::from_millis(1)
                },
                RecordedAction::Text("hi".into()),
                RecordedAction::Move { dx: 3, dy: -2 },
                RecordedAction::Close,
            ]
        );
        assert_eq!(d.pressed_keys(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_unknown_key_is_rejected() {
        let d = driver();
        let result = d.press("notakey", Duration::ZERO).await;
        assert!(matches!(result, Err(DriverError::UnsupportedKey(_))));
        assert!(d.actions().is_empty());
    }

    #[tokio::test]
    async fn test_failure_injection_can_be_cleared() {
        let d = driver();
        d.set_failure(Some("unplugged".into()));
        assert!(matches!(
            d.press("a", Duration::ZERO).await,
            Err(DriverError::Device(ref m)) if m == "unplugged"
        ));

        d.set_failure(None);
        assert!(d.press("a", Duration::ZERO).await.is_ok());
    }

    #[tokio::test]
    async fn test_overlapping_calls_count_as_reentry_when_exclusive() {
        let d = Arc::new(driver());
        let a = tokio::spawn({
            let d = Arc::clone(&d);
            async move { d.press("a", Duration::from_millis(50)).await }
        });
        let b = tokio::spawn({
            let d = Arc::clone(&d);
            async move { d.press("b", Duration::from_millis(50)).await }
        });
        a.await.expect("join").expect("press a");
        b.await.expect("join").expect("press b");

        assert_eq!(d.max_concurrent(), 2);
        assert_eq!(d.reentry_count(), 1);
    }

    #[tokio::test]
    async fn test_pointer_can_be_disabled() {
        let d = driver().with_capabilities(DriverCapabilities {
            split_key_events: false,
            pointer: false,
            native_text: true,
            concurrency: ConcurrencyClass::Shared,
        });
        assert!(matches!(
            d.scroll(0, 1).await,
            Err(DriverError::CapabilityUnavailable("pointer"))
        ));
        assert!(d.capabilities().native_text);
    }
}
