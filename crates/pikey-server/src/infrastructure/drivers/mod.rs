//! Input driver backends.
//!
//! The HID gadget driver is built on every platform (it only writes to a
//! file), so it can be exercised anywhere with a temporary file standing in
//! for the device.  Which backends are *offered* at startup is decided by
//! [`factory::available_drivers`].

pub mod factory;
pub mod hid_gadget;
pub mod macos;
pub mod mock;
pub mod process;
pub mod windows;

use pikey_core::{KeyTable, DEFAULT_HOLD, TYPE_CHAR_DELAY};

use crate::application::driver::{DriverError, InputDriver};

/// Types `text` as a sequence of presses on `driver`.
///
/// Characters with no key are skipped.  Presses use [`DEFAULT_HOLD`] and are
/// spaced by [`TYPE_CHAR_DELAY`]; the first failure stops typing.
pub(crate) async fn type_by_presses<D>(driver: &D, keys: &KeyTable, text: &str) -> Result<(), DriverError>
where
    D: InputDriver + ?Sized,
{
    for (i, key) in keys.expand_text(text).iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(TYPE_CHAR_DELAY).await;
        }
        driver.press(key, DEFAULT_HOLD).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::mock::RecordingDriver;
    use super::*;

    #[tokio::test]
    async fn test_type_by_presses_skips_unmapped_characters() {
        let keys = Arc::new(KeyTable::standard());
        let driver = RecordingDriver::new(Arc::clone(&keys));

        type_by_presses(&driver, &keys, "a b!").await.expect("typing");

        assert_eq!(driver.pressed_keys(), vec!["a", "space", "b"]);
    }
}
