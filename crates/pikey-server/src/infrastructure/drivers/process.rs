//! Child-process execution for the OS automation drivers.
//!
//! Both automation drivers inject input by running a short-lived helper
//! (`osascript`, `python`, `powershell`).  They go through [`CommandRunner`]
//! so tests can capture the generated command lines instead of running them.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::application::driver::DriverError;

/// Runs one helper process to completion.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with `args` and waits for it to exit.
    ///
    /// # Errors
    ///
    /// [`DriverError::Device`] if the program cannot be started or exits
    /// with a non-zero status.
    async fn run(&self, program: &str, args: &[String]) -> Result<(), DriverError>;
}

/// Runs commands on the host.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<(), DriverError> {
        debug!("running {program} with {} argument(s)", args.len());
        let output = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| DriverError::Device(format!("failed to start {program}: {e}")))?;
        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(DriverError::Device(format!(
                "{program} exited with {}: {}",
                output.status,
                stderr.trim()
            )))
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Captures command lines; optionally fails every call or one call.
    #[derive(Default)]
    pub(crate) struct RecordingRunner {
        calls: Mutex<Vec<(String, Vec<String>)>>,
        fail: bool,
        fail_call: Option<usize>,
    }

    impl RecordingRunner {
        pub(crate) fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        /// Fails only the call at `index` (zero-based).
        pub(crate) fn failing_call(index: usize) -> Self {
            Self {
                fail_call: Some(index),
                ..Self::default()
            }
        }

        pub(crate) fn calls(&self) -> Vec<(String, Vec<String>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn run(&self, program: &str, args: &[String]) -> Result<(), DriverError> {
            let index = {
                let mut calls = self.calls.lock().unwrap();
                calls.push((program.to_string(), args.to_vec()));
                calls.len() - 1
            };
            if self.fail || self.fail_call == Some(index) {
                Err(DriverError::Device(format!("{program} exited with 1")))
            } else {
                Ok(())
            }
        }
    }
}
