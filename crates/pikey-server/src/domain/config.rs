//! Service configuration types.
//!
//! [`ServerConfig`] holds every runtime setting.  `main.rs` fills it from
//! command-line flags and `PIKEY_*` environment variables; tests build it from
//! [`Default`] and override single fields.  Nothing in this module performs
//! I/O.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Which input driver to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriverSelection {
    /// Pick by host OS: HID gadget on Linux when the device is writable,
    /// otherwise the OS automation driver.
    #[default]
    Auto,
    HidGadget,
    MacosAutomation,
    WindowsAutomation,
    /// Records actions and logs them without touching any device.
    Mock,
}

impl FromStr for DriverSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "hid_gadget" | "linux_otg" | "otg" => Ok(Self::HidGadget),
            "macos_automation" | "macos" => Ok(Self::MacosAutomation),
            "windows_automation" | "windows" => Ok(Self::WindowsAutomation),
            "mock" => Ok(Self::Mock),
            other => Err(format!(
                "unknown driver '{other}' (expected auto, hid_gadget, macos_automation, windows_automation or mock)"
            )),
        }
    }
}

/// Execution order of the commands in one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchOrder {
    /// One after another in submission order.
    #[default]
    Sequential,
    /// All at once; only meaningful for drivers that tolerate concurrent calls.
    Unordered,
}

impl BatchOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Unordered => "unordered",
        }
    }
}

impl fmt::Display for BatchOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "unordered" => Ok(Self::Unordered),
            other => Err(format!(
                "unknown batch order '{other}' (expected sequential or unordered)"
            )),
        }
    }
}

/// Admission and execution settings for the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// How long an exclusive driver waits for the device before answering Busy.
    pub acquire_timeout: Duration,
    /// Concurrent in-flight actions for shared drivers.
    pub max_in_flight: usize,
    /// Largest batch accepted in one request.
    pub max_batch: usize,
    pub batch_order: BatchOrder,
    /// How long synchronous callers wait for completion.
    pub sync_timeout: Duration,
    /// Pause between characters when typing key by key.
    pub type_char_delay: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            acquire_timeout: Duration::from_millis(10),
            max_in_flight: 100,
            max_batch: 100,
            batch_order: BatchOrder::Sequential,
            sync_timeout: Duration::from_secs(10),
            type_char_delay: Duration::from_millis(10),
        }
    }
}

/// Realtime channel session settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Outbound messages buffered per session before it is evicted.
    pub session_buffer: usize,
    /// A session that sends nothing (not even a pong) for this long is closed.
    pub idle_timeout: Duration,
    /// Interval between server pings; must be shorter than `idle_timeout`.
    pub heartbeat_interval: Duration,
    /// Upper bound on a single frame write.
    pub write_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            session_buffer: 256,
            idle_timeout: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(54),
            write_timeout: Duration::from_secs(10),
        }
    }
}

/// All runtime configuration for the service.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address of the HTTP API.
    pub http_bind_addr: SocketAddr,
    /// Address of the realtime channel.
    pub ws_bind_addr: SocketAddr,
    pub driver: DriverSelection,
    /// Keyboard gadget device (`/dev/hidg0`).
    pub keyboard_device: PathBuf,
    /// Relative mouse gadget device; pointer commands are unavailable on the
    /// HID gadget driver without it.
    pub mouse_device: Option<PathBuf>,
    /// Interpreter used by the Windows automation driver (`python` or `powershell`).
    pub windows_sender: String,
    pub dispatch: DispatchConfig,
    pub channel: ChannelConfig,
}

impl Default for ServerConfig {
    /// | Field           | Default         |
    /// |-----------------|-----------------|
    /// | http_bind_addr  | `0.0.0.0:8081`  |
    /// | ws_bind_addr    | `0.0.0.0:8082`  |
    /// | driver          | auto            |
    /// | keyboard_device | `/dev/hidg0`    |
    /// | mouse_device    | none            |
    fn default() -> Self {
        Self {
            http_bind_addr: SocketAddr::from(([0, 0, 0, 0], 8081)),
            ws_bind_addr: SocketAddr::from(([0, 0, 0, 0], 8082)),
            driver: DriverSelection::Auto,
            keyboard_device: PathBuf::from("/dev/hidg0"),
            mouse_device: None,
            windows_sender: "python".to_string(),
            dispatch: DispatchConfig::default(),
            channel: ChannelConfig::default(),
        }
    }
}
