//! pikey-server entry point.
//!
//! Starts the HTTP API and the realtime WebSocket channel in front of one
//! input driver.
//!
//! # Usage
//!
//! ```text
//! pikey-server [OPTIONS]
//!
//! Options:
//!   --http-port <PORT>          HTTP API port [default: 8081]
//!   --ws-port <PORT>            WebSocket channel port [default: 8082]
//!   --bind <IP>                 Bind address for both listeners [default: 0.0.0.0]
//!   --driver <NAME>             auto | hid_gadget | macos_automation | windows_automation | mock
//!   --output <PATH>             Keyboard gadget device [default: /dev/hidg0]
//!   --mouse-output <PATH>       Relative mouse gadget device (enables pointer on the gadget)
//!   --windows-sender <NAME>     python | powershell [default: python]
//!   --acquire-timeout-ms <MS>   Device acquisition window for serialized drivers [default: 10]
//!   --max-in-flight <N>         Concurrent actions for shared drivers [default: 100]
//!   --max-batch <N>             Largest accepted batch [default: 100]
//!   --batch-order <ORDER>       sequential | unordered [default: sequential]
//!   --sync-timeout-secs <S>     Wait limit for synchronous requests [default: 10]
//!   --session-buffer <N>        Outbound queue per channel session [default: 256]
//!   --idle-timeout-secs <S>     Close channel sessions silent this long [default: 60]
//!   --heartbeat-secs <S>        Channel ping interval [default: 54]
//! ```
//!
//! Every option can also be set through the matching `PIKEY_*` environment
//! variable (`PIKEY_HTTP_PORT`, `PIKEY_DRIVER`, ...).  Command-line values win.
//! Log verbosity follows `RUST_LOG` and defaults to `info`.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use pikey_core::KeyTable;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pikey_server::application::{Dispatcher, Telemetry};
use pikey_server::domain::{
    BatchOrder, ChannelConfig, DispatchConfig, DriverSelection, ServerConfig,
};
use pikey_server::infrastructure::drivers::factory::{available_drivers, create_driver};
use pikey_server::infrastructure::drivers::windows::KeySender;
use pikey_server::infrastructure::{
    bind_channel_listener, http_api, run_channel_server, ApiState, ChannelManager,
};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Network keyboard and pointer service.
#[derive(Debug, Parser)]
#[command(
    name = "pikey-server",
    about = "Injects keyboard and pointer input received over HTTP and WebSocket",
    version
)]
struct Cli {
    #[arg(long, default_value_t = 8081, env = "PIKEY_HTTP_PORT")]
    http_port: u16,

    #[arg(long, default_value_t = 8082, env = "PIKEY_WS_PORT")]
    ws_port: u16,

    /// Address both listeners bind to.  `127.0.0.1` keeps the service local.
    #[arg(long, default_value = "0.0.0.0", env = "PIKEY_BIND")]
    bind: String,

    /// Input driver.  `auto` prefers the HID gadget when its device is
    /// writable, then the OS automation driver.
    #[arg(long, default_value = "auto", env = "PIKEY_DRIVER")]
    driver: String,

    /// Keyboard gadget device node.
    #[arg(long, default_value = "/dev/hidg0", env = "PIKEY_OUTPUT")]
    output: PathBuf,

    /// Relative mouse gadget device node, usually `/dev/hidg1`.
    #[arg(long, env = "PIKEY_MOUSE_OUTPUT")]
    mouse_output: Option<PathBuf>,

    #[arg(long, default_value = "python", env = "PIKEY_WINDOWS_SENDER")]
    windows_sender: String,

    #[arg(long, default_value_t = 10, env = "PIKEY_ACQUIRE_TIMEOUT_MS")]
    acquire_timeout_ms: u64,

    #[arg(long, default_value_t = 100, env = "PIKEY_MAX_IN_FLIGHT")]
    max_in_flight: usize,

    #[arg(long, default_value_t = 100, env = "PIKEY_MAX_BATCH")]
    max_batch: usize,

    /// Whether a batch may run its items concurrently (shared drivers only).
    #[arg(long, default_value = "sequential", env = "PIKEY_BATCH_ORDER")]
    batch_order: String,

    #[arg(long, default_value_t = 10, env = "PIKEY_SYNC_TIMEOUT_SECS")]
    sync_timeout_secs: u64,

    #[arg(long, default_value_t = 256, env = "PIKEY_SESSION_BUFFER")]
    session_buffer: usize,

    #[arg(long, default_value_t = 60, env = "PIKEY_IDLE_TIMEOUT_SECS")]
    idle_timeout_secs: u64,

    #[arg(long, default_value_t = 54, env = "PIKEY_HEARTBEAT_SECS")]
    heartbeat_secs: u64,
}

impl Cli {
    /// Converts the parsed arguments into a [`ServerConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid bind address, driver name, batch
    /// order or Windows sender.
    fn into_server_config(self) -> anyhow::Result<ServerConfig> {
        let ip: IpAddr = self
            .bind
            .parse()
            .with_context(|| format!("invalid bind address: '{}'", self.bind))?;
        let driver: DriverSelection = self
            .driver
            .parse()
            .map_err(anyhow::Error::msg)
            .context("invalid --driver")?;
        let batch_order: BatchOrder = self
            .batch_order
            .parse()
            .map_err(anyhow::Error::msg)
            .context("invalid --batch-order")?;
        let sender: KeySender = self
            .windows_sender
            .parse()
            .map_err(anyhow::Error::msg)
            .context("invalid --windows-sender")?;
        if self.heartbeat_secs >= self.idle_timeout_secs {
            warn!(
                "heartbeat ({}s) is not shorter than the idle timeout ({}s); quiet sessions will be dropped",
                self.heartbeat_secs, self.idle_timeout_secs
            );
        }

        Ok(ServerConfig {
            http_bind_addr: SocketAddr::new(ip, self.http_port),
            ws_bind_addr: SocketAddr::new(ip, self.ws_port),
            driver,
            keyboard_device: self.output,
            mouse_device: self.mouse_output,
            windows_sender: sender.to_string(),
            dispatch: DispatchConfig {
                acquire_timeout: Duration::from_millis(self.acquire_timeout_ms),
                max_in_flight: self.max_in_flight,
                max_batch: self.max_batch,
                batch_order,
                sync_timeout: Duration::from_secs(self.sync_timeout_secs),
                ..DispatchConfig::default()
            },
            channel: ChannelConfig {
                session_buffer: self.session_buffer,
                idle_timeout: Duration::from_secs(self.idle_timeout_secs),
                heartbeat_interval: Duration::from_secs(self.heartbeat_secs),
                ..ChannelConfig::default()
            },
        })
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_server_config()?;
    info!(
        "pikey-server starting: http={}, ws={}, driver selection={:?}",
        config.http_bind_addr, config.ws_bind_addr, config.driver
    );
    let available: Vec<&str> = available_drivers(&config)
        .into_iter()
        .map(|kind| kind.as_str())
        .collect();
    info!("drivers available on this host: {}", available.join(", "));

    let keys = Arc::new(KeyTable::standard());
    let driver = create_driver(&config, Arc::clone(&keys)).context("failed to start input driver")?;
    let dispatcher = Dispatcher::new(
        driver,
        keys,
        Arc::new(Telemetry::new()),
        config.dispatch,
    );
    let channel = Arc::new(ChannelManager::new(dispatcher.clone(), config.channel));

    let (http_addr, http_shutdown) = http_api::run(
        config.http_bind_addr,
        ApiState {
            dispatcher: dispatcher.clone(),
            channel: Arc::clone(&channel),
        },
    )
    .await?;
    let ws_listener = bind_channel_listener(config.ws_bind_addr).await?;
    info!("ready: http://{http_addr}/stats, ws://{}", config.ws_bind_addr);

    // ── Graceful shutdown flag ─────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => error!("failed to listen for Ctrl+C: {e}"),
        }
    });

    run_channel_server(ws_listener, Arc::clone(&channel), running).await?;

    channel.close_all();
    let _ = http_shutdown.send(());
    if let Err(e) = dispatcher.close().await {
        warn!("driver did not close cleanly: {e}");
    }
    info!("pikey-server stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut full = vec!["pikey-server"];
        full.extend_from_slice(args);
        Cli::parse_from(full)
    }

    #[test]
    fn test_cli_defaults() {
        // Arrange / Act
        let cli = parse(&[]);

        // Assert
        assert_eq!(cli.http_port, 8081);
        assert_eq!(cli.ws_port, 8082);
        assert_eq!(cli.driver, "auto");
        assert_eq!(cli.output, PathBuf::from("/dev/hidg0"));
        assert!(cli.mouse_output.is_none());
        assert_eq!(cli.acquire_timeout_ms, 10);
        assert_eq!(cli.session_buffer, 256);
    }

    #[test]
    fn test_into_server_config_defaults_match_domain_defaults() {
        let config = parse(&[]).into_server_config().expect("defaults are valid");
        let expected = ServerConfig::default();

        assert_eq!(config.http_bind_addr, expected.http_bind_addr);
        assert_eq!(config.ws_bind_addr, expected.ws_bind_addr);
        assert_eq!(config.driver, DriverSelection::Auto);
        assert_eq!(config.dispatch.acquire_timeout, expected.dispatch.acquire_timeout);
        assert_eq!(config.dispatch.sync_timeout, expected.dispatch.sync_timeout);
        assert_eq!(config.channel.idle_timeout, expected.channel.idle_timeout);
        assert_eq!(config.channel.heartbeat_interval, expected.channel.heartbeat_interval);
    }

    #[test]
    fn test_cli_overrides() {
        let config = parse(&[
            "--http-port",
            "9000",
            "--bind",
            "127.0.0.1",
            "--driver",
            "linux_otg",
            "--mouse-output",
            "/dev/hidg1",
            "--batch-order",
            "unordered",
            "--windows-sender",
            "PowerShell",
        ])
        .into_server_config()
        .expect("valid overrides");

        assert_eq!(config.http_bind_addr.to_string(), "127.0.0.1:9000");
        assert_eq!(config.ws_bind_addr.to_string(), "127.0.0.1:8082");
        assert_eq!(config.driver, DriverSelection::HidGadget);
        assert_eq!(config.mouse_device, Some(PathBuf::from("/dev/hidg1")));
        assert_eq!(config.dispatch.batch_order, BatchOrder::Unordered);
        assert_eq!(config.windows_sender, "powershell");
    }

    #[test]
    fn test_invalid_bind_returns_error() {
        let result = parse(&["--bind", "not.an.ip"]).into_server_config();
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_driver_returns_error() {
        let result = parse(&["--driver", "bluetooth"]).into_server_config();
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_batch_order_returns_error() {
        let result = parse(&["--batch-order", "random"]).into_server_config();
        assert!(result.is_err());
    }
}
