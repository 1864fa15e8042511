//! Panel connection monitor.
//!
//! Scans the host's serial ports for control panels on an interval and
//! prints connectivity changes and live input readings as JSON lines. Mainly
//! a wiring demonstration and a field diagnostic tool; the simulation UI
//! talks to the same registry handle through its own channels.
//!
//! ```text
//! RUST_LOG=simpanel_device=debug simpanel
//! ```

use anyhow::Context;
use simpanel_device::{ConnectionRegistry, RegistryConfig};
use simpanel_ports::{AnyPortProvider, SerialPortProvider};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

const SCAN_INTERVAL: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let provider = AnyPortProvider::Serial(SerialPortProvider::new());
    let registry = ConnectionRegistry::spawn(provider, RegistryConfig::default());

    let mut events = registry.subscribe_events();
    let mut inputs = registry.subscribe_inputs();

    // Rescan on an interval; scans are idempotent for tracked ports.
    let scanner = registry.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SCAN_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(e) = scanner.scan().await {
                tracing::warn!(error = %e, "scan failed");
            }
        }
    });

    info!("monitoring panel connections, ctrl-c to exit");
    loop {
        tokio::select! {
            event = events.recv() => {
                if let Ok(event) = event {
                    let line = serde_json::to_string(&event)
                        .context("serializing registry event")?;
                    println!("{line}");
                }
            }
            reading = inputs.recv() => {
                if let Ok(reading) = reading {
                    let line = serde_json::to_string(&reading)
                        .context("serializing input reading")?;
                    println!("{line}");
                }
            }
            result = tokio::signal::ctrl_c() => {
                result.context("waiting for ctrl-c")?;
                info!("shutting down");
                return Ok(());
            }
        }
    }
}
