//! `serialport`-backed provider.
//!
//! The `serialport` crate is blocking. Every call is confined to
//! `tokio::task::spawn_blocking`, so a device that stops responding stalls a
//! blocking-pool thread, never the async runtime or another session.

use crate::error::{PortError, Result};
use crate::traits::{PortHandle, PortProvider};
use bytes::Bytes;
use simpanel_core::{PortId, constants::DEFAULT_BAUD_RATE};
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::trace;

/// Bytes requested per read call. USB-CDC delivers small packets; one input
/// value frame is four bytes, so this comfortably batches a burst.
const READ_CHUNK_SIZE: usize = 256;

/// Timeout applied at open time, before the first explicit read timeout
/// overrides it.
const OPEN_TIMEOUT: Duration = Duration::from_millis(100);

type SharedPort = Arc<Mutex<Box<dyn serialport::SerialPort>>>;

/// Provider over the host's real serial ports.
#[derive(Debug, Clone)]
pub struct SerialPortProvider {
    baud_rate: u32,
}

impl SerialPortProvider {
    /// Create a provider with the default panel baud rate.
    #[must_use]
    pub fn new() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }

    /// Create a provider with a custom baud rate.
    #[must_use]
    pub fn with_baud_rate(baud_rate: u32) -> Self {
        Self { baud_rate }
    }
}

impl Default for SerialPortProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl PortProvider for SerialPortProvider {
    type Handle = SerialPortHandle;

    async fn enumerate(&self) -> Result<Vec<PortId>> {
        let infos = tokio::task::spawn_blocking(serialport::available_ports)
            .await
            .map_err(join_error)??;

        Ok(infos
            .into_iter()
            .filter_map(|info| PortId::new(&info.port_name).ok())
            .collect())
    }

    async fn open(&self, port: &PortId) -> Result<Self::Handle> {
        let name = port.as_str().to_string();
        let baud_rate = self.baud_rate;

        let inner = tokio::task::spawn_blocking(move || {
            serialport::new(&name, baud_rate)
                .timeout(OPEN_TIMEOUT)
                .open()
                .map_err(|e| PortError::open_failed(&name, e.to_string()))
        })
        .await
        .map_err(join_error)??;

        trace!(port = %port, baud_rate, "opened serial port");
        Ok(SerialPortHandle {
            port: port.clone(),
            inner: Some(Arc::new(Mutex::new(inner))),
        })
    }
}

/// One open host serial port.
pub struct SerialPortHandle {
    port: PortId,
    inner: Option<SharedPort>,
}

impl std::fmt::Debug for SerialPortHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialPortHandle")
            .field("port", &self.port)
            .field("open", &self.inner.is_some())
            .finish()
    }
}

impl SerialPortHandle {
    fn shared(&self) -> Result<SharedPort> {
        self.inner.as_ref().cloned().ok_or(PortError::Closed)
    }
}

impl PortHandle for SerialPortHandle {
    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let shared = self.shared()?;
        let bytes = bytes.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut port = lock(&shared)?;
            port.write_all(&bytes)?;
            Ok(())
        })
        .await
        .map_err(join_error)?
    }

    async fn drain(&mut self) -> Result<()> {
        let shared = self.shared()?;
        tokio::task::spawn_blocking(move || {
            let mut port = lock(&shared)?;
            port.flush()?;
            Ok(())
        })
        .await
        .map_err(join_error)?
    }

    async fn read(&mut self, timeout: Duration) -> Result<Bytes> {
        let shared = self.shared()?;
        tokio::task::spawn_blocking(move || {
            let mut port = lock(&shared)?;
            port.set_timeout(timeout)?;

            let mut buf = vec![0u8; READ_CHUNK_SIZE];
            match port.read(&mut buf) {
                Ok(0) => Err(PortError::Closed),
                Ok(n) => {
                    buf.truncate(n);
                    Ok(Bytes::from(buf))
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    Err(PortError::timeout(timeout))
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(join_error)?
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(shared) = self.inner.take() {
            trace!(port = %self.port, "closing serial port");
            // Dropping the last handle closes the OS descriptor; run the drop
            // off the async runtime in case the driver blocks on close.
            tokio::task::spawn_blocking(move || drop(shared))
                .await
                .map_err(join_error)?;
        }
        Ok(())
    }
}

fn lock(shared: &SharedPort) -> Result<std::sync::MutexGuard<'_, Box<dyn serialport::SerialPort>>> {
    shared
        .lock()
        .map_err(|_| PortError::serial("port mutex poisoned"))
}

fn join_error(e: tokio::task::JoinError) -> PortError {
    PortError::serial(format!("blocking task failed: {e}"))
}
