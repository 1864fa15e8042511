//! Mock port provider for testing and development.
//!
//! The mock simulates a host serial layer without hardware. Each registered
//! port is controlled through a [`MockPortController`]: tests script read
//! outcomes (bytes, timeouts, errors), inspect what the session wrote, and
//! can keep feeding data while a session is running (pushes wake a blocked
//! reader).
//!
//! # Examples
//!
//! ```
//! use simpanel_core::PortId;
//! use simpanel_ports::{MockPortProvider, PortHandle, PortProvider};
//! use std::time::Duration;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> simpanel_ports::Result<()> {
//!     let provider = MockPortProvider::new();
//!     let port = PortId::new("COM3").unwrap();
//!     let controller = provider.add_port(port.clone());
//!
//!     controller.push_read(&[0x03]); // heartbeat
//!
//!     let mut handle = provider.open(&port).await?;
//!     let bytes = handle.read(Duration::from_millis(10)).await?;
//!     assert_eq!(&bytes[..], &[0x03]);
//!
//!     handle.write(&[0x01, 42, 0, 0, 0]).await?;
//!     assert_eq!(controller.written(), vec![0x01, 42, 0, 0, 0]);
//!     Ok(())
//! }
//! ```

use crate::error::{PortError, Result};
use crate::traits::{PortHandle, PortProvider};
use bytes::Bytes;
use simpanel_core::PortId;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

/// One scripted read outcome.
#[derive(Debug, Clone)]
enum ReadStep {
    /// Deliver these bytes.
    Data(Vec<u8>),
    /// Report a read timeout immediately.
    Timeout,
    /// Report a serial-layer error.
    Error(String),
}

/// Shared per-port script state.
#[derive(Debug, Default)]
struct Script {
    reads: Mutex<VecDeque<ReadStep>>,
    notify: Notify,
    written: Mutex<Vec<u8>>,
    open_error: Mutex<Option<String>>,
    open_count: AtomicU32,
    closed: AtomicBool,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().expect("mock script lock poisoned")
}

/// Mock host serial layer.
///
/// Clonable; all clones share the same port table, so a test can hand a clone
/// to the registry and keep scripting ports through its own copy.
#[derive(Debug, Clone, Default)]
pub struct MockPortProvider {
    ports: Arc<Mutex<BTreeMap<PortId, Arc<Script>>>>,
}

impl MockPortProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a port and return its controller.
    ///
    /// Registering an existing port replaces its script.
    pub fn add_port(&self, port: PortId) -> MockPortController {
        let script = Arc::new(Script::default());
        guard(&self.ports).insert(port, Arc::clone(&script));
        MockPortController { script }
    }

    /// Remove a port from the enumeration, simulating an unplugged device.
    pub fn remove_port(&self, port: &PortId) {
        guard(&self.ports).remove(port);
    }
}

impl PortProvider for MockPortProvider {
    type Handle = MockPortHandle;

    async fn enumerate(&self) -> Result<Vec<PortId>> {
        Ok(guard(&self.ports).keys().cloned().collect())
    }

    async fn open(&self, port: &PortId) -> Result<Self::Handle> {
        let script = guard(&self.ports)
            .get(port)
            .cloned()
            .ok_or_else(|| PortError::not_found(port.as_str()))?;

        if let Some(message) = guard(&script.open_error).clone() {
            return Err(PortError::open_failed(port.as_str(), message));
        }

        script.open_count.fetch_add(1, Ordering::SeqCst);
        script.closed.store(false, Ordering::SeqCst);
        Ok(MockPortHandle {
            port: port.clone(),
            script,
            open: true,
        })
    }
}

/// Handle over a scripted port.
#[derive(Debug)]
pub struct MockPortHandle {
    port: PortId,
    script: Arc<Script>,
    open: bool,
}

impl PortHandle for MockPortHandle {
    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if !self.open {
            return Err(PortError::Closed);
        }
        guard(&self.script.written).extend_from_slice(bytes);
        Ok(())
    }

    async fn drain(&mut self) -> Result<()> {
        if !self.open {
            return Err(PortError::Closed);
        }
        Ok(())
    }

    async fn read(&mut self, timeout: Duration) -> Result<Bytes> {
        if !self.open {
            return Err(PortError::Closed);
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register for wakeup before checking the queue so a push between
            // the check and the wait is never missed.
            let notified = self.script.notify.notified();

            if let Some(step) = guard(&self.script.reads).pop_front() {
                return match step {
                    ReadStep::Data(bytes) => Ok(Bytes::from(bytes)),
                    ReadStep::Timeout => Err(PortError::timeout(timeout)),
                    ReadStep::Error(message) => Err(PortError::serial(message)),
                };
            }

            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(PortError::timeout(timeout));
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.open {
            self.open = false;
            self.script.closed.store(true, Ordering::SeqCst);
            // Wake any concurrent reader so it observes the closed handle.
            self.script.notify.notify_one();
        }
        Ok(())
    }
}

impl std::fmt::Display for MockPortHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mock:{}", self.port)
    }
}

/// Test-side control over one mock port.
#[derive(Debug, Clone)]
pub struct MockPortController {
    script: Arc<Script>,
}

impl MockPortController {
    /// Queue bytes for the next read. Wakes a blocked reader.
    pub fn push_read(&self, bytes: &[u8]) {
        guard(&self.script.reads).push_back(ReadStep::Data(bytes.to_vec()));
        self.script.notify.notify_one();
    }

    /// Queue an immediate read timeout.
    pub fn push_timeout(&self) {
        guard(&self.script.reads).push_back(ReadStep::Timeout);
        self.script.notify.notify_one();
    }

    /// Queue a serial-layer read error.
    pub fn push_error(&self, message: impl Into<String>) {
        guard(&self.script.reads)
            .push_back(ReadStep::Error(message.into()));
        self.script.notify.notify_one();
    }

    /// Make subsequent opens fail with the given message (or succeed again
    /// with `None`).
    pub fn set_open_error(&self, message: Option<String>) {
        *guard(&self.script.open_error) = message;
    }

    /// Everything written to the port so far.
    #[must_use]
    pub fn written(&self) -> Vec<u8> {
        guard(&self.script.written).clone()
    }

    /// Drain and return everything written to the port so far.
    #[must_use]
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut guard(&self.script.written))
    }

    /// How many times the port has been opened.
    #[must_use]
    pub fn open_count(&self) -> u32 {
        self.script.open_count.load(Ordering::SeqCst)
    }

    /// Whether the last handle over this port was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.script.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(name: &str) -> PortId {
        PortId::new(name).unwrap()
    }

    #[tokio::test]
    async fn test_enumerate_lists_registered_ports() {
        let provider = MockPortProvider::new();
        provider.add_port(port("COM3"));
        provider.add_port(port("COM1"));

        let ports = provider.enumerate().await.unwrap();
        let names: Vec<&str> = ports.iter().map(PortId::as_str).collect();
        assert_eq!(names, vec!["COM1", "COM3"]);
    }

    #[tokio::test]
    async fn test_open_unknown_port() {
        let provider = MockPortProvider::new();
        let result = provider.open(&port("COM9")).await;
        assert!(matches!(result, Err(PortError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_open_error_script() {
        let provider = MockPortProvider::new();
        let controller = provider.add_port(port("COM3"));
        controller.set_open_error(Some("busy".to_string()));

        let result = provider.open(&port("COM3")).await;
        assert!(matches!(result, Err(PortError::OpenFailed { .. })));

        controller.set_open_error(None);
        assert!(provider.open(&port("COM3")).await.is_ok());
        assert_eq!(controller.open_count(), 1);
    }

    #[tokio::test]
    async fn test_scripted_reads_in_order() {
        let provider = MockPortProvider::new();
        let controller = provider.add_port(port("COM3"));
        controller.push_read(&[1, 2]);
        controller.push_timeout();
        controller.push_read(&[3]);

        let mut handle = provider.open(&port("COM3")).await.unwrap();
        let timeout = Duration::from_millis(10);

        assert_eq!(&handle.read(timeout).await.unwrap()[..], &[1, 2]);
        assert!(handle.read(timeout).await.unwrap_err().is_timeout());
        assert_eq!(&handle.read(timeout).await.unwrap()[..], &[3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_queue_times_out() {
        let provider = MockPortProvider::new();
        let _controller = provider.add_port(port("COM3"));
        let mut handle = provider.open(&port("COM3")).await.unwrap();

        let err = handle.read(Duration::from_millis(1000)).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_wakes_blocked_reader() {
        let provider = MockPortProvider::new();
        let controller = provider.add_port(port("COM3"));
        let mut handle = provider.open(&port("COM3")).await.unwrap();

        let reader = tokio::spawn(async move {
            handle.read(Duration::from_secs(5)).await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        controller.push_read(&[9]);

        let bytes = reader.await.unwrap().unwrap();
        assert_eq!(&bytes[..], &[9]);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_observable() {
        let provider = MockPortProvider::new();
        let controller = provider.add_port(port("COM3"));
        let mut handle = provider.open(&port("COM3")).await.unwrap();

        assert!(!controller.is_closed());
        handle.close().await.unwrap();
        handle.close().await.unwrap();
        assert!(controller.is_closed());

        assert!(matches!(handle.write(&[1]).await, Err(PortError::Closed)));
        assert!(matches!(
            handle.read(Duration::from_millis(1)).await,
            Err(PortError::Closed)
        ));
    }
}
