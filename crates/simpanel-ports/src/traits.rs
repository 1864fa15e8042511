//! Port provider trait definitions.
//!
//! These traits establish the contract between device sessions and the host
//! serial layer, enabling substitution between real and mock transports.
//! A session owns exactly one [`PortHandle`] and is the only execution
//! context that touches it; a stuck device therefore stalls only its own
//! session.

use crate::error::Result;
use bytes::Bytes;
use simpanel_core::PortId;
use std::future::Future;
use std::time::Duration;

/// Host serial port access.
///
/// # Object Safety and Dynamic Dispatch
///
/// This trait is NOT object-safe because `async fn` methods return
/// `impl Future` (Edition 2024 RPITIT). Use generic type parameters, or the
/// [`AnyPortProvider`](crate::providers::AnyPortProvider) enum wrapper where
/// runtime selection between serial and mock transports is needed.
pub trait PortProvider: Send + Sync {
    /// Concrete handle type produced by [`open`](PortProvider::open).
    type Handle: PortHandle;

    /// List the host's serial ports.
    ///
    /// Returns the raw host list; callers apply
    /// [`filter_candidate_ports`](crate::enumerator::filter_candidate_ports)
    /// before treating a port as a panel candidate.
    ///
    /// # Errors
    ///
    /// Returns an error if the host enumeration itself fails.
    fn enumerate(&self) -> impl Future<Output = Result<Vec<PortId>>> + Send;

    /// Open a port for exclusive use by one device session.
    ///
    /// # Errors
    ///
    /// Returns an error if the port does not exist, is busy, or the open
    /// fails at the OS level.
    fn open(&self, port: &PortId) -> impl Future<Output = Result<Self::Handle>> + Send;
}

/// One open serial connection.
///
/// All methods take `&mut self`: a handle is single-owner by construction and
/// is never shared across sessions.
pub trait PortHandle: Send {
    /// Write bytes to the port.
    fn write(&mut self, bytes: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Block until buffered output has reached the device.
    fn drain(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Read whatever bytes arrive within `timeout`.
    ///
    /// Returns at least one byte on success. Expiry of `timeout` with no
    /// bytes is [`PortError::Timeout`](crate::PortError::Timeout), which
    /// callers must distinguish from other I/O errors.
    fn read(&mut self, timeout: Duration) -> impl Future<Output = Result<Bytes>> + Send;

    /// Close the port, releasing the OS handle.
    ///
    /// After `close` every other method fails with
    /// [`PortError::Closed`](crate::PortError::Closed). Closing twice is a
    /// no-op.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}
