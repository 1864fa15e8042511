//! Enum dispatch wrappers for port providers.
//!
//! `async fn` trait methods are not object-safe (Edition 2024 RPITIT), so
//! runtime selection between the serial and mock transports goes through
//! these enums instead of `Box<dyn PortProvider>`. Dispatch is a compile-time
//! match with zero allocation.

use crate::error::Result;
use crate::mock::{MockPortHandle, MockPortProvider};
use crate::serial::{SerialPortHandle, SerialPortProvider};
use crate::traits::{PortHandle, PortProvider};
use bytes::Bytes;
use simpanel_core::PortId;
use std::time::Duration;

/// Any supported port provider.
#[derive(Debug, Clone)]
pub enum AnyPortProvider {
    /// Real host serial ports.
    Serial(SerialPortProvider),
    /// Scripted mock ports.
    Mock(MockPortProvider),
}

impl PortProvider for AnyPortProvider {
    type Handle = AnyPortHandle;

    async fn enumerate(&self) -> Result<Vec<PortId>> {
        match self {
            Self::Serial(provider) => provider.enumerate().await,
            Self::Mock(provider) => provider.enumerate().await,
        }
    }

    async fn open(&self, port: &PortId) -> Result<Self::Handle> {
        match self {
            Self::Serial(provider) => provider.open(port).await.map(AnyPortHandle::Serial),
            Self::Mock(provider) => provider.open(port).await.map(AnyPortHandle::Mock),
        }
    }
}

/// Any open port handle.
#[derive(Debug)]
pub enum AnyPortHandle {
    Serial(SerialPortHandle),
    Mock(MockPortHandle),
}

impl PortHandle for AnyPortHandle {
    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        match self {
            Self::Serial(handle) => handle.write(bytes).await,
            Self::Mock(handle) => handle.write(bytes).await,
        }
    }

    async fn drain(&mut self) -> Result<()> {
        match self {
            Self::Serial(handle) => handle.drain().await,
            Self::Mock(handle) => handle.drain().await,
        }
    }

    async fn read(&mut self, timeout: Duration) -> Result<Bytes> {
        match self {
            Self::Serial(handle) => handle.read(timeout).await,
            Self::Mock(handle) => handle.read(timeout).await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            Self::Serial(handle) => handle.close().await,
            Self::Mock(handle) => handle.close().await,
        }
    }
}
