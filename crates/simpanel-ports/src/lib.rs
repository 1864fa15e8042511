//! Host serial port access for panel devices.
//!
//! This crate owns everything below the protocol layer: enumerating host
//! ports, filtering out ports that can never be panels, and the
//! [`PortProvider`]/[`PortHandle`] abstraction that device sessions drive.
//! Two implementations exist: [`SerialPortProvider`] over the `serialport`
//! crate (blocking calls confined to `spawn_blocking`), and
//! [`MockPortProvider`] with scripted handles for tests.
//!
//! All traits use native `async fn` methods (Edition 2024 RPITIT); dynamic
//! dispatch goes through the [`AnyPortProvider`]/[`AnyPortHandle`] enum
//! wrappers.

#![allow(async_fn_in_trait)]

pub mod enumerator;
pub mod error;
pub mod mock;
pub mod providers;
pub mod serial;
pub mod traits;

pub use enumerator::{filter_candidate_ports, is_ignored_port};
pub use error::{PortError, Result};
pub use mock::{MockPortController, MockPortHandle, MockPortProvider};
pub use providers::{AnyPortHandle, AnyPortProvider};
pub use serial::{SerialPortHandle, SerialPortProvider};
pub use traits::{PortHandle, PortProvider};
