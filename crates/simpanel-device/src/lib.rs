//! Device connection engine.
//!
//! One [`DeviceSession`](session) task owns each physical port: it performs
//! the identity handshake, tracks the connection state machine, pushes
//! configurations, and streams live input readings outward. The
//! [`ConnectionRegistry`](registry::ConnectionRegistry) is the single owner
//! of the port map; everything else talks to it through a clonable
//! [`RegistryHandle`](registry::RegistryHandle) and broadcast subscriptions.
//!
//! # Architecture
//!
//! ```text
//! scan ──► ConnectionRegistry ──spawns──► DeviceSession (one per port)
//!              │    ▲                          │
//!              │    └── SessionUpdate ◄────────┤
//!              │                               │
//!              ├──► broadcast RegistryEvent    └──► broadcast InputReading
//!              ▼
//!         RegistryHandle (scan / list / disconnect / apply / lease)
//! ```

#![allow(async_fn_in_trait)]

pub mod connection;
pub mod error;
pub mod events;
pub mod flash;
pub mod registry;
pub mod session;

pub use connection::{ConnectionStatus, DeviceConnection, DeviceSnapshot, eligible_for_retry};
pub use error::{DeviceError, Result};
pub use events::RegistryEvent;
pub use flash::{BoardConfig, FirmwareFlasher, UploadProgress, UploadReport, run_upload};
pub use registry::{ConnectionRegistry, RegistryConfig, RegistryHandle, ScanSummary};
pub use session::SessionConfig;
