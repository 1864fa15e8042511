//! Broadcast events published by the connection registry.

use crate::connection::DeviceSnapshot;
use serde::{Deserialize, Serialize};

/// Connectivity and upload lifecycle notifications.
///
/// Published on a `tokio::sync::broadcast` channel so the UI, firmware update
/// logic, and calibration subscribers can react without polling. A
/// `DeviceListChanged` carries a full snapshot rather than a delta; consumers
/// that lag and drop events still converge on the next one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum RegistryEvent {
    /// Some tracked connection changed state; `devices` is the full current
    /// snapshot list.
    DeviceListChanged { devices: Vec<DeviceSnapshot> },

    /// A firmware upload acquired its lease and started.
    UploadStarted { port: String },

    /// Progress report forwarded from the flashing collaborator.
    UploadProgress {
        port: String,
        percent: u8,
        message: String,
    },

    /// The upload finished successfully.
    UploadCompleted { port: String, duration_ms: u64 },

    /// The upload failed, was cancelled, or hit its hard timeout.
    UploadFailed { port: String, reason: String },
}
