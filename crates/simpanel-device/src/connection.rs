//! Connection lifecycle state machine and tracked connection record.
//!
//! # States
//!
//! - `Discovering`: candidate port seen, session not yet talking
//! - `Connecting`: port open, identity handshake in flight
//! - `Connected`: identity confirmed, live value streaming active
//! - `Disconnecting`: explicit teardown requested
//! - `Failed`: I/O or protocol failure; eligible for rescan only after the
//!   backoff window
//!
//! # Valid Transitions
//!
//! - Discovering → Connecting → Connected
//! - any non-failed state → Disconnecting or Failed
//! - Failed → Discovering (registry-gated by backoff)

use crate::error::DeviceError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use simpanel_core::{FirmwareVersion, PortId};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Lifecycle state of one tracked port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Candidate port seen; no traffic yet.
    Discovering,

    /// Port open, identity handshake in flight.
    Connecting,

    /// Identity confirmed; streaming live values.
    Connected,

    /// Explicit teardown in progress.
    Disconnecting,

    /// I/O or protocol failure; waiting out the backoff window.
    Failed,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Discovering => "Discovering",
            ConnectionStatus::Connecting => "Connecting",
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::Disconnecting => "Disconnecting",
            ConnectionStatus::Failed => "Failed",
        };
        write!(f, "{s}")
    }
}

impl ConnectionStatus {
    /// Check if transition to `target` is valid from this state.
    ///
    /// # Examples
    ///
    /// ```
    /// use simpanel_device::ConnectionStatus;
    ///
    /// assert!(ConnectionStatus::Discovering.can_transition_to(ConnectionStatus::Connecting));
    /// assert!(!ConnectionStatus::Failed.can_transition_to(ConnectionStatus::Connected));
    /// ```
    #[must_use]
    pub fn can_transition_to(self, target: ConnectionStatus) -> bool {
        use ConnectionStatus::*;
        matches!(
            (self, target),
            (Discovering, Connecting)
                | (Connecting, Connected)
                | (Discovering | Connecting | Connected, Disconnecting)
                | (Discovering | Connecting | Connected | Disconnecting, Failed)
                | (Failed, Discovering)
        )
    }
}

/// Returns `true` once a failed port has waited out the backoff window and
/// may be rescanned.
///
/// The boundary is inclusive: a port failed at `T` is eligible at exactly
/// `T + backoff`.
#[must_use]
pub fn eligible_for_retry(failed_at: Instant, now: Instant, backoff: Duration) -> bool {
    now.duration_since(failed_at) >= backoff
}

/// The registry's record of one tracked port.
///
/// Mutated only by the registry task, driven by updates from the port's
/// owning session. The open handle itself lives inside the session and never
/// appears here.
#[derive(Debug)]
pub struct DeviceConnection {
    pub port: PortId,
    pub status: ConnectionStatus,
    pub version: Option<FirmwareVersion>,
    /// Configuration currently active on the physical device.
    pub config_id: Option<u32>,
    /// Set only while `status == Failed`; gates the rescan backoff.
    pub failed_at: Option<Instant>,
    pub error_reason: Option<String>,
    /// Lease blocking configuration traffic while firmware is being flashed.
    pub upload_token: Option<Uuid>,
    pub connected_at: Option<DateTime<Utc>>,
}

impl DeviceConnection {
    /// Create a new record for a freshly discovered candidate port.
    #[must_use]
    pub fn new(port: PortId) -> Self {
        Self {
            port,
            status: ConnectionStatus::Discovering,
            version: None,
            config_id: None,
            failed_at: None,
            error_reason: None,
            upload_token: None,
            connected_at: None,
        }
    }

    /// Transition to `target`, enforcing the state machine.
    ///
    /// # Errors
    /// Returns `DeviceError::InvalidTransition` if the transition is not
    /// permitted from the current state.
    pub fn transition(&mut self, target: ConnectionStatus) -> Result<(), DeviceError> {
        if !self.status.can_transition_to(target) {
            return Err(DeviceError::InvalidTransition {
                from: self.status,
                to: target,
            });
        }
        self.status = target;
        Ok(())
    }

    /// Mark the connection failed, recording when and why.
    pub fn mark_failed(&mut self, reason: String, failed_at: Instant) {
        self.status = ConnectionStatus::Failed;
        self.failed_at = Some(failed_at);
        self.error_reason = Some(reason);
        self.connected_at = None;
    }

    /// Reset the record for a reconnection attempt after backoff.
    pub fn reset_for_retry(&mut self) {
        self.status = ConnectionStatus::Discovering;
        self.failed_at = None;
        self.error_reason = None;
        self.connected_at = None;
    }

    /// Serializable view for event subscribers and the UI collaborator.
    #[must_use]
    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            port: self.port.to_string(),
            status: self.status,
            version: self.version.as_ref().map(|v| v.to_string()),
            config_id: self.config_id,
            error_reason: self.error_reason.clone(),
            upload_in_progress: self.upload_token.is_some(),
            connected_at: self.connected_at,
        }
    }
}

/// Read-only serializable view of a tracked connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub port: String,
    pub status: ConnectionStatus,
    pub version: Option<String>,
    pub config_id: Option<u32>,
    pub error_reason: Option<String>,
    pub upload_in_progress: bool,
    pub connected_at: Option<DateTime<Utc>>,
}
