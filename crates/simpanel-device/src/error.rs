//! Error types for device sessions and the connection registry.

use crate::connection::ConnectionStatus;
use simpanel_ports::PortError;
use simpanel_protocol::EncodeError;

/// Result type alias for device operations.
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Errors that can occur connecting to, configuring, or managing a device.
///
/// The handshake failures are deliberately split: a timeout means the device
/// never answered (unresponsive or disconnected hardware), while
/// `NoValidResponse` means something answered in an unexpected dialect
/// (wrong firmware). Callers present different guidance for each.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// The identity read timed out. Never retried.
    #[error("Handshake timed out on {port}")]
    HandshakeTimeout { port: String },

    /// The device kept answering with messages other than an identity
    /// response until the retry bound was exhausted.
    #[error("No valid identity response from {port} after {attempts} attempts")]
    NoValidResponse { port: String, attempts: u32 },

    /// Refusing to apply a configuration with no inputs.
    #[error("Configuration has no inputs")]
    NoInputs,

    /// The device answered a configuration push with an error.
    #[error("Device rejected configuration {config_id}")]
    DeviceRejected { config_id: u32 },

    /// No store/reject acknowledgement arrived within the bound.
    #[error("Timed out waiting for acknowledgement of configuration {config_id}")]
    ConfigurationTimeout { config_id: u32 },

    /// The port is tracked but its session is not in the connected state.
    #[error("Device not connected: {port}")]
    NotConnected { port: String },

    /// The port is not tracked by the registry.
    #[error("Unknown port: {port}")]
    UnknownPort { port: String },

    /// A firmware upload lease is held on the port.
    #[error("Upload in progress on {port}")]
    UploadInProgress { port: String },

    /// The presented upload lease token does not match the held lease.
    #[error("Upload lease token mismatch for {port}")]
    LeaseMismatch { port: String },

    /// The session's command mailbox is full.
    #[error("Session busy on {port}")]
    SessionBusy { port: String },

    /// Attempted connection state transition violates the state machine.
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition {
        from: ConnectionStatus,
        to: ConnectionStatus,
    },

    /// The registry task has shut down.
    #[error("Connection registry closed")]
    RegistryClosed,

    /// The flashing collaborator reported a failure.
    #[error("Upload failed: {reason}")]
    UploadFailed { reason: String },

    /// The firmware upload exceeded its hard bound.
    #[error("Upload timed out after {timeout_ms}ms")]
    UploadTimeout { timeout_ms: u64 },

    /// Port I/O error.
    #[error(transparent)]
    Port(#[from] PortError),

    /// Protocol encode error.
    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),
}

impl DeviceError {
    /// Create a new handshake timeout error.
    pub fn handshake_timeout(port: impl Into<String>) -> Self {
        Self::HandshakeTimeout { port: port.into() }
    }

    /// Create a new no-valid-response error.
    pub fn no_valid_response(port: impl Into<String>, attempts: u32) -> Self {
        Self::NoValidResponse {
            port: port.into(),
            attempts,
        }
    }

    /// Create a new unknown-port error.
    pub fn unknown_port(port: impl Into<String>) -> Self {
        Self::UnknownPort { port: port.into() }
    }

    /// Create a new not-connected error.
    pub fn not_connected(port: impl Into<String>) -> Self {
        Self::NotConnected { port: port.into() }
    }

    /// Returns `true` if this is an I/O failure that must fail the session,
    /// as opposed to an operation-level error reported to the caller only.
    #[must_use]
    pub fn is_fatal_io(&self) -> bool {
        matches!(self, Self::Port(e) if !e.is_timeout())
    }
}
