//! Error types for port operations.

/// Result type alias for port operations.
pub type Result<T> = std::result::Result<T, PortError>;

/// Errors that can occur opening, reading, or writing a host serial port.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    /// The requested port does not exist on the host.
    #[error("Port not found: {port}")]
    NotFound { port: String },

    /// Opening the port failed (busy, permissions, vanished between
    /// enumeration and open).
    #[error("Failed to open port {port}: {message}")]
    OpenFailed { port: String, message: String },

    /// A read produced no bytes within the allowed window.
    ///
    /// Timeouts are a first-class outcome, not a generic I/O failure: the
    /// handshake treats them as fatal-without-retry while the connected read
    /// loop treats them as benign.
    #[error("Read timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The handle was closed or the underlying device disappeared.
    #[error("Port closed")]
    Closed,

    /// Serial layer error.
    #[error("Serial error: {message}")]
    Serial { message: String },

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PortError {
    /// Create a new not-found error.
    pub fn not_found(port: impl Into<String>) -> Self {
        Self::NotFound { port: port.into() }
    }

    /// Create a new open-failed error.
    pub fn open_failed(port: impl Into<String>, message: impl Into<String>) -> Self {
        Self::OpenFailed {
            port: port.into(),
            message: message.into(),
        }
    }

    /// Create a new timeout error.
    pub fn timeout(duration: std::time::Duration) -> Self {
        Self::Timeout {
            timeout_ms: duration.as_millis() as u64,
        }
    }

    /// Create a new serial layer error.
    pub fn serial(message: impl Into<String>) -> Self {
        Self::Serial {
            message: message.into(),
        }
    }

    /// Returns `true` if this error is a read timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<serialport::Error> for PortError {
    fn from(e: serialport::Error) -> Self {
        PortError::Serial {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_timeout_classification() {
        assert!(PortError::timeout(Duration::from_millis(1000)).is_timeout());
        assert!(!PortError::Closed.is_timeout());
        assert!(!PortError::serial("broken").is_timeout());
    }

    #[test]
    fn test_error_display() {
        let error = PortError::open_failed("COM3", "access denied");
        assert_eq!(error.to_string(), "Failed to open port COM3: access denied");

        let error = PortError::timeout(Duration::from_millis(1000));
        assert_eq!(error.to_string(), "Read timed out after 1000ms");
    }
}
