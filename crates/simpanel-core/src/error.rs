use thiserror::Error;

/// Validation errors for the shared core types.
///
/// Crate-specific failure taxonomies (port I/O, protocol decode, device
/// session, calibration) live in their own crates; this enum only covers the
/// invariants enforced by the types in [`crate::types`].
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid port id: {0}")]
    InvalidPortId(String),

    #[error("Invalid firmware version: {0}")]
    InvalidVersion(String),

    #[error("Invalid input kind code: {0}")]
    InvalidInputKind(u8),
}

pub type Result<T> = std::result::Result<T, Error>;
