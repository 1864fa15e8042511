use thiserror::Error;

/// Errors producing the wire form of a message.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum EncodeError {
    /// A configuration carries more inputs than the one-byte count field can
    /// express.
    #[error("Too many configuration inputs: {count} (max {max})")]
    TooManyInputs { count: usize, max: usize },
}

/// Errors interpreting received bytes.
///
/// `DecodeError` only covers *invalid* data. "Not enough bytes yet" is not an
/// error; [`crate::Message::decode`] reports it as `Ok(None)` so a read loop
/// can keep its buffer across partial reads.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// The leading byte is not a known message tag.
    #[error("Unknown message tag: {tag:#04x}")]
    UnknownTag { tag: u8 },

    /// The declared version length exceeds the protocol bound.
    #[error("Version length {len} exceeds maximum {max}")]
    VersionTooLong { len: usize, max: usize },

    /// The version payload is not valid ASCII or is empty.
    #[error("Invalid version string: {0}")]
    InvalidVersion(String),

    /// A configuration input carries an unknown kind code.
    #[error("Invalid input kind code: {code:#04x}")]
    InvalidInputKind { code: u8 },
}

/// Combined error type of [`crate::PanelCodec`].
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
