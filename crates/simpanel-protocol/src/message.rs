//! Message set and wire layout.
//!
//! Every message is one tag byte followed by fixed-width little-endian
//! fields. The only variable-length payload is the firmware version string,
//! which is length-prefixed and bounded, and the configuration input list,
//! which is count-prefixed. There is no outer framing and no checksum; the
//! USB-CDC link below already provides both.
//!
//! # Wire Layout
//!
//! ```text
//! 0x01 IdentityRequest      tag, request_id: u32
//! 0x02 IdentityResponse     tag, request_id: u32, config_id: u32,
//!                           version_len: u8, version: [u8; version_len]
//! 0x03 Heartbeat            tag
//! 0x04 ConfigurationApply   tag, config_id: u32, input_count: u8,
//!                           inputs: [(pin: u8, kind: u8); input_count]
//! 0x05 ConfigurationStored  tag, config_id: u32
//! 0x06 ConfigurationError   tag, config_id: u32
//! 0x07 InputValue           tag, pin: u8, value: u16
//! ```
//!
//! A `config_id` of zero in an identity response means the device has no
//! stored configuration.
//!
//! # Correlation
//!
//! Responses are matched to outstanding requests by `request_id` (identity)
//! or `config_id` (configuration), never by arrival order; a device may
//! interleave heartbeats and input values with any response.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use simpanel_core::{FirmwareVersion, InputConfig, InputKind, constants::MAX_VERSION_LENGTH};

use crate::error::{DecodeError, EncodeError};

/// Tag byte of [`Message::IdentityRequest`].
pub const TAG_IDENTITY_REQUEST: u8 = 0x01;
/// Tag byte of [`Message::IdentityResponse`].
pub const TAG_IDENTITY_RESPONSE: u8 = 0x02;
/// Tag byte of [`Message::Heartbeat`].
pub const TAG_HEARTBEAT: u8 = 0x03;
/// Tag byte of [`Message::ConfigurationApply`].
pub const TAG_CONFIGURATION_APPLY: u8 = 0x04;
/// Tag byte of [`Message::ConfigurationStored`].
pub const TAG_CONFIGURATION_STORED: u8 = 0x05;
/// Tag byte of [`Message::ConfigurationError`].
pub const TAG_CONFIGURATION_ERROR: u8 = 0x06;
/// Tag byte of [`Message::InputValue`].
pub const TAG_INPUT_VALUE: u8 = 0x07;

/// Maximum inputs expressible in one configuration message.
pub const MAX_CONFIG_INPUTS: usize = u8::MAX as usize;

/// One protocol message, host or device originated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Message {
    /// Host asks the device to identify itself.
    IdentityRequest { request_id: u32 },

    /// Device identifies itself: firmware version and the id of the
    /// configuration currently stored on it (zero when unconfigured).
    IdentityResponse {
        request_id: u32,
        config_id: u32,
        version: FirmwareVersion,
    },

    /// Periodic liveness signal from a connected device. Carries no payload
    /// and requires no reply.
    Heartbeat,

    /// Host pushes a configuration to the device.
    ConfigurationApply {
        config_id: u32,
        inputs: Vec<InputConfig>,
    },

    /// Device persisted the configuration identified by `config_id`.
    ConfigurationStored { config_id: u32 },

    /// Device rejected the configuration identified by `config_id`.
    ConfigurationError { config_id: u32 },

    /// Live raw sample for one input pin.
    InputValue { pin: u8, value: u16 },
}

impl Message {
    /// Wire tag of this message.
    #[must_use]
    pub fn tag(&self) -> u8 {
        match self {
            Message::IdentityRequest { .. } => TAG_IDENTITY_REQUEST,
            Message::IdentityResponse { .. } => TAG_IDENTITY_RESPONSE,
            Message::Heartbeat => TAG_HEARTBEAT,
            Message::ConfigurationApply { .. } => TAG_CONFIGURATION_APPLY,
            Message::ConfigurationStored { .. } => TAG_CONFIGURATION_STORED,
            Message::ConfigurationError { .. } => TAG_CONFIGURATION_ERROR,
            Message::InputValue { .. } => TAG_INPUT_VALUE,
        }
    }

    /// Encode this message to its wire form.
    ///
    /// # Errors
    /// Returns `EncodeError::TooManyInputs` if a configuration carries more
    /// than [`MAX_CONFIG_INPUTS`] entries.
    pub fn encode(&self) -> Result<Bytes, EncodeError> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(self.tag());

        match self {
            Message::IdentityRequest { request_id } => {
                buf.put_u32_le(*request_id);
            }
            Message::IdentityResponse {
                request_id,
                config_id,
                version,
            } => {
                buf.put_u32_le(*request_id);
                buf.put_u32_le(*config_id);
                // FirmwareVersion enforces the ASCII and length bounds.
                buf.put_u8(version.as_str().len() as u8);
                buf.put_slice(version.as_str().as_bytes());
            }
            Message::Heartbeat => {}
            Message::ConfigurationApply { config_id, inputs } => {
                if inputs.len() > MAX_CONFIG_INPUTS {
                    return Err(EncodeError::TooManyInputs {
                        count: inputs.len(),
                        max: MAX_CONFIG_INPUTS,
                    });
                }
                buf.put_u32_le(*config_id);
                buf.put_u8(inputs.len() as u8);
                for input in inputs {
                    buf.put_u8(input.pin);
                    buf.put_u8(input.kind.to_u8());
                }
            }
            Message::ConfigurationStored { config_id }
            | Message::ConfigurationError { config_id } => {
                buf.put_u32_le(*config_id);
            }
            Message::InputValue { pin, value } => {
                buf.put_u8(*pin);
                buf.put_u16_le(*value);
            }
        }

        Ok(buf.freeze())
    }

    /// Decode one message from the front of `buf`.
    ///
    /// # Returns
    ///
    /// - `Ok(Some((message, consumed)))` - a complete message and the number
    ///   of bytes it occupied
    /// - `Ok(None)` - `buf` holds a valid prefix but not a complete message;
    ///   feed more bytes and retry
    /// - `Err(DecodeError)` - the bytes at the front are not a valid message
    ///
    /// Invalid data and incompleteness are deliberately distinguishable: a
    /// session read loop keeps its buffer across `Ok(None)` and resynchronizes
    /// (skipping a byte) on `Err`, so line noise never kills the loop.
    pub fn decode(buf: &[u8]) -> Result<Option<(Message, usize)>, DecodeError> {
        let Some(&tag) = buf.first() else {
            return Ok(None);
        };

        match tag {
            TAG_IDENTITY_REQUEST => {
                let Some(request_id) = read_u32_le(buf, 1) else {
                    return Ok(None);
                };
                Ok(Some((Message::IdentityRequest { request_id }, 5)))
            }
            TAG_IDENTITY_RESPONSE => {
                // Fixed header: tag + request_id + config_id + version_len.
                if buf.len() < 10 {
                    return Ok(None);
                }
                let version_len = buf[9] as usize;
                if version_len > MAX_VERSION_LENGTH {
                    return Err(DecodeError::VersionTooLong {
                        len: version_len,
                        max: MAX_VERSION_LENGTH,
                    });
                }
                let total = 10 + version_len;
                if buf.len() < total {
                    return Ok(None);
                }
                let request_id = read_u32_le(buf, 1).unwrap_or_default();
                let config_id = read_u32_le(buf, 5).unwrap_or_default();
                let raw = std::str::from_utf8(&buf[10..total])
                    .map_err(|e| DecodeError::InvalidVersion(e.to_string()))?;
                let version = FirmwareVersion::new(raw)
                    .map_err(|e| DecodeError::InvalidVersion(e.to_string()))?;
                Ok(Some((
                    Message::IdentityResponse {
                        request_id,
                        config_id,
                        version,
                    },
                    total,
                )))
            }
            TAG_HEARTBEAT => Ok(Some((Message::Heartbeat, 1))),
            TAG_CONFIGURATION_APPLY => {
                // Fixed header: tag + config_id + input_count.
                if buf.len() < 6 {
                    return Ok(None);
                }
                let count = buf[5] as usize;
                let total = 6 + count * 2;
                if buf.len() < total {
                    return Ok(None);
                }
                let config_id = read_u32_le(buf, 1).unwrap_or_default();
                let mut inputs = Vec::with_capacity(count);
                for i in 0..count {
                    let pin = buf[6 + i * 2];
                    let code = buf[7 + i * 2];
                    let kind = InputKind::from_u8(code)
                        .map_err(|_| DecodeError::InvalidInputKind { code })?;
                    inputs.push(InputConfig::new(pin, kind));
                }
                Ok(Some((Message::ConfigurationApply { config_id, inputs }, total)))
            }
            TAG_CONFIGURATION_STORED => {
                let Some(config_id) = read_u32_le(buf, 1) else {
                    return Ok(None);
                };
                Ok(Some((Message::ConfigurationStored { config_id }, 5)))
            }
            TAG_CONFIGURATION_ERROR => {
                let Some(config_id) = read_u32_le(buf, 1) else {
                    return Ok(None);
                };
                Ok(Some((Message::ConfigurationError { config_id }, 5)))
            }
            TAG_INPUT_VALUE => {
                if buf.len() < 4 {
                    return Ok(None);
                }
                let pin = buf[1];
                let value = u16::from_le_bytes([buf[2], buf[3]]);
                Ok(Some((Message::InputValue { pin, value }, 4)))
            }
            tag => Err(DecodeError::UnknownTag { tag }),
        }
    }

    /// Upper bound on the encoded size, used to preallocate.
    fn encoded_len(&self) -> usize {
        match self {
            Message::IdentityRequest { .. } => 5,
            Message::IdentityResponse { version, .. } => 10 + version.as_str().len(),
            Message::Heartbeat => 1,
            Message::ConfigurationApply { inputs, .. } => 6 + inputs.len() * 2,
            Message::ConfigurationStored { .. } | Message::ConfigurationError { .. } => 5,
            Message::InputValue { .. } => 4,
        }
    }
}

/// Read a little-endian `u32` at `offset`, or `None` if `buf` is too short.
fn read_u32_le(buf: &[u8], offset: usize) -> Option<u32> {
    let bytes = buf.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn version(s: &str) -> FirmwareVersion {
        FirmwareVersion::new(s).unwrap()
    }

    #[rstest]
    #[case(Message::IdentityRequest { request_id: 42 })]
    #[case(Message::IdentityResponse {
        request_id: 42,
        config_id: 7,
        version: version("1.4.2"),
    })]
    #[case(Message::Heartbeat)]
    #[case(Message::ConfigurationApply {
        config_id: 7,
        inputs: vec![
            InputConfig::new(0, InputKind::Axis),
            InputConfig::new(5, InputKind::Button),
        ],
    })]
    #[case(Message::ConfigurationApply { config_id: 9, inputs: vec![] })]
    #[case(Message::ConfigurationStored { config_id: 7 })]
    #[case(Message::ConfigurationError { config_id: 7 })]
    #[case(Message::InputValue { pin: 3, value: 1023 })]
    fn test_roundtrip(#[case] message: Message) {
        let encoded = message.encode().unwrap();
        let (decoded, consumed) = Message::decode(&encoded).unwrap().unwrap();
        assert_eq!(decoded, message);
        assert_eq!(consumed, encoded.len());
    }

    #[test]
    fn test_identity_request_layout() {
        let encoded = Message::IdentityRequest { request_id: 0x0403_0201 }
            .encode()
            .unwrap();
        assert_eq!(&encoded[..], &[0x01, 0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_input_value_layout() {
        let encoded = Message::InputValue { pin: 3, value: 1023 }.encode().unwrap();
        assert_eq!(&encoded[..], &[0x07, 0x03, 0xFF, 0x03]);
    }

    #[test]
    fn test_decode_empty_needs_more() {
        assert_eq!(Message::decode(&[]).unwrap(), None);
    }

    #[rstest]
    #[case(&[0x01])] // identity request missing id
    #[case(&[0x02, 0, 0, 0, 0, 0, 0, 0, 0])] // identity response missing len byte
    #[case(&[0x02, 0, 0, 0, 0, 0, 0, 0, 0, 5, b'1', b'.'])] // version truncated
    #[case(&[0x04, 0, 0, 0, 0, 2, 1, 0])] // apply missing second input
    #[case(&[0x07, 3, 0xFF])] // input value missing high byte
    fn test_decode_truncated_needs_more(#[case] bytes: &[u8]) {
        assert_eq!(Message::decode(bytes).unwrap(), None);
    }

    #[test]
    fn test_decode_unknown_tag() {
        let err = Message::decode(&[0x7F, 1, 2, 3]).unwrap_err();
        assert_eq!(err, DecodeError::UnknownTag { tag: 0x7F });
    }

    #[test]
    fn test_decode_version_too_long_is_invalid_not_incomplete() {
        // Declared length 200 exceeds the bound; reject immediately rather
        // than waiting for 200 bytes that will never be valid.
        let err = Message::decode(&[0x02, 0, 0, 0, 0, 0, 0, 0, 0, 200]).unwrap_err();
        assert!(matches!(err, DecodeError::VersionTooLong { len: 200, .. }));
    }

    #[test]
    fn test_decode_invalid_input_kind() {
        let err = Message::decode(&[0x04, 7, 0, 0, 0, 1, 2, 9]).unwrap_err();
        assert_eq!(err, DecodeError::InvalidInputKind { code: 9 });
    }

    #[test]
    fn test_decode_leaves_trailing_bytes() {
        let mut bytes = Message::Heartbeat.encode().unwrap().to_vec();
        bytes.extend_from_slice(&[0x07, 3, 0x00, 0x02]);

        let (first, consumed) = Message::decode(&bytes).unwrap().unwrap();
        assert_eq!(first, Message::Heartbeat);
        assert_eq!(consumed, 1);

        let (second, _) = Message::decode(&bytes[consumed..]).unwrap().unwrap();
        assert_eq!(second, Message::InputValue { pin: 3, value: 512 });
    }

    #[test]
    fn test_encode_too_many_inputs() {
        let inputs = vec![InputConfig::new(0, InputKind::Axis); 256];
        let err = Message::ConfigurationApply { config_id: 1, inputs }
            .encode()
            .unwrap_err();
        assert!(matches!(err, EncodeError::TooManyInputs { count: 256, .. }));
    }
}
