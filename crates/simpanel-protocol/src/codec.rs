//! Incremental codec over the panel byte stream.
//!
//! `PanelCodec` bridges [`Message`]'s slice-level decoding to Tokio's
//! [`Decoder`]/[`Encoder`] traits so callers can keep one `BytesMut` read
//! buffer across partial serial reads. Device sessions drive the decoder
//! directly (the serial transport is not an `AsyncRead`), which works because
//! `Decoder::decode` is an ordinary method over a caller-owned buffer.
//!
//! # Resynchronization
//!
//! The stream has no framing bytes, so after invalid data the only recovery
//! is to skip forward. On a decode error the codec consumes exactly one byte
//! before returning the error; repeated calls therefore slide over noise one
//! byte at a time until a valid tag lines up again. The read loop logs the
//! error and keeps going; it never tears the session down over noise.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CodecError;
use crate::message::Message;

/// Tokio codec for panel protocol messages.
///
/// Stateless apart from what lives in the caller's buffer; cheap to construct
/// per session.
///
/// # Example
///
/// ```
/// use bytes::BytesMut;
/// use tokio_util::codec::Decoder;
/// use simpanel_protocol::{Message, PanelCodec};
///
/// let mut codec = PanelCodec::new();
/// let mut buf = BytesMut::new();
///
/// buf.extend_from_slice(&[0x07, 3]); // partial input value
/// assert!(codec.decode(&mut buf).unwrap().is_none());
///
/// buf.extend_from_slice(&[0xFF, 0x03]); // rest of it
/// let msg = codec.decode(&mut buf).unwrap().unwrap();
/// assert_eq!(msg, Message::InputValue { pin: 3, value: 1023 });
/// ```
#[derive(Debug, Default)]
pub struct PanelCodec {
    _private: (),
}

impl PanelCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for PanelCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, CodecError> {
        match Message::decode(&src[..]) {
            Ok(Some((message, consumed))) => {
                src.advance(consumed);
                Ok(Some(message))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                // Skip one byte so the next call can hunt for the next valid
                // tag instead of failing on the same garbage forever.
                src.advance(1);
                Err(CodecError::Decode(e))
            }
        }
    }
}

impl Encoder<Message> for PanelCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), CodecError> {
        let bytes = item.encode()?;
        dst.extend_from_slice(&bytes);
        Ok(())
    }
}
