//! Binary wire protocol spoken with control-panel devices.
//!
//! The protocol is a stream of tag-prefixed, fixed-layout binary messages
//! with no outer framing. [`Message`] defines the message set and its
//! encoding; [`PanelCodec`] adapts incremental decoding to Tokio's codec
//! traits so read loops can buffer partial reads and survive line noise.

pub mod codec;
pub mod error;
pub mod message;

pub use codec::PanelCodec;
pub use error::{CodecError, DecodeError, EncodeError};
pub use message::Message;
