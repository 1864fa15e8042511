//! Integration tests driving `PanelCodec` the way a device session does:
//! a read buffer fed in arbitrary chunks, with noise interleaved.

use bytes::BytesMut;
use simpanel_core::{FirmwareVersion, InputConfig, InputKind};
use simpanel_protocol::{CodecError, Message, PanelCodec};
use tokio_util::codec::{Decoder, Encoder};

fn sample_messages() -> Vec<Message> {
    vec![
        Message::IdentityRequest { request_id: 1 },
        Message::IdentityResponse {
            request_id: 1,
            config_id: 12,
            version: FirmwareVersion::new("2.0.1").unwrap(),
        },
        Message::Heartbeat,
        Message::ConfigurationApply {
            config_id: 13,
            inputs: vec![
                InputConfig::new(0, InputKind::Axis),
                InputConfig::new(1, InputKind::Axis),
                InputConfig::new(7, InputKind::Button),
            ],
        },
        Message::ConfigurationStored { config_id: 13 },
        Message::InputValue { pin: 0, value: 517 },
    ]
}

/// Drain the buffer, collecting decoded messages and counting decode errors.
fn drain(codec: &mut PanelCodec, buf: &mut BytesMut) -> (Vec<Message>, usize) {
    let mut messages = Vec::new();
    let mut errors = 0;
    loop {
        match codec.decode(buf) {
            Ok(Some(msg)) => messages.push(msg),
            Ok(None) => break,
            Err(_) => errors += 1,
        }
    }
    (messages, errors)
}

#[test]
fn byte_by_byte_feed_recovers_every_message() {
    let originals = sample_messages();
    let mut wire = BytesMut::new();
    let mut codec = PanelCodec::new();
    for msg in &originals {
        codec.encode(msg.clone(), &mut wire).unwrap();
    }

    // Feed the whole stream one byte at a time, as a worst-case serial read.
    let mut buf = BytesMut::new();
    let mut decoded = Vec::new();
    for byte in wire.iter() {
        buf.extend_from_slice(&[*byte]);
        let (mut msgs, errors) = drain(&mut codec, &mut buf);
        assert_eq!(errors, 0);
        decoded.append(&mut msgs);
    }

    assert_eq!(decoded, originals);
    assert!(buf.is_empty());
}

#[test]
fn noise_between_messages_is_skipped() {
    let mut codec = PanelCodec::new();
    let mut buf = BytesMut::new();

    codec.encode(Message::Heartbeat, &mut buf).unwrap();
    buf.extend_from_slice(&[0xF0, 0xF1, 0xF2]);
    codec
        .encode(Message::InputValue { pin: 2, value: 88 }, &mut buf)
        .unwrap();

    let (messages, errors) = drain(&mut codec, &mut buf);
    assert_eq!(
        messages,
        vec![Message::Heartbeat, Message::InputValue { pin: 2, value: 88 }]
    );
    assert_eq!(errors, 3);
}

#[test]
fn split_across_chunks_at_every_offset() {
    let originals = sample_messages();
    let mut wire = BytesMut::new();
    let mut encoder = PanelCodec::new();
    for msg in &originals {
        encoder.encode(msg.clone(), &mut wire).unwrap();
    }

    // Split the stream in two at every possible offset; both halves together
    // must always yield the full message list.
    for split in 0..=wire.len() {
        let mut codec = PanelCodec::new();
        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();

        buf.extend_from_slice(&wire[..split]);
        let (mut msgs, errors) = drain(&mut codec, &mut buf);
        assert_eq!(errors, 0);
        decoded.append(&mut msgs);

        buf.extend_from_slice(&wire[split..]);
        let (mut msgs, errors) = drain(&mut codec, &mut buf);
        assert_eq!(errors, 0);
        decoded.append(&mut msgs);

        assert_eq!(decoded, originals, "failed at split offset {split}");
    }
}

#[test]
fn encode_error_surfaces_through_codec() {
    let mut codec = PanelCodec::new();
    let mut buf = BytesMut::new();
    let oversized = Message::ConfigurationApply {
        config_id: 1,
        inputs: vec![InputConfig::new(0, InputKind::Axis); 300],
    };

    let err = codec.encode(oversized, &mut buf).unwrap_err();
    assert!(matches!(err, CodecError::Encode(_)));
    assert!(buf.is_empty());
}
