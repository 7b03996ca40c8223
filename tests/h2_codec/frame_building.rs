//! Tests for HTTP/2 frame encoding

use bytes::{Bytes, BytesMut};
use h2_mux::{
    error_code, flags, frame_type, Frame, H2Codec, H2Header, HpackDecoder, HpackEncoder, SettingId,
    Settings,
};

use super::decode_with;

fn encode(frame: &Frame) -> BytesMut {
    let mut dst = BytesMut::new();
    H2Codec::encode(frame, &mut HpackEncoder::new(), &mut dst);
    dst
}

#[test]
fn test_encode_rst_stream() {
    let frame = encode(&Frame::rst_stream(1, error_code::HTTP_1_1_REQUIRED));
    assert_eq!(frame.len(), 13);
    assert_eq!(&frame[0..3], &[0, 0, 4]);
    assert_eq!(frame[3], frame_type::RST_STREAM);
    assert_eq!(&frame[9..], &[0, 0, 0, 0xd]);
}

#[test]
fn test_encode_settings_ack() {
    let frame = encode(&Frame::settings_ack());
    assert_eq!(&frame[..], &[0, 0, 0, frame_type::SETTINGS, flags::ACK, 0, 0, 0, 0]);
}

#[test]
fn test_encode_settings_in_id_order() {
    let mut settings = Settings::new();
    settings
        .set(SettingId::InitialWindowSize, 1_048_576)
        .set(SettingId::EnablePush, 0);
    let frame = encode(&Frame::settings(settings));

    assert_eq!(frame.len(), 21);
    assert_eq!(&frame[9..15], &[0, 2, 0, 0, 0, 0]);
    assert_eq!(&frame[15..21], &[0, 4, 0, 0x10, 0, 0]);
}

#[test]
fn test_encode_ping_ack() {
    let data = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88];
    let frame = encode(&Frame::ping_ack(data));
    assert_eq!(frame.len(), 17);
    assert_eq!(frame[4], flags::ACK);
    assert_eq!(&frame[9..], &data);
}

#[test]
fn test_encode_window_update() {
    let frame = encode(&Frame::window_update(3, 65535));
    assert_eq!(&frame[..], &[0, 0, 4, frame_type::WINDOW_UPDATE, 0, 0, 0, 0, 3, 0, 0, 0xff, 0xff]);
}

#[test]
fn test_encode_goaway() {
    let frame = encode(&Frame::go_away(5, error_code::PROTOCOL_ERROR));
    assert_eq!(frame.len(), 17);
    assert_eq!(frame[3], frame_type::GOAWAY);
    assert_eq!(&frame[5..9], &[0, 0, 0, 0]);
    assert_eq!(&frame[9..17], &[0, 0, 0, 5, 0, 0, 0, 1]);
}

#[test]
fn test_encode_data_end_stream() {
    let frame = encode(&Frame::data(1, Bytes::from_static(b"abc"), true));
    assert_eq!(&frame[..9], &[0, 0, 3, frame_type::DATA, flags::END_STREAM, 0, 0, 0, 1]);
    assert_eq!(&frame[9..], b"abc");
}

#[test]
fn test_encode_headers_sets_end_headers() {
    let frame = encode(&Frame::headers(1, vec![H2Header::new(":method", "GET")], false));
    assert_eq!(frame[3], frame_type::HEADERS);
    assert_eq!(frame[4], flags::END_HEADERS);
    assert_eq!(&frame[9..], &[0x82]);
}

#[test]
fn test_large_header_block_roundtrips_through_continuation() {
    let headers = vec![
        H2Header::new(":status", "200"),
        H2Header::new("x-large", "v".repeat(40_000)),
    ];
    let sent = Frame::headers(7, headers, true);
    let wire = encode(&sent);

    assert_eq!(wire[3], frame_type::HEADERS);
    assert_eq!(wire[4] & flags::END_HEADERS, 0, "block should spill into CONTINUATION");
    assert_eq!(&wire[..3], &[0, 0x40, 0]);
    let frames = decode_with(&mut H2Codec::new(), &mut HpackDecoder::new(), &wire).unwrap();
    assert_eq!(frames, vec![sent]);
}

#[test]
fn test_shared_encoder_state_follows_wire_order() {
    let mut encoder = HpackEncoder::new();
    let mut wire = BytesMut::new();
    let first = Frame::headers(1, vec![H2Header::new("x-session", "abcdef")], false);
    let second = Frame::headers(3, vec![H2Header::new("x-session", "abcdef")], false);
    H2Codec::encode(&first, &mut encoder, &mut wire);
    let first_len = wire.len();
    H2Codec::encode(&second, &mut encoder, &mut wire);

    // The repeated field is indexed from the dynamic table the second time
    assert!(wire.len() - first_len < first_len);
    let frames = decode_with(&mut H2Codec::new(), &mut HpackDecoder::new(), &wire).unwrap();
    assert_eq!(frames, vec![first, second]);
}
