//! Integration tests for the HTTP/2 frame codec

use bytes::BytesMut;
use h2_mux::{Frame, H2Codec, HpackDecoder, Result};

mod frame_building;

/// Raw frame bytes: 9-byte header followed by `payload`.
pub fn raw_frame(kind: u8, flags: u8, stream_id: u32, payload: &[u8]) -> Vec<u8> {
    let len = payload.len() as u32;
    let mut bytes = vec![(len >> 16) as u8, (len >> 8) as u8, len as u8, kind, flags];
    bytes.extend_from_slice(&stream_id.to_be_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

/// Decode every complete frame in `bytes` with a fresh codec.
pub fn decode_all(bytes: &[u8]) -> Result<Vec<Frame>> {
    decode_with(&mut H2Codec::new(), &mut HpackDecoder::new(), bytes)
}

pub fn decode_with(codec: &mut H2Codec, hpack: &mut HpackDecoder, bytes: &[u8]) -> Result<Vec<Frame>> {
    let mut buf = BytesMut::from(bytes);
    let mut frames = Vec::new();
    while let Some(frame) = codec.decode(&mut buf, hpack)? {
        frames.push(frame);
    }
    Ok(frames)
}
