//! HTTP/2 frame codec.
//!
//! A sans-I/O parser and encoder for the frames a connection engine needs:
//! 1. Splitting a byte buffer into frames and validating their shape
//! 2. Reassembling HEADERS + CONTINUATION header blocks and HPACK-decoding them
//! 3. Serializing typed frames, splitting oversized header blocks
//!
//! The async adapters in [`crate::framed`] drive this codec over a transport.
//!
//! Reference: RFC 9113 (HTTP/2)

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::hpack::{H2Header, HpackDecoder, HpackEncoder};
use crate::settings::{Settings, DEFAULT_MAX_FRAME_SIZE};

/// HTTP/2 frame types (RFC 9113 Section 6)
pub mod frame_type {
    pub const DATA: u8 = 0x0;
    pub const HEADERS: u8 = 0x1;
    pub const PRIORITY: u8 = 0x2;
    pub const RST_STREAM: u8 = 0x3;
    pub const SETTINGS: u8 = 0x4;
    pub const PUSH_PROMISE: u8 = 0x5;
    pub const PING: u8 = 0x6;
    pub const GOAWAY: u8 = 0x7;
    pub const WINDOW_UPDATE: u8 = 0x8;
    pub const CONTINUATION: u8 = 0x9;
}

/// HTTP/2 frame flags
pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    /// Shares bit 0x1 with END_STREAM; only meaningful on SETTINGS and PING.
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

/// HTTP/2 error codes (RFC 9113 Section 7)
#[allow(dead_code)]
pub mod error_code {
    pub const NO_ERROR: u32 = 0x0;
    pub const PROTOCOL_ERROR: u32 = 0x1;
    pub const INTERNAL_ERROR: u32 = 0x2;
    pub const FLOW_CONTROL_ERROR: u32 = 0x3;
    pub const SETTINGS_TIMEOUT: u32 = 0x4;
    pub const STREAM_CLOSED: u32 = 0x5;
    pub const FRAME_SIZE_ERROR: u32 = 0x6;
    pub const REFUSED_STREAM: u32 = 0x7;
    pub const CANCEL: u32 = 0x8;
    pub const COMPRESSION_ERROR: u32 = 0x9;
    pub const CONNECT_ERROR: u32 = 0xa;
    pub const ENHANCE_YOUR_CALM: u32 = 0xb;
    pub const INADEQUATE_SECURITY: u32 = 0xc;
    pub const HTTP_1_1_REQUIRED: u32 = 0xd;
}

pub const FRAME_HEADER_LEN: usize = 9;

/// Maximum accumulated header block size (256 KB).
/// Prevents unbounded memory growth from malicious/buggy CONTINUATION floods.
pub const MAX_HEADER_BLOCK_SIZE: usize = 256 * 1024;

/// The HTTP/2 connection preface (24 bytes)
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Check if data starts with HTTP/2 connection preface (h2c detection)
pub fn is_h2c_preface(data: &[u8]) -> bool {
    data.len() >= CONNECTION_PREFACE.len() && &data[..CONNECTION_PREFACE.len()] == CONNECTION_PREFACE
}

/// A parsed HTTP/2 frame header (9 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct H2FrameHeader {
    pub length: u32,      // 24 bits
    pub frame_type: u8,
    pub flags: u8,
    pub stream_id: u32,   // 31 bits (high bit reserved)
}

impl H2FrameHeader {
    pub fn new(length: u32, frame_type: u8, flags: u8, stream_id: u32) -> Self {
        Self {
            length,
            frame_type,
            flags,
            stream_id,
        }
    }

    /// Parse a 9-byte frame header
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < FRAME_HEADER_LEN {
            return None;
        }

        let length = ((data[0] as u32) << 16) | ((data[1] as u32) << 8) | (data[2] as u32);
        let frame_type = data[3];
        let flags = data[4];
        let stream_id = u32::from_be_bytes([data[5], data[6], data[7], data[8]]) & 0x7FFFFFFF;

        Some(Self {
            length,
            frame_type,
            flags,
            stream_id,
        })
    }

    /// Serialize the 9-byte header
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_uint(self.length as u64, 3);
        dst.put_u8(self.frame_type);
        dst.put_u8(self.flags);
        dst.put_u32(self.stream_id & 0x7FFFFFFF);
    }

    /// Total frame size including header
    pub fn total_size(&self) -> usize {
        FRAME_HEADER_LEN + self.length as usize
    }

    /// Check if END_STREAM flag is set
    pub fn is_end_stream(&self) -> bool {
        self.flags & flags::END_STREAM != 0
    }

    /// Check if END_HEADERS flag is set
    pub fn is_end_headers(&self) -> bool {
        self.flags & flags::END_HEADERS != 0
    }
}

/// A decoded HTTP/2 frame.
///
/// PRIORITY and unknown frame types are consumed by the codec and never
/// surface. CONTINUATION frames are folded into the `Headers` they continue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data {
        stream_id: u32,
        flags: u8,
        data: Bytes,
        /// Padding length octet, if the frame was PADDED.
        pad_len: Option<u8>,
    },
    /// A complete header block, already HPACK-decoded.
    Headers {
        stream_id: u32,
        flags: u8,
        headers: Vec<H2Header>,
    },
    RstStream {
        stream_id: u32,
        error_code: u32,
    },
    Settings {
        flags: u8,
        settings: Settings,
    },
    Ping {
        ack: bool,
        data: [u8; 8],
    },
    GoAway {
        last_stream_id: u32,
        error_code: u32,
        debug_data: Bytes,
    },
    WindowUpdate {
        stream_id: u32,
        increment: u32,
    },
}

impl Frame {
    pub fn data(stream_id: u32, data: impl Into<Bytes>, end_stream: bool) -> Self {
        Frame::Data {
            stream_id,
            flags: if end_stream { flags::END_STREAM } else { 0 },
            data: data.into(),
            pad_len: None,
        }
    }

    pub fn headers(stream_id: u32, headers: Vec<H2Header>, end_stream: bool) -> Self {
        let mut frame_flags = flags::END_HEADERS;
        if end_stream {
            frame_flags |= flags::END_STREAM;
        }
        Frame::Headers {
            stream_id,
            flags: frame_flags,
            headers,
        }
    }

    pub fn rst_stream(stream_id: u32, error_code: u32) -> Self {
        Frame::RstStream {
            stream_id,
            error_code,
        }
    }

    pub fn settings(settings: Settings) -> Self {
        Frame::Settings { flags: 0, settings }
    }

    pub fn settings_ack() -> Self {
        Frame::Settings {
            flags: flags::ACK,
            settings: Settings::new(),
        }
    }

    pub fn ping_ack(data: [u8; 8]) -> Self {
        Frame::Ping { ack: true, data }
    }

    pub fn go_away(last_stream_id: u32, error_code: u32) -> Self {
        Frame::GoAway {
            last_stream_id,
            error_code,
            debug_data: Bytes::new(),
        }
    }

    pub fn window_update(stream_id: u32, increment: u32) -> Self {
        Frame::WindowUpdate {
            stream_id,
            increment,
        }
    }

    pub fn frame_type(&self) -> u8 {
        match self {
            Frame::Data { .. } => frame_type::DATA,
            Frame::Headers { .. } => frame_type::HEADERS,
            Frame::RstStream { .. } => frame_type::RST_STREAM,
            Frame::Settings { .. } => frame_type::SETTINGS,
            Frame::Ping { .. } => frame_type::PING,
            Frame::GoAway { .. } => frame_type::GOAWAY,
            Frame::WindowUpdate { .. } => frame_type::WINDOW_UPDATE,
        }
    }

    /// Stream the frame belongs to; 0 for connection-scoped frames.
    pub fn stream_id(&self) -> u32 {
        match self {
            Frame::Data { stream_id, .. }
            | Frame::Headers { stream_id, .. }
            | Frame::RstStream { stream_id, .. }
            | Frame::WindowUpdate { stream_id, .. } => *stream_id,
            Frame::Settings { .. } | Frame::Ping { .. } | Frame::GoAway { .. } => 0,
        }
    }

    pub fn flags(&self) -> u8 {
        match self {
            Frame::Data { flags: f, .. } | Frame::Headers { flags: f, .. } | Frame::Settings { flags: f, .. } => *f,
            Frame::Ping { ack: true, .. } => flags::ACK,
            _ => 0,
        }
    }

    /// END_STREAM on a DATA or HEADERS frame. The same bit means ACK
    /// elsewhere, so other frame types always answer `false`.
    pub fn is_end_stream(&self) -> bool {
        match self {
            Frame::Data { flags: f, .. } | Frame::Headers { flags: f, .. } => f & flags::END_STREAM != 0,
            _ => false,
        }
    }

    /// Bytes this frame counts against flow-control windows: the whole DATA
    /// payload including padding, zero for every other frame.
    pub fn flow_len(&self) -> u32 {
        match self {
            Frame::Data { data, pad_len, .. } => {
                let padding = pad_len.map_or(0, |p| p as usize + 1);
                (data.len() + padding) as u32
            }
            _ => 0,
        }
    }
}

/// HTTP/2 frame codec state.
///
/// Holds only what must survive between frames: the partially assembled
/// header block of a HEADERS frame awaiting its CONTINUATIONs.
#[derive(Debug)]
pub struct H2Codec {
    /// Largest payload we accept (our SETTINGS_MAX_FRAME_SIZE)
    max_frame_size: u32,
    max_header_block_size: usize,
    /// Stream ID with pending header block (waiting for CONTINUATION + END_HEADERS)
    pending_headers_stream: Option<u32>,
    /// END_STREAM flag from the HEADERS frame that started the pending header block
    pending_headers_end_stream: bool,
    /// Accumulated header block data across HEADERS + CONTINUATION frames
    pending_header_block: BytesMut,
}

impl Default for H2Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl H2Codec {
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_block_size: MAX_HEADER_BLOCK_SIZE,
            pending_headers_stream: None,
            pending_headers_end_stream: false,
            pending_header_block: BytesMut::new(),
        }
    }

    pub fn with_max_header_block_size(mut self, max: usize) -> Self {
        self.max_header_block_size = max;
        self
    }

    pub fn set_max_frame_size(&mut self, max: u32) {
        self.max_frame_size = max;
    }

    /// True while a header block is waiting for its END_HEADERS.
    pub fn has_pending_headers(&self) -> bool {
        self.pending_headers_stream.is_some()
    }

    /// Decode the next complete frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` when `buf` holds no complete frame yet; the partial
    /// bytes are left in place for the next call.
    pub fn decode(&mut self, buf: &mut BytesMut, hpack: &mut HpackDecoder) -> Result<Option<Frame>> {
        loop {
            let header = match H2FrameHeader::parse(&buf[..]) {
                Some(h) => h,
                None => return Ok(None),
            };

            if header.length > self.max_frame_size {
                return Err(Error::FrameSize {
                    len: header.length,
                    max: self.max_frame_size,
                });
            }

            // Check if we have the complete frame
            let total_size = header.total_size();
            if buf.len() < total_size {
                buf.reserve(total_size - buf.len());
                return Ok(None);
            }

            let mut frame = buf.split_to(total_size);
            frame.advance(FRAME_HEADER_LEN);
            let payload = frame.freeze();

            if let Some(frame) = self.parse_frame(&header, payload, hpack)? {
                return Ok(Some(frame));
            }
        }
    }

    /// Parse a single frame and return it if it surfaces to the connection
    fn parse_frame(
        &mut self,
        header: &H2FrameHeader,
        payload: Bytes,
        hpack: &mut HpackDecoder,
    ) -> Result<Option<Frame>> {
        if let Some(pending) = self.pending_headers_stream {
            if header.frame_type != frame_type::CONTINUATION {
                return Err(Error::Protocol(format!(
                    "Expected CONTINUATION for stream {} but got frame type {:#x}",
                    pending, header.frame_type
                )));
            }
        }

        match header.frame_type {
            frame_type::DATA => {
                require_stream(header, "DATA")?;
                let (data, pad_len) = extract_data_payload(header, payload)?;
                Ok(Some(Frame::Data {
                    stream_id: header.stream_id,
                    flags: header.flags & flags::END_STREAM,
                    data,
                    pad_len,
                }))
            }
            frame_type::HEADERS => {
                require_stream(header, "HEADERS")?;
                let header_block = extract_headers_payload(header, payload)?;
                if header_block.len() > self.max_header_block_size {
                    return Err(Error::Protocol(format!(
                        "Header block too large ({} bytes, max {})",
                        header_block.len(),
                        self.max_header_block_size
                    )));
                }
                if header.is_end_headers() {
                    // Complete header block in a single frame
                    let headers = hpack.decode(&header_block)?;
                    Ok(Some(Frame::Headers {
                        stream_id: header.stream_id,
                        flags: header.flags & (flags::END_STREAM | flags::END_HEADERS),
                        headers,
                    }))
                } else {
                    // Headers span multiple frames - accumulate and wait for CONTINUATION
                    self.pending_headers_stream = Some(header.stream_id);
                    self.pending_headers_end_stream = header.is_end_stream();
                    self.pending_header_block.clear();
                    self.pending_header_block.extend_from_slice(&header_block);
                    Ok(None)
                }
            }
            frame_type::CONTINUATION => {
                let pending_stream = match self.pending_headers_stream {
                    Some(id) => id,
                    None => {
                        return Err(Error::Protocol(format!(
                            "Unexpected CONTINUATION frame for stream {}",
                            header.stream_id
                        )))
                    }
                };
                if pending_stream != header.stream_id {
                    return Err(Error::Protocol(format!(
                        "CONTINUATION for stream {} but pending headers on stream {}",
                        header.stream_id, pending_stream
                    )));
                }
                // Guard against unbounded header block accumulation
                let new_size = self.pending_header_block.len() + payload.len();
                if new_size > self.max_header_block_size {
                    self.reset();
                    return Err(Error::Protocol(format!(
                        "Header block too large ({} bytes, max {})",
                        new_size, self.max_header_block_size
                    )));
                }
                self.pending_header_block.extend_from_slice(&payload);
                if !header.is_end_headers() {
                    return Ok(None);
                }

                let full_block = self.pending_header_block.split().freeze();
                let mut frame_flags = flags::END_HEADERS;
                if self.pending_headers_end_stream {
                    frame_flags |= flags::END_STREAM;
                }
                self.pending_headers_stream = None;
                self.pending_headers_end_stream = false;
                let headers = hpack.decode(&full_block)?;
                Ok(Some(Frame::Headers {
                    stream_id: header.stream_id,
                    flags: frame_flags,
                    headers,
                }))
            }
            frame_type::RST_STREAM => {
                require_stream(header, "RST_STREAM")?;
                if payload.len() < 4 {
                    return Err(Error::Decode("RST_STREAM frame too short".to_string()));
                }
                Ok(Some(Frame::RstStream {
                    stream_id: header.stream_id,
                    error_code: read_u32(&payload, 0),
                }))
            }
            frame_type::SETTINGS => {
                require_connection(header, "SETTINGS")?;
                let ack = header.flags & flags::ACK != 0;
                if ack && !payload.is_empty() {
                    return Err(Error::Decode("SETTINGS ACK with a payload".to_string()));
                }
                if payload.len() % 6 != 0 {
                    return Err(Error::Decode(format!(
                        "SETTINGS payload of {} bytes is not a multiple of 6",
                        payload.len()
                    )));
                }
                // Each setting is 6 bytes: u16 id + u32 value
                let settings = Settings::from_wire(payload.chunks_exact(6).map(|entry| {
                    (u16::from_be_bytes([entry[0], entry[1]]), read_u32(entry, 2))
                }));
                Ok(Some(Frame::Settings {
                    flags: header.flags,
                    settings,
                }))
            }
            frame_type::PUSH_PROMISE => {
                // Push is disabled in the SETTINGS we announce
                Err(Error::Protocol(format!(
                    "PUSH_PROMISE on stream {} with push disabled",
                    header.stream_id
                )))
            }
            frame_type::PING => {
                require_connection(header, "PING")?;
                if payload.len() < 8 {
                    return Err(Error::Decode("PING frame too short".to_string()));
                }
                let mut data = [0u8; 8];
                data.copy_from_slice(&payload[..8]);
                Ok(Some(Frame::Ping {
                    ack: header.flags & flags::ACK != 0,
                    data,
                }))
            }
            frame_type::GOAWAY => {
                require_connection(header, "GOAWAY")?;
                if payload.len() < 8 {
                    return Err(Error::Decode("GOAWAY frame too short".to_string()));
                }
                Ok(Some(Frame::GoAway {
                    last_stream_id: read_u32(&payload, 0) & 0x7FFFFFFF,
                    error_code: read_u32(&payload, 4),
                    debug_data: payload.slice(8..),
                }))
            }
            frame_type::WINDOW_UPDATE => {
                if payload.len() < 4 {
                    return Err(Error::Decode("WINDOW_UPDATE frame too short".to_string()));
                }
                Ok(Some(Frame::WindowUpdate {
                    stream_id: header.stream_id,
                    increment: read_u32(&payload, 0) & 0x7FFFFFFF,
                }))
            }
            frame_type::PRIORITY => {
                // Prioritisation is not implemented; PRIORITY is legal in any stream state
                Ok(None)
            }
            _ => {
                // Unknown frame type - ignore
                Ok(None)
            }
        }
    }

    /// Drop any partially assembled header block
    pub fn reset(&mut self) {
        self.pending_headers_stream = None;
        self.pending_headers_end_stream = false;
        self.pending_header_block.clear();
    }

    /// Serialize `frame` onto `dst`, HPACK-encoding header lists.
    ///
    /// Header blocks larger than the default max frame size are split into a
    /// HEADERS frame followed by CONTINUATION frames.
    pub fn encode(frame: &Frame, hpack: &mut HpackEncoder, dst: &mut BytesMut) {
        match frame {
            Frame::Data {
                stream_id,
                flags: data_flags,
                data,
                pad_len,
            } => {
                let mut frame_flags = data_flags & flags::END_STREAM;
                let mut length = data.len();
                if let Some(pad) = pad_len {
                    frame_flags |= flags::PADDED;
                    length += 1 + *pad as usize;
                }
                H2FrameHeader::new(length as u32, frame_type::DATA, frame_flags, *stream_id).encode(dst);
                if let Some(pad) = pad_len {
                    dst.put_u8(*pad);
                }
                dst.extend_from_slice(data);
                if let Some(pad) = pad_len {
                    dst.put_bytes(0, *pad as usize);
                }
            }
            Frame::Headers {
                stream_id,
                flags: header_flags,
                headers,
            } => {
                let block = hpack.encode(headers);
                encode_header_block(*stream_id, header_flags & flags::END_STREAM, &block, dst);
            }
            Frame::RstStream {
                stream_id,
                error_code,
            } => {
                H2FrameHeader::new(4, frame_type::RST_STREAM, 0, *stream_id).encode(dst);
                dst.put_u32(*error_code);
            }
            Frame::Settings { flags: settings_flags, settings } => {
                let length = settings.len() * 6;
                H2FrameHeader::new(length as u32, frame_type::SETTINGS, *settings_flags, 0).encode(dst);
                for (id, value) in settings.iter() {
                    dst.put_u16(id.as_u16());
                    dst.put_u32(value);
                }
            }
            Frame::Ping { ack, data } => {
                let ping_flags = if *ack { flags::ACK } else { 0 };
                H2FrameHeader::new(8, frame_type::PING, ping_flags, 0).encode(dst);
                dst.extend_from_slice(data);
            }
            Frame::GoAway {
                last_stream_id,
                error_code,
                debug_data,
            } => {
                let length = 8 + debug_data.len();
                H2FrameHeader::new(length as u32, frame_type::GOAWAY, 0, 0).encode(dst);
                dst.put_u32(last_stream_id & 0x7FFFFFFF);
                dst.put_u32(*error_code);
                dst.extend_from_slice(debug_data);
            }
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => {
                H2FrameHeader::new(4, frame_type::WINDOW_UPDATE, 0, *stream_id).encode(dst);
                dst.put_u32(increment & 0x7FFFFFFF); // Clear reserved bit
            }
        }
    }
}

fn require_stream(header: &H2FrameHeader, kind: &str) -> Result<()> {
    if header.stream_id == 0 {
        return Err(Error::Decode(format!("{} frame on stream 0", kind)));
    }
    Ok(())
}

fn require_connection(header: &H2FrameHeader, kind: &str) -> Result<()> {
    if header.stream_id != 0 {
        return Err(Error::Decode(format!(
            "{} frame on stream {}",
            kind, header.stream_id
        )));
    }
    Ok(())
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

/// Extract DATA payload, handling PADDED flag.
fn extract_data_payload(header: &H2FrameHeader, payload: Bytes) -> Result<(Bytes, Option<u8>)> {
    if header.flags & flags::PADDED == 0 {
        return Ok((payload, None));
    }
    if payload.is_empty() {
        return Err(Error::Decode("PADDED DATA frame with no payload".to_string()));
    }
    let pad_length = payload[0] as usize;
    if pad_length >= payload.len() {
        return Err(Error::Decode("Invalid padding length in DATA frame".to_string()));
    }
    Ok((payload.slice(1..payload.len() - pad_length), Some(payload[0])))
}

/// Extract HEADERS payload, handling PADDED and PRIORITY flags.
fn extract_headers_payload(header: &H2FrameHeader, payload: Bytes) -> Result<Bytes> {
    let mut offset = 0;
    let mut end = payload.len();

    // Handle PADDED flag
    if header.flags & flags::PADDED != 0 {
        if payload.is_empty() {
            return Err(Error::Decode("PADDED HEADERS frame with no payload".to_string()));
        }
        let pad_length = payload[0] as usize;
        offset = 1;
        if pad_length >= payload.len() - offset {
            return Err(Error::Decode("Invalid padding length in HEADERS frame".to_string()));
        }
        end = payload.len() - pad_length;
    }

    // Handle PRIORITY flag
    if header.flags & flags::PRIORITY != 0 {
        if end - offset < 5 {
            return Err(Error::Decode(
                "PRIORITY HEADERS frame with insufficient data".to_string(),
            ));
        }
        offset += 5; // Skip stream dependency (4 bytes) + weight (1 byte)
    }

    Ok(payload.slice(offset..end))
}

fn encode_header_block(stream_id: u32, end_stream: u8, block: &[u8], dst: &mut BytesMut) {
    let max = DEFAULT_MAX_FRAME_SIZE as usize;
    let first_len = block.len().min(max);
    let (first, rest) = block.split_at(first_len);

    let mut first_flags = end_stream;
    if rest.is_empty() {
        first_flags |= flags::END_HEADERS;
    }
    H2FrameHeader::new(first.len() as u32, frame_type::HEADERS, first_flags, stream_id).encode(dst);
    dst.extend_from_slice(first);

    let chunks: Vec<&[u8]> = rest.chunks(max).collect();
    for (i, chunk) in chunks.iter().enumerate() {
        encode_continuation(stream_id, chunk, i + 1 == chunks.len(), dst);
    }
}

/// Write a CONTINUATION frame to continue a header block
/// end_headers: true if this is the final frame in the header block sequence
fn encode_continuation(stream_id: u32, payload: &[u8], end_headers: bool, dst: &mut BytesMut) {
    let flags_byte = if end_headers { flags::END_HEADERS } else { 0 };
    H2FrameHeader::new(payload.len() as u32, frame_type::CONTINUATION, flags_byte, stream_id).encode(dst);
    dst.extend_from_slice(payload);
}
