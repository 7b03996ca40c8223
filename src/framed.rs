//! Async frame I/O over a byte transport.
//!
//! [`FrameReader`] and [`FrameWriter`] wrap the two halves of a transport
//! and drive [`H2Codec`] over them. Each owns one side of the HPACK context.

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::h2_codec::{is_h2c_preface, Frame, H2Codec, CONNECTION_PREFACE};
use crate::hpack::{HpackDecoder, HpackEncoder};

const READ_BUFFER_CAPACITY: usize = 16 * 1024;

#[derive(Debug)]
pub struct FrameReader<R> {
    io: R,
    buf: BytesMut,
    codec: H2Codec,
    hpack: HpackDecoder,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(io: R) -> Self {
        Self::with_codec(io, H2Codec::new())
    }

    pub fn with_codec(io: R, codec: H2Codec) -> Self {
        Self {
            io,
            buf: BytesMut::with_capacity(READ_BUFFER_CAPACITY),
            codec,
            hpack: HpackDecoder::new(),
        }
    }

    pub fn codec_mut(&mut self) -> &mut H2Codec {
        &mut self.codec
    }

    /// Read and verify the 24-byte client preface.
    pub async fn read_preface(&mut self) -> Result<()> {
        while self.buf.len() < CONNECTION_PREFACE.len() {
            if self.io.read_buf(&mut self.buf).await? == 0 {
                return Err(Error::InvalidPreface);
            }
            if !CONNECTION_PREFACE.starts_with(&self.buf[..self.buf.len().min(CONNECTION_PREFACE.len())]) {
                return Err(Error::InvalidPreface);
            }
        }
        if !is_h2c_preface(&self.buf) {
            return Err(Error::InvalidPreface);
        }
        self.buf.advance(CONNECTION_PREFACE.len());
        Ok(())
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` when the transport ends cleanly on a frame
    /// boundary. Cancel-safe: partial input stays buffered.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.buf, &mut self.hpack)? {
                return Ok(Some(frame));
            }
            if self.io.read_buf(&mut self.buf).await? == 0 {
                if self.buf.is_empty() && !self.codec.has_pending_headers() {
                    return Ok(None);
                }
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "transport closed in the middle of a frame",
                )));
            }
        }
    }
}

#[derive(Debug)]
pub struct FrameWriter<W> {
    io: W,
    buf: BytesMut,
    hpack: HpackEncoder,
}

impl<W> FrameWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(io: W) -> Self {
        Self {
            io,
            buf: BytesMut::with_capacity(READ_BUFFER_CAPACITY),
            hpack: HpackEncoder::new(),
        }
    }

    pub async fn write_preface(&mut self) -> Result<()> {
        self.io.write_all(CONNECTION_PREFACE).await?;
        self.io.flush().await?;
        Ok(())
    }

    /// Encode and write one frame. The frame's bytes are written in one
    /// piece, so frames never interleave on the wire.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.buf.clear();
        H2Codec::encode(frame, &mut self.hpack, &mut self.buf);
        self.io.write_all(&self.buf).await?;
        self.io.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.io.shutdown().await?;
        Ok(())
    }
}
