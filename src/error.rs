//! Error type shared by the codec, the stream state machine and the
//! connection loops.

use crate::h2_codec::error_code;
use crate::window::FlowControlError;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport failure other than a clean end of stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid connection preface")]
    InvalidPreface,

    /// Malformed frame bytes. The framing boundary can no longer be trusted.
    #[error("malformed frame: {0}")]
    Decode(String),

    #[error("frame of {len} bytes exceeds max frame size {max}")]
    FrameSize { len: u32, max: u32 },

    #[error("HPACK error: {0}")]
    Compression(String),

    /// Connection-scoped protocol violation.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("flow control error: {0}")]
    FlowControl(#[from] FlowControlError),

    /// Stream-scoped protocol violation, isolated to `stream_id`.
    #[error("stream {stream_id}: {reason} (error code {code:#x})")]
    Stream {
        stream_id: u32,
        code: u32,
        reason: String,
    },

    #[error("stream {stream_id} reset (error code {error_code:#x})")]
    StreamReset { stream_id: u32, error_code: u32 },

    #[error("stream {0} closed")]
    StreamClosed(u32),

    #[error("peer allows at most {0} concurrent streams")]
    StreamLimit(u32),

    #[error("connection closed")]
    ConnectionClosed,

    /// A header block that does not form a valid request or response.
    #[error("malformed message: {0}")]
    Message(String),

    #[error(transparent)]
    Http(#[from] http::Error),
}

impl Error {
    /// Error code carried by the GOAWAY or RST_STREAM this error warrants.
    pub fn error_code(&self) -> u32 {
        match self {
            Error::Decode(_) | Error::Protocol(_) | Error::InvalidPreface => {
                error_code::PROTOCOL_ERROR
            }
            Error::FrameSize { .. } => error_code::FRAME_SIZE_ERROR,
            Error::Compression(_) => error_code::COMPRESSION_ERROR,
            Error::FlowControl(_) => error_code::FLOW_CONTROL_ERROR,
            Error::Stream { code, .. } => *code,
            Error::StreamReset { error_code, .. } => *error_code,
            Error::StreamClosed(_) => error_code::STREAM_CLOSED,
            Error::StreamLimit(_) => error_code::REFUSED_STREAM,
            Error::Message(_) | Error::Http(_) => error_code::PROTOCOL_ERROR,
            Error::Io(_) | Error::ConnectionClosed => error_code::INTERNAL_ERROR,
        }
    }

    /// True when the error should tear down the whole connection rather
    /// than a single stream.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::InvalidPreface
                | Error::Decode(_)
                | Error::FrameSize { .. }
                | Error::Compression(_)
                | Error::Protocol(_)
                | Error::FlowControl(_)
                | Error::ConnectionClosed
        )
    }

    pub(crate) fn stream(stream_id: u32, code: u32, reason: impl Into<String>) -> Self {
        Error::Stream {
            stream_id,
            code,
            reason: reason.into(),
        }
    }
}
