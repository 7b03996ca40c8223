//! h2-mux: an HTTP/2 connection engine over any async byte transport
//!
//! This crate multiplexes concurrent request/response exchanges over one
//! ordered, reliable byte stream (TCP, TLS, an in-memory pipe) using HTTP/2
//! framing. It does not open sockets, negotiate TLS or route requests; it
//! takes a transport and gives back streams.
//!
//! # Features
//!
//! - **Frame codec**: DATA, HEADERS + CONTINUATION, RST_STREAM, SETTINGS,
//!   PING, GOAWAY, WINDOW_UPDATE, with size and stream-id validation
//! - **HPACK**: Header compression via fluke-hpack, one context per direction
//! - **Stream state machine**: RFC 9113 Section 5.1 without the reserved states
//! - **Flow control**: Per-stream and connection windows with threshold
//!   replenishment and SETTINGS_INITIAL_WINDOW_SIZE rebasing
//! - **Request/response adapters**: `http::Request` / `http::Response` with
//!   `Bytes` bodies
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use bytes::Bytes;
//! use h2_mux::{Connection, ConnectionConfig, Role};
//! use http::Request;
//! use tokio::net::TcpStream;
//!
//! # async fn run() -> h2_mux::Result<()> {
//! let io = TcpStream::connect("127.0.0.1:8080").await?;
//! let (connection, write_loop, handle) =
//!     Connection::establish(io, Role::Client, ConnectionConfig::default()).await?;
//! tokio::spawn(connection.read_loop());
//! tokio::spawn(write_loop.run());
//!
//! let mut stream = handle.open_stream().await?;
//! stream
//!     .send_request(Request::get("http://127.0.0.1:8080/").body(Bytes::new())?)
//!     .await?;
//! let response = stream.recv_response().await?;
//! println!("{} ({} bytes)", response.status(), response.body().len());
//! # Ok(())
//! # }
//! ```
//!
//! The codec is usable on its own:
//!
//! ```rust
//! use bytes::BytesMut;
//! use h2_mux::{Frame, H2Codec, H2Header, HpackDecoder, HpackEncoder};
//!
//! let mut encoder = HpackEncoder::new();
//! let mut wire = BytesMut::new();
//! let headers = Frame::headers(1, vec![H2Header::new(":status", "200")], true);
//! H2Codec::encode(&headers, &mut encoder, &mut wire);
//!
//! let mut codec = H2Codec::new();
//! let mut decoder = HpackDecoder::new();
//! let frame = codec.decode(&mut wire, &mut decoder).unwrap().unwrap();
//! assert_eq!(frame, headers);
//! ```
//!
//! # Architecture
//!
//! - [`Connection::read_loop`] is the only reader of the transport and the
//!   only owner of the stream table, every stream state and every window.
//! - [`WriteLoop::run`] is the only writer. It owns the HPACK encoder, so
//!   header blocks are compressed in wire order.
//! - [`Stream`] handles hold no connection state. Sends and credit
//!   reservations are commands to the read loop, so they can be moved to
//!   any task.

pub mod config;
pub mod connection;
pub mod error;
pub mod framed;
pub mod h2_codec;
pub mod hpack;
pub mod settings;
pub mod stream;
pub mod window;

pub use config::ConnectionConfig;
pub use connection::{Connection, ConnectionHandle, Role, WriteLoop};
pub use error::{Error, Result};
pub use framed::{FrameReader, FrameWriter};
pub use h2_codec::{
    error_code, flags, frame_type, is_h2c_preface, Frame, H2Codec, H2FrameHeader,
    CONNECTION_PREFACE, MAX_HEADER_BLOCK_SIZE,
};
pub use hpack::{H2Header, HpackDecoder, HpackEncoder};
pub use settings::{SettingId, Settings};
pub use stream::{Direction, Stream, StreamState};
pub use window::{FlowControlError, Window};
