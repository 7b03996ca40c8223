//! Per-stream state machine (RFC 9113 Section 5.1) and the handle a stream
//! consumer uses to send and receive.

use bytes::{Bytes, BytesMut};
use http::{Method, Request, Response, StatusCode, Uri, Version};
use tokio::sync::{mpsc, oneshot};
use tracing::{trace, warn};

use crate::connection::Command;
use crate::error::{Error, Result};
use crate::h2_codec::{error_code, Frame};
use crate::hpack::{self, H2Header};
use crate::settings::{Settings, DEFAULT_MAX_FRAME_SIZE, MAX_MAX_FRAME_SIZE};
use crate::window::Window;

/// Lifecycle of a stream. Reserved states are absent because push is not
/// supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

/// Which side produced a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Received from the peer
    Recv,
    /// Produced locally
    Send,
}

impl StreamState {
    /// State after `frame` crosses stream `stream_id` in `direction`.
    ///
    /// Frames the current state does not allow yield `Error::Stream`; the
    /// caller decides what to do about it.
    pub fn transition(self, stream_id: u32, frame: &Frame, direction: Direction) -> Result<StreamState> {
        use StreamState::*;

        let kind = match frame {
            Frame::RstStream { .. } => return Ok(Closed),
            Frame::WindowUpdate { .. } => {
                return match self {
                    Idle => Err(Error::stream(
                        stream_id,
                        error_code::PROTOCOL_ERROR,
                        "WINDOW_UPDATE on idle stream",
                    )),
                    state => Ok(state),
                };
            }
            Frame::Settings { .. } | Frame::Ping { .. } | Frame::GoAway { .. } => {
                return Err(Error::Protocol(format!(
                    "connection-scoped frame type {:#x} routed to stream {}",
                    frame.frame_type(),
                    stream_id
                )));
            }
            Frame::Headers { .. } => "HEADERS",
            Frame::Data { .. } => "DATA",
        };
        let end = frame.is_end_stream();

        match (self, direction) {
            (Idle, _) if kind == "DATA" => Err(Error::stream(
                stream_id,
                error_code::PROTOCOL_ERROR,
                "DATA on idle stream",
            )),
            (Idle, Direction::Recv) | (Open, Direction::Recv) => {
                Ok(if end { HalfClosedRemote } else { Open })
            }
            (Idle, Direction::Send) | (Open, Direction::Send) => {
                Ok(if end { HalfClosedLocal } else { Open })
            }
            (HalfClosedLocal, Direction::Recv) => Ok(if end { Closed } else { HalfClosedLocal }),
            (HalfClosedRemote, Direction::Send) => Ok(if end { Closed } else { HalfClosedRemote }),
            (HalfClosedLocal, Direction::Send) | (HalfClosedRemote, Direction::Recv) | (Closed, _) => {
                Err(Error::stream(
                    stream_id,
                    error_code::STREAM_CLOSED,
                    format!("{} on {:?} stream", kind, self),
                ))
            }
        }
    }

    /// Whether DATA may still be sent.
    pub fn can_send(self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedRemote)
    }
}

/// State and flow-control window of one stream. Owned by the connection's
/// read loop; stream handles reach it only through commands.
#[derive(Debug)]
pub(crate) struct StreamCore {
    id: u32,
    state: StreamState,
    pub(crate) window: Window,
}

impl StreamCore {
    pub(crate) fn new(id: u32, window: Window) -> Self {
        Self {
            id,
            state: StreamState::Idle,
            window,
        }
    }

    pub(crate) fn state(&self) -> StreamState {
        self.state
    }

    pub(crate) fn recv(&mut self, frame: &Frame) -> Result<StreamState> {
        self.apply(frame, Direction::Recv)
    }

    pub(crate) fn send(&mut self, frame: &Frame) -> Result<StreamState> {
        self.apply(frame, Direction::Send)
    }

    fn apply(&mut self, frame: &Frame, direction: Direction) -> Result<StreamState> {
        let next = self.state.transition(self.id, frame, direction)?;
        if next != self.state {
            trace!(stream_id = self.id, from = ?self.state, to = ?next, ?direction, "stream state");
        }
        self.state = next;
        Ok(next)
    }
}

/// Header fields and body bytes collected from a stream's inbound queue.
#[derive(Debug, Default)]
struct Message {
    headers: Vec<H2Header>,
    body: BytesMut,
}

/// One logical exchange on a connection.
///
/// Obtained from [`ConnectionHandle::open_stream`](crate::ConnectionHandle::open_stream)
/// or [`ConnectionHandle::accept`](crate::ConnectionHandle::accept). The
/// handle holds no connection state of its own: every send is applied by
/// the read loop, which owns the stream's state and window.
#[derive(Debug)]
pub struct Stream {
    id: u32,
    inbound: mpsc::UnboundedReceiver<Frame>,
    commands: mpsc::UnboundedSender<Command>,
    peer_settings: Settings,
    max_recv_frames: usize,
}

impl Stream {
    pub(crate) fn new(
        id: u32,
        inbound: mpsc::UnboundedReceiver<Frame>,
        commands: mpsc::UnboundedSender<Command>,
        peer_settings: Settings,
        max_recv_frames: usize,
    ) -> Self {
        Self {
            id,
            inbound,
            commands,
            peer_settings,
            max_recv_frames,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Current state as seen by the read loop. A stream that has left the
    /// connection's table, or whose connection is gone, is `Closed`.
    pub async fn state(&self) -> StreamState {
        self.inspect()
            .await
            .map_or(StreamState::Closed, |(state, _)| state)
    }

    /// Snapshot of the stream's flow-control window, `None` once closed.
    pub async fn window(&self) -> Option<Window> {
        self.inspect().await.map(|(_, window)| window)
    }

    /// Peer settings in effect when the stream was created.
    pub fn peer_settings(&self) -> &Settings {
        &self.peer_settings
    }

    /// Next frame delivered to this stream, or `None` once it is closed.
    pub async fn recv_frame(&mut self) -> Option<Frame> {
        self.inbound.recv().await
    }

    pub async fn send_headers(&mut self, headers: Vec<H2Header>, end_stream: bool) -> Result<()> {
        self.send_frame(Frame::headers(self.id, headers, end_stream)).await
    }

    /// Send `data` as DATA frames no larger than the peer's max frame size,
    /// waiting for send credit as needed. END_STREAM goes on the last frame.
    pub async fn send_data(&mut self, data: Bytes, end_stream: bool) -> Result<()> {
        if data.is_empty() {
            return self.send_frame(Frame::data(self.id, data, end_stream)).await;
        }

        let max_frame_size = self
            .peer_settings
            .max_frame_size()
            .clamp(DEFAULT_MAX_FRAME_SIZE, MAX_MAX_FRAME_SIZE) as usize;
        let mut remaining = data;
        while !remaining.is_empty() {
            let want = remaining.len().min(max_frame_size) as u32;
            let granted = self.reserve_credit(want).await?;
            let chunk = remaining.split_to(granted as usize);
            let last = remaining.is_empty();
            self.send_frame(Frame::data(self.id, chunk, end_stream && last)).await?;
        }
        Ok(())
    }

    pub async fn send_reset(&mut self, code: u32) -> Result<()> {
        self.send_frame(Frame::rst_stream(self.id, code)).await
    }

    /// Send a request: HEADERS alone when the body is empty, otherwise
    /// HEADERS, the body as DATA, and an empty DATA carrying END_STREAM.
    pub async fn send_request(&mut self, request: Request<Bytes>) -> Result<()> {
        let (parts, body) = request.into_parts();
        let mut headers = vec![
            H2Header::new(":method", parts.method.as_str()),
            H2Header::new(":scheme", parts.uri.scheme_str().unwrap_or("https")),
        ];
        if let Some(authority) = parts.uri.authority() {
            headers.push(H2Header::new(":authority", authority.as_str()));
        }
        headers.push(H2Header::new(
            ":path",
            parts.uri.path_and_query().map_or("/", |p| p.as_str()),
        ));
        headers.extend(hpack::from_header_map(&parts.headers));
        self.send_message(headers, body).await
    }

    /// Response counterpart of [`Stream::send_request`].
    pub async fn send_response(&mut self, response: Response<Bytes>) -> Result<()> {
        let (parts, body) = response.into_parts();
        let mut headers = vec![H2Header::new(":status", parts.status.as_str())];
        headers.extend(hpack::from_header_map(&parts.headers));
        self.send_message(headers, body).await
    }

    /// Drain the stream until END_STREAM and build a response from it.
    pub async fn recv_response(&mut self) -> Result<Response<Bytes>> {
        let message = self.recv_message().await?;
        let status = hpack::find(&message.headers, ":status")
            .ok_or_else(|| Error::Message("response without :status".to_string()))?;
        let status = StatusCode::from_bytes(status.as_bytes())
            .map_err(|_| Error::Message(format!("invalid :status {:?}", status)))?;

        let mut response = Response::new(message.body.freeze());
        *response.status_mut() = status;
        *response.version_mut() = Version::HTTP_2;
        hpack::extend_header_map(response.headers_mut(), &message.headers)?;
        Ok(response)
    }

    /// Drain the stream until END_STREAM and build a request from it.
    pub async fn recv_request(&mut self) -> Result<Request<Bytes>> {
        let message = self.recv_message().await?;
        let method = hpack::find(&message.headers, ":method")
            .ok_or_else(|| Error::Message("request without :method".to_string()))?;
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| Error::Message(format!("invalid :method {:?}", method)))?;

        let path = hpack::find(&message.headers, ":path").unwrap_or("/");
        let uri = match (
            hpack::find(&message.headers, ":scheme"),
            hpack::find(&message.headers, ":authority"),
        ) {
            (Some(scheme), Some(authority)) => Uri::builder()
                .scheme(scheme)
                .authority(authority)
                .path_and_query(path)
                .build()?,
            _ => Uri::builder().path_and_query(path).build()?,
        };

        let mut request = Request::new(message.body.freeze());
        *request.method_mut() = method;
        *request.uri_mut() = uri;
        *request.version_mut() = Version::HTTP_2;
        hpack::extend_header_map(request.headers_mut(), &message.headers)?;
        Ok(request)
    }

    async fn send_message(&mut self, headers: Vec<H2Header>, body: Bytes) -> Result<()> {
        if body.is_empty() {
            return self.send_headers(headers, true).await;
        }
        self.send_headers(headers, false).await?;
        self.send_data(body, false).await?;
        self.send_data(Bytes::new(), true).await
    }

    async fn recv_message(&mut self) -> Result<Message> {
        let mut message = Message::default();
        for _ in 0..self.max_recv_frames {
            let frame = match self.inbound.recv().await {
                Some(frame) => frame,
                None => return Err(Error::StreamClosed(self.id)),
            };
            let end_stream = frame.is_end_stream();
            match frame {
                // A second header block is a trailer section
                Frame::Headers { headers, .. } => message.headers.extend(headers),
                Frame::Data { data, .. } => message.body.extend_from_slice(&data),
                Frame::RstStream { error_code, .. } => {
                    return Err(Error::StreamReset {
                        stream_id: self.id,
                        error_code,
                    })
                }
                _ => {}
            }
            if end_stream {
                return Ok(message);
            }
        }
        warn!(
            stream_id = self.id,
            limit = self.max_recv_frames,
            "frame limit reached before END_STREAM"
        );
        Ok(message)
    }

    /// Send `command` to the read loop and wait for its reply. `None` when
    /// the connection is gone or dropped the request.
    async fn call<R>(&self, command: impl FnOnce(oneshot::Sender<R>) -> Command) -> Option<R> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(command(tx)).ok()?;
        rx.await.ok()
    }

    async fn inspect(&self) -> Option<(StreamState, Window)> {
        let stream_id = self.id;
        self.call(|reply| Command::Inspect { stream_id, reply })
            .await
            .flatten()
    }

    async fn send_frame(&self, frame: Frame) -> Result<()> {
        self.call(|reply| Command::Send { frame, reply })
            .await
            .unwrap_or(Err(Error::StreamClosed(self.id)))
    }

    /// Take up to `want` bytes of send credit from both the stream and the
    /// connection window. The read loop parks the request until a
    /// WINDOW_UPDATE or SETTINGS frees some.
    async fn reserve_credit(&self, want: u32) -> Result<u32> {
        let stream_id = self.id;
        self.call(|reply| Command::Reserve {
            stream_id,
            want,
            reply,
        })
        .await
        .unwrap_or(Err(Error::StreamClosed(stream_id)))
    }
}
