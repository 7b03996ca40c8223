//! Connection engine: one read loop that owns the stream table and applies
//! every frame in either direction, plus one write loop that serializes
//! every outbound frame onto the transport.
//!
//! ```text
//!   transport ──► Connection::read_loop ──► per-stream inbound queues ──► Stream
//!                        │   ▲                                              │
//!                        │   └── Command (open / send / reserve) ◄──────────┘
//!                        ▼
//!                  OutboundQueue
//!                        │
//!                        ▼
//!                  WriteLoop::run ──► transport
//! ```

use std::collections::{HashMap, VecDeque};
use std::ops::ControlFlow;

use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::framed::{FrameReader, FrameWriter};
use crate::h2_codec::{error_code, flags, Frame, H2Codec};
use crate::settings::{
    SettingId, Settings, DEFAULT_MAX_FRAME_SIZE, DEFAULT_WINDOW_SIZE, MAX_INITIAL_WINDOW_SIZE,
    MAX_MAX_FRAME_SIZE,
};
use crate::stream::{Stream, StreamCore, StreamState};
use crate::window::{FlowControlError, Window};

/// Largest stream identifier (31 bits).
const MAX_STREAM_ID: u32 = 0x7FFF_FFFF;

/// Which end of the connection we are. Decides who writes the preface and
/// the parity of locally initiated stream ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    fn first_local_stream_id(self) -> u32 {
        match self {
            Role::Client => 1,
            Role::Server => 2,
        }
    }

    fn is_peer_initiated(self, stream_id: u32) -> bool {
        match self {
            Role::Client => stream_id % 2 == 0,
            Role::Server => stream_id % 2 == 1,
        }
    }
}

#[derive(Debug)]
pub(crate) enum Outbound {
    Frame(Frame),
    /// Stop accepting frames; the write loop drains what is queued and exits.
    Close,
}

/// Handle onto the write loop's queue.
#[derive(Debug, Clone)]
pub(crate) struct OutboundQueue {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl OutboundQueue {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub(crate) fn send(&self, frame: Frame) -> Result<()> {
        self.tx
            .send(Outbound::Frame(frame))
            .map_err(|_| Error::ConnectionClosed)
    }

    pub(crate) fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }
}

/// Requests from handles to the read loop, which alone mutates stream
/// state and windows.
#[derive(Debug)]
pub(crate) enum Command {
    Open(oneshot::Sender<Result<Stream>>),
    /// Apply a locally produced frame to its stream and queue it.
    Send {
        frame: Frame,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Grant up to `want` bytes of send credit, parking until some exists.
    Reserve {
        stream_id: u32,
        want: u32,
        reply: oneshot::Sender<Result<u32>>,
    },
    /// State and window of a stream still in the table.
    Inspect {
        stream_id: u32,
        reply: oneshot::Sender<Option<(StreamState, Window)>>,
    },
    /// Send GOAWAY(NO_ERROR) and close.
    Shutdown,
}

/// A parked [`Command::Reserve`].
#[derive(Debug)]
struct CreditRequest {
    stream_id: u32,
    want: u32,
    reply: oneshot::Sender<Result<u32>>,
}

#[derive(Debug)]
struct StreamEntry {
    core: StreamCore,
    inbound: mpsc::UnboundedSender<Frame>,
}

/// Read side of an established connection.
///
/// Drive it with [`Connection::read_loop`] alongside [`WriteLoop::run`]; use
/// the [`ConnectionHandle`] to open and accept streams.
#[derive(Debug)]
pub struct Connection<T> {
    role: Role,
    config: ConnectionConfig,
    reader: FrameReader<ReadHalf<T>>,
    /// Settings we announced
    settings: Settings,
    /// Latest SETTINGS received from the peer
    peer_settings: Settings,
    /// Last SETTINGS_INITIAL_WINDOW_SIZE the peer announced
    peer_initial_window: u32,
    /// Connection-level window
    window: Window,
    streams: HashMap<u32, StreamEntry>,
    /// Highest peer-initiated stream id seen
    last_stream_id: u32,
    next_stream_id: u32,
    outbound: OutboundQueue,
    commands: mpsc::UnboundedReceiver<Command>,
    /// Cloned into every stream handle
    command_tx: mpsc::UnboundedSender<Command>,
    /// Senders waiting for credit, served first come first served
    pending: VecDeque<CreditRequest>,
    incoming: mpsc::UnboundedSender<Stream>,
    closed: bool,
}

/// Write side of an established connection.
#[derive(Debug)]
pub struct WriteLoop<T> {
    writer: FrameWriter<WriteHalf<T>>,
    queue: mpsc::UnboundedReceiver<Outbound>,
}

/// Opens and accepts streams on a running connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    commands: mpsc::UnboundedSender<Command>,
    incoming: mpsc::UnboundedReceiver<Stream>,
}

impl<T> Connection<T>
where
    T: AsyncRead + AsyncWrite,
{
    /// Exchange the preface over `io` and queue our initial SETTINGS.
    ///
    /// The client writes the preface, the server reads and verifies it.
    pub async fn establish(
        io: T,
        role: Role,
        config: ConnectionConfig,
    ) -> Result<(Connection<T>, WriteLoop<T>, ConnectionHandle)> {
        let (read_half, write_half) = tokio::io::split(io);

        let mut codec = H2Codec::new().with_max_header_block_size(config.max_header_block_size);
        codec.set_max_frame_size(config.settings.max_frame_size());
        let mut reader = FrameReader::with_codec(read_half, codec);
        let mut writer = FrameWriter::new(write_half);

        match role {
            Role::Client => {
                writer.write_preface().await?;
                debug!("sent connection preface");
            }
            Role::Server => {
                reader.read_preface().await?;
                debug!("received connection preface");
            }
        }

        let (outbound, queue) = OutboundQueue::new();
        outbound.send(Frame::settings(config.settings.clone()))?;

        let (command_tx, commands) = mpsc::unbounded_channel();
        let (incoming_tx, incoming) = mpsc::unbounded_channel();

        info!(?role, settings = ?config.settings, "connection established");
        let connection = Connection {
            role,
            settings: config.settings.clone(),
            peer_settings: Settings::defaults(),
            peer_initial_window: DEFAULT_WINDOW_SIZE,
            window: Window::new(DEFAULT_WINDOW_SIZE, DEFAULT_WINDOW_SIZE),
            config,
            reader,
            streams: HashMap::new(),
            last_stream_id: 0,
            next_stream_id: role.first_local_stream_id(),
            outbound,
            commands,
            command_tx: command_tx.clone(),
            pending: VecDeque::new(),
            incoming: incoming_tx,
            closed: false,
        };
        let handle = ConnectionHandle {
            commands: command_tx,
            incoming,
        };
        Ok((connection, WriteLoop { writer, queue }, handle))
    }
}

impl<T> Connection<T>
where
    T: AsyncRead,
{
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn peer_settings(&self) -> &Settings {
        &self.peer_settings
    }

    /// The connection-level window.
    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Read and apply frames until GOAWAY, end of transport, a shutdown
    /// request, or a connection error. The connection is closed on return.
    ///
    /// A protocol-level failure is announced to the peer with GOAWAY before
    /// closing; transport failures are not.
    pub async fn read_loop(mut self) -> Result<()> {
        debug!(role = ?self.role, "start read loop");
        let result = self.run().await;
        if let Err(err) = &result {
            error!(error = %err, "read loop failed");
            if !matches!(err, Error::Io(_) | Error::ConnectionClosed) {
                let _ = self
                    .outbound
                    .send(Frame::go_away(self.last_stream_id, err.error_code()));
            }
        }
        self.close();
        result
    }

    async fn run(&mut self) -> Result<()> {
        loop {
            let flow = tokio::select! {
                frame = self.reader.read_frame() => match frame? {
                    Some(frame) => {
                        trace!(?frame, "recv");
                        self.handle_frame(frame)?
                    }
                    None => {
                        debug!("transport reached end of stream");
                        ControlFlow::Break(())
                    }
                },
                Some(command) = self.commands.recv() => self.handle_command(command)?,
            };
            if flow.is_break() {
                return Ok(());
            }
        }
    }

    fn handle_frame(&mut self, frame: Frame) -> Result<ControlFlow<()>> {
        match frame {
            Frame::Settings { flags: f, settings } => {
                if let Err(err) = self.handle_settings(f, settings) {
                    error!(error = %err, "rejected SETTINGS frame");
                }
            }
            Frame::Ping { ack: false, data } => self.outbound.send(Frame::ping_ack(data))?,
            Frame::Ping { ack: true, .. } => trace!("received PING ACK"),
            Frame::WindowUpdate {
                stream_id: 0,
                increment,
            } => {
                self.window.credit_peer(increment).map_err(|err| match err {
                    FlowControlError::ZeroIncrement => {
                        Error::Protocol("WINDOW_UPDATE with zero increment on connection".to_string())
                    }
                    err => Error::FlowControl(err),
                })?;
                trace!(increment, credit = self.window.peer_current_size(), "connection send credit");
                self.grant_pending();
            }
            Frame::GoAway {
                last_stream_id,
                error_code,
                debug_data,
            } => {
                info!(
                    last_stream_id,
                    error_code,
                    reason = %String::from_utf8_lossy(&debug_data),
                    "received GOAWAY"
                );
                self.close();
                return Ok(ControlFlow::Break(()));
            }
            frame => {
                if matches!(frame, Frame::Data { .. }) {
                    self.window_update(frame.flow_len())?;
                }
                self.dispatch(frame)?;
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    fn handle_command(&mut self, command: Command) -> Result<ControlFlow<()>> {
        match command {
            Command::Open(reply) => {
                let _ = reply.send(self.open_stream());
            }
            Command::Send { frame, reply } => {
                let _ = reply.send(self.send_stream_frame(frame));
            }
            Command::Reserve {
                stream_id,
                want,
                reply,
            } => {
                let request = CreditRequest {
                    stream_id,
                    want,
                    reply,
                };
                if let Some(request) = self.try_grant(request) {
                    trace!(stream_id, want, "waiting for send credit");
                    self.pending.push_back(request);
                }
            }
            Command::Inspect { stream_id, reply } => {
                let snapshot = self
                    .streams
                    .get(&stream_id)
                    .map(|entry| (entry.core.state(), entry.core.window.clone()));
                let _ = reply.send(snapshot);
            }
            Command::Shutdown => {
                info!(last_stream_id = self.last_stream_id, "shutting down");
                self.outbound
                    .send(Frame::go_away(self.last_stream_id, error_code::NO_ERROR))?;
                self.close();
                return Ok(ControlFlow::Break(()));
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    /// Apply a SETTINGS frame from the peer and acknowledge it.
    ///
    /// An ACK is only logged. A frame whose values are invalid is rejected
    /// whole: nothing is applied and no ACK is sent. Otherwise the peer
    /// settings are replaced, a new initial window size is rebased into
    /// every window, and an ACK is queued.
    pub fn handle_settings(&mut self, frame_flags: u8, settings: Settings) -> Result<()> {
        if frame_flags == flags::ACK {
            trace!("received SETTINGS ACK");
            return Ok(());
        }
        if frame_flags != 0 {
            return Err(Error::Protocol(format!(
                "unexpected flags {:#x} on SETTINGS",
                frame_flags
            )));
        }

        let initial_window = settings.get(SettingId::InitialWindowSize);
        if let Some(size) = initial_window.filter(|size| *size > MAX_INITIAL_WINDOW_SIZE) {
            return Err(FlowControlError::InitialWindowTooLarge(size).into());
        }
        let max_frame_size = settings.get(SettingId::MaxFrameSize);
        if let Some(size) = max_frame_size
            .filter(|size| !(DEFAULT_MAX_FRAME_SIZE..=MAX_MAX_FRAME_SIZE).contains(size))
        {
            return Err(Error::Protocol(format!(
                "SETTINGS_MAX_FRAME_SIZE {} outside {}..={}",
                size, DEFAULT_MAX_FRAME_SIZE, MAX_MAX_FRAME_SIZE
            )));
        }

        debug!(?settings, "applying peer SETTINGS");
        self.peer_settings = settings;

        if let Some(new_initial) = initial_window {
            let old_initial = self.peer_initial_window;
            self.peer_initial_window = new_initial;
            debug!(old_initial, new_initial, streams = self.streams.len(), "rebasing send windows");

            let old = self.window.peer_initial_size() as u32;
            self.window.rebase(old, new_initial);
            for (stream_id, entry) in self.streams.iter_mut() {
                let window = &mut entry.core.window;
                let old = window.peer_initial_size() as u32;
                window.rebase(old, new_initial);
                trace!(stream_id, credit = window.peer_current_size(), "rebased stream window");
            }
            self.grant_pending();
        }

        self.outbound.send(Frame::settings_ack())
    }

    /// Count `length` received DATA bytes against the connection window and
    /// queue a WINDOW_UPDATE on stream 0 when it falls below its threshold.
    pub fn window_update(&mut self, length: u32) -> Result<()> {
        if let Some(increment) = self.window.consume(length)? {
            trace!(length, increment, "replenishing connection window");
            self.outbound.send(Frame::window_update(0, increment))?;
        }
        Ok(())
    }

    /// Tear down every stream and stop the write loop once its queue drains.
    /// Safe to call more than once.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        info!(streams = self.streams.len(), "closing connection");
        for (stream_id, _) in self.streams.drain() {
            trace!(stream_id, "closing stream");
        }
        // Dropping the replies fails every parked sender
        self.pending.clear();
        self.outbound.close();
    }

    fn open_stream(&mut self) -> Result<Stream> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        let limit = self.peer_settings.max_concurrent_streams();
        let active = self
            .streams
            .keys()
            .filter(|id| !self.role.is_peer_initiated(**id))
            .count();
        if active >= limit as usize {
            return Err(Error::StreamLimit(limit));
        }
        let stream_id = self.next_stream_id;
        if stream_id > MAX_STREAM_ID {
            return Err(Error::Protocol("stream identifiers exhausted".to_string()));
        }
        self.next_stream_id += 2;
        debug!(stream_id, "opening stream");
        Ok(self.create_stream(stream_id))
    }

    fn create_stream(&mut self, stream_id: u32) -> Stream {
        let window = Window::new(
            self.settings.initial_window_size(),
            self.peer_initial_window,
        );
        let (tx, rx) = mpsc::unbounded_channel();
        self.streams.insert(
            stream_id,
            StreamEntry {
                core: StreamCore::new(stream_id, window),
                inbound: tx,
            },
        );
        Stream::new(
            stream_id,
            rx,
            self.command_tx.clone(),
            self.peer_settings.clone(),
            self.config.max_recv_frames,
        )
    }

    /// Apply a frame produced by a stream handle and queue it for writing.
    fn send_stream_frame(&mut self, frame: Frame) -> Result<()> {
        let stream_id = frame.stream_id();
        let entry = self
            .streams
            .get_mut(&stream_id)
            .ok_or(Error::StreamClosed(stream_id))?;
        let state = entry.core.send(&frame)?;
        self.outbound.send(frame)?;
        if state == StreamState::Closed {
            self.streams.remove(&stream_id);
            debug!(stream_id, total = self.streams.len(), "stream closed");
            self.grant_pending();
        }
        Ok(())
    }

    /// Grant what credit both windows allow, or hand the request back when
    /// there is none. Requests for streams that can no longer send fail.
    fn try_grant(&mut self, request: CreditRequest) -> Option<CreditRequest> {
        let stream_id = request.stream_id;
        let stream_window = match self.streams.get_mut(&stream_id) {
            Some(entry) if entry.core.state().can_send() => &mut entry.core.window,
            _ => {
                let _ = request.reply.send(Err(Error::StreamClosed(stream_id)));
                return None;
            }
        };

        let available = stream_window
            .peer_current_size()
            .min(self.window.peer_current_size());
        if available <= 0 {
            return Some(request);
        }

        let granted = (request.want as i64).min(available) as u32;
        let result = stream_window
            .spend_peer(granted)
            .and_then(|()| self.window.spend_peer(granted))
            .map(|()| granted)
            .map_err(Error::from);
        if request.reply.send(result).is_err() {
            trace!(stream_id, granted, "credit requester went away");
        }
        None
    }

    /// Retry parked credit requests in arrival order.
    fn grant_pending(&mut self) {
        for _ in 0..self.pending.len() {
            if let Some(request) = self.pending.pop_front() {
                if let Some(request) = self.try_grant(request) {
                    self.pending.push_back(request);
                }
            }
        }
    }

    /// Route a stream-scoped frame to its stream, creating peer-initiated
    /// streams on first sight.
    fn dispatch(&mut self, frame: Frame) -> Result<()> {
        let stream_id = frame.stream_id();
        if stream_id == 0 {
            return Ok(());
        }
        if !self.streams.contains_key(&stream_id) && !self.accept_stream(stream_id, &frame)? {
            return Ok(());
        }
        let Some(entry) = self.streams.get_mut(&stream_id) else {
            return Ok(());
        };

        match drive_stream(&mut entry.core, &frame, &self.outbound) {
            Ok(StreamState::Closed) => {
                if let Some(entry) = self.streams.remove(&stream_id) {
                    debug!(stream_id, total = self.streams.len(), "stream closed");
                    let _ = entry.inbound.send(frame);
                }
                self.grant_pending();
                Ok(())
            }
            Ok(_) => {
                let credited = matches!(frame, Frame::WindowUpdate { .. });
                let _ = entry.inbound.send(frame);
                if credited {
                    self.grant_pending();
                }
                Ok(())
            }
            Err(err) if !err.is_connection_error() => self.reset_stream(stream_id, err),
            Err(err) => Err(err),
        }
    }

    /// Decide what to do with a frame for a stream not in the table.
    /// Returns true when a new stream was created for it.
    fn accept_stream(&mut self, stream_id: u32, frame: &Frame) -> Result<bool> {
        if self.role.is_peer_initiated(stream_id) {
            if stream_id <= self.last_stream_id {
                return self.closed_stream_frame(stream_id, frame);
            }
            self.last_stream_id = stream_id;

            let limit = self.settings.max_concurrent_streams();
            let active = self
                .streams
                .keys()
                .filter(|id| self.role.is_peer_initiated(**id))
                .count();
            if active >= limit as usize {
                warn!(stream_id, limit, "refusing stream over concurrency limit");
                self.outbound
                    .send(Frame::rst_stream(stream_id, error_code::REFUSED_STREAM))?;
                return Ok(false);
            }

            let stream = self.create_stream(stream_id);
            debug!(stream_id, total = self.streams.len(), "accepted stream");
            if self.incoming.send(stream).is_err() {
                trace!(stream_id, "no handle is accepting streams");
            }
            return Ok(true);
        }

        if stream_id >= self.next_stream_id {
            return Err(Error::Protocol(format!(
                "frame on stream {} which was never opened",
                stream_id
            )));
        }
        self.closed_stream_frame(stream_id, frame)
    }

    fn closed_stream_frame(&mut self, stream_id: u32, frame: &Frame) -> Result<bool> {
        match frame {
            Frame::Data { .. } | Frame::Headers { .. } => {
                debug!(stream_id, "frame on closed stream");
                self.outbound
                    .send(Frame::rst_stream(stream_id, error_code::STREAM_CLOSED))?;
            }
            _ => trace!(stream_id, frame_type = frame.frame_type(), "ignoring frame on closed stream"),
        }
        Ok(false)
    }

    /// Isolate a stream error: reset the stream, drop it from the table, and
    /// hand its consumer the RST_STREAM.
    fn reset_stream(&mut self, stream_id: u32, err: Error) -> Result<()> {
        let code = err.error_code();
        warn!(stream_id, error = %err, "resetting stream");
        self.outbound.send(Frame::rst_stream(stream_id, code))?;
        if let Some(entry) = self.streams.remove(&stream_id) {
            let _ = entry.inbound.send(Frame::rst_stream(stream_id, code));
        }
        self.grant_pending();
        Ok(())
    }
}

/// Apply an inbound frame to one stream's state and window.
fn drive_stream(core: &mut StreamCore, frame: &Frame, outbound: &OutboundQueue) -> Result<StreamState> {
    let state = core.recv(frame)?;
    match frame {
        Frame::Data { stream_id, .. } => {
            let update = core.window.consume(frame.flow_len()).map_err(|err| {
                Error::stream(*stream_id, error_code::FLOW_CONTROL_ERROR, err.to_string())
            })?;
            if let Some(increment) = update.filter(|_| !frame.is_end_stream()) {
                outbound.send(Frame::window_update(*stream_id, increment))?;
            }
        }
        Frame::WindowUpdate {
            stream_id,
            increment,
        } => {
            core.window.credit_peer(*increment).map_err(|err| {
                let code = match err {
                    FlowControlError::ZeroIncrement => error_code::PROTOCOL_ERROR,
                    _ => error_code::FLOW_CONTROL_ERROR,
                };
                Error::stream(*stream_id, code, err.to_string())
            })?;
        }
        _ => {}
    }
    Ok(state)
}

impl<T> WriteLoop<T>
where
    T: AsyncWrite,
{
    /// Write queued frames in order until the connection closes, then shut
    /// down the transport's write side.
    pub async fn run(mut self) -> Result<()> {
        debug!("start write loop");
        while let Some(message) = self.queue.recv().await {
            match message {
                Outbound::Frame(frame) => {
                    trace!(?frame, "send");
                    if let Err(err) = self.writer.write_frame(&frame).await {
                        error!(error = %err, "write failed");
                        return Err(err);
                    }
                }
                Outbound::Close => {
                    debug!("draining outbound queue");
                    self.queue.close();
                }
            }
        }
        if let Err(err) = self.writer.shutdown().await {
            debug!(error = %err, "transport shutdown failed");
        }
        debug!("write loop finished");
        Ok(())
    }
}

impl ConnectionHandle {
    /// Open a locally initiated stream. It starts idle; its first frame
    /// must be HEADERS.
    pub async fn open_stream(&self) -> Result<Stream> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Open(tx))
            .map_err(|_| Error::ConnectionClosed)?;
        rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Next peer-initiated stream, or `None` once the connection is gone.
    pub async fn accept(&mut self) -> Option<Stream> {
        self.incoming.recv().await
    }

    /// Ask the read loop to send GOAWAY(NO_ERROR) and close.
    pub fn shutdown(&self) -> Result<()> {
        self.commands
            .send(Command::Shutdown)
            .map_err(|_| Error::ConnectionClosed)
    }
}
