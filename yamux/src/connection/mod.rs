// Copyright 2020 Netwarps Ltd.
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! The muxed connection.
//!
//! A [`Connection`] owns the underlying socket and multiplexes [`Stream`]s
//! over it. Its [`Connection::next_stream`] method is the single driver:
//! it reads frames, executes control commands (open/accept/close, arriving
//! from cloned [`Control`] handles) and stream commands (frames the
//! streams want sent), and runs the keepalive and inactivity timers. The
//! owner calls it in a loop until it returns an error, which is the one
//! and only signal that the connection has terminated.
//!
//! All outbound frames funnel through this driver, which serializes
//! writes; streams never touch the socket. Streams are completed through
//! wakers and channels only, never by calling into user code from frame
//! dispatch, so a completion can never re-enter the driver.

pub mod control;
pub mod stream;

use futures::channel::{mpsc, oneshot};
use futures::stream::{BoxStream, Fuse};
use futures::{pin_mut, select_biased, FutureExt, StreamExt};
use nohash_hasher::IntMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::{fmt, io};

use meshwork_traits::SplittableReadWrite;

pub use control::Control;
pub use stream::{State, Stream};

use crate::error::ConnectionError;
use crate::frame::header::{self, GoAwayCode, StreamId, Tag};
use crate::frame::io::{FrameDecodeError, IO};
use crate::frame::{header::Data, header::Ping, header::WindowUpdate, Frame};
use crate::pause::PausableTimer;
use crate::{Config, WindowUpdateMode, DEFAULT_CREDIT};

pub(crate) type Result<T> = std::result::Result<T, ConnectionError>;

/// How many commands may queue up before senders are backpressured.
const MAX_COMMAND_BACKLOG: usize = 32;

/// How the connection was established.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub enum Mode {
    /// We dialed; our streams get odd ids.
    Client,
    /// We accepted; our streams get even ids.
    Server,
}

/// The connection identifier.
///
/// Randomly generated, mainly to tell connections apart in log output.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Id(u32);

impl Id {
    pub(crate) fn random() -> Self {
        Id(rand::random())
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Commands from [`Stream`]s to their connection.
#[derive(Debug)]
pub(crate) enum StreamCommand {
    /// A frame should be sent to the remote.
    SendFrame(Frame<()>),
    /// Half-close a stream (FIN).
    CloseStream { id: StreamId },
    /// Abort a stream (RST).
    ResetStream { id: StreamId },
}

/// Commands from [`Control`] handles to their connection.
pub(crate) enum ControlCommand {
    /// Open a new outbound stream; answered once the remote ACKs it.
    OpenStream(oneshot::Sender<Result<Stream>>),
    /// Wait for the next inbound stream.
    AcceptStream(oneshot::Sender<Result<Stream>>),
    /// Close the connection gracefully.
    CloseConnection(oneshot::Sender<()>),
}

enum Event {
    Frame(Option<std::result::Result<Frame<()>, FrameDecodeError>>),
    StreamCommand(Option<StreamCommand>),
    ControlCommand(Option<ControlCommand>),
    PingTimer,
    InactivityTimer,
}

/// A yamux connection multiplexing [`Stream`]s over one socket.
pub struct Connection<T: SplittableReadWrite> {
    id: Id,
    mode: Mode,
    config: Arc<Config>,
    /// Inbound frames; partial reads survive across `next_stream` calls.
    frames: Fuse<BoxStream<'static, std::result::Result<Frame<()>, FrameDecodeError>>>,
    writer: IO<T::Writer>,
    is_closed: bool,
    /// A GO_AWAY went over the wire (either direction): no new streams,
    /// drain and close.
    shutting_down: bool,
    next_id: u32,
    streams: IntMap<StreamId, Stream>,
    stream_sender: mpsc::Sender<StreamCommand>,
    stream_receiver: mpsc::Receiver<StreamCommand>,
    control_sender: mpsc::Sender<ControlCommand>,
    control_receiver: mpsc::Receiver<ControlCommand>,
    /// Outbound streams that were SYN'd and await the remote's ACK.
    pending_outbound: IntMap<StreamId, oneshot::Sender<Result<Stream>>>,
    /// Acceptors waiting for an inbound stream.
    pending_accepts: VecDeque<oneshot::Sender<Result<Stream>>>,
    /// Inbound streams nobody has accepted yet.
    waiting_inbound: VecDeque<Stream>,
    /// The nonce of the keepalive ping in flight, if any.
    pending_pong: Option<u32>,
    ping_timer: PausableTimer,
    inactivity_timer: PausableTimer,
    dropped_streams: Vec<StreamId>,
}

impl<T: SplittableReadWrite> fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("streams", &self.streams.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl<T: SplittableReadWrite> Connection<T> {
    /// Creates a new connection from the given socket.
    ///
    /// The connection makes no progress until [`Connection::next_stream`]
    /// is driven.
    pub fn new(socket: T, cfg: Config, mode: Mode) -> Self {
        let id = Id::random();
        log::debug!("new connection: {} ({:?})", id, mode);

        let (reader, writer) = socket.split();
        let reader = IO::new(id, reader, cfg.max_message_size);
        let frames = futures::stream::unfold(reader, |mut io| async move {
            match io.recv_frame().await {
                Ok(Some(frame)) => Some((Ok(frame), io)),
                Ok(None) => None,
                Err(e) => Some((Err(e), io)),
            }
        })
        .boxed()
        .fuse();
        let writer = IO::new(id, writer, cfg.max_message_size);

        let (stream_sender, stream_receiver) = mpsc::channel(MAX_COMMAND_BACKLOG);
        let (control_sender, control_receiver) = mpsc::channel(MAX_COMMAND_BACKLOG);

        let ping_timer = if cfg.keepalive {
            PausableTimer::new(cfg.ping_interval)
        } else {
            PausableTimer::paused()
        };
        let inactivity_timer = match cfg.inactivity_timeout {
            Some(d) => PausableTimer::new(d),
            None => PausableTimer::paused(),
        };

        Connection {
            id,
            mode,
            config: Arc::new(cfg),
            frames,
            writer,
            is_closed: false,
            shutting_down: false,
            next_id: match mode {
                Mode::Client => 1,
                Mode::Server => 2,
            },
            streams: IntMap::default(),
            stream_sender,
            stream_receiver,
            control_sender,
            control_receiver,
            pending_outbound: IntMap::default(),
            pending_accepts: VecDeque::new(),
            waiting_inbound: VecDeque::new(),
            pending_pong: None,
            ping_timer,
            inactivity_timer,
            dropped_streams: Vec::new(),
        }
    }

    /// The identifier of this connection.
    pub fn id(&self) -> Id {
        self.id
    }

    /// Whether we initiated the underlying connection.
    pub fn is_initiator(&self) -> bool {
        self.mode == Mode::Client
    }

    /// A handle for opening and accepting streams and closing the
    /// connection. May be cloned freely.
    pub fn control(&self) -> Control {
        Control::new(self.control_sender.clone())
    }

    /// Drives the connection one step.
    ///
    /// Must be called in a loop; returns `Err` exactly when the
    /// connection has terminated (by any path), after which calling it
    /// again keeps returning `Err(Closed)`.
    pub async fn next_stream(&mut self) -> Result<()> {
        if self.is_closed {
            return Err(ConnectionError::Closed);
        }

        self.garbage_collect().await?;
        if self.shutdown_complete() {
            return self.finish_shutdown().await;
        }

        let event = {
            let mut frame = self.frames.next();
            let mut scmd = self.stream_receiver.next();
            let mut ccmd = self.control_receiver.next();
            let ping = self.ping_timer.tick().fuse();
            let idle = self.inactivity_timer.tick().fuse();
            pin_mut!(ping, idle);
            // keepalive is polled before inactivity so a dead peer is
            // reported as such even when both timers expire together
            select_biased! {
                frame = frame => Event::Frame(frame),
                scmd = scmd => Event::StreamCommand(scmd),
                ccmd = ccmd => Event::ControlCommand(ccmd),
                _ = ping => Event::PingTimer,
                _ = idle => Event::InactivityTimer,
            }
        };

        match event {
            Event::Frame(Some(Ok(frame))) => {
                self.touch();
                self.on_frame(frame).await?;
            }
            Event::Frame(Some(Err(e))) => {
                log::warn!("{}: frame decode error: {}", self.id, e);
                // protocol violation tears the whole connection down
                let _ = self.writer.send_frame(&Frame::protocol_error()).await;
                self.drop_everything();
                return Err(e.into());
            }
            Event::Frame(None) => {
                log::debug!("{}: remote eof", self.id);
                self.drop_everything();
                return Err(ConnectionError::Closed);
            }
            Event::StreamCommand(Some(cmd)) => {
                self.touch();
                self.on_stream_command(cmd).await?;
            }
            Event::StreamCommand(None) => {
                // we hold a sender ourselves, so this cannot happen
                debug_assert!(false, "stream command channel closed");
            }
            Event::ControlCommand(Some(cmd)) => self.on_control_command(cmd).await?,
            Event::ControlCommand(None) => {
                debug_assert!(false, "control command channel closed");
            }
            Event::PingTimer => self.on_ping_timer().await?,
            Event::InactivityTimer => self.on_inactivity_timer().await?,
        }

        Ok(())
    }

    /// Re-arms the inactivity deadline; any traffic counts.
    fn touch(&mut self) {
        if let Some(d) = self.config.inactivity_timeout {
            self.inactivity_timer.reset(d);
        }
    }

    async fn send<A>(&mut self, frame: Frame<A>) -> Result<()> {
        if let Err(e) = self.writer.send_frame(&frame).await {
            log::debug!("{}: write failed: {}", self.id, e);
            self.drop_everything();
            return Err(e.into());
        }
        self.touch();
        Ok(())
    }

    async fn on_frame(&mut self, frame: Frame<()>) -> Result<()> {
        match frame.header().tag() {
            Tag::Data => self.on_data(frame.into_data()).await,
            Tag::WindowUpdate => self.on_window_update(frame.into_window_update()).await,
            Tag::Ping => self.on_ping(frame.into_ping()).await,
            Tag::GoAway => self.on_go_away(frame.into_go_away()),
        }
    }

    async fn on_data(&mut self, frame: Frame<Data>) -> Result<()> {
        let stream_id = frame.header().stream_id();
        let flags = frame.header().flags();

        if flags.contains(header::RST) {
            if let Some(stream) = self.streams.remove(&stream_id) {
                stream
                    .shared()
                    .abort_with(self.id, stream_id, io::ErrorKind::ConnectionReset);
            }
            if let Some(tx) = self.pending_outbound.remove(&stream_id) {
                let _ = tx.send(Err(ConnectionError::Closed));
            }
            return Ok(());
        }

        let is_finish = flags.contains(header::FIN);

        if flags.contains(header::SYN) {
            if !self.is_valid_remote_id(stream_id, Tag::Data) {
                log::error!("{}: invalid remote stream id {}", self.id, stream_id);
                return self.terminate_protocol_error().await;
            }
            if frame.body().len() > DEFAULT_CREDIT as usize {
                log::error!(
                    "{}/{}: first body of stream exceeds default credit",
                    self.id,
                    stream_id
                );
                return self.terminate_protocol_error().await;
            }
            if self.streams.contains_key(&stream_id) {
                log::error!("{}/{}: stream already exists", self.id, stream_id);
                return self.terminate_protocol_error().await;
            }
            if self.streams.len() >= self.config.max_num_streams {
                log::error!("{}: maximum number of streams reached", self.id);
                let _ = self.writer.send_frame(&Frame::internal_error()).await;
                self.drop_everything();
                return Err(ConnectionError::TooManyStreams);
            }
            if self.shutting_down {
                // no new streams while draining
                return self.send(Frame::reset_stream(stream_id).erased()).await;
            }

            let stream = Stream::new(
                stream_id,
                self.id,
                self.config.clone(),
                self.config.receive_window,
                DEFAULT_CREDIT,
                self.stream_sender.clone(),
            );
            {
                let mut shared = stream.shared();
                if is_finish {
                    shared.update_state(self.id, stream_id, State::RecvClosed);
                }
                shared.window = shared.window.saturating_sub(frame.body_len());
                shared.buffer.push(frame.into_body());
            }
            self.streams.insert(stream_id, stream.clone());
            log::debug!("{}: new inbound stream {}", self.id, stream_id);

            // acknowledge right away, announcing any extra receive window
            let extra = self.config.receive_window - DEFAULT_CREDIT;
            let mut ack = Frame::window_update(stream_id, extra);
            ack.header_mut().ack();
            self.send(ack.erased()).await?;

            self.deliver_inbound(stream);
            return Ok(());
        }

        if flags.contains(header::ACK) {
            if let Some(tx) = self.pending_outbound.remove(&stream_id) {
                if let Some(stream) = self.streams.get(&stream_id) {
                    let _ = tx.send(Ok(stream.clone()));
                }
            }
        }

        if let Some(stream) = self.streams.get(&stream_id).cloned() {
            let mut reset_overfull = false;
            let mut protocol_error = false;
            let mut window_update_delta = None;
            {
                let mut shared = stream.shared();
                if frame.body().len() > shared.window as usize {
                    log::error!(
                        "{}/{}: frame body larger than stream receive window",
                        self.id,
                        stream_id
                    );
                    protocol_error = true;
                } else if shared.buffer.len() >= self.config.max_buffer_size {
                    log::error!("{}/{}: stream buffer grows beyond limit", self.id, stream_id);
                    shared.abort_with(self.id, stream_id, io::ErrorKind::ConnectionReset);
                    reset_overfull = true;
                } else {
                    if is_finish {
                        shared.update_state(self.id, stream_id, State::RecvClosed);
                    }
                    shared.window -= frame.body_len();
                    shared.buffer.push(frame.into_body());
                    shared.wake_reader();
                    if self.config.window_update_mode == WindowUpdateMode::OnReceive {
                        let buffered = shared.buffer.len() as u32;
                        let delta = self
                            .config
                            .receive_window
                            .saturating_sub(buffered)
                            .saturating_sub(shared.window);
                        if delta > 0 {
                            shared.window += delta;
                            window_update_delta = Some(delta);
                        }
                    }
                }
            }
            if protocol_error {
                return self.terminate_protocol_error().await;
            }
            if let Some(delta) = window_update_delta {
                return self
                    .send(Frame::window_update(stream_id, delta).erased())
                    .await;
            }
            if reset_overfull {
                self.streams.remove(&stream_id);
                return self.send(Frame::reset_stream(stream_id).erased()).await;
            }
        } else {
            log::debug!(
                "{}/{}: data frame for unknown stream, resetting",
                self.id,
                stream_id
            );
            return self.send(Frame::reset_stream(stream_id).erased()).await;
        }

        Ok(())
    }

    async fn on_window_update(&mut self, frame: Frame<WindowUpdate>) -> Result<()> {
        let stream_id = frame.header().stream_id();
        let flags = frame.header().flags();

        if flags.contains(header::RST) {
            if let Some(stream) = self.streams.remove(&stream_id) {
                stream
                    .shared()
                    .abort_with(self.id, stream_id, io::ErrorKind::ConnectionReset);
            }
            if let Some(tx) = self.pending_outbound.remove(&stream_id) {
                let _ = tx.send(Err(ConnectionError::Closed));
            }
            return Ok(());
        }

        let is_finish = flags.contains(header::FIN);

        if flags.contains(header::SYN) {
            if !self.is_valid_remote_id(stream_id, Tag::WindowUpdate) {
                log::error!("{}: invalid remote stream id {}", self.id, stream_id);
                return self.terminate_protocol_error().await;
            }
            if self.streams.contains_key(&stream_id) {
                log::error!("{}/{}: stream already exists", self.id, stream_id);
                return self.terminate_protocol_error().await;
            }
            if self.streams.len() >= self.config.max_num_streams {
                log::error!("{}: maximum number of streams reached", self.id);
                let _ = self.writer.send_frame(&Frame::internal_error()).await;
                self.drop_everything();
                return Err(ConnectionError::TooManyStreams);
            }
            if self.shutting_down {
                return self.send(Frame::reset_stream(stream_id).erased()).await;
            }

            let credit = frame.header().credit().saturating_add(DEFAULT_CREDIT);
            let stream = Stream::new(
                stream_id,
                self.id,
                self.config.clone(),
                self.config.receive_window,
                credit,
                self.stream_sender.clone(),
            );
            if is_finish {
                stream
                    .shared()
                    .update_state(self.id, stream_id, State::RecvClosed);
            }
            self.streams.insert(stream_id, stream.clone());
            log::debug!("{}: new inbound stream {}", self.id, stream_id);

            let extra = self.config.receive_window - DEFAULT_CREDIT;
            let mut ack = Frame::window_update(stream_id, extra);
            ack.header_mut().ack();
            self.send(ack.erased()).await?;

            self.deliver_inbound(stream);
            return Ok(());
        }

        if flags.contains(header::ACK) {
            if let Some(tx) = self.pending_outbound.remove(&stream_id) {
                if let Some(stream) = self.streams.get(&stream_id) {
                    let _ = tx.send(Ok(stream.clone()));
                }
            }
        }

        if let Some(stream) = self.streams.get(&stream_id) {
            let mut shared = stream.shared();
            shared.credit = shared.credit.saturating_add(frame.header().credit());
            if is_finish {
                shared.update_state(self.id, stream_id, State::RecvClosed);
                shared.wake_reader();
            }
            shared.wake_writer();
        } else {
            log::trace!(
                "{}/{}: window update for unknown stream, ignoring",
                self.id,
                stream_id
            );
        }

        Ok(())
    }

    async fn on_ping(&mut self, frame: Frame<Ping>) -> Result<()> {
        let nonce = frame.header().nonce();

        if frame.header().flags().contains(header::ACK) {
            if self.pending_pong == Some(nonce) {
                log::trace!("{}: pong {}", self.id, nonce);
                self.pending_pong = None;
                if self.config.keepalive {
                    self.ping_timer.reset(self.config.ping_interval);
                }
            }
            return Ok(());
        }

        // echo the value back
        let mut pong = Frame::ping(nonce);
        pong.header_mut().ack();
        self.send(pong.erased()).await
    }

    fn on_go_away(&mut self, frame: Frame<header::GoAway>) -> Result<()> {
        match frame.header().error_code() {
            Some(GoAwayCode::Normal) => {
                log::debug!("{}: remote goes away, draining", self.id);
                self.shutting_down = true;
                self.fail_pending_opens();
                Ok(())
            }
            code => {
                let code = code.map(GoAwayCode::val).unwrap_or_else(|| frame.header().len());
                log::warn!("{}: remote goes away with code {}", self.id, code);
                self.drop_everything();
                Err(ConnectionError::RemoteGoAway(code))
            }
        }
    }

    async fn on_stream_command(&mut self, cmd: StreamCommand) -> Result<()> {
        match cmd {
            StreamCommand::SendFrame(frame) => self.send(frame).await,
            StreamCommand::CloseStream { id } => {
                self.send(Frame::close_stream(id, false).erased()).await?;
                // a stream closed in both directions leaves the map
                if let Some(stream) = self.streams.get(&id) {
                    if stream.state() == State::Closed {
                        self.streams.remove(&id);
                    }
                }
                Ok(())
            }
            StreamCommand::ResetStream { id } => {
                self.streams.remove(&id);
                self.send(Frame::reset_stream(id).erased()).await
            }
        }
    }

    async fn on_control_command(&mut self, cmd: ControlCommand) -> Result<()> {
        match cmd {
            ControlCommand::OpenStream(reply) => self.open_stream(reply).await,
            ControlCommand::AcceptStream(reply) => {
                if let Some(stream) = self.waiting_inbound.pop_front() {
                    let _ = reply.send(Ok(stream));
                } else if self.shutting_down {
                    let _ = reply.send(Err(ConnectionError::Closed));
                } else {
                    self.pending_accepts.push_back(reply);
                }
                Ok(())
            }
            ControlCommand::CloseConnection(reply) => {
                log::debug!("{}: closing connection", self.id);
                // flush whatever the streams already enqueued
                while let Ok(Some(cmd)) = self.stream_receiver.try_next() {
                    self.on_stream_command(cmd).await?;
                }
                let _ = self.writer.send_frame(&Frame::term()).await;
                let _ = self.writer.close().await;
                self.drop_everything();
                let _ = reply.send(());
                Err(ConnectionError::Closed)
            }
        }
    }

    async fn open_stream(&mut self, reply: oneshot::Sender<Result<Stream>>) -> Result<()> {
        if self.shutting_down {
            let _ = reply.send(Err(ConnectionError::Closed));
            return Ok(());
        }
        if self.streams.len() >= self.config.max_num_streams {
            let _ = reply.send(Err(ConnectionError::TooManyStreams));
            return Ok(());
        }

        let id = StreamId::new(self.next_id);
        self.next_id = match self.next_id.checked_add(2) {
            Some(n) => n,
            None => {
                // id space exhausted: hard error for the connection
                let _ = reply.send(Err(ConnectionError::NoMoreStreamIds));
                self.drop_everything();
                return Err(ConnectionError::NoMoreStreamIds);
            }
        };

        log::trace!("{}: creating new outbound stream {}", self.id, id);

        let stream = Stream::new(
            id,
            self.id,
            self.config.clone(),
            self.config.receive_window,
            DEFAULT_CREDIT,
            self.stream_sender.clone(),
        );
        self.streams.insert(id, stream);
        self.pending_outbound.insert(id, reply);

        // SYN goes out as a window update announcing any extra receive
        // window; the remote answers with an ACK which completes the open
        let extra = self.config.receive_window - DEFAULT_CREDIT;
        let mut syn = Frame::window_update(id, extra);
        syn.header_mut().syn();
        self.send(syn.erased()).await
    }

    async fn on_ping_timer(&mut self) -> Result<()> {
        if self.pending_pong.take().is_some() {
            log::warn!("{}: keepalive ping timed out", self.id);
            self.drop_everything();
            return Err(ConnectionError::KeepaliveTimeout);
        }
        let nonce = rand::random();
        log::trace!("{}: ping {}", self.id, nonce);
        self.pending_pong = Some(nonce);
        let mut ping = Frame::ping(nonce);
        ping.header_mut().syn();
        self.send(ping.erased()).await?;
        self.ping_timer.reset(self.config.ping_timeout);
        Ok(())
    }

    async fn on_inactivity_timer(&mut self) -> Result<()> {
        if self.streams.is_empty() && self.pending_outbound.is_empty() {
            log::debug!("{}: closing inactive connection", self.id);
            let _ = self.writer.send_frame(&Frame::term()).await;
            let _ = self.writer.close().await;
            self.drop_everything();
            return Err(ConnectionError::Closed);
        }
        self.touch();
        Ok(())
    }

    fn deliver_inbound(&mut self, stream: Stream) {
        let mut stream = stream;
        while let Some(tx) = self.pending_accepts.pop_front() {
            match tx.send(Ok(stream)) {
                Ok(()) => return,
                // acceptor lost interest; try the next one
                Err(Ok(s)) => stream = s,
                Err(Err(_)) => unreachable!("we sent Ok"),
            }
        }
        self.waiting_inbound.push_back(stream);
    }

    fn is_valid_remote_id(&self, id: StreamId, tag: Tag) -> bool {
        if tag == Tag::Ping || tag == Tag::GoAway {
            return id.is_session();
        }
        match self.mode {
            Mode::Client => id.is_server(),
            Mode::Server => id.is_client(),
        }
    }

    async fn terminate_protocol_error(&mut self) -> Result<()> {
        let _ = self.writer.send_frame(&Frame::protocol_error()).await;
        let _ = self.writer.close().await;
        self.drop_everything();
        Err(ConnectionError::Protocol("remote violated the framing rules"))
    }

    fn fail_pending_opens(&mut self) {
        for (_, tx) in self.pending_outbound.drain() {
            let _ = tx.send(Err(ConnectionError::Closed));
        }
    }

    /// Whether a graceful shutdown has finished draining.
    fn shutdown_complete(&self) -> bool {
        self.shutting_down
            && self.streams.is_empty()
            && self.pending_outbound.is_empty()
            && self.waiting_inbound.is_empty()
    }

    async fn finish_shutdown(&mut self) -> Result<()> {
        log::debug!("{}: drained, closing", self.id);
        let _ = self.writer.send_frame(&Frame::term()).await;
        let _ = self.writer.close().await;
        self.drop_everything();
        Err(ConnectionError::Closed)
    }

    /// Terminates everything this connection owns. Safe to call from any
    /// close path; the first call wins and later ones are no-ops.
    fn drop_everything(&mut self) {
        if self.is_closed {
            return;
        }
        self.is_closed = true;

        for (id, stream) in self.streams.drain() {
            stream.shared().on_connection_closed(self.id, id);
        }
        self.waiting_inbound.clear();
        for (_, tx) in self.pending_outbound.drain() {
            let _ = tx.send(Err(ConnectionError::Closed));
        }
        for tx in self.pending_accepts.drain(..) {
            let _ = tx.send(Err(ConnectionError::Closed));
        }
        self.pending_pong = None;
        self.ping_timer.pause();
        self.inactivity_timer.pause();
    }

    /// Removes streams all of whose user handles were dropped, informing
    /// the remote as appropriate for the state they were left in.
    async fn garbage_collect(&mut self) -> Result<()> {
        debug_assert!(self.dropped_streams.is_empty());
        let mut frames = Vec::new();

        for stream in self.streams.values() {
            if stream.strong_count() > 1 {
                continue;
            }
            let stream_id = stream.id();
            if self.pending_outbound.contains_key(&stream_id) {
                // not yet handed to the opener
                continue;
            }
            if self
                .waiting_inbound
                .iter()
                .any(|s| s.id() == stream_id)
            {
                // not yet handed to an acceptor
                continue;
            }
            log::trace!("{}: removing dropped stream {}", self.id, stream_id);

            let mut shared = stream.shared();
            let frame = match shared.update_state(self.id, stream_id, State::Closed) {
                // dropped without close: reset to inform the remote
                State::Open => Some(Frame::reset_stream(stream_id).erased()),
                // remote already half-closed; our FIN finishes the job
                State::RecvClosed => Some(Frame::close_stream(stream_id, false).erased()),
                // we half-closed; the remote may be blocked on credit it
                // will never get, so reset
                State::SendClosed => {
                    if shared.window == 0 {
                        Some(Frame::reset_stream(stream_id).erased())
                    } else {
                        None
                    }
                }
                State::Closed => None,
            };
            shared.wake_all();
            drop(shared);
            if let Some(f) = frame {
                frames.push(f);
            }
            self.dropped_streams.push(stream_id);
        }

        let dropped: Vec<StreamId> = self.dropped_streams.drain(..).collect();
        for id in dropped {
            self.streams.remove(&id);
        }
        for frame in frames {
            self.send(frame).await?;
        }
        Ok(())
    }
}

impl<T: SplittableReadWrite> Drop for Connection<T> {
    fn drop(&mut self) {
        log::debug!("{}: connection dropped", self.id);
        self.drop_everything();
    }
}
