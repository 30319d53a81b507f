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

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{future, SinkExt};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Poll, Waker};
use std::{fmt, io};

use meshwork_traits::{ReadEx, WriteEx};

use crate::chunks::Chunks;
use crate::connection::{self, StreamCommand};
use crate::frame::header::StreamId;
use crate::frame::Frame;
use crate::{Config, WindowUpdateMode};

/// The state of a yamux stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    /// Open bidirectionally.
    Open,
    /// We sent our FIN; reading is still possible.
    SendClosed,
    /// We received the remote's FIN; writing is still possible.
    RecvClosed,
    /// Closed in both directions (terminal state).
    Closed,
}

impl State {
    /// Can we still receive data on this stream?
    pub fn can_read(self) -> bool {
        !matches!(self, State::RecvClosed | State::Closed)
    }

    /// Can we still send data on this stream?
    pub fn can_write(self) -> bool {
        !matches!(self, State::SendClosed | State::Closed)
    }
}

/// A multiplexed yamux stream.
///
/// Streams are created outbound via
/// [`Control::open_stream`](crate::connection::Control::open_stream) or
/// inbound via
/// [`Control::accept_stream`](crate::connection::Control::accept_stream).
/// All I/O goes through [`ReadEx`]/[`WriteEx`]; at most one read and one
/// write may be pending at any time, a second concurrent call on a clone
/// of the same stream is a programming error and fails immediately.
pub struct Stream {
    id: StreamId,
    conn: connection::Id,
    config: Arc<Config>,
    sender: mpsc::Sender<StreamCommand>,
    shared: Arc<Mutex<Shared>>,
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id.val())
            .field("connection", &self.conn)
            .finish()
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "(Stream {}/{})", self.conn, self.id.val())
    }
}

impl Clone for Stream {
    fn clone(&self) -> Self {
        Stream {
            id: self.id,
            conn: self.conn,
            config: self.config.clone(),
            sender: self.sender.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl Stream {
    pub(crate) fn new(
        id: StreamId,
        conn: connection::Id,
        config: Arc<Config>,
        window: u32,
        credit: u32,
        sender: mpsc::Sender<StreamCommand>,
    ) -> Self {
        Stream {
            id,
            conn,
            config,
            sender,
            shared: Arc::new(Mutex::new(Shared::new(window, credit))),
        }
    }

    /// This stream's identifier.
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// This stream's current state.
    pub fn state(&self) -> State {
        self.shared().state()
    }

    /// Whether the stream has fully closed.
    pub fn is_closed(&self) -> bool {
        self.state() == State::Closed
    }

    pub(crate) fn strong_count(&self) -> usize {
        Arc::strong_count(&self.shared)
    }

    pub(crate) fn shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().expect("stream shared state poisoned")
    }

    fn closed_err(&self) -> io::Error {
        let msg = format!("{}/{}: connection is closed", self.conn, self.id);
        io::Error::new(io::ErrorKind::BrokenPipe, msg)
    }

    async fn read_stream(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        {
            let mut shared = self.shared();
            if shared.reading {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    "stream already has a pending read",
                ));
            }
            shared.reading = true;
        }
        let _guard = PendingOpGuard::reading(self.shared.clone());

        log::debug!("{}/{}: reading", self.conn, self.id);

        let n = future::poll_fn(|cx| {
            let mut shared = self.shared.lock().expect("stream shared state poisoned");
            // drain what arrived before any abort is surfaced
            let n = shared.buffer.drain_into(buf);
            if n > 0 {
                return Poll::Ready(Ok(n));
            }
            if let Some(kind) = shared.abort {
                return Poll::Ready(Err(io::Error::from(kind)));
            }
            if !shared.state().can_read() {
                log::debug!("{}/{}: eof", self.conn, self.id);
                return Poll::Ready(Ok(0));
            }
            shared.reader = Some(cx.waker().clone());
            Poll::Pending
        })
        .await?;

        log::trace!("{}/{}: read {} bytes", self.conn, self.id, n);

        // credit the peer back for what was just consumed
        if n > 0 && self.config.window_update_mode == WindowUpdateMode::OnRead {
            let delta = {
                let mut shared = self.shared();
                let buffered = shared.buffer.len() as u32;
                let delta = self
                    .config
                    .receive_window
                    .saturating_sub(buffered)
                    .saturating_sub(shared.window);
                shared.window += delta;
                delta
            };
            if delta > 0 {
                let frame = Frame::window_update(self.id, delta);
                // the data was already delivered; a dead connection only
                // means there is nobody left to credit
                let _ = self
                    .sender
                    .send(StreamCommand::SendFrame(frame.erased()))
                    .await;
            }
        }

        Ok(n)
    }

    async fn write_stream(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        {
            let mut shared = self.shared();
            if shared.writing {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    "stream already has a pending write",
                ));
            }
            shared.writing = true;
        }
        let _guard = PendingOpGuard::writing(self.shared.clone());

        let max_frame = self.config.max_message_size;
        let body = future::poll_fn(|cx| {
            let mut shared = self.shared.lock().expect("stream shared state poisoned");
            if let Some(kind) = shared.abort {
                return Poll::Ready(Err(io::Error::from(kind)));
            }
            if !shared.state().can_write() {
                log::debug!("{}/{}: can no longer write", self.conn, self.id);
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "stream closed for writing",
                )));
            }
            if shared.credit == 0 {
                log::debug!("{}/{}: no more credit left", self.conn, self.id);
                shared.writer = Some(cx.waker().clone());
                return Poll::Pending;
            }
            let k = (shared.credit as usize).min(buf.len()).min(max_frame);
            shared.credit -= k as u32;
            Poll::Ready(Ok(Vec::from(&buf[..k])))
        })
        .await?;

        let n = body.len();
        let frame = Frame::data(self.id, body).expect("body fits the length field");
        log::trace!("{}/{}: write {} bytes", self.conn, self.id, n);
        self.sender
            .send(StreamCommand::SendFrame(frame.erased()))
            .await
            .map_err(|_| self.closed_err())?;
        Ok(n)
    }

    async fn close_stream(&mut self) -> io::Result<()> {
        if self.state() == State::Closed {
            return Ok(());
        }
        log::trace!("{}/{}: close", self.conn, self.id);

        self.sender
            .send(StreamCommand::CloseStream { id: self.id })
            .await
            .map_err(|_| self.closed_err())?;

        let mut shared = self.shared();
        shared.update_state(self.conn, self.id, State::SendClosed);
        Ok(())
    }

    /// Aborts the stream: an RST goes out, buffered data is dropped and
    /// both directions fail immediately on both ends.
    pub async fn reset(&mut self) -> io::Result<()> {
        if self.state() == State::Closed {
            return Ok(());
        }
        log::trace!("{}/{}: reset", self.conn, self.id);

        // fail fast locally even if the connection is already gone
        let send_res = self
            .sender
            .send(StreamCommand::ResetStream { id: self.id })
            .await;

        let mut shared = self.shared();
        shared.abort_with(self.conn, self.id, io::ErrorKind::ConnectionReset);
        drop(shared);

        send_res.map_err(|_| self.closed_err())
    }

    /// Grows this stream's receive window to `new_size` bytes, announcing
    /// the difference to the remote.
    ///
    /// Fails if `new_size` exceeds the configured maximum window size.
    /// Shrinking is not possible; a `new_size` at or below the current
    /// window is a no-op.
    pub async fn adjust_window(&mut self, new_size: u32) -> io::Result<()> {
        if new_size > self.config.max_window_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "window size above configured maximum",
            ));
        }
        let delta = {
            let mut shared = self.shared();
            if !shared.state().can_read() {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "stream closed for receiving",
                ));
            }
            let delta = new_size.saturating_sub(shared.window);
            shared.window += delta;
            delta
        };
        if delta == 0 {
            return Ok(());
        }
        let frame = Frame::window_update(self.id, delta);
        self.sender
            .send(StreamCommand::SendFrame(frame.erased()))
            .await
            .map_err(|_| self.closed_err())
    }
}

#[async_trait]
impl ReadEx for Stream {
    async fn read2(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_stream(buf).await
    }
}

#[async_trait]
impl WriteEx for Stream {
    async fn write2(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_stream(buf).await
    }

    async fn flush2(&mut self) -> io::Result<()> {
        Ok(())
    }

    async fn close2(&mut self) -> io::Result<()> {
        self.close_stream().await
    }
}

/// Clears the pending-read/-write marker even if the operation's future is
/// dropped before completion.
struct PendingOpGuard {
    shared: Arc<Mutex<Shared>>,
    write: bool,
}

impl PendingOpGuard {
    fn reading(shared: Arc<Mutex<Shared>>) -> Self {
        PendingOpGuard {
            shared,
            write: false,
        }
    }

    fn writing(shared: Arc<Mutex<Shared>>) -> Self {
        PendingOpGuard {
            shared,
            write: true,
        }
    }
}

impl Drop for PendingOpGuard {
    fn drop(&mut self) {
        if let Ok(mut shared) = self.shared.lock() {
            if self.write {
                shared.writing = false;
            } else {
                shared.reading = false;
            }
        }
    }
}

/// State shared between a stream's clones and its connection.
#[derive(Debug)]
pub(crate) struct Shared {
    state: State,
    /// Set when the stream dies abnormally: `ConnectionReset` after an RST
    /// (either side), `BrokenPipe` when the whole connection goes away.
    /// Pending and future operations fail with this instead of plain EOF.
    pub(crate) abort: Option<io::ErrorKind>,
    /// Bytes the remote may still send before we owe it a window update.
    pub(crate) window: u32,
    /// Bytes we may still send before the remote owes us one.
    pub(crate) credit: u32,
    /// Received data not yet claimed by the stream's reader.
    pub(crate) buffer: Chunks,
    pub(crate) reader: Option<Waker>,
    pub(crate) writer: Option<Waker>,
    reading: bool,
    writing: bool,
}

impl Shared {
    fn new(window: u32, credit: u32) -> Self {
        Shared {
            state: State::Open,
            abort: None,
            window,
            credit,
            buffer: Chunks::new(),
            reader: None,
            writer: None,
            reading: false,
            writing: false,
        }
    }

    pub(crate) fn state(&self) -> State {
        self.state
    }

    /// Applies a state transition and returns the state before it.
    ///
    /// `Closed` is terminal; half-closing the second direction closes the
    /// stream.
    pub(crate) fn update_state(
        &mut self,
        cid: connection::Id,
        sid: StreamId,
        next: State,
    ) -> State {
        use self::State::*;

        let current = self.state;

        match (current, next) {
            (Closed, _) => {}
            (Open, _) => self.state = next,
            (RecvClosed, Closed) => self.state = Closed,
            (RecvClosed, Open) => {}
            (RecvClosed, RecvClosed) => {}
            (RecvClosed, SendClosed) => self.state = Closed,
            (SendClosed, Closed) => self.state = Closed,
            (SendClosed, Open) => {}
            (SendClosed, RecvClosed) => self.state = Closed,
            (SendClosed, SendClosed) => {}
        }

        log::trace!(
            "{}/{}: update state: ({:?} {:?} {:?})",
            cid,
            sid,
            current,
            next,
            self.state
        );

        current
    }

    pub(crate) fn wake_reader(&mut self) {
        if let Some(w) = self.reader.take() {
            w.wake()
        }
    }

    pub(crate) fn wake_writer(&mut self) {
        if let Some(w) = self.writer.take() {
            w.wake()
        }
    }

    pub(crate) fn wake_all(&mut self) {
        self.wake_reader();
        self.wake_writer();
    }

    /// Terminates the stream after an RST: buffered data is dropped and
    /// all waiters fail with `ConnectionReset`. Idempotent; the first
    /// abort wins.
    pub(crate) fn abort_with(
        &mut self,
        cid: connection::Id,
        sid: StreamId,
        kind: io::ErrorKind,
    ) {
        self.update_state(cid, sid, State::Closed);
        if self.abort.is_none() {
            self.abort = Some(kind);
        }
        self.buffer.clear();
        self.wake_all();
    }

    /// Terminates the stream because the connection is gone. Data already
    /// buffered may still be drained; everything else fails with
    /// `BrokenPipe`.
    pub(crate) fn on_connection_closed(&mut self, cid: connection::Id, sid: StreamId) {
        self.update_state(cid, sid, State::Closed);
        if self.abort.is_none() {
            self.abort = Some(io::ErrorKind::BrokenPipe);
        }
        self.wake_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_close_transitions() {
        let cid = connection::Id::random();
        let sid = StreamId::new(1);
        let mut shared = Shared::new(256, 256);

        assert_eq!(shared.update_state(cid, sid, State::SendClosed), State::Open);
        assert_eq!(shared.state(), State::SendClosed);
        // peer FIN after ours: closed
        shared.update_state(cid, sid, State::RecvClosed);
        assert_eq!(shared.state(), State::Closed);
    }

    #[test]
    fn half_close_is_order_independent() {
        let cid = connection::Id::random();
        let sid = StreamId::new(1);

        let mut a = Shared::new(0, 0);
        a.update_state(cid, sid, State::SendClosed);
        a.update_state(cid, sid, State::RecvClosed);

        let mut b = Shared::new(0, 0);
        b.update_state(cid, sid, State::RecvClosed);
        b.update_state(cid, sid, State::SendClosed);

        assert_eq!(a.state(), State::Closed);
        assert_eq!(b.state(), State::Closed);
    }

    #[test]
    fn closed_is_terminal() {
        let cid = connection::Id::random();
        let sid = StreamId::new(2);
        let mut shared = Shared::new(0, 0);
        shared.update_state(cid, sid, State::Closed);
        shared.update_state(cid, sid, State::Open);
        assert_eq!(shared.state(), State::Closed);
    }
}
