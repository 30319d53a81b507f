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

use futures::channel::{mpsc, oneshot};
use futures::SinkExt;

use crate::connection::{ControlCommand, Result, Stream};
use crate::error::ConnectionError;

/// A handle to a [`Connection`](crate::connection::Connection).
///
/// Cheap to clone; all clones talk to the same connection. Every method
/// fails with [`ConnectionError::Closed`] once the connection has
/// terminated.
#[derive(Clone)]
pub struct Control {
    sender: mpsc::Sender<ControlCommand>,
}

impl Control {
    pub(crate) fn new(sender: mpsc::Sender<ControlCommand>) -> Self {
        Control { sender }
    }

    /// Opens a new outbound stream towards the remote.
    ///
    /// Completes once the remote has acknowledged the stream.
    pub async fn open_stream(&mut self) -> Result<Stream> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ControlCommand::OpenStream(tx))
            .await
            .map_err(|_| ConnectionError::Closed)?;
        rx.await?
    }

    /// Waits for the next inbound stream opened by the remote.
    pub async fn accept_stream(&mut self) -> Result<Stream> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ControlCommand::AcceptStream(tx))
            .await
            .map_err(|_| ConnectionError::Closed)?;
        rx.await?
    }

    /// Closes the connection gracefully.
    ///
    /// Idempotent: closing an already closed connection succeeds
    /// immediately.
    pub async fn close(&mut self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(ControlCommand::CloseConnection(tx))
            .await
            .is_err()
        {
            // the connection is already gone
            return Ok(());
        }
        // a dropped sender equally means the connection is down
        let _ = rx.await;
        Ok(())
    }
}
