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

use std::{fmt, io};

use crate::frame::io::FrameDecodeError;

/// Errors of a muxed connection as a whole.
#[derive(Debug)]
pub enum ConnectionError {
    /// The underlying socket failed.
    Io(io::Error),
    /// The remote sent a frame we could not make sense of; the connection
    /// is torn down with a GO_AWAY(ProtocolError).
    Decode(FrameDecodeError),
    /// The remote broke a protocol invariant (bad stream id, window
    /// overflow); the connection is torn down with a
    /// GO_AWAY(ProtocolError).
    Protocol(&'static str),
    /// All stream ids on this side have been used up.
    NoMoreStreamIds,
    /// The connection is closed; pending operations fail with this.
    Closed,
    /// The remote terminated the connection with an error code.
    RemoteGoAway(u32),
    /// The limit on the number of concurrent streams was reached.
    TooManyStreams,
    /// The remote did not answer a keepalive ping in time.
    KeepaliveTimeout,
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConnectionError::Io(e) => write!(f, "i/o error: {}", e),
            ConnectionError::Decode(e) => write!(f, "frame decode error: {}", e),
            ConnectionError::Protocol(what) => write!(f, "protocol violation: {}", what),
            ConnectionError::NoMoreStreamIds => f.write_str("stream ids exhausted"),
            ConnectionError::Closed => f.write_str("connection is closed"),
            ConnectionError::RemoteGoAway(code) => {
                write!(f, "remote terminated connection (code {})", code)
            }
            ConnectionError::TooManyStreams => f.write_str("maximum number of streams reached"),
            ConnectionError::KeepaliveTimeout => f.write_str("keepalive ping timed out"),
        }
    }
}

impl std::error::Error for ConnectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConnectionError::Io(e) => Some(e),
            ConnectionError::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ConnectionError {
    fn from(e: io::Error) -> Self {
        ConnectionError::Io(e)
    }
}

impl From<FrameDecodeError> for ConnectionError {
    fn from(e: FrameDecodeError) -> Self {
        match e {
            FrameDecodeError::Io(e) => ConnectionError::Io(e),
            other => ConnectionError::Decode(other),
        }
    }
}

impl From<futures::channel::oneshot::Canceled> for ConnectionError {
    fn from(_: futures::channel::oneshot::Canceled) -> Self {
        ConnectionError::Closed
    }
}
