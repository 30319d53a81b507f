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

//! The seam between the connection upgrader and a concrete stream
//! multiplexer.
//!
//! A muxer adaptor produces a [`StreamMuxer`]: a handle over a secured
//! connection that can open and accept logical streams. The muxer's
//! background driver is obtained once via [`StreamMuxer::task`] and must be
//! spawned by the owner; everything else is clonable control surface.

use async_trait::async_trait;
use futures::future::BoxFuture;
use meshwork_traits::{ReadEx, WriteEx};

use crate::secure_io::SecureInfo;
use crate::transport::{ConnectionInfo, TransportError};

/// Information about one logical stream of a muxed connection.
pub trait StreamInfo: Send {
    /// The stream id, unique within its connection.
    fn id(&self) -> usize;
}

/// A logical byte stream produced by a muxer.
pub trait ReadWriteEx: ReadEx + WriteEx + StreamInfo + Send + std::fmt::Debug {
    fn box_clone(&self) -> IReadWrite;
}

pub type IReadWrite = Box<dyn ReadWriteEx>;

impl Clone for IReadWrite {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

// Boxed streams stay usable wherever the I/O traits are required, e.g. by
// the negotiator running on a fresh substream.
#[async_trait]
impl ReadEx for IReadWrite {
    async fn read2(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        (**self).read2(buf).await
    }
}

#[async_trait]
impl WriteEx for IReadWrite {
    async fn write2(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        (**self).write2(buf).await
    }

    async fn flush2(&mut self) -> std::io::Result<()> {
        (**self).flush2().await
    }

    async fn close2(&mut self) -> std::io::Result<()> {
        (**self).close2().await
    }
}

/// A stream muxer over a secured connection.
#[async_trait]
pub trait StreamMuxer {
    /// Opens a new outbound stream towards the remote.
    async fn open_stream(&mut self) -> Result<IReadWrite, TransportError>;

    /// Accepts the next inbound stream opened by the remote.
    async fn accept_stream(&mut self) -> Result<IReadWrite, TransportError>;

    /// Closes the muxed connection gracefully.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Whether the local node initiated the underlying connection.
    fn is_initiator(&self) -> bool;

    /// Whether the muxed connection has terminated.
    fn is_closed(&self) -> bool;

    /// Takes the background driver of this muxer.
    ///
    /// Returns `Some` exactly once; the future must be spawned and drives
    /// all frame I/O until the connection dies.
    fn task(&mut self) -> Option<BoxFuture<'static, ()>>;

    fn box_clone(&self) -> IStreamMuxer;
}

/// The full muxed-connection surface: muxing plus the identity and address
/// information of the layers below.
pub trait StreamMuxerEx: StreamMuxer + SecureInfo + ConnectionInfo + Send {}

pub type IStreamMuxer = Box<dyn StreamMuxerEx>;

impl Clone for IStreamMuxer {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}
