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

//! Sum types carrying the output of one of two upgraders.
//!
//! [`select::Selector`](crate::upgrade::Selector) combines two candidate
//! upgraders; these enums let the winner's output flow through the rest of
//! the pipeline regardless of which branch was taken.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::io;

use meshwork_traits::{ReadEx, SplitEx, WriteEx};

use crate::identity::Keypair;
use crate::muxing::{IReadWrite, IStreamMuxer, StreamMuxer, StreamMuxerEx};
use crate::secure_io::SecureInfo;
use crate::transport::{ConnectionInfo, TransportError};
use crate::upgrade::ProtocolName;
use crate::{Multiaddr, PeerId, PublicKey};

/// The output of either of two upgraders.
#[derive(Debug, Clone, Copy)]
pub enum EitherOutput<A, B> {
    A(A),
    B(B),
}

/// The protocol name of either of two upgraders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EitherName<A, B> {
    A(A),
    B(B),
}

impl<A: ProtocolName, B: ProtocolName> ProtocolName for EitherName<A, B> {
    fn protocol_name(&self) -> &[u8] {
        match self {
            EitherName::A(a) => a.protocol_name(),
            EitherName::B(b) => b.protocol_name(),
        }
    }
}

#[async_trait]
impl<A, B> ReadEx for EitherOutput<A, B>
where
    A: ReadEx + Send,
    B: ReadEx + Send,
{
    async fn read2(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            EitherOutput::A(a) => a.read2(buf).await,
            EitherOutput::B(b) => b.read2(buf).await,
        }
    }
}

#[async_trait]
impl<A, B> WriteEx for EitherOutput<A, B>
where
    A: WriteEx + Send,
    B: WriteEx + Send,
{
    async fn write2(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            EitherOutput::A(a) => a.write2(buf).await,
            EitherOutput::B(b) => b.write2(buf).await,
        }
    }

    async fn flush2(&mut self) -> io::Result<()> {
        match self {
            EitherOutput::A(a) => a.flush2().await,
            EitherOutput::B(b) => b.flush2().await,
        }
    }

    async fn close2(&mut self) -> io::Result<()> {
        match self {
            EitherOutput::A(a) => a.close2().await,
            EitherOutput::B(b) => b.close2().await,
        }
    }
}

impl<A, B> SplitEx for EitherOutput<A, B>
where
    A: SplitEx,
    B: SplitEx,
{
    type Reader = EitherOutput<A::Reader, B::Reader>;
    type Writer = EitherOutput<A::Writer, B::Writer>;

    fn split(self) -> (Self::Reader, Self::Writer) {
        match self {
            EitherOutput::A(a) => {
                let (r, w) = a.split();
                (EitherOutput::A(r), EitherOutput::A(w))
            }
            EitherOutput::B(b) => {
                let (r, w) = b.split();
                (EitherOutput::B(r), EitherOutput::B(w))
            }
        }
    }
}

impl<A: SecureInfo, B: SecureInfo> SecureInfo for EitherOutput<A, B> {
    fn local_peer(&self) -> PeerId {
        match self {
            EitherOutput::A(a) => a.local_peer(),
            EitherOutput::B(b) => b.local_peer(),
        }
    }

    fn remote_peer(&self) -> PeerId {
        match self {
            EitherOutput::A(a) => a.remote_peer(),
            EitherOutput::B(b) => b.remote_peer(),
        }
    }

    fn local_priv_key(&self) -> Keypair {
        match self {
            EitherOutput::A(a) => a.local_priv_key(),
            EitherOutput::B(b) => b.local_priv_key(),
        }
    }

    fn remote_pub_key(&self) -> PublicKey {
        match self {
            EitherOutput::A(a) => a.remote_pub_key(),
            EitherOutput::B(b) => b.remote_pub_key(),
        }
    }
}

impl<A: ConnectionInfo, B: ConnectionInfo> ConnectionInfo for EitherOutput<A, B> {
    fn local_multiaddr(&self) -> Multiaddr {
        match self {
            EitherOutput::A(a) => a.local_multiaddr(),
            EitherOutput::B(b) => b.local_multiaddr(),
        }
    }

    fn remote_multiaddr(&self) -> Multiaddr {
        match self {
            EitherOutput::A(a) => a.remote_multiaddr(),
            EitherOutput::B(b) => b.remote_multiaddr(),
        }
    }
}

#[async_trait]
impl<A, B> StreamMuxer for EitherOutput<A, B>
where
    A: StreamMuxer + Send,
    B: StreamMuxer + Send,
{
    async fn open_stream(&mut self) -> Result<IReadWrite, TransportError> {
        match self {
            EitherOutput::A(a) => a.open_stream().await,
            EitherOutput::B(b) => b.open_stream().await,
        }
    }

    async fn accept_stream(&mut self) -> Result<IReadWrite, TransportError> {
        match self {
            EitherOutput::A(a) => a.accept_stream().await,
            EitherOutput::B(b) => b.accept_stream().await,
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self {
            EitherOutput::A(a) => a.close().await,
            EitherOutput::B(b) => b.close().await,
        }
    }

    fn is_initiator(&self) -> bool {
        match self {
            EitherOutput::A(a) => a.is_initiator(),
            EitherOutput::B(b) => b.is_initiator(),
        }
    }

    fn is_closed(&self) -> bool {
        match self {
            EitherOutput::A(a) => a.is_closed(),
            EitherOutput::B(b) => b.is_closed(),
        }
    }

    fn task(&mut self) -> Option<BoxFuture<'static, ()>> {
        match self {
            EitherOutput::A(a) => a.task(),
            EitherOutput::B(b) => b.task(),
        }
    }

    fn box_clone(&self) -> IStreamMuxer {
        match self {
            EitherOutput::A(a) => a.box_clone(),
            EitherOutput::B(b) => b.box_clone(),
        }
    }
}

impl<A, B> StreamMuxerEx for EitherOutput<A, B>
where
    A: StreamMuxer + SecureInfo + ConnectionInfo + Send,
    B: StreamMuxer + SecureInfo + ConnectionInfo + Send,
{
}
