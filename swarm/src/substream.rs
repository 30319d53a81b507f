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
use futures::SinkExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::{fmt, io};

use meshwork_core::muxing::{IReadWrite, StreamInfo};
use meshwork_core::upgrade::ProtocolName;
use meshwork_core::Multiaddr;
use meshwork_traits::{ReadEx, WriteEx};

use crate::connection::{ConnectionId, Direction};
use crate::control::SwarmControlCmd;

/// The id of a substream, assigned by the muxer underneath.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(pub(crate) usize);

/// Byte and packet counters of one substream.
#[derive(Debug, Default)]
pub struct SubstreamStats {
    /// The accumulative counter of packets sent.
    pkt_sent: AtomicUsize,
    /// The accumulative counter of packets received.
    pkt_recv: AtomicUsize,
    /// The accumulative counter of bytes sent.
    byte_sent: AtomicUsize,
    /// The accumulative counter of bytes received.
    byte_recv: AtomicUsize,
}

impl SubstreamStats {
    pub fn bytes_sent(&self) -> usize {
        self.byte_sent.load(Ordering::SeqCst)
    }

    pub fn bytes_received(&self) -> usize {
        self.byte_recv.load(Ordering::SeqCst)
    }
}

/// A snapshot of a substream's identity.
#[derive(Debug)]
pub struct SubstreamInfo {
    /// The protocol spoken on the substream.
    pub protocol: Vec<u8>,
    /// The direction of the substream.
    pub dir: Direction,
}

#[derive(Debug)]
struct SubstreamMeta {
    /// The negotiated protocol.
    protocol: Vec<u8>,
    /// The direction of the substream.
    dir: Direction,
    /// The connection the substream belongs to; used to track back to the
    /// stream muxer.
    cid: ConnectionId,
    /// The local multiaddr of the connection.
    la: Multiaddr,
    /// The remote multiaddr of the connection.
    ra: Multiaddr,
}

/// A negotiated application substream over a muxed connection.
pub struct Substream {
    /// The stream produced by the muxer.
    inner: IReadWrite,
    /// What was negotiated and where it runs.
    info: Arc<SubstreamMeta>,
    /// Notifies the swarm when the substream closes.
    ctrl: mpsc::Sender<SwarmControlCmd>,
    /// Byte/packet accounting, shared among clones.
    stats: Arc<SubstreamStats>,
}

impl Clone for Substream {
    fn clone(&self) -> Self {
        Substream {
            inner: self.inner.clone(),
            info: self.info.clone(),
            ctrl: self.ctrl.clone(),
            stats: self.stats.clone(),
        }
    }
}

impl fmt::Debug for Substream {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Substream")
            .field("sid", &self.id())
            .field("protocol", &self.info.protocol.protocol_name_str())
            .field("dir", &self.info.dir)
            .field("cid", &self.info.cid)
            .finish()
    }
}

impl Substream {
    pub(crate) fn new(
        inner: IReadWrite,
        dir: Direction,
        protocol: Vec<u8>,
        cid: ConnectionId,
        la: Multiaddr,
        ra: Multiaddr,
        ctrl: mpsc::Sender<SwarmControlCmd>,
    ) -> Self {
        Substream {
            inner,
            info: Arc::new(SubstreamMeta {
                protocol,
                dir,
                cid,
                la,
                ra,
            }),
            ctrl,
            stats: Arc::new(SubstreamStats::default()),
        }
    }

    /// The protocol negotiated on this substream.
    pub fn protocol(&self) -> &[u8] {
        &self.info.protocol
    }

    /// The direction of this substream.
    pub fn dir(&self) -> Direction {
        self.info.dir
    }

    /// The connection this substream runs on.
    pub fn cid(&self) -> ConnectionId {
        self.info.cid
    }

    /// The muxer-assigned stream id.
    pub fn id(&self) -> StreamId {
        StreamId(self.inner.id())
    }

    /// The remote multiaddr of the underlying connection.
    pub fn remote_multiaddr(&self) -> Multiaddr {
        self.info.ra.clone()
    }

    /// The local multiaddr of the underlying connection.
    pub fn local_multiaddr(&self) -> Multiaddr {
        self.info.la.clone()
    }

    /// The traffic counters of this substream.
    pub fn stats(&self) -> &SubstreamStats {
        &self.stats
    }

    pub fn info(&self) -> SubstreamInfo {
        SubstreamInfo {
            protocol: self.info.protocol.clone(),
            dir: self.info.dir,
        }
    }
}

#[async_trait]
impl ReadEx for Substream {
    async fn read2(&mut self, buf: &mut [u8]) -> Result<usize, io::Error> {
        self.inner.read2(buf).await.map(|n| {
            self.stats.byte_recv.fetch_add(n, Ordering::SeqCst);
            self.stats.pkt_recv.fetch_add(1, Ordering::SeqCst);
            n
        })
    }
}

#[async_trait]
impl WriteEx for Substream {
    async fn write2(&mut self, buf: &[u8]) -> Result<usize, io::Error> {
        self.inner.write2(buf).await.map(|n| {
            self.stats.byte_sent.fetch_add(n, Ordering::SeqCst);
            self.stats.pkt_sent.fetch_add(1, Ordering::SeqCst);
            n
        })
    }

    async fn flush2(&mut self) -> Result<(), io::Error> {
        self.inner.flush2().await
    }

    // tell the swarm to deregister, then close the muxer stream
    async fn close2(&mut self) -> Result<(), io::Error> {
        let cid = self.cid();
        let sid = self.id();
        let _ = self.ctrl.send(SwarmControlCmd::CloseStream(cid, sid)).await;
        self.inner.close2().await
    }
}
