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

//! Communication channel to a remote peer.
//!
//! A swarm [`Connection`] wraps a muxed connection. New substreams are
//! opened through the stream muxer and upgraded to swarm
//! [`Substream`]s via the multistream-select procedure.

use smallvec::SmallVec;
use std::fmt;

use async_std::task;
use async_std::task::JoinHandle;
use futures::channel::mpsc;
use futures::SinkExt;

use meshwork_core::identity::Keypair;
use meshwork_core::multistream::Negotiator;
use meshwork_core::muxing::{IStreamMuxer, StreamMuxer};
use meshwork_core::secure_io::SecureInfo;
use meshwork_core::transport::ConnectionInfo;
use meshwork_core::upgrade::ProtocolName;
use meshwork_core::{Multiaddr, PeerId, ProtocolId, PublicKey};

use crate::control::SwarmControlCmd;
use crate::substream::{StreamId, Substream};
use crate::{SwarmError, SwarmEvent};

/// The direction of a peer-to-peer communication channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The socket comes from a dialer.
    Outbound,
    /// The socket comes from a listener.
    Inbound,
}

/// The swarm-assigned identifier of a connection.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub(crate) usize);

/// A muxed connection to a peer with its associated [`Substream`]s.
#[allow(dead_code)]
pub struct Connection {
    /// The unique id of this connection.
    id: ConnectionId,
    /// Handle to the stream muxer.
    stream_muxer: IStreamMuxer,
    /// The live substreams of this connection.
    substreams: SmallVec<[Substream; 8]>,
    /// Direction of this connection.
    dir: Direction,
    /// The muxer driver task; its exit means the connection died.
    handle: Option<JoinHandle<()>>,
    /// The inbound-substream accept loop task.
    accept_handle: Option<JoinHandle<()>>,
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("muxer", &self.stream_muxer.remote_peer().to_base58())
            .field("dir", &self.dir)
            .field("subs", &self.substreams.len())
            .finish()
    }
}

impl Connection {
    /// Builds a new `Connection` from the given stream muxer handle.
    pub(crate) fn new(id: ConnectionId, stream_muxer: IStreamMuxer, dir: Direction) -> Self {
        Connection {
            id,
            stream_muxer,
            substreams: Default::default(),
            dir,
            handle: None,
            accept_handle: None,
        }
    }

    /// Returns the unique id of the connection.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the direction of the connection.
    pub fn dir(&self) -> Direction {
        self.dir
    }

    /// Returns a handle to the stream muxer.
    pub(crate) fn stream_muxer(&self) -> &IStreamMuxer {
        &self.stream_muxer
    }

    /// Whether the muxed connection has terminated.
    pub fn is_closed(&self) -> bool {
        self.stream_muxer.is_closed()
    }

    /// Sets the task handle of the muxer driver.
    pub(crate) fn set_handle(&mut self, handle: JoinHandle<()>) {
        self.handle = Some(handle);
    }

    /// Sets the task handle of the accept loop.
    pub(crate) fn set_accept_handle(&mut self, handle: JoinHandle<()>) {
        self.accept_handle = Some(handle);
    }

    /// Closes the inner stream muxer. Spawns a task to avoid blocking;
    /// cleanup happens when the swarm observes the close event.
    pub(crate) fn close(&self) {
        log::trace!("closing {:?}", self);
        let mut stream_muxer = self.stream_muxer.clone();
        task::spawn(async move {
            let _ = stream_muxer.close().await;
        });
    }

    /// local_addr is the multiaddr on our side of the connection.
    pub fn local_addr(&self) -> Multiaddr {
        self.stream_muxer.local_multiaddr()
    }

    /// remote_addr is the multiaddr on the remote side of the connection.
    pub fn remote_addr(&self) -> Multiaddr {
        self.stream_muxer.remote_multiaddr()
    }

    /// local_peer is the peer on our side of the connection.
    pub fn local_peer(&self) -> PeerId {
        self.stream_muxer.local_peer()
    }

    /// remote_peer is the peer on the remote side.
    pub fn remote_peer(&self) -> PeerId {
        self.stream_muxer.remote_peer()
    }

    /// local_priv_key is the keypair of the peer on this side.
    pub fn local_priv_key(&self) -> Keypair {
        self.stream_muxer.local_priv_key()
    }

    /// remote_pub_key is the public key of the peer on the remote side.
    pub fn remote_pub_key(&self) -> PublicKey {
        self.stream_muxer.remote_pub_key()
    }

    /// Adds a substream to the list.
    pub(crate) fn add_stream(&mut self, substream: Substream) {
        log::trace!("adding sub {:?} to {:?}", substream, self);
        self.substreams.push(substream);
    }

    /// Removes a substream from the list.
    pub(crate) fn del_stream(&mut self, sid: StreamId) {
        log::trace!("removing sub {:?} from {:?}", sid, self);
        self.substreams.retain(|s| s.id() != sid);
    }

    /// Returns how many substreams are in the list.
    pub fn num_streams(&self) -> usize {
        self.substreams.len()
    }

    pub fn info(&self) -> ConnectionView {
        let num_inbound_streams = self
            .substreams
            .iter()
            .filter(|s| s.dir() == Direction::Inbound)
            .count();
        let num_outbound_streams = self.substreams.len() - num_inbound_streams;
        ConnectionView {
            id: self.id,
            dir: self.dir,
            la: self.local_addr(),
            ra: self.remote_addr(),
            local_peer_id: self.local_peer(),
            remote_peer_id: self.remote_peer(),
            num_inbound_streams,
            num_outbound_streams,
        }
    }
}

/// Opens a muxer stream and negotiates one of `pids` on it.
pub(crate) async fn open_stream_internal(
    cid: ConnectionId,
    mut stream_muxer: IStreamMuxer,
    pids: Vec<ProtocolId>,
    ctrl: mpsc::Sender<SwarmControlCmd>,
) -> Result<Substream, SwarmError> {
    let raw_stream = stream_muxer.open_stream().await?;
    let la = stream_muxer.local_multiaddr();
    let ra = stream_muxer.remote_multiaddr();

    // protocol multiplexing for the new substream
    let negotiator = Negotiator::new_with_protocols(pids);
    match negotiator.select_one(raw_stream).await {
        Ok((proto, raw_stream)) => {
            log::debug!("selected outbound {:?} {:?}", cid, proto.protocol_name_str());
            let stream = Substream::new(
                raw_stream,
                Direction::Outbound,
                proto.to_vec(),
                cid,
                la,
                ra,
                ctrl,
            );
            Ok(stream)
        }
        Err(err) => {
            log::info!("failed outbound protocol selection {:?} {:?}", cid, err);
            Err(SwarmError::Negotiation(err))
        }
    }
}

/// Opens a substream and reports the outcome both to `reply` and, on
/// success, to the swarm's event loop for registration.
pub(crate) async fn open_stream_task(
    cid: ConnectionId,
    stream_muxer: IStreamMuxer,
    pids: Vec<ProtocolId>,
    ctrl: mpsc::Sender<SwarmControlCmd>,
    mut tx: mpsc::UnboundedSender<SwarmEvent>,
    reply: futures::channel::oneshot::Sender<Result<Substream, SwarmError>>,
) {
    let result = open_stream_internal(cid, stream_muxer, pids, ctrl).await;
    if let Ok(substream) = &result {
        let _ = tx
            .send(SwarmEvent::StreamOpened {
                sub: substream.clone(),
            })
            .await;
    }
    let _ = reply.send(result);
}

/// A snapshot of one connection, as handed out by
/// [`Control::connection_views`](crate::Control::connection_views).
#[derive(Debug, Clone)]
pub struct ConnectionView {
    /// The swarm-assigned id of this connection.
    pub id: ConnectionId,
    /// The direction of this connection.
    pub dir: Direction,
    /// The local multiaddr of this connection.
    pub la: Multiaddr,
    /// The remote multiaddr of this connection.
    pub ra: Multiaddr,
    /// The local peer id.
    pub local_peer_id: PeerId,
    /// The remote peer id.
    pub remote_peer_id: PeerId,
    /// The total number of inbound substreams.
    pub num_inbound_streams: usize,
    /// The total number of outbound substreams.
    pub num_outbound_streams: usize,
}
