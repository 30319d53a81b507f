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

use meshwork_core::{PeerId, PeerInfo, ProtocolId};

use crate::connection::{ConnectionId, ConnectionView};
use crate::substream::{StreamId, Substream};
use crate::{Connectedness, NetworkInfo, SwarmError};

/// Commands sent to the swarm's event loop.
pub enum SwarmControlCmd {
    /// Establish (or reuse) a connection to the given peer.
    Connect(PeerInfo, oneshot::Sender<Result<(), SwarmError>>),
    /// Open a substream to the given peer, dialing it if necessary, and
    /// negotiate one of the given protocols on it.
    NewStream(
        PeerInfo,
        Vec<ProtocolId>,
        oneshot::Sender<Result<Substream, SwarmError>>,
    ),
    /// A substream closed; deregister it.
    CloseStream(ConnectionId, StreamId),
    /// Close every connection to the given peer.
    ClosePeer(PeerId, oneshot::Sender<Result<(), SwarmError>>),
    /// Retrieve a snapshot of the network state.
    NetworkInfo(oneshot::Sender<NetworkInfo>),
    /// Ask how reachable a peer currently is.
    Connectedness(PeerInfo, oneshot::Sender<Connectedness>),
    /// Retrieve snapshots of the live connections to a peer.
    ConnectionViews(PeerId, oneshot::Sender<Vec<ConnectionView>>),
    /// Shut the swarm down.
    CloseSwarm,
}

/// A cloneable handle for talking to a running swarm.
#[derive(Clone)]
pub struct Control {
    sender: mpsc::Sender<SwarmControlCmd>,
}

impl Control {
    pub(crate) fn new(sender: mpsc::Sender<SwarmControlCmd>) -> Self {
        Control { sender }
    }

    /// Establishes a connection to `peer`, reusing an existing one when
    /// possible. Concurrent calls for the same peer share one attempt.
    pub async fn connect(&mut self, peer: PeerInfo) -> Result<(), SwarmError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SwarmControlCmd::Connect(peer, tx))
            .await
            .map_err(|_| SwarmError::Closed)?;
        rx.await.map_err(|_| SwarmError::Closed)?
    }

    /// Opens an outbound substream to `peer` speaking the first of
    /// `protocols` the remote supports, dialing the peer if there is no
    /// connection yet.
    pub async fn new_stream(
        &mut self,
        peer: PeerInfo,
        protocols: Vec<ProtocolId>,
    ) -> Result<Substream, SwarmError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SwarmControlCmd::NewStream(peer, protocols, tx))
            .await
            .map_err(|_| SwarmError::Closed)?;
        rx.await.map_err(|_| SwarmError::Closed)?
    }

    /// Initiates close on every connection to `peer`.
    pub async fn close_peer(&mut self, peer_id: PeerId) -> Result<(), SwarmError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SwarmControlCmd::ClosePeer(peer_id, tx))
            .await
            .map_err(|_| SwarmError::Closed)?;
        rx.await.map_err(|_| SwarmError::Closed)?
    }

    /// Retrieves a snapshot of the network state.
    pub async fn network_info(&mut self) -> Result<NetworkInfo, SwarmError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SwarmControlCmd::NetworkInfo(tx))
            .await
            .map_err(|_| SwarmError::Closed)?;
        rx.await.map_err(|_| SwarmError::Closed)
    }

    /// Asks how reachable the given peer currently is.
    pub async fn connectedness(&mut self, peer: PeerInfo) -> Result<Connectedness, SwarmError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SwarmControlCmd::Connectedness(peer, tx))
            .await
            .map_err(|_| SwarmError::Closed)?;
        rx.await.map_err(|_| SwarmError::Closed)
    }

    /// Retrieves snapshots of the live connections to the given peer.
    pub async fn connection_views(
        &mut self,
        peer_id: PeerId,
    ) -> Result<Vec<ConnectionView>, SwarmError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SwarmControlCmd::ConnectionViews(peer_id, tx))
            .await
            .map_err(|_| SwarmError::Closed)?;
        rx.await.map_err(|_| SwarmError::Closed)
    }

    /// Shuts the swarm down. Idempotent.
    pub async fn close(&mut self) -> Result<(), SwarmError> {
        // an error here means the swarm is already gone
        let _ = self.sender.send(SwarmControlCmd::CloseSwarm).await;
        Ok(())
    }
}
