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

//! The swarm: connection management, dialing and protocol routing.
//!
//! A [`Swarm`] owns every live muxed connection, indexed by remote peer.
//! Its single event loop is the only place connection state is mutated:
//! dial attempts, accepted connections, opened and closed substreams and
//! terminated connections all arrive as messages. Background tasks hold
//! ids and cloned handles, never references into the swarm, so a closed
//! connection is always removed by value and nothing can keep it alive by
//! accident.

pub mod connection;
pub mod control;
pub mod muxer;
pub mod protocol_handler;
pub mod substream;

use fnv::FnvHashMap;
use smallvec::SmallVec;
use std::time::Duration;
use std::{error::Error, fmt};

use async_std::task;
use futures::channel::{mpsc, oneshot};
use futures::{select_biased, SinkExt, StreamExt};

use meshwork_core::identity::Keypair;
use meshwork_core::multistream::NegotiationError;
use meshwork_core::muxing::{IStreamMuxer, StreamMuxer};
use meshwork_core::secure_io::SecureInfo;
use meshwork_core::transport::upgrade::timed;
use meshwork_core::transport::{ConnectionInfo, ITransportEx, TransportError};
use meshwork_core::{Multiaddr, PeerId, PeerInfo, ProtocolId};

pub use connection::{Connection, ConnectionId, ConnectionView, Direction};
pub use control::Control;
pub use muxer::Muxer;
pub use protocol_handler::{DummyProtocolHandler, IProtocolHandler, ProtocolHandler};
pub use substream::Substream;

use connection::open_stream_task;
use control::SwarmControlCmd;
use substream::StreamId;

/// Default per-address dial attempt timeout.
const DIAL_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for a whole dial, across all addresses.
const DIAL_TIMEOUT: Duration = Duration::from_secs(30);

/// How many control commands may queue before callers are backpressured.
const COMMAND_BACKLOG: usize = 32;

/// Errors at the swarm level.
#[derive(Debug)]
pub enum SwarmError {
    /// Establishing or upgrading a connection failed.
    Transport(TransportError),
    /// Protocol negotiation on a substream failed; the connection stays
    /// usable.
    Negotiation(NegotiationError),
    /// The dial expected one peer but the handshake authenticated
    /// another.
    PeerIdMismatch { expected: PeerId, got: PeerId },
    /// A dial was requested without any addresses.
    NoAddresses,
    /// All dial attempts to the peer failed.
    Dial(String),
    /// The operation's deadline elapsed.
    Timeout,
    /// The swarm (or the connection the operation needed) is gone.
    Closed,
    /// An internal consistency error.
    Internal(&'static str),
}

impl fmt::Display for SwarmError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SwarmError::Transport(e) => write!(f, "transport error: {}", e),
            SwarmError::Negotiation(e) => write!(f, "negotiation error: {}", e),
            SwarmError::PeerIdMismatch { expected, got } => {
                write!(f, "peer id mismatch: expected {}, got {}", expected, got)
            }
            SwarmError::NoAddresses => f.write_str("no addresses to dial"),
            SwarmError::Dial(msg) => write!(f, "dial failed: {}", msg),
            SwarmError::Timeout => f.write_str("operation timed out"),
            SwarmError::Closed => f.write_str("swarm or connection closed"),
            SwarmError::Internal(what) => write!(f, "internal error: {}", what),
        }
    }
}

impl Error for SwarmError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SwarmError::Transport(e) => Some(e),
            SwarmError::Negotiation(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for SwarmError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Timeout => SwarmError::Timeout,
            TransportError::Negotiation(e) => SwarmError::Negotiation(e),
            TransportError::PeerIdMismatch { expected, got } => {
                SwarmError::PeerIdMismatch { expected, got }
            }
            other => SwarmError::Transport(other),
        }
    }
}

impl From<NegotiationError> for SwarmError {
    fn from(e: NegotiationError) -> Self {
        SwarmError::Negotiation(e)
    }
}

/// Events arriving at the swarm's loop from its background tasks.
pub enum SwarmEvent {
    /// A listener accepted and upgraded a connection.
    IncomingConnection(IStreamMuxer),
    /// A dial attempt finished.
    DialCompleted {
        peer_id: PeerId,
        result: Result<IStreamMuxer, SwarmError>,
    },
    /// A muxed connection terminated; sent exactly once per connection by
    /// its driver task.
    ConnectionClosed {
        cid: ConnectionId,
        peer_id: PeerId,
    },
    /// A substream finished negotiation and is live.
    StreamOpened { sub: Substream },
}

/// How reachable a peer currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectedness {
    /// At least one live connection exists.
    Connected,
    /// No connection, but addresses to try.
    CanConnect,
    /// No connection and no addresses.
    NotConnected,
}

/// A snapshot of the network state.
#[derive(Debug, Clone)]
pub struct NetworkInfo {
    /// The number of peers we have at least one live connection to.
    pub num_peers: usize,
    /// The total number of live connections.
    pub num_connections: usize,
    /// The total number of live substreams.
    pub num_active_streams: usize,
}

/// Everything a background task needs to use a registered connection.
#[derive(Clone)]
struct ConnHandles {
    cid: ConnectionId,
    muxer: IStreamMuxer,
}

type DialWaiter = oneshot::Sender<Result<ConnHandles, SwarmError>>;

/// The swarm. Construct with [`Swarm::new`], configure with the
/// `with_*` builders, bind listeners with [`Swarm::listen_on`], then
/// [`Swarm::start`] it and talk to it through its [`Control`].
pub struct Swarm {
    local_peer_id: PeerId,
    transports: Vec<ITransportEx>,
    /// The protocol router for inbound substreams.
    muxer: Muxer,
    /// All live connections by remote peer. This is the connection
    /// manager: entries leave exactly when `ConnectionClosed` arrives.
    connections: FnvHashMap<PeerId, SmallVec<[Connection; 2]>>,
    /// In-flight dials; concurrent dials to one peer share the attempt.
    pending_dials: FnvHashMap<PeerId, Vec<DialWaiter>>,
    next_connection_id: usize,
    event_tx: mpsc::UnboundedSender<SwarmEvent>,
    event_rx: mpsc::UnboundedReceiver<SwarmEvent>,
    ctrl_tx: mpsc::Sender<SwarmControlCmd>,
    ctrl_rx: mpsc::Receiver<SwarmControlCmd>,
    dial_attempt_timeout: Duration,
    dial_timeout: Duration,
}

impl Swarm {
    /// A swarm for the node owning `key`.
    pub fn new(key: Keypair) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded();
        let (ctrl_tx, ctrl_rx) = mpsc::channel(COMMAND_BACKLOG);
        Swarm {
            local_peer_id: key.public().to_peer_id(),
            transports: Vec::new(),
            muxer: Muxer::new(),
            connections: FnvHashMap::default(),
            pending_dials: FnvHashMap::default(),
            next_connection_id: 0,
            event_tx,
            event_rx,
            ctrl_tx,
            ctrl_rx,
            dial_attempt_timeout: DIAL_ATTEMPT_TIMEOUT,
            dial_timeout: DIAL_TIMEOUT,
        }
    }

    /// Adds a transport (already wrapped with its upgrade pipeline).
    pub fn with_transport(mut self, transport: ITransportEx) -> Self {
        self.transports.push(transport);
        self
    }

    /// Registers a protocol handler with the router.
    pub fn with_protocol_handler(mut self, handler: protocol_handler::IProtocolHandler) -> Self {
        self.muxer.add_protocol_handler(handler);
        self
    }

    /// Overrides the dial timeouts.
    pub fn with_dial_timeout(mut self, attempt: Duration, total: Duration) -> Self {
        self.dial_attempt_timeout = attempt;
        self.dial_timeout = total;
        self
    }

    /// The protocol router, e.g. for registering prefix handlers.
    pub fn muxer_mut(&mut self) -> &mut Muxer {
        &mut self.muxer
    }

    /// The local peer id.
    pub fn local_peer_id(&self) -> &PeerId {
        &self.local_peer_id
    }

    /// A handle for talking to the swarm once it runs.
    pub fn control(&self) -> Control {
        Control::new(self.ctrl_tx.clone())
    }

    /// Binds a listener and spawns its accept loop. Returns the actual
    /// listen address.
    pub fn listen_on(&mut self, addr: Multiaddr) -> Result<Multiaddr, SwarmError> {
        let transport = self
            .transports
            .iter()
            .find(|t| t.can_dial(&addr))
            .cloned()
            .ok_or(SwarmError::Transport(TransportError::MultiaddrNotSupported(
                addr.clone(),
            )))?;
        let mut transport = transport;
        let mut listener = transport.listen_on(addr)?;
        let listen_addr = listener.multi_addr();
        log::info!("listening on {}", listen_addr);

        let mut tx = self.event_tx.clone();
        task::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok(muxer) => {
                        if tx.send(SwarmEvent::IncomingConnection(muxer)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        log::info!("listener terminated: {}", e);
                        break;
                    }
                }
            }
        });
        Ok(listen_addr)
    }

    /// Spawns the swarm's event loop.
    pub fn start(self) {
        task::spawn(self.run());
    }

    async fn run(mut self) {
        log::debug!("swarm of {} starting", self.local_peer_id);
        loop {
            enum Next {
                Cmd(Option<SwarmControlCmd>),
                Evt(Option<SwarmEvent>),
            }
            let next = select_biased! {
                cmd = self.ctrl_rx.next() => Next::Cmd(cmd),
                evt = self.event_rx.next() => Next::Evt(evt),
            };
            match next {
                Next::Cmd(Some(SwarmControlCmd::CloseSwarm)) | Next::Cmd(None) => break,
                Next::Cmd(Some(cmd)) => self.handle_command(cmd),
                Next::Evt(Some(evt)) => self.handle_event(evt),
                Next::Evt(None) => break,
            }
        }

        log::debug!("swarm of {} shutting down", self.local_peer_id);
        for waiters in std::mem::take(&mut self.pending_dials).into_values() {
            for w in waiters {
                let _ = w.send(Err(SwarmError::Closed));
            }
        }
        for (_, conns) in self.connections.drain() {
            for conn in conns {
                conn.close();
            }
        }
    }

    fn handle_command(&mut self, cmd: SwarmControlCmd) {
        match cmd {
            SwarmControlCmd::Connect(peer, reply) => self.on_connect(peer, reply),
            SwarmControlCmd::NewStream(peer, pids, reply) => self.on_new_stream(peer, pids, reply),
            SwarmControlCmd::CloseStream(cid, sid) => self.on_close_stream(cid, sid),
            SwarmControlCmd::ClosePeer(peer_id, reply) => {
                if let Some(conns) = self.connections.get(&peer_id) {
                    for conn in conns {
                        conn.close();
                    }
                }
                let _ = reply.send(Ok(()));
            }
            SwarmControlCmd::NetworkInfo(reply) => {
                let _ = reply.send(self.network_info());
            }
            SwarmControlCmd::Connectedness(peer, reply) => {
                let state = if self.best_conn_handles(&peer.id).is_some() {
                    Connectedness::Connected
                } else if !peer.addrs.is_empty() {
                    Connectedness::CanConnect
                } else {
                    Connectedness::NotConnected
                };
                let _ = reply.send(state);
            }
            SwarmControlCmd::ConnectionViews(peer_id, reply) => {
                let views = self
                    .connections
                    .get(&peer_id)
                    .map(|conns| conns.iter().map(|c| c.info()).collect())
                    .unwrap_or_default();
                let _ = reply.send(views);
            }
            // handled by the loop itself
            SwarmControlCmd::CloseSwarm => unreachable!("handled in run()"),
        }
    }

    fn handle_event(&mut self, evt: SwarmEvent) {
        match evt {
            SwarmEvent::IncomingConnection(muxer) => {
                self.register_connection(muxer, Direction::Inbound);
            }
            SwarmEvent::DialCompleted { peer_id, result } => {
                self.on_dial_completed(peer_id, result);
            }
            SwarmEvent::ConnectionClosed { cid, peer_id } => {
                log::debug!("connection {:?} to {} closed", cid, peer_id);
                if let Some(conns) = self.connections.get_mut(&peer_id) {
                    conns.retain(|c| c.id() != cid);
                    if conns.is_empty() {
                        self.connections.remove(&peer_id);
                    }
                }
            }
            SwarmEvent::StreamOpened { sub } => {
                let cid = sub.cid();
                if let Some(conn) = self.connection_by_id_mut(cid) {
                    conn.add_stream(sub);
                }
            }
        }
    }

    fn on_connect(&mut self, peer: PeerInfo, reply: oneshot::Sender<Result<(), SwarmError>>) {
        if peer.id == self.local_peer_id {
            let _ = reply.send(Err(SwarmError::Internal("refusing to dial self")));
            return;
        }
        if self.best_conn_handles(&peer.id).is_some() {
            let _ = reply.send(Ok(()));
            return;
        }
        let (tx, rx) = oneshot::channel();
        self.add_dial_waiter(peer, tx);
        task::spawn(async move {
            let res = match rx.await {
                Ok(Ok(_handles)) => Ok(()),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(SwarmError::Closed),
            };
            let _ = reply.send(res);
        });
    }

    fn on_new_stream(
        &mut self,
        peer: PeerInfo,
        pids: Vec<ProtocolId>,
        reply: oneshot::Sender<Result<Substream, SwarmError>>,
    ) {
        let ctrl = self.ctrl_tx.clone();
        let tx = self.event_tx.clone();

        if let Some(handles) = self.best_conn_handles(&peer.id) {
            task::spawn(open_stream_task(
                handles.cid,
                handles.muxer,
                pids,
                ctrl,
                tx,
                reply,
            ));
            return;
        }

        // no connection yet: join (or start) the dial, then open
        let (wtx, wrx) = oneshot::channel();
        self.add_dial_waiter(peer, wtx);
        task::spawn(async move {
            match wrx.await {
                Ok(Ok(handles)) => {
                    open_stream_task(handles.cid, handles.muxer, pids, ctrl, tx, reply).await;
                }
                Ok(Err(e)) => {
                    let _ = reply.send(Err(e));
                }
                Err(_) => {
                    let _ = reply.send(Err(SwarmError::Closed));
                }
            }
        });
    }

    fn on_close_stream(&mut self, cid: ConnectionId, sid: StreamId) {
        if let Some(conn) = self.connection_by_id_mut(cid) {
            conn.del_stream(sid);
        }
    }

    /// Joins an in-flight dial to the peer, or starts one.
    fn add_dial_waiter(&mut self, peer: PeerInfo, waiter: DialWaiter) {
        if let Some(waiters) = self.pending_dials.get_mut(&peer.id) {
            log::debug!("coalescing dial to {}", peer.id);
            waiters.push(waiter);
            return;
        }
        if peer.addrs.is_empty() {
            let _ = waiter.send(Err(SwarmError::NoAddresses));
            return;
        }
        self.pending_dials.insert(peer.id.clone(), vec![waiter]);
        task::spawn(dial_task(
            peer,
            self.transports.clone(),
            self.dial_attempt_timeout,
            self.dial_timeout,
            self.event_tx.clone(),
        ));
    }

    fn on_dial_completed(&mut self, peer_id: PeerId, result: Result<IStreamMuxer, SwarmError>) {
        let waiters = self.pending_dials.remove(&peer_id).unwrap_or_default();
        match result {
            Ok(muxer) => {
                let got = muxer.remote_peer();
                if got != peer_id {
                    log::warn!(
                        "dialed {} but the remote authenticated as {}",
                        peer_id,
                        got
                    );
                    // never registered and never driven: dropping the muxer
                    // tears the underlying connection down
                    drop(muxer);
                    for w in waiters {
                        let _ = w.send(Err(SwarmError::PeerIdMismatch {
                            expected: peer_id.clone(),
                            got: got.clone(),
                        }));
                    }
                    return;
                }
                let handles = self.register_connection(muxer, Direction::Outbound);
                for w in waiters {
                    let _ = w.send(Ok(handles.clone()));
                }
            }
            Err(e) => {
                log::info!("dial to {} failed: {}", peer_id, e);
                let msg = e.to_string();
                for w in waiters {
                    let _ = w.send(Err(SwarmError::Dial(msg.clone())));
                }
            }
        }
    }

    /// Registers a freshly upgraded connection: spawns its muxer driver
    /// (whose exit is the one and only close notification) and its
    /// inbound-substream accept loop, and indexes it by peer.
    fn register_connection(&mut self, mut muxer: IStreamMuxer, dir: Direction) -> ConnHandles {
        let cid = ConnectionId(self.next_connection_id);
        self.next_connection_id += 1;
        let peer_id = muxer.remote_peer();
        log::debug!(
            "new {:?} connection {:?} to {} ({})",
            dir,
            cid,
            peer_id,
            muxer.remote_multiaddr()
        );

        let mut conn = Connection::new(cid, muxer.clone(), dir);

        if let Some(driver) = muxer.task() {
            let mut tx = self.event_tx.clone();
            let peer = peer_id.clone();
            conn.set_handle(task::spawn(async move {
                driver.await;
                let _ = tx
                    .send(SwarmEvent::ConnectionClosed { cid, peer_id: peer })
                    .await;
            }));
        }

        conn.set_accept_handle(task::spawn(accept_stream_loop(
            cid,
            muxer.clone(),
            self.muxer.clone(),
            self.event_tx.clone(),
            self.ctrl_tx.clone(),
        )));

        let handles = ConnHandles { cid, muxer };
        self.connections.entry(peer_id).or_default().push(conn);
        handles
    }

    /// The best live connection to the peer: outbound preferred, then the
    /// least-loaded; closed connections are skipped.
    fn best_conn_handles(&self, peer_id: &PeerId) -> Option<ConnHandles> {
        self.connections.get(peer_id).and_then(|conns| {
            conns
                .iter()
                .filter(|c| !c.is_closed())
                .min_by_key(|c| (c.dir() == Direction::Inbound, c.num_streams()))
                .map(|c| ConnHandles {
                    cid: c.id(),
                    muxer: c.stream_muxer().clone(),
                })
        })
    }

    fn connection_by_id_mut(&mut self, cid: ConnectionId) -> Option<&mut Connection> {
        self.connections
            .values_mut()
            .flat_map(|conns| conns.iter_mut())
            .find(|c| c.id() == cid)
    }

    fn network_info(&self) -> NetworkInfo {
        let num_peers = self.connections.len();
        let num_connections = self.connections.values().map(|c| c.len()).sum();
        let num_active_streams = self
            .connections
            .values()
            .flat_map(|conns| conns.iter())
            .map(|c| c.num_streams())
            .sum();
        NetworkInfo {
            num_peers,
            num_connections,
            num_active_streams,
        }
    }
}

/// Tries the peer's addresses in preference order; the first transport
/// that supports an address gets to dial it, each attempt under its own
/// timeout and the whole dial under an overall one.
async fn dial_task(
    peer: PeerInfo,
    transports: Vec<ITransportEx>,
    attempt_timeout: Duration,
    dial_timeout: Duration,
    mut tx: mpsc::UnboundedSender<SwarmEvent>,
) {
    let peer_id = peer.id.clone();
    let result = timed(
        async {
            let mut last_err = TransportError::Internal("no usable address");
            for addr in &peer.addrs {
                let transport = transports.iter().find(|t| t.can_dial(addr)).cloned();
                let mut transport = match transport {
                    Some(t) => t,
                    None => {
                        last_err = TransportError::MultiaddrNotSupported(addr.clone());
                        continue;
                    }
                };
                log::debug!("dialing {} at {}", peer_id, addr);
                match timed(transport.dial(addr.clone()), attempt_timeout).await {
                    Ok(muxer) => return Ok(muxer),
                    Err(e) => {
                        log::debug!("dial attempt at {} failed: {}", addr, e);
                        last_err = e;
                    }
                }
            }
            Err(last_err)
        },
        dial_timeout,
    )
    .await;

    let _ = tx
        .send(SwarmEvent::DialCompleted {
            peer_id,
            result: result.map_err(SwarmError::from),
        })
        .await;
}

/// Accepts inbound muxer streams and negotiates each one against the
/// protocol router; handlers run in their own tasks so a failing handler
/// never affects the connection.
async fn accept_stream_loop(
    cid: ConnectionId,
    mut muxer: IStreamMuxer,
    router: Muxer,
    tx: mpsc::UnboundedSender<SwarmEvent>,
    ctrl: mpsc::Sender<SwarmControlCmd>,
) {
    let la = muxer.local_multiaddr();
    let ra = muxer.remote_multiaddr();
    loop {
        let raw = match muxer.accept_stream().await {
            Ok(s) => s,
            Err(_) => break,
        };
        let router = router.clone();
        let mut tx = tx.clone();
        let ctrl = ctrl.clone();
        let (la, ra) = (la.clone(), ra.clone());
        task::spawn(async move {
            match router.negotiate(raw).await {
                Ok((mut handler, stream, proto)) => {
                    let sub = Substream::new(stream, Direction::Inbound, proto, cid, la, ra, ctrl);
                    let _ = tx.send(SwarmEvent::StreamOpened { sub: sub.clone() }).await;
                    if let Err(e) = handler.handle(sub).await {
                        log::warn!("protocol handler failed: {}", e);
                    }
                }
                Err(e) => {
                    log::info!("inbound substream negotiation failed: {}", e);
                }
            }
        });
    }
    log::trace!("accept loop of connection {:?} exiting", cid);
}
