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

//! The yamux stream multiplexer.
//!
//! Runs many independent bidirectional byte streams over a single ordered
//! byte pipe, with per-stream flow control, a half-closed stream
//! lifecycle, and connection-level keepalive. See
//! [`connection::Connection`] for the wire-driving machinery and
//! [`Yamux`] for the [`StreamMuxer`] adaptor the upgrade pipeline plugs
//! in.

pub mod connection;
pub mod error;
mod chunks;
mod frame;
mod pause;

pub use frame::header::{GoAwayCode, HeaderDecodeError, StreamId};
pub use frame::io::FrameDecodeError;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use log::{info, trace};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use std::fmt;

use connection::{control::Control, Connection, Mode, Stream};
use error::ConnectionError;

use meshwork_core::identity::Keypair;
use meshwork_core::muxing::{IReadWrite, IStreamMuxer, ReadWriteEx, StreamInfo, StreamMuxer, StreamMuxerEx};
use meshwork_core::secure_io::SecureInfo;
use meshwork_core::transport::{ConnectionInfo, TransportError};
use meshwork_core::upgrade::{UpgradeInfo, Upgrader};
use meshwork_core::{Multiaddr, PeerId, PublicKey};
use meshwork_traits::SplittableReadWrite;

/// The initial window of every stream, as required by the yamux
/// specification.
pub const DEFAULT_CREDIT: u32 = 256 * 1024;

/// Default cap on a single DATA frame body.
const MAX_MSG_SIZE: usize = 64 * 1024;

/// Specifies when window update frames are sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowUpdateMode {
    /// Credit the sender back as soon as data arrives.
    ///
    /// This only prevents head-of-line blocking; a slow reader will
    /// accumulate data in its buffer without ever pushing back on the
    /// sender.
    OnReceive,

    /// Credit the sender back only when the application has actually
    /// consumed the data.
    ///
    /// This is the mode that makes backpressure work: a peer that stops
    /// reading eventually drives the sender's window to zero and the
    /// sender suspends.
    OnRead,
}

/// Yamux configuration.
///
/// The default configuration values are as follows:
///
/// - receive window = 256 KiB
/// - max. window size (via [`Stream::adjust_window`]) = 1 MiB
/// - max. buffer size (per stream) = 1 MiB
/// - max. number of streams = 8192
/// - max. message size = 64 KiB
/// - window update mode = on read
/// - keepalive enabled, ping interval 30s, ping timeout 10s
/// - no inactivity timeout
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) receive_window: u32,
    pub(crate) max_window_size: u32,
    pub(crate) max_buffer_size: usize,
    pub(crate) max_num_streams: usize,
    pub(crate) max_message_size: usize,
    pub(crate) window_update_mode: WindowUpdateMode,
    pub(crate) keepalive: bool,
    pub(crate) ping_interval: Duration,
    pub(crate) ping_timeout: Duration,
    pub(crate) inactivity_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            receive_window: DEFAULT_CREDIT,
            max_window_size: 1024 * 1024,
            max_buffer_size: 1024 * 1024,
            max_num_streams: 8192,
            max_message_size: MAX_MSG_SIZE,
            window_update_mode: WindowUpdateMode::OnRead,
            keepalive: true,
            ping_interval: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(10),
            inactivity_timeout: None,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Config::default()
    }

    /// Set the receive window (must be >= 256 KiB).
    ///
    /// # Panics
    ///
    /// If the given receive window is < 256 KiB.
    pub fn set_receive_window(&mut self, n: u32) -> &mut Self {
        assert!(n >= DEFAULT_CREDIT);
        self.receive_window = n;
        self
    }

    /// Set the cap up to which a stream may grow its receive window.
    pub fn set_max_window_size(&mut self, n: u32) -> &mut Self {
        assert!(n >= self.receive_window);
        self.max_window_size = n;
        self
    }

    /// Set the max. buffer size per stream.
    pub fn set_max_buffer_size(&mut self, n: usize) -> &mut Self {
        self.max_buffer_size = n;
        self
    }

    /// Set the max. number of streams.
    pub fn set_max_num_streams(&mut self, n: usize) -> &mut Self {
        self.max_num_streams = n;
        self
    }

    /// Set the max. size of a single DATA frame body.
    pub fn set_max_message_size(&mut self, n: usize) -> &mut Self {
        self.max_message_size = n;
        self
    }

    /// Set the window update mode to use.
    pub fn set_window_update_mode(&mut self, m: WindowUpdateMode) -> &mut Self {
        self.window_update_mode = m;
        self
    }

    /// Enable or disable the keepalive ping.
    pub fn set_keepalive(&mut self, b: bool) -> &mut Self {
        self.keepalive = b;
        self
    }

    /// Set how often a keepalive ping is sent.
    pub fn set_ping_interval(&mut self, d: Duration) -> &mut Self {
        self.ping_interval = d;
        self
    }

    /// Set how long to wait for a ping to be answered before the
    /// connection is declared dead.
    pub fn set_ping_timeout(&mut self, d: Duration) -> &mut Self {
        self.ping_timeout = d;
        self
    }

    /// Close the connection when it had no streams and no traffic for the
    /// given duration. `None` disables the behavior.
    pub fn set_inactivity_timeout(&mut self, d: Option<Duration>) -> &mut Self {
        self.inactivity_timeout = d;
        self
    }
}

/// A yamux connection wrapped up as a [`StreamMuxer`].
///
/// Carries copies of the identity and address information of the secured
/// connection it was built from, because the socket itself moves into the
/// [`Connection`].
pub struct Yamux<C: SplittableReadWrite> {
    /// The connection driver; taken by [`StreamMuxer::task`].
    connection: Option<Connection<C>>,
    /// Handle to control the connection.
    control: Control,
    /// For debug purposes.
    id: connection::Id,
    /// Whether we initiated the connection.
    initiator: bool,
    /// Set by the background task when the connection terminates.
    closed: Arc<AtomicBool>,
    /// The local multiaddr of this connection.
    pub la: Multiaddr,
    /// The remote multiaddr of this connection.
    pub ra: Multiaddr,
    /// The private key of the local node.
    pub local_priv_key: Keypair,
    /// For convenience, the local peer ID, derived from the local key.
    pub local_peer_id: PeerId,
    /// The public key of the remote.
    pub remote_pub_key: PublicKey,
    /// For convenience, the remote peer ID, derived from the remote key.
    pub remote_peer_id: PeerId,
}

impl<C: SplittableReadWrite> Clone for Yamux<C> {
    fn clone(&self) -> Self {
        Yamux {
            connection: None,
            control: self.control.clone(),
            id: self.id,
            initiator: self.initiator,
            closed: self.closed.clone(),
            la: self.la.clone(),
            ra: self.ra.clone(),
            local_priv_key: self.local_priv_key.clone(),
            local_peer_id: self.local_peer_id.clone(),
            remote_pub_key: self.remote_pub_key.clone(),
            remote_peer_id: self.remote_peer_id.clone(),
        }
    }
}

impl<C: SplittableReadWrite> fmt::Debug for Yamux<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Yamux")
            .field("id", &self.id)
            .field("ra", &self.ra)
            .field("rid", &self.remote_peer_id)
            .finish()
    }
}

impl<C: ConnectionInfo + SecureInfo + SplittableReadWrite> Yamux<C> {
    /// Creates a new yamux muxer over the given secured connection.
    pub fn new(io: C, cfg: Config, mode: Mode) -> Self {
        // `io` moves into the Connection; copy out what identifies it
        let local_priv_key = io.local_priv_key();
        let local_peer_id = io.local_peer();
        let remote_pub_key = io.remote_pub_key();
        let remote_peer_id = io.remote_peer();
        let la = io.local_multiaddr();
        let ra = io.remote_multiaddr();

        let conn = Connection::new(io, cfg, mode);
        let id = conn.id();
        let control = conn.control();
        Yamux {
            connection: Some(conn),
            control,
            id,
            initiator: mode == Mode::Client,
            closed: Arc::new(AtomicBool::new(false)),
            la,
            ra,
            local_priv_key,
            local_peer_id,
            remote_pub_key,
            remote_peer_id,
        }
    }
}

impl<C: SplittableReadWrite> SecureInfo for Yamux<C> {
    fn local_peer(&self) -> PeerId {
        self.local_peer_id.clone()
    }

    fn remote_peer(&self) -> PeerId {
        self.remote_peer_id.clone()
    }

    fn local_priv_key(&self) -> Keypair {
        self.local_priv_key.clone()
    }

    fn remote_pub_key(&self) -> PublicKey {
        self.remote_pub_key.clone()
    }
}

impl<C: SplittableReadWrite> ConnectionInfo for Yamux<C> {
    fn local_multiaddr(&self) -> Multiaddr {
        self.la.clone()
    }

    fn remote_multiaddr(&self) -> Multiaddr {
        self.ra.clone()
    }
}

impl StreamInfo for Stream {
    fn id(&self) -> usize {
        Stream::id(self).val() as usize
    }
}

impl ReadWriteEx for Stream {
    fn box_clone(&self) -> IReadWrite {
        Box::new(self.clone())
    }
}

impl<C: SplittableReadWrite> StreamMuxerEx for Yamux<C> {}

#[async_trait]
impl<C: SplittableReadWrite> StreamMuxer for Yamux<C> {
    async fn open_stream(&mut self) -> Result<IReadWrite, TransportError> {
        let s = self.control.open_stream().await?;
        trace!("opened outbound substream {:?}", s);
        Ok(Box::new(s))
    }

    async fn accept_stream(&mut self) -> Result<IReadWrite, TransportError> {
        let s = self.control.accept_stream().await?;
        trace!("accepted inbound substream {:?}", s);
        Ok(Box::new(s))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.control.close().await?;
        Ok(())
    }

    fn is_initiator(&self) -> bool {
        self.initiator
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    fn task(&mut self) -> Option<BoxFuture<'static, ()>> {
        if let Some(mut conn) = self.connection.take() {
            let closed = self.closed.clone();
            return Some(
                async move {
                    while conn.next_stream().await.is_ok() {}
                    closed.store(true, Ordering::Relaxed);
                    info!("{} background-task exiting...", conn.id());
                }
                .boxed(),
            );
        }
        None
    }

    fn box_clone(&self) -> IStreamMuxer {
        Box::new(self.clone())
    }
}

impl UpgradeInfo for Config {
    type Info = &'static [u8];

    fn protocol_info(&self) -> Vec<Self::Info> {
        vec![b"/yamux/1.0.0"]
    }
}

#[async_trait]
impl<T> Upgrader<T> for Config
where
    T: ConnectionInfo + SecureInfo + SplittableReadWrite,
{
    type Output = Yamux<T>;

    async fn upgrade_inbound(
        self,
        socket: T,
        _info: <Self as UpgradeInfo>::Info,
    ) -> Result<Self::Output, TransportError> {
        trace!("upgrading yamux inbound");
        Ok(Yamux::new(socket, self, Mode::Server))
    }

    async fn upgrade_outbound(
        self,
        socket: T,
        _info: <Self as UpgradeInfo>::Info,
    ) -> Result<Self::Output, TransportError> {
        trace!("upgrading yamux outbound");
        Ok(Yamux::new(socket, self, Mode::Client))
    }
}

impl From<ConnectionError> for TransportError {
    fn from(e: ConnectionError) -> Self {
        TransportError::StreamMuxerError(Box::new(e))
    }
}
