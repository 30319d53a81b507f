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

//! Transport upgrader.
//!
//! A [`TransportUpgrade`] wraps an inner [`Transport`] and promotes every
//! connection it produces through the layer stack:
//!
//! ```text
//! raw --layers--> layered --multistream+security--> secured
//!     --multistream+muxer--> muxed
//! ```
//!
//! The security and muxer stages negotiate which adaptor to apply via
//! multistream-select; the layer stage applies its adaptor unconditionally.
//! The whole promotion runs under a timeout.

use async_trait::async_trait;
use futures::future::{select, Either};
use futures::pin_mut;
use futures_timer::Delay;
use log::trace;
use std::future::Future;
use std::time::Duration;

use meshwork_traits::SplittableReadWrite;

use crate::muxing::{IStreamMuxer, StreamMuxerEx};
use crate::secure_io::SecureInfo;
use crate::transport::{
    ConnectionInfo, IListenerEx, ITransportEx, Transport, TransportError, TransportEx,
    TransportListener, TransportListenerEx,
};
use crate::upgrade::multistream::Multistream;
use crate::upgrade::{DummyUpgrader, UpgradeInfo, Upgrader};
use crate::Multiaddr;

/// How long the complete raw-to-muxed promotion may take.
const DEFAULT_UPGRADE_TIMEOUT: Duration = Duration::from_secs(10);

/// Fails `fut` with [`TransportError::Timeout`] if it does not complete in
/// time.
pub async fn timed<T>(
    fut: impl Future<Output = Result<T, TransportError>>,
    timeout: Duration,
) -> Result<T, TransportError> {
    let delay = Delay::new(timeout);
    pin_mut!(fut);
    match select(fut, delay).await {
        Either::Left((out, _)) => out,
        Either::Right(((), _)) => Err(TransportError::Timeout),
    }
}

async fn upgrade_socket<C, L, S, M>(
    layer: L,
    secure: S,
    mux: M,
    socket: C,
    inbound: bool,
) -> Result<M::Output, TransportError>
where
    C: ConnectionInfo + SplittableReadWrite,
    L: Upgrader<C> + Send,
    L::Output: ConnectionInfo + SplittableReadWrite,
    S: Upgrader<L::Output> + Send,
    S::Output: ConnectionInfo + SecureInfo + SplittableReadWrite,
    M: Upgrader<S::Output> + Send,
    M::Output: StreamMuxerEx,
{
    let info = layer
        .protocol_info()
        .into_iter()
        .next()
        .ok_or(TransportError::Internal("layer upgrader with no protocol"))?;
    let layered = if inbound {
        layer.upgrade_inbound(socket, info).await?
    } else {
        layer.upgrade_outbound(socket, info).await?
    };
    trace!("layer stage done");

    let secure = Multistream::new(secure);
    let secured = if inbound {
        secure.select_inbound(layered).await?
    } else {
        secure.select_outbound(layered).await?
    };
    trace!("security stage done, remote {}", secured.remote_peer());

    let mux = Multistream::new(mux);
    let muxed = if inbound {
        mux.select_inbound(secured).await?
    } else {
        mux.select_outbound(secured).await?
    };
    trace!("muxer stage done");
    Ok(muxed)
}

/// A `TransportUpgrade` is a `Transport` that wraps another `Transport` and
/// adds upgrade capabilities to all inbound and outbound connections.
#[derive(Debug, Clone)]
pub struct TransportUpgrade<InnerTrans, L, S, M> {
    inner: InnerTrans,
    layer: L,
    secure: S,
    mux: M,
    timeout: Duration,
}

impl<InnerTrans, S, M> TransportUpgrade<InnerTrans, DummyUpgrader, S, M> {
    /// Wraps a transport, negotiating `secure` then `mux` on every
    /// connection. No layer adaptors.
    pub fn new(inner: InnerTrans, mux: M, secure: S) -> Self {
        TransportUpgrade {
            inner,
            layer: DummyUpgrader::new(),
            secure,
            mux,
            timeout: DEFAULT_UPGRADE_TIMEOUT,
        }
    }
}

impl<InnerTrans, L, S, M> TransportUpgrade<InnerTrans, L, S, M> {
    /// Inserts a layer adaptor between the raw connection and the security
    /// stage. Layers apply unconditionally, without negotiation.
    pub fn with_layer<L2>(self, layer: L2) -> TransportUpgrade<InnerTrans, L2, S, M> {
        TransportUpgrade {
            inner: self.inner,
            layer,
            secure: self.secure,
            mux: self.mux,
            timeout: self.timeout,
        }
    }

    /// Overrides the upgrade timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl<InnerTrans, L, S, M> Transport for TransportUpgrade<InnerTrans, L, S, M>
where
    InnerTrans: Transport + Send,
    InnerTrans::Output: ConnectionInfo + SplittableReadWrite,
    L: Upgrader<InnerTrans::Output> + Clone + Send + Sync + 'static,
    L::Output: ConnectionInfo + SplittableReadWrite,
    S: Upgrader<L::Output> + Clone + Send + Sync + 'static,
    S::Output: ConnectionInfo + SecureInfo + SplittableReadWrite,
    M: Upgrader<S::Output> + Clone + Send + Sync + 'static,
    M::Output: StreamMuxerEx + 'static,
{
    type Output = M::Output;
    type Listener = ListenerUpgrade<InnerTrans::Listener, L, S, M>;

    fn listen_on(self, addr: Multiaddr) -> Result<Self::Listener, TransportError> {
        let inner_listener = self.inner.listen_on(addr)?;
        Ok(ListenerUpgrade {
            inner: inner_listener,
            layer: self.layer,
            secure: self.secure,
            mux: self.mux,
            timeout: self.timeout,
        })
    }

    async fn dial(self, addr: Multiaddr) -> Result<Self::Output, TransportError> {
        let socket = self.inner.dial(addr).await?;
        trace!("raw connection established, upgrading...");
        timed(
            upgrade_socket(self.layer, self.secure, self.mux, socket, false),
            self.timeout,
        )
        .await
    }

    fn can_dial(&self, addr: &Multiaddr) -> bool {
        self.inner.can_dial(addr)
    }
}

pub struct ListenerUpgrade<InnerListener, L, S, M> {
    inner: InnerListener,
    layer: L,
    secure: S,
    mux: M,
    timeout: Duration,
}

#[async_trait]
impl<InnerListener, L, S, M> TransportListener for ListenerUpgrade<InnerListener, L, S, M>
where
    InnerListener: TransportListener + Send,
    InnerListener::Output: ConnectionInfo + SplittableReadWrite,
    L: Upgrader<InnerListener::Output> + Clone + Send + Sync + 'static,
    L::Output: ConnectionInfo + SplittableReadWrite,
    S: Upgrader<L::Output> + Clone + Send + Sync + 'static,
    S::Output: ConnectionInfo + SecureInfo + SplittableReadWrite,
    M: Upgrader<S::Output> + Clone + Send + Sync + 'static,
    M::Output: StreamMuxerEx + 'static,
{
    type Output = M::Output;

    async fn accept(&mut self) -> Result<Self::Output, TransportError> {
        let socket = self.inner.accept().await?;
        trace!("got a new connection, upgrading...");
        timed(
            upgrade_socket(
                self.layer.clone(),
                self.secure.clone(),
                self.mux.clone(),
                socket,
                true,
            ),
            self.timeout,
        )
        .await
    }

    fn multi_addr(&self) -> Multiaddr {
        self.inner.multi_addr()
    }
}

#[async_trait]
impl<InnerTrans, L, S, M> TransportEx for TransportUpgrade<InnerTrans, L, S, M>
where
    InnerTrans: Transport + Clone + Send + Sync + 'static,
    InnerTrans::Output: ConnectionInfo + SplittableReadWrite,
    InnerTrans::Listener: 'static,
    L: Upgrader<InnerTrans::Output> + Clone + Send + Sync + 'static,
    L::Output: ConnectionInfo + SplittableReadWrite,
    S: Upgrader<L::Output> + Clone + Send + Sync + 'static,
    S::Output: ConnectionInfo + SecureInfo + SplittableReadWrite,
    M: Upgrader<S::Output> + Clone + Send + Sync + 'static,
    M::Output: StreamMuxerEx + 'static,
{
    async fn dial(&mut self, addr: Multiaddr) -> Result<IStreamMuxer, TransportError> {
        let muxer = Transport::dial(self.clone(), addr).await?;
        Ok(Box::new(muxer))
    }

    fn listen_on(&mut self, addr: Multiaddr) -> Result<IListenerEx, TransportError> {
        let listener = Transport::listen_on(self.clone(), addr)?;
        Ok(Box::new(ListenerExAdapter { inner: listener }))
    }

    fn can_dial(&self, addr: &Multiaddr) -> bool {
        self.inner.can_dial(addr)
    }

    fn box_clone(&self) -> ITransportEx {
        Box::new(self.clone())
    }
}

/// Boxes a typed listener into the object-safe surface the swarm uses.
struct ListenerExAdapter<L> {
    inner: L,
}

#[async_trait]
impl<L> TransportListenerEx for ListenerExAdapter<L>
where
    L: TransportListener + Send,
    L::Output: StreamMuxerEx + 'static,
{
    async fn accept(&mut self) -> Result<IStreamMuxer, TransportError> {
        let muxer = self.inner.accept().await?;
        Ok(Box::new(muxer))
    }

    fn multi_addr(&self) -> Multiaddr {
        self.inner.multi_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Keypair;
    use crate::security::PlainTextConfig;
    use crate::transport::memory::MemoryTransport;
    use futures::future::join;

    // The full raw-to-muxed promotion is exercised in the yamux and swarm
    // crates, which provide the muxer stage. Here the pipeline is checked
    // up to the security stage.
    #[test]
    fn secured_listener_and_dialer_agree_on_identities() {
        futures::executor::block_on(async {
            let key_l = Keypair::generate_ed25519();
            let key_d = Keypair::generate_ed25519();

            let mut raw_listener = MemoryTransport
                .listen_on("/memory/0".parse().unwrap())
                .unwrap();
            let addr = raw_listener.multi_addr();

            let l = async {
                let socket = raw_listener.accept().await.unwrap();
                Multistream::new(PlainTextConfig::new(key_l.clone()))
                    .select_inbound(socket)
                    .await
                    .unwrap()
            };
            let d = async {
                let socket = MemoryTransport.dial(addr.clone()).await.unwrap();
                Multistream::new(PlainTextConfig::new(key_d.clone()))
                    .select_outbound(socket)
                    .await
                    .unwrap()
            };

            let (l, d) = join(l, d).await;
            assert_eq!(l.remote_peer(), key_d.public().to_peer_id());
            assert_eq!(d.remote_peer(), key_l.public().to_peer_id());
        });
    }

    #[test]
    fn upgrade_timeout_fires() {
        futures::executor::block_on(async {
            let res: Result<(), TransportError> = timed(
                async {
                    Delay::new(Duration::from_secs(5)).await;
                    Ok(())
                },
                Duration::from_millis(50),
            )
            .await;
            assert!(matches!(res.unwrap_err(), TransportError::Timeout));
        });
    }
}
