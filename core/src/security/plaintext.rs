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

//! The plaintext "security" adaptor.
//!
//! Both sides exchange their marshalled public keys, derive each other's
//! peer id, and carry on over the raw socket. Nothing is encrypted; the
//! point is to establish authenticated-shaped identity information so the
//! upper layers behave exactly as they do above a real handshake.

use async_trait::async_trait;
use log::trace;
use std::io;
use unsigned_varint::{decode, encode};

use meshwork_traits::{ReadEx, SplitEx, SplittableReadWrite, WriteEx};

use crate::identity::{Keypair, PublicKey};
use crate::secure_io::SecureInfo;
use crate::transport::{ConnectionInfo, TransportError, UpgradeStage};
use crate::upgrade::{UpgradeInfo, Upgrader};
use crate::{Multiaddr, PeerId};

/// A key exchange message may not exceed this.
const MAX_KEY_LEN: usize = 4096;

/// Configuration for the plaintext adaptor: the local identity to present.
#[derive(Clone)]
pub struct PlainTextConfig {
    key: Keypair,
}

impl PlainTextConfig {
    pub fn new(key: Keypair) -> Self {
        PlainTextConfig { key }
    }

    async fn handshake<T>(self, mut socket: T) -> Result<PlainTextConnection<T>, TransportError>
    where
        T: ConnectionInfo + SplittableReadWrite,
    {
        let local_key = self.key.public().marshal();
        let mut len_buf = encode::u64_buffer();
        let mut hello = Vec::with_capacity(local_key.len() + 4);
        hello.extend_from_slice(encode::u64(local_key.len() as u64, &mut len_buf));
        hello.extend_from_slice(&local_key);
        socket.write_all2(&hello).await.map_err(handshake_err)?;
        socket.flush2().await.map_err(handshake_err)?;

        let remote_key = read_key_message(&mut socket).await?;
        let remote_pub_key =
            PublicKey::unmarshal(&remote_key).map_err(|e| {
                TransportError::UpgradeFailed(UpgradeStage::Security, Box::new(e))
            })?;

        trace!(
            "plaintext exchange done, remote is {}",
            remote_pub_key.to_peer_id()
        );

        Ok(PlainTextConnection::new(socket, self.key, remote_pub_key))
    }
}

fn handshake_err(e: io::Error) -> TransportError {
    TransportError::UpgradeFailed(UpgradeStage::Security, Box::new(e))
}

async fn read_key_message<T: ReadEx>(socket: &mut T) -> Result<Vec<u8>, TransportError> {
    // varint length, at most 9 bytes, read byte-wise
    let mut prefix = Vec::with_capacity(9);
    let len = loop {
        let mut byte = [0u8; 1];
        socket.read_exact2(&mut byte).await.map_err(handshake_err)?;
        prefix.push(byte[0]);
        match decode::u64(&prefix) {
            Ok((len, _)) => break len as usize,
            Err(decode::Error::Insufficient) if prefix.len() < 9 => continue,
            Err(_) => {
                return Err(TransportError::UpgradeFailed(
                    UpgradeStage::Security,
                    "invalid key length prefix".into(),
                ))
            }
        }
    };
    if len == 0 || len > MAX_KEY_LEN {
        return Err(TransportError::UpgradeFailed(
            UpgradeStage::Security,
            "unreasonable key length".into(),
        ));
    }
    let mut key = vec![0u8; len];
    socket.read_exact2(&mut key).await.map_err(handshake_err)?;
    Ok(key)
}

impl UpgradeInfo for PlainTextConfig {
    type Info = &'static [u8];

    fn protocol_info(&self) -> Vec<Self::Info> {
        vec![b"/plaintext/1.0.0"]
    }
}

#[async_trait]
impl<T> Upgrader<T> for PlainTextConfig
where
    T: ConnectionInfo + SplittableReadWrite,
{
    type Output = PlainTextConnection<T>;

    async fn upgrade_inbound(
        self,
        socket: T,
        _info: <Self as UpgradeInfo>::Info,
    ) -> Result<Self::Output, TransportError> {
        self.handshake(socket).await
    }

    async fn upgrade_outbound(
        self,
        socket: T,
        _info: <Self as UpgradeInfo>::Info,
    ) -> Result<Self::Output, TransportError> {
        self.handshake(socket).await
    }
}

/// A connection that has completed the plaintext exchange.
///
/// I/O passes straight through to the socket below; only the identity
/// information is new.
pub struct PlainTextConnection<T> {
    inner: T,
    la: Multiaddr,
    ra: Multiaddr,
    local_priv_key: Keypair,
    local_peer_id: PeerId,
    remote_pub_key: PublicKey,
    remote_peer_id: PeerId,
}

impl<T: ConnectionInfo> PlainTextConnection<T> {
    fn new(inner: T, local_priv_key: Keypair, remote_pub_key: PublicKey) -> Self {
        let la = inner.local_multiaddr();
        let ra = inner.remote_multiaddr();
        let local_peer_id = local_priv_key.public().to_peer_id();
        let remote_peer_id = remote_pub_key.to_peer_id();
        PlainTextConnection {
            inner,
            la,
            ra,
            local_priv_key,
            local_peer_id,
            remote_pub_key,
            remote_peer_id,
        }
    }
}

impl<T> std::fmt::Debug for PlainTextConnection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("PlainTextConnection")
            .field("remote", &self.remote_peer_id)
            .finish()
    }
}

#[async_trait]
impl<T: SplittableReadWrite> ReadEx for PlainTextConnection<T> {
    async fn read2(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read2(buf).await
    }
}

#[async_trait]
impl<T: SplittableReadWrite> WriteEx for PlainTextConnection<T> {
    async fn write2(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write2(buf).await
    }

    async fn flush2(&mut self) -> io::Result<()> {
        self.inner.flush2().await
    }

    async fn close2(&mut self) -> io::Result<()> {
        self.inner.close2().await
    }
}

impl<T: SplittableReadWrite> SplitEx for PlainTextConnection<T> {
    type Reader = T::Reader;
    type Writer = T::Writer;

    fn split(self) -> (Self::Reader, Self::Writer) {
        self.inner.split()
    }
}

impl<T> SecureInfo for PlainTextConnection<T> {
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

impl<T> ConnectionInfo for PlainTextConnection<T> {
    fn local_multiaddr(&self) -> Multiaddr {
        self.la.clone()
    }

    fn remote_multiaddr(&self) -> Multiaddr {
        self.ra.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory;
    use futures::executor::block_on;
    use futures::future::join;

    #[test]
    fn key_exchange_establishes_identities() {
        block_on(async {
            let (a, b) = memory::pipe(Multiaddr::empty(), Multiaddr::empty());
            let key_a = Keypair::generate_ed25519();
            let key_b = Keypair::generate_ed25519();

            let out = PlainTextConfig::new(key_a.clone()).handshake(a);
            let inb = PlainTextConfig::new(key_b.clone()).handshake(b);
            let (out, inb) = join(out, inb).await;
            let out = out.unwrap();
            let inb = inb.unwrap();

            assert_eq!(out.remote_peer(), key_b.public().to_peer_id());
            assert_eq!(inb.remote_peer(), key_a.public().to_peer_id());
            assert_eq!(out.local_peer(), inb.remote_peer());
        });
    }

    #[test]
    fn data_passes_through() {
        block_on(async {
            let (a, b) = memory::pipe(Multiaddr::empty(), Multiaddr::empty());
            let out = PlainTextConfig::new(Keypair::generate_ed25519()).handshake(a);
            let inb = PlainTextConfig::new(Keypair::generate_ed25519()).handshake(b);
            let (out, inb) = join(out, inb).await;
            let mut out = out.unwrap();
            let mut inb = inb.unwrap();

            out.write_all2(b"ping").await.unwrap();
            let mut buf = [0u8; 4];
            inb.read_exact2(&mut buf).await.unwrap();
            assert_eq!(&buf, b"ping");
        });
    }
}
