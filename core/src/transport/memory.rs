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

//! An in-process transport over channel pairs, addressed as `/memory/<n>`.
//!
//! There is no wire and no kernel involved, which makes this the transport
//! of choice for exercising the upgrade, muxing and swarm layers in tests.

use async_trait::async_trait;
use fnv::FnvHashMap;
use futures::channel::mpsc;
use futures::StreamExt;
use multiaddr::Protocol;
use once_cell::sync::Lazy;
use std::collections::VecDeque;
use std::io;
use std::sync::Mutex;

use meshwork_traits::{ReadEx, SplitEx, WriteEx};

use crate::transport::{ConnectionInfo, Transport, TransportError, TransportListener};
use crate::Multiaddr;

/// All currently bound memory listeners, keyed by port.
static HUB: Lazy<Mutex<FnvHashMap<u64, mpsc::UnboundedSender<MemoryConn>>>> =
    Lazy::new(Default::default);

fn memory_port(addr: &Multiaddr) -> Option<u64> {
    let mut iter = addr.iter();
    match (iter.next(), iter.next()) {
        (Some(Protocol::Memory(port)), None) => Some(port),
        _ => None,
    }
}

fn memory_addr(port: u64) -> Multiaddr {
    let mut addr = Multiaddr::empty();
    addr.push(Protocol::Memory(port));
    addr
}

/// Builds a connected pair of memory connections.
///
/// Exposed for tests elsewhere in the stack that need a duplex pipe
/// without going through dial/listen.
pub fn pipe(local: Multiaddr, remote: Multiaddr) -> (MemoryConn, MemoryConn) {
    let (tx_a, rx_b) = mpsc::unbounded();
    let (tx_b, rx_a) = mpsc::unbounded();
    let a = MemoryConn::new(rx_a, tx_a, local.clone(), remote.clone());
    let b = MemoryConn::new(rx_b, tx_b, remote, local);
    (a, b)
}

/// The transport itself. Stateless; all bindings live in the process-wide
/// hub.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryTransport;

#[async_trait]
impl Transport for MemoryTransport {
    type Output = MemoryConn;
    type Listener = MemoryListener;

    fn listen_on(self, addr: Multiaddr) -> Result<Self::Listener, TransportError> {
        let port = memory_port(&addr).ok_or(TransportError::MultiaddrNotSupported(addr))?;
        let mut hub = HUB.lock().expect("hub lock");
        let port = if port == 0 {
            loop {
                let candidate = rand::random::<u64>().saturating_add(1);
                if !hub.contains_key(&candidate) {
                    break candidate;
                }
            }
        } else if hub.contains_key(&port) {
            return Err(TransportError::IoError(io::ErrorKind::AddrInUse.into()));
        } else {
            port
        };
        let (tx, rx) = mpsc::unbounded();
        hub.insert(port, tx);
        Ok(MemoryListener { port, incoming: rx })
    }

    async fn dial(self, addr: Multiaddr) -> Result<Self::Output, TransportError> {
        let port =
            memory_port(&addr).ok_or_else(|| TransportError::MultiaddrNotSupported(addr.clone()))?;
        let sender = HUB
            .lock()
            .expect("hub lock")
            .get(&port)
            .cloned()
            .ok_or_else(|| TransportError::Unreachable(addr.clone()))?;
        let local = memory_addr(rand::random::<u64>().saturating_add(1));
        let (ours, theirs) = pipe(local, memory_addr(port));
        sender
            .unbounded_send(theirs)
            .map_err(|_| TransportError::Unreachable(addr))?;
        Ok(ours)
    }

    fn can_dial(&self, addr: &Multiaddr) -> bool {
        memory_port(addr).is_some()
    }
}

pub struct MemoryListener {
    port: u64,
    incoming: mpsc::UnboundedReceiver<MemoryConn>,
}

#[async_trait]
impl TransportListener for MemoryListener {
    type Output = MemoryConn;

    async fn accept(&mut self) -> Result<Self::Output, TransportError> {
        self.incoming
            .next()
            .await
            .ok_or(TransportError::ConnectionClosed)
    }

    fn multi_addr(&self) -> Multiaddr {
        memory_addr(self.port)
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        HUB.lock().expect("hub lock").remove(&self.port);
    }
}

/// One end of an in-process duplex pipe.
pub struct MemoryConn {
    reader: MemoryReadHalf,
    writer: MemoryWriteHalf,
    la: Multiaddr,
    ra: Multiaddr,
}

impl std::fmt::Debug for MemoryConn {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("MemoryConn")
            .field("la", &self.la)
            .field("ra", &self.ra)
            .finish()
    }
}

impl MemoryConn {
    fn new(
        rx: mpsc::UnboundedReceiver<Vec<u8>>,
        tx: mpsc::UnboundedSender<Vec<u8>>,
        la: Multiaddr,
        ra: Multiaddr,
    ) -> Self {
        MemoryConn {
            reader: MemoryReadHalf {
                incoming: rx,
                pending: VecDeque::new(),
            },
            writer: MemoryWriteHalf { outgoing: tx },
            la,
            ra,
        }
    }
}

#[async_trait]
impl ReadEx for MemoryConn {
    async fn read2(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read2(buf).await
    }
}

#[async_trait]
impl WriteEx for MemoryConn {
    async fn write2(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write2(buf).await
    }

    async fn flush2(&mut self) -> io::Result<()> {
        self.writer.flush2().await
    }

    async fn close2(&mut self) -> io::Result<()> {
        self.writer.close2().await
    }
}

impl SplitEx for MemoryConn {
    type Reader = MemoryReadHalf;
    type Writer = MemoryWriteHalf;

    fn split(self) -> (Self::Reader, Self::Writer) {
        (self.reader, self.writer)
    }
}

impl ConnectionInfo for MemoryConn {
    fn local_multiaddr(&self) -> Multiaddr {
        self.la.clone()
    }

    fn remote_multiaddr(&self) -> Multiaddr {
        self.ra.clone()
    }
}

pub struct MemoryReadHalf {
    incoming: mpsc::UnboundedReceiver<Vec<u8>>,
    pending: VecDeque<u8>,
}

#[async_trait]
impl ReadEx for MemoryReadHalf {
    async fn read2(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.pending.is_empty() {
            match self.incoming.next().await {
                Some(bytes) => self.pending.extend(bytes),
                // sender gone: EOF
                None => return Ok(0),
            }
        }
        let mut n = 0;
        while n < buf.len() {
            match self.pending.pop_front() {
                Some(byte) => {
                    buf[n] = byte;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }
}

pub struct MemoryWriteHalf {
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
}

#[async_trait]
impl WriteEx for MemoryWriteHalf {
    async fn write2(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.outgoing
            .unbounded_send(buf.to_vec())
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        Ok(buf.len())
    }

    async fn flush2(&mut self) -> io::Result<()> {
        Ok(())
    }

    async fn close2(&mut self) -> io::Result<()> {
        self.outgoing.close_channel();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    #[test]
    fn dial_and_listen() {
        block_on(async {
            let mut listener = MemoryTransport.listen_on(memory_addr(0)).unwrap();
            let addr = listener.multi_addr();

            let dialer = async move {
                let mut conn = MemoryTransport.dial(addr).await.unwrap();
                conn.write_all2(b"hello").await.unwrap();
                conn.close2().await.unwrap();
            };

            let listening = async move {
                let mut conn = listener.accept().await.unwrap();
                let mut buf = [0u8; 5];
                conn.read_exact2(&mut buf).await.unwrap();
                assert_eq!(&buf, b"hello");
                // sender closed, next read is EOF
                let mut rest = [0u8; 1];
                assert_eq!(conn.read2(&mut rest).await.unwrap(), 0);
            };

            futures::future::join(dialer, listening).await;
        });
    }

    #[test]
    fn dial_unbound_port_is_unreachable() {
        block_on(async {
            let err = MemoryTransport.dial(memory_addr(u64::MAX)).await.unwrap_err();
            assert!(matches!(err, TransportError::Unreachable(_)));
        });
    }

    #[test]
    fn listener_drop_releases_port() {
        let listener = MemoryTransport.listen_on(memory_addr(0)).unwrap();
        let addr = listener.multi_addr();
        drop(listener);
        // rebinding the same port must now succeed
        let again = MemoryTransport.listen_on(addr);
        assert!(again.is_ok());
    }
}
