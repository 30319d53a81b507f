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

//! Asynchronous I/O traits used throughout the meshwork stack.
//!
//! [`ReadEx`] and [`WriteEx`] are the object-safe, async/await flavored
//! counterparts of `AsyncRead`/`AsyncWrite`. All connection layers (raw
//! transport sockets, secured connections, muxed streams, negotiated
//! substreams) speak these two traits, which is what lets an upgrade step
//! wrap any layer below it without caring about the concrete type.
//!
//! [`SplitEx`] splits a duplex connection into independently owned reading
//! and writing halves, which the stream muxer needs in order to run its
//! receive loop while other tasks write.
//!
//! Transports adapt their sockets by implementing the traits directly;
//! the futures I/O combinators are deliberately not adapted wholesale so
//! connection layers stay free to implement the traits for their own
//! wrapper types.

use async_trait::async_trait;
use std::io;

/// Read bytes asynchronously.
#[async_trait]
pub trait ReadEx: Send {
    /// Reads some bytes into `buf`, returning how many were read.
    ///
    /// Returns `Ok(0)` only if the remote has closed its sending side
    /// and no more data will ever arrive.
    async fn read2(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Reads exactly `buf.len()` bytes.
    ///
    /// An EOF before the buffer is full is reported as `UnexpectedEof`.
    async fn read_exact2(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let mut offset = 0;
        while offset < buf.len() {
            let n = self.read2(&mut buf[offset..]).await?;
            if n == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            offset += n;
        }
        Ok(())
    }
}

/// Write bytes asynchronously.
#[async_trait]
pub trait WriteEx: Send {
    /// Writes some bytes from `buf`, returning how many were accepted.
    async fn write2(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Writes the whole of `buf`.
    async fn write_all2(&mut self, buf: &[u8]) -> io::Result<()> {
        let mut offset = 0;
        while offset < buf.len() {
            let n = self.write2(&buf[offset..]).await?;
            if n == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }
            offset += n;
        }
        Ok(())
    }

    /// Flushes buffered data towards the remote.
    async fn flush2(&mut self) -> io::Result<()>;

    /// Closes the writing side. Closing an already closed writer is a no-op.
    async fn close2(&mut self) -> io::Result<()>;
}

/// Splits a duplex connection into a reading half and a writing half.
pub trait SplitEx {
    type Reader: ReadEx + Unpin + Send + 'static;
    type Writer: WriteEx + Unpin + Send + 'static;

    fn split(self) -> (Self::Reader, Self::Writer);
}

/// A duplex connection that can be read, written and split.
///
/// This is the bound required by the stream muxer.
pub trait SplittableReadWrite: ReadEx + WriteEx + SplitEx + Unpin + Send + 'static {}

impl<T: ReadEx + WriteEx + SplitEx + Unpin + Send + 'static> SplittableReadWrite for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;
    use futures::executor::block_on;

    // A reader that hands out one byte at a time.
    struct Trickle(Vec<u8>);

    #[async_trait]
    impl ReadEx for Trickle {
        async fn read2(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.0.is_empty() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.0.remove(0);
            Ok(1)
        }
    }

    #[test]
    fn read_exact_assembles_partial_reads() {
        block_on(async {
            let mut r = Trickle(vec![1, 2, 3, 4]);
            let mut buf = [0u8; 4];
            r.read_exact2(&mut buf).await.unwrap();
            assert_eq!(buf, [1, 2, 3, 4]);
        });
    }

    #[test]
    fn read_exact_reports_eof() {
        block_on(async {
            let mut r = Trickle(vec![1, 2]);
            let mut buf = [0u8; 4];
            let err = r.read_exact2(&mut buf).await.unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        });
    }

    struct Sink(mpsc::UnboundedSender<Vec<u8>>);

    #[async_trait]
    impl WriteEx for Sink {
        async fn write2(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(2);
            self.0
                .unbounded_send(buf[..n].to_vec())
                .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
            Ok(n)
        }
        async fn flush2(&mut self) -> io::Result<()> {
            Ok(())
        }
        async fn close2(&mut self) -> io::Result<()> {
            self.0.close_channel();
            Ok(())
        }
    }

    #[test]
    fn write_all_assembles_partial_writes() {
        block_on(async {
            let (tx, rx) = mpsc::unbounded();
            let mut w = Sink(tx);
            w.write_all2(&[1, 2, 3, 4, 5]).await.unwrap();
            w.close2().await.unwrap();
            let got: Vec<u8> = futures::StreamExt::collect::<Vec<_>>(rx).await.concat();
            assert_eq!(got, vec![1, 2, 3, 4, 5]);
        });
    }
}
