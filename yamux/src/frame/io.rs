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

use log::trace;
use std::{fmt, io};

use meshwork_traits::{ReadEx, WriteEx};

use crate::connection::Id;
use crate::frame::header::{self, Tag, HEADER_SIZE};
use crate::frame::Frame;

/// Frame-oriented I/O over one half of the underlying connection.
pub struct IO<T> {
    id: Id,
    io: T,
    max_body_len: usize,
}

impl<T> IO<T> {
    pub(crate) fn new(id: Id, io: T, max_body_len: usize) -> Self {
        IO {
            id,
            io,
            max_body_len,
        }
    }
}

impl<T: WriteEx + Unpin> IO<T> {
    /// Serializes one frame onto the wire.
    pub(crate) async fn send_frame<A>(&mut self, frame: &Frame<A>) -> io::Result<()> {
        trace!("{}: sending: {}", self.id, frame.header());
        let header = header::encode(frame.header());
        self.io.write_all2(&header).await?;
        if !frame.body().is_empty() {
            self.io.write_all2(frame.body()).await?;
        }
        self.io.flush2().await
    }

    pub(crate) async fn close(&mut self) -> io::Result<()> {
        self.io.close2().await
    }
}

impl<T: ReadEx + Unpin> IO<T> {
    /// Reads the next frame off the wire.
    ///
    /// `Ok(None)` signals a clean EOF at a frame boundary.
    pub(crate) async fn recv_frame(&mut self) -> Result<Option<Frame<()>>, FrameDecodeError> {
        let mut header_buf = [0; HEADER_SIZE];

        // distinguish EOF-at-boundary from a truncated header
        let n = self.io.read2(&mut header_buf).await?;
        if n == 0 {
            return Ok(None);
        }
        self.io.read_exact2(&mut header_buf[n..]).await?;

        let header = header::decode(&header_buf)?;
        trace!("{}: received: {}", self.id, header);

        let body = if header.tag() == Tag::Data {
            let len = header.len() as usize;
            if len > self.max_body_len {
                return Err(FrameDecodeError::FrameTooLarge(len));
            }
            let mut body = vec![0; len];
            self.io.read_exact2(&mut body).await?;
            body
        } else {
            // non-DATA frames carry their value in the length field and
            // have no payload
            Vec::new()
        };

        let mut frame = Frame::new(header);
        *frame.body_mut() = body;
        Ok(Some(frame))
    }
}

/// Errors while reading a frame off the wire.
#[derive(Debug)]
pub enum FrameDecodeError {
    /// The socket failed.
    Io(io::Error),
    /// The header was malformed.
    Header(header::HeaderDecodeError),
    /// A DATA frame declared more payload than permitted.
    FrameTooLarge(usize),
}

impl fmt::Display for FrameDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FrameDecodeError::Io(e) => write!(f, "i/o error: {}", e),
            FrameDecodeError::Header(e) => write!(f, "header decode error: {}", e),
            FrameDecodeError::FrameTooLarge(n) => write!(f, "frame body of length {} too large", n),
        }
    }
}

impl std::error::Error for FrameDecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FrameDecodeError::Io(e) => Some(e),
            FrameDecodeError::Header(e) => Some(e),
            FrameDecodeError::FrameTooLarge(_) => None,
        }
    }
}

impl From<io::Error> for FrameDecodeError {
    fn from(e: io::Error) -> Self {
        FrameDecodeError::Io(e)
    }
}

impl From<header::HeaderDecodeError> for FrameDecodeError {
    fn from(e: header::HeaderDecodeError) -> Self {
        FrameDecodeError::Header(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::header::StreamId;
    use futures::executor::block_on;
    use meshwork_core::transport::memory;
    use meshwork_core::Multiaddr;
    use meshwork_traits::SplitEx;

    #[test]
    fn frame_roundtrip_over_pipe() {
        block_on(async {
            let (a, b) = memory::pipe(Multiaddr::empty(), Multiaddr::empty());
            let (_, wa) = a.split();
            let (rb, _b_writer) = b.split();
            let mut out = IO::new(Id::random(), wa, 1024);
            let mut inp = IO::new(Id::random(), rb, 1024);

            let frame = Frame::data(StreamId::new(3), b"hello frame".to_vec()).unwrap();
            out.send_frame(&frame).await.unwrap();

            let got = inp.recv_frame().await.unwrap().unwrap();
            assert_eq!(got.header().stream_id(), StreamId::new(3));
            assert_eq!(got.header().tag(), Tag::Data);
            assert_eq!(got.body(), b"hello frame");
        });
    }

    #[test]
    fn eof_at_boundary_is_none() {
        block_on(async {
            let (a, b) = memory::pipe(Multiaddr::empty(), Multiaddr::empty());
            let (rb, _w) = b.split();
            let mut inp = IO::new(Id::random(), rb, 1024);
            drop(a);
            assert!(inp.recv_frame().await.unwrap().is_none());
        });
    }

    #[test]
    fn oversized_body_is_rejected() {
        block_on(async {
            let (a, b) = memory::pipe(Multiaddr::empty(), Multiaddr::empty());
            let (_, wa) = a.split();
            let (rb, _w) = b.split();
            let mut out = IO::new(Id::random(), wa, 1 << 20);
            let mut inp = IO::new(Id::random(), rb, 16);

            let frame = Frame::data(StreamId::new(1), vec![0; 64]).unwrap();
            out.send_frame(&frame).await.unwrap();

            assert!(matches!(
                inp.recv_frame().await,
                Err(FrameDecodeError::FrameTooLarge(64))
            ));
        });
    }
}
