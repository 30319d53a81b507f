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

use std::{collections::VecDeque, io};

/// A receive buffer holding frame bodies as they arrived.
///
/// Keeping the bodies chunked avoids copying on the enqueue side; the
/// consumer drains across chunk boundaries.
#[derive(Debug, Default)]
pub(crate) struct Chunks {
    seq: VecDeque<Chunk>,
}

impl Chunks {
    pub(crate) fn new() -> Self {
        Chunks {
            seq: VecDeque::new(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.seq.iter().all(|c| c.is_empty())
    }

    /// The total number of unconsumed bytes.
    pub(crate) fn len(&self) -> usize {
        self.seq.iter().map(|c| c.len()).sum()
    }

    pub(crate) fn push(&mut self, bytes: Vec<u8>) {
        if !bytes.is_empty() {
            self.seq.push_back(Chunk {
                cursor: io::Cursor::new(bytes),
            })
        }
    }

    /// Copies up to `buf.len()` bytes into `buf`, consuming them.
    pub(crate) fn drain_into(&mut self, buf: &mut [u8]) -> usize {
        let mut n = 0;
        while n < buf.len() {
            match self.seq.front_mut() {
                Some(chunk) if chunk.is_empty() => {
                    self.seq.pop_front();
                }
                Some(chunk) => {
                    let k = std::cmp::min(chunk.len(), buf.len() - n);
                    buf[n..n + k].copy_from_slice(&chunk.as_ref()[..k]);
                    chunk.advance(k);
                    n += k;
                }
                None => break,
            }
        }
        n
    }

    /// Drops all buffered bytes.
    pub(crate) fn clear(&mut self) {
        self.seq.clear()
    }
}

/// One frame body with a consumption cursor.
#[derive(Debug)]
pub(crate) struct Chunk {
    cursor: io::Cursor<Vec<u8>>,
}

impl Chunk {
    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn len(&self) -> usize {
        self.cursor.get_ref().len() - self.offset()
    }

    fn offset(&self) -> usize {
        self.cursor.position() as usize
    }

    pub(crate) fn advance(&mut self, amount: usize) {
        debug_assert!(self.offset() + amount <= self.cursor.get_ref().len());
        self.cursor
            .set_position(self.cursor.position() + amount as u64);
    }
}

impl AsRef<[u8]> for Chunk {
    fn as_ref(&self) -> &[u8] {
        &self.cursor.get_ref()[self.offset()..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_crosses_chunk_boundaries() {
        let mut chunks = Chunks::new();
        chunks.push(vec![1, 2, 3]);
        chunks.push(vec![4, 5]);
        chunks.push(Vec::new());
        chunks.push(vec![6]);
        assert_eq!(chunks.len(), 6);

        let mut buf = [0u8; 4];
        assert_eq!(chunks.drain_into(&mut buf), 4);
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(chunks.len(), 2);

        let mut rest = [0u8; 8];
        assert_eq!(chunks.drain_into(&mut rest), 2);
        assert_eq!(&rest[..2], &[5, 6]);
        assert!(chunks.is_empty());
    }
}
