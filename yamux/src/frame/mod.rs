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

pub mod header;
pub mod io;

use header::{Data, GoAway, GoAwayCode, Header, Ping, StreamId, Tag, WindowUpdate};

/// A yamux frame: a typed header plus, for DATA frames, a payload.
#[derive(Clone, Debug)]
pub struct Frame<T> {
    header: Header<T>,
    body: Vec<u8>,
}

impl<T> Frame<T> {
    pub fn new(header: Header<T>) -> Self {
        Frame {
            header,
            body: Vec::new(),
        }
    }

    pub fn header(&self) -> &Header<T> {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut Header<T> {
        &mut self.header
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_len(&self) -> u32 {
        // cast is safe because `Frame::data` rejects larger bodies
        self.body.len() as u32
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    pub(crate) fn body_mut(&mut self) -> &mut Vec<u8> {
        &mut self.body
    }

    /// Forgets the frame type.
    pub fn erased(self) -> Frame<()> {
        Frame {
            header: self.header.erased(),
            body: self.body,
        }
    }
}

impl Frame<()> {
    /// Reinterprets as a DATA frame. Caller checked the tag.
    pub(crate) fn into_data(self) -> Frame<Data> {
        debug_assert_eq!(self.header.tag(), Tag::Data);
        Frame {
            header: self.header.cast(),
            body: self.body,
        }
    }

    pub(crate) fn into_window_update(self) -> Frame<WindowUpdate> {
        debug_assert_eq!(self.header.tag(), Tag::WindowUpdate);
        Frame {
            header: self.header.cast(),
            body: self.body,
        }
    }

    pub(crate) fn into_ping(self) -> Frame<Ping> {
        debug_assert_eq!(self.header.tag(), Tag::Ping);
        Frame {
            header: self.header.cast(),
            body: self.body,
        }
    }

    pub(crate) fn into_go_away(self) -> Frame<GoAway> {
        debug_assert_eq!(self.header.tag(), Tag::GoAway);
        Frame {
            header: self.header.cast(),
            body: self.body,
        }
    }
}

impl Frame<Data> {
    /// A DATA frame carrying `body`. Fails if the body cannot be described
    /// by the 32-bit length field.
    pub fn data(id: StreamId, body: Vec<u8>) -> Result<Self, ()> {
        if body.len() > u32::MAX as usize {
            return Err(());
        }
        Ok(Frame {
            header: Header::data(id, body.len() as u32),
            body,
        })
    }

    /// An empty DATA frame with the FIN flag: half-closes the stream.
    pub fn close_stream(id: StreamId, ack: bool) -> Self {
        let mut header = Header::data(id, 0);
        header.fin();
        if ack {
            header.ack();
        }
        Frame {
            header,
            body: Vec::new(),
        }
    }

    /// An empty DATA frame with the RST flag: aborts the stream.
    pub fn reset_stream(id: StreamId) -> Self {
        let mut header = Header::data(id, 0);
        header.rst();
        Frame {
            header,
            body: Vec::new(),
        }
    }
}

impl Frame<WindowUpdate> {
    pub fn window_update(id: StreamId, credit: u32) -> Self {
        Frame {
            header: Header::window_update(id, credit),
            body: Vec::new(),
        }
    }
}

impl Frame<Ping> {
    pub fn ping(nonce: u32) -> Self {
        Frame {
            header: Header::ping(nonce),
            body: Vec::new(),
        }
    }
}

impl Frame<GoAway> {
    pub fn term() -> Self {
        Frame {
            header: Header::go_away(GoAwayCode::Normal),
            body: Vec::new(),
        }
    }

    pub fn protocol_error() -> Self {
        Frame {
            header: Header::go_away(GoAwayCode::ProtocolError),
            body: Vec::new(),
        }
    }

    pub fn internal_error() -> Self {
        Frame {
            header: Header::go_away(GoAwayCode::InternalError),
            body: Vec::new(),
        }
    }
}
