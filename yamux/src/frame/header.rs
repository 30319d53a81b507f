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

//! The yamux frame header.
//!
//! Every frame starts with the same 12 bytes, big-endian throughout:
//!
//! ```text
//! byte  0      version (0)
//! byte  1      type: 0=DATA, 1=WINDOW_UPDATE, 2=PING, 3=GO_AWAY
//! bytes 2..3   flags: SYN=1, ACK=2, FIN=4, RST=8
//! bytes 4..7   stream id (0 addresses the connection itself)
//! bytes 8..11  length: payload bytes for DATA, window delta for
//!              WINDOW_UPDATE, opaque value for PING, error code for GO_AWAY
//! ```

use std::fmt;
use std::marker::PhantomData;

/// The serialized header size in bytes.
pub const HEADER_SIZE: usize = 12;

/// The only version this implementation speaks.
const VERSION: u8 = 0;

/// The stream id addressing the connection itself (ping, go away).
pub const CONNECTION_ID: StreamId = StreamId(0);

/// The identifier of a logical stream within one connection.
///
/// Odd ids belong to streams opened by the connection initiator, even ids
/// to streams opened by the acceptor; `0` is the connection itself.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct StreamId(u32);

impl StreamId {
    pub(crate) fn new(val: u32) -> Self {
        StreamId(val)
    }

    /// Was this stream opened by the connection initiator?
    pub fn is_client(self) -> bool {
        self.0 % 2 == 1
    }

    /// Was this stream opened by the connection acceptor?
    pub fn is_server(self) -> bool {
        !self.is_session() && self.0 % 2 == 0
    }

    /// Does this id address the connection itself?
    pub fn is_session(self) -> bool {
        self == CONNECTION_ID
    }

    pub fn val(self) -> u32 {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl nohash_hasher::IsEnabled for StreamId {}

/// The type of a frame.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Tag {
    Data,
    WindowUpdate,
    Ping,
    GoAway,
}

impl Tag {
    fn val(self) -> u8 {
        match self {
            Tag::Data => 0,
            Tag::WindowUpdate => 1,
            Tag::Ping => 2,
            Tag::GoAway => 3,
        }
    }
}

/// A set of header flags.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Flags(u16);

/// Marks the first frame of a new stream.
pub const SYN: Flags = Flags(1);
/// Acknowledges a new stream.
pub const ACK: Flags = Flags(2);
/// Half-closes the sender's side of the stream.
pub const FIN: Flags = Flags(4);
/// Aborts the stream immediately.
pub const RST: Flags = Flags(8);

const MAX_FLAG_BITS: u16 = 0xF;

impl Flags {
    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn val(self) -> u16 {
        self.0
    }
}

impl std::ops::BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Self::Output {
        Flags(self.0 | rhs.0)
    }
}

/// Error codes carried by GO_AWAY frames.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum GoAwayCode {
    /// Normal termination.
    Normal,
    /// The remote violated the protocol.
    ProtocolError,
    /// The remote hit an internal error.
    InternalError,
}

impl GoAwayCode {
    pub fn val(self) -> u32 {
        match self {
            GoAwayCode::Normal => 0,
            GoAwayCode::ProtocolError => 1,
            GoAwayCode::InternalError => 2,
        }
    }

    pub fn from_val(val: u32) -> Option<Self> {
        match val {
            0 => Some(GoAwayCode::Normal),
            1 => Some(GoAwayCode::ProtocolError),
            2 => Some(GoAwayCode::InternalError),
            _ => None,
        }
    }
}

/// Marker type for DATA headers.
#[derive(Clone, Copy, Debug)]
pub enum Data {}

/// Marker type for WINDOW_UPDATE headers.
#[derive(Clone, Copy, Debug)]
pub enum WindowUpdate {}

/// Marker type for PING headers.
#[derive(Clone, Copy, Debug)]
pub enum Ping {}

/// Marker type for GO_AWAY headers.
#[derive(Clone, Copy, Debug)]
pub enum GoAway {}

/// A typed frame header. The phantom parameter tracks which frame type the
/// header belongs to; `Header<()>` is a freshly decoded header of any type.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Header<T> {
    tag: Tag,
    flags: Flags,
    stream_id: StreamId,
    length: u32,
    _marker: PhantomData<T>,
}

impl<T> fmt::Debug for Header<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Header {{ {:?}, id: {}, flags: {:#b}, len: {} }}",
            self.tag,
            self.stream_id,
            self.flags.val(),
            self.length
        )
    }
}

impl<T> fmt::Display for Header<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "({:?} {} flags={:#b} len={})",
            self.tag,
            self.stream_id,
            self.flags.val(),
            self.length
        )
    }
}

impl<T> Header<T> {
    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn len(&self) -> u32 {
        self.length
    }

    pub fn syn(&mut self) {
        self.flags = self.flags | SYN;
    }

    pub fn ack(&mut self) {
        self.flags = self.flags | ACK;
    }

    pub fn fin(&mut self) {
        self.flags = self.flags | FIN;
    }

    pub fn rst(&mut self) {
        self.flags = self.flags | RST;
    }

    /// Forgets the type information.
    pub(crate) fn erased(self) -> Header<()> {
        Header {
            tag: self.tag,
            flags: self.flags,
            stream_id: self.stream_id,
            length: self.length,
            _marker: PhantomData,
        }
    }

    pub(crate) fn cast<U>(self) -> Header<U> {
        Header {
            tag: self.tag,
            flags: self.flags,
            stream_id: self.stream_id,
            length: self.length,
            _marker: PhantomData,
        }
    }
}

impl Header<Data> {
    pub fn data(id: StreamId, len: u32) -> Self {
        Header {
            tag: Tag::Data,
            flags: Flags(0),
            stream_id: id,
            length: len,
            _marker: PhantomData,
        }
    }
}

impl Header<WindowUpdate> {
    pub fn window_update(id: StreamId, credit: u32) -> Self {
        Header {
            tag: Tag::WindowUpdate,
            flags: Flags(0),
            stream_id: id,
            length: credit,
            _marker: PhantomData,
        }
    }

    /// The window delta this update grants.
    pub fn credit(&self) -> u32 {
        self.length
    }
}

impl Header<Ping> {
    pub fn ping(nonce: u32) -> Self {
        Header {
            tag: Tag::Ping,
            flags: Flags(0),
            stream_id: CONNECTION_ID,
            length: nonce,
            _marker: PhantomData,
        }
    }

    /// The opaque value to be echoed back.
    pub fn nonce(&self) -> u32 {
        self.length
    }
}

impl Header<GoAway> {
    pub fn go_away(code: GoAwayCode) -> Self {
        Header {
            tag: Tag::GoAway,
            flags: Flags(0),
            stream_id: CONNECTION_ID,
            length: code.val(),
            _marker: PhantomData,
        }
    }

    pub fn error_code(&self) -> Option<GoAwayCode> {
        GoAwayCode::from_val(self.length)
    }
}

/// Serializes a header into its 12-byte wire form.
pub fn encode<T>(hdr: &Header<T>) -> [u8; HEADER_SIZE] {
    let mut buf = [0; HEADER_SIZE];
    buf[0] = VERSION;
    buf[1] = hdr.tag.val();
    buf[2..4].copy_from_slice(&hdr.flags.val().to_be_bytes());
    buf[4..8].copy_from_slice(&hdr.stream_id.val().to_be_bytes());
    buf[8..12].copy_from_slice(&hdr.length.to_be_bytes());
    buf
}

/// Parses the 12-byte wire form into a header.
pub fn decode(buf: &[u8; HEADER_SIZE]) -> Result<Header<()>, HeaderDecodeError> {
    if buf[0] != VERSION {
        return Err(HeaderDecodeError::Version(buf[0]));
    }
    let tag = match buf[1] {
        0 => Tag::Data,
        1 => Tag::WindowUpdate,
        2 => Tag::Ping,
        3 => Tag::GoAway,
        t => return Err(HeaderDecodeError::Type(t)),
    };
    let flags = u16::from_be_bytes([buf[2], buf[3]]);
    if flags & !MAX_FLAG_BITS != 0 {
        return Err(HeaderDecodeError::Flags(flags));
    }
    Ok(Header {
        tag,
        flags: Flags(flags),
        stream_id: StreamId(u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]])),
        length: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        _marker: PhantomData,
    })
}

/// Errors while decoding a frame header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderDecodeError {
    /// Unknown protocol version.
    Version(u8),
    /// Unknown frame type.
    Type(u8),
    /// Unknown flag bits were set.
    Flags(u16),
}

impl fmt::Display for HeaderDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HeaderDecodeError::Version(v) => write!(f, "unknown version {}", v),
            HeaderDecodeError::Type(t) => write!(f, "unknown frame type {}", t),
            HeaderDecodeError::Flags(fl) => write!(f, "unknown flags {:#x}", fl),
        }
    }
}

impl std::error::Error for HeaderDecodeError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn arbitrary_header(i: u32) -> Header<()> {
        Header {
            tag: match i % 4 {
                0 => Tag::Data,
                1 => Tag::WindowUpdate,
                2 => Tag::Ping,
                _ => Tag::GoAway,
            },
            flags: Flags((i % 16) as u16),
            stream_id: StreamId(i.wrapping_mul(2654435761)),
            length: i.wrapping_mul(40503),
            _marker: PhantomData,
        }
    }

    #[test]
    fn encode_decode_identity() {
        for i in 0..256 {
            let hdr = arbitrary_header(i);
            let bytes = encode(&hdr);
            let back = decode(&bytes).unwrap();
            assert_eq!(hdr, back, "roundtrip failed for {:?}", hdr);
            // byte-exactness both ways
            assert_eq!(bytes, encode(&back));
        }
    }

    #[test]
    fn rejects_bad_version() {
        let mut bytes = encode(&Header::ping(1));
        bytes[0] = 1;
        assert_eq!(decode(&bytes), Err(HeaderDecodeError::Version(1)));
    }

    #[test]
    fn rejects_bad_type() {
        let mut bytes = encode(&Header::ping(1));
        bytes[1] = 4;
        assert_eq!(decode(&bytes), Err(HeaderDecodeError::Type(4)));
    }

    #[test]
    fn rejects_unknown_flags() {
        let mut bytes = encode(&Header::ping(1));
        bytes[2] = 0xff;
        assert!(matches!(decode(&bytes), Err(HeaderDecodeError::Flags(_))));
    }

    #[test]
    fn stream_id_parity() {
        assert!(StreamId(1).is_client());
        assert!(StreamId(2).is_server());
        assert!(StreamId(0).is_session());
        assert!(!StreamId(0).is_server());
    }
}
