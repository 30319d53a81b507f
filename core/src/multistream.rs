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

//! The multistream-select negotiation dialogue.
//!
//! Both sides of a freshly opened channel run this line protocol to agree
//! on which protocol to speak next. Each message on the wire is
//! `uvarint(|p|+1) || p || '\n'`. The opening exchange is the header
//! `/multistream/1.0.0`; `na` rejects a proposal and `ls` asks the
//! responder for its protocol list.
//!
//! The initiator proposes its candidates in preference order via
//! [`Negotiator::select_one`]; the responder answers proposals via
//! [`Negotiator::negotiate`]. The whole dialogue is bounded by a byte
//! budget so a hostile peer cannot stuff the session with `ls` floods.

use std::{error::Error, fmt, io};

use meshwork_traits::{ReadEx, WriteEx};
use unsigned_varint::{decode, encode};

use crate::upgrade::ProtocolName;

/// The header line opening every multistream session.
pub const PROTOCOL_HEADER: &[u8] = b"/multistream/1.0.0";

/// Reply to a proposal the responder does not support.
const MSG_NA: &[u8] = b"na";

/// Request for the responder's protocol list.
const MSG_LS: &[u8] = b"ls";

/// Default cap on the bytes a single negotiation session may consume.
pub const DEFAULT_SESSION_BYTE_CAP: usize = 64 * 1024;

/// A single protocol line may not be longer than this.
const MAX_MESSAGE_LEN: usize = 1024;

/// Varints longer than this are rejected (caps lengths at 2^63).
const MAX_VARINT_BYTES: usize = 9;

/// Errors produced by the negotiation dialogue.
#[derive(Debug)]
pub enum NegotiationError {
    /// The socket failed underneath the dialogue.
    IoError(io::Error),
    /// The remote did not open with the multistream header.
    ProtocolMismatch,
    /// No candidate protocol was accepted by the remote.
    Failed,
    /// A message violated the line format.
    InvalidMessage,
    /// The session exceeded its byte budget.
    TooMuchData,
    /// A length prefix did not terminate within nine bytes.
    VarintOverflow,
}

impl fmt::Display for NegotiationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NegotiationError::IoError(e) => write!(f, "i/o error: {}", e),
            NegotiationError::ProtocolMismatch => f.write_str("multistream header mismatch"),
            NegotiationError::Failed => f.write_str("no protocol agreed upon"),
            NegotiationError::InvalidMessage => f.write_str("invalid multistream message"),
            NegotiationError::TooMuchData => f.write_str("negotiation byte budget exceeded"),
            NegotiationError::VarintOverflow => f.write_str("varint overflow"),
        }
    }
}

impl Error for NegotiationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            NegotiationError::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for NegotiationError {
    fn from(e: io::Error) -> Self {
        NegotiationError::IoError(e)
    }
}

/// Outcome of feeding bytes to the incremental [`MessageReader`].
#[derive(Debug, PartialEq, Eq)]
pub enum ParseStatus {
    /// One complete message; the payload excludes the trailing newline.
    Ready(Vec<u8>),
    /// More bytes are needed.
    Underflow,
    /// The message or session exceeds its limits; the session must fail.
    Overflow,
}

/// Incremental parser for multistream messages.
///
/// Feed it bytes as they arrive; it buffers partial messages across calls
/// and accounts every byte against the session budget.
#[derive(Debug)]
pub struct MessageReader {
    buf: Vec<u8>,
    remaining_budget: usize,
}

impl MessageReader {
    pub fn new(budget: usize) -> Self {
        MessageReader {
            buf: Vec::new(),
            remaining_budget: budget,
        }
    }

    /// Consumes input bytes and attempts to parse the next message.
    ///
    /// Call with an empty slice to re-attempt parsing of buffered data.
    pub fn consume(&mut self, input: &[u8]) -> Result<ParseStatus, NegotiationError> {
        if !input.is_empty() {
            if input.len() > self.remaining_budget {
                return Ok(ParseStatus::Overflow);
            }
            self.remaining_budget -= input.len();
            self.buf.extend_from_slice(input);
        }

        let (len, header_len) = match read_varint(&self.buf)? {
            Some(v) => v,
            None => return Ok(ParseStatus::Underflow),
        };
        if len > MAX_MESSAGE_LEN {
            return Ok(ParseStatus::Overflow);
        }
        if self.buf.len() < header_len + len {
            return Ok(ParseStatus::Underflow);
        }

        let line = &self.buf[header_len..header_len + len];
        match line.split_last() {
            Some((&b'\n', payload)) if !payload.contains(&b'\n') => {
                let payload = payload.to_vec();
                self.buf.drain(..header_len + len);
                Ok(ParseStatus::Ready(payload))
            }
            _ => Err(NegotiationError::InvalidMessage),
        }
    }

    /// Reads the next complete message off the socket.
    async fn next_message<T: ReadEx>(
        &mut self,
        socket: &mut T,
    ) -> Result<Vec<u8>, NegotiationError> {
        loop {
            match self.consume(&[])? {
                ParseStatus::Ready(msg) => return Ok(msg),
                ParseStatus::Overflow => return Err(NegotiationError::TooMuchData),
                ParseStatus::Underflow => {}
            }
            let mut chunk = [0u8; 128];
            let n = socket.read2(&mut chunk).await?;
            if n == 0 {
                return Err(NegotiationError::IoError(
                    io::ErrorKind::UnexpectedEof.into(),
                ));
            }
            match self.consume(&chunk[..n])? {
                ParseStatus::Ready(msg) => return Ok(msg),
                ParseStatus::Overflow => return Err(NegotiationError::TooMuchData),
                ParseStatus::Underflow => {}
            }
        }
    }
}

/// Decodes a length prefix. `Ok(None)` means more bytes are needed.
fn read_varint(buf: &[u8]) -> Result<Option<(usize, usize)>, NegotiationError> {
    match decode::u64(buf) {
        Ok((value, rest)) => {
            let consumed = buf.len() - rest.len();
            if consumed > MAX_VARINT_BYTES {
                return Err(NegotiationError::VarintOverflow);
            }
            Ok(Some((value as usize, consumed)))
        }
        Err(decode::Error::Insufficient) => {
            if buf.len() >= MAX_VARINT_BYTES {
                return Err(NegotiationError::VarintOverflow);
            }
            Ok(None)
        }
        Err(_) => Err(NegotiationError::VarintOverflow),
    }
}

/// Writes `uvarint(|payload|+1) || payload || '\n'` and flushes.
async fn write_message<T: WriteEx>(socket: &mut T, payload: &[u8]) -> Result<(), NegotiationError> {
    let mut len_buf = encode::u64_buffer();
    let len = encode::u64((payload.len() + 1) as u64, &mut len_buf);
    let mut msg = Vec::with_capacity(len.len() + payload.len() + 1);
    msg.extend_from_slice(len);
    msg.extend_from_slice(payload);
    msg.push(b'\n');
    socket.write_all2(&msg).await?;
    socket.flush2().await?;
    Ok(())
}

/// Encodes a protocols-list reply: a wrapping length prefix, a count,
/// then the line-encoded protocol names.
pub fn encode_protocol_list<I, P>(protocols: I) -> Vec<u8>
where
    I: IntoIterator<Item = P>,
    P: AsRef<[u8]>,
{
    let mut body = Vec::new();
    let mut count = 0u64;
    let mut lines = Vec::new();
    for p in protocols {
        let p = p.as_ref();
        let mut len_buf = encode::u64_buffer();
        lines.extend_from_slice(encode::u64((p.len() + 1) as u64, &mut len_buf));
        lines.extend_from_slice(p);
        lines.push(b'\n');
        count += 1;
    }
    let mut count_buf = encode::u64_buffer();
    body.extend_from_slice(encode::u64(count, &mut count_buf));
    body.extend_from_slice(&lines);

    let mut out = Vec::with_capacity(body.len() + 10);
    let mut len_buf = encode::u64_buffer();
    out.extend_from_slice(encode::u64(body.len() as u64, &mut len_buf));
    out.extend_from_slice(&body);
    out
}

/// Decodes a protocols-list reply produced by [`encode_protocol_list`].
pub fn decode_protocol_list(bytes: &[u8]) -> Result<Vec<Vec<u8>>, NegotiationError> {
    let (total, rest) = decode_prefix(bytes)?;
    if rest.len() != total {
        return Err(NegotiationError::InvalidMessage);
    }
    let (count, mut rest) = decode_prefix_u64(rest)?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (len, tail) = decode_prefix(rest)?;
        let line = tail.get(..len).ok_or(NegotiationError::InvalidMessage)?;
        match line.split_last() {
            Some((&b'\n', payload)) => out.push(payload.to_vec()),
            _ => return Err(NegotiationError::InvalidMessage),
        }
        rest = &tail[len..];
    }
    if !rest.is_empty() {
        return Err(NegotiationError::InvalidMessage);
    }
    Ok(out)
}

fn decode_prefix(bytes: &[u8]) -> Result<(usize, &[u8]), NegotiationError> {
    let (v, rest) = decode_prefix_u64(bytes)?;
    Ok((v as usize, rest))
}

fn decode_prefix_u64(bytes: &[u8]) -> Result<(u64, &[u8]), NegotiationError> {
    decode::u64(bytes).map_err(|_| NegotiationError::InvalidMessage)
}

/// Drives one side of a multistream-select session.
#[derive(Debug, Clone)]
pub struct Negotiator<TProto> {
    protocols: Vec<TProto>,
    session_byte_cap: usize,
}

impl<TProto: ProtocolName + Clone + Send> Default for Negotiator<TProto> {
    fn default() -> Self {
        Negotiator::new()
    }
}

impl<TProto: ProtocolName + Clone + Send> Negotiator<TProto> {
    pub fn new() -> Self {
        Negotiator {
            protocols: Vec::new(),
            session_byte_cap: DEFAULT_SESSION_BYTE_CAP,
        }
    }

    /// A negotiator over the given protocol table; order is preference
    /// order on the initiating side.
    pub fn new_with_protocols(protocols: Vec<TProto>) -> Self {
        Negotiator {
            protocols,
            session_byte_cap: DEFAULT_SESSION_BYTE_CAP,
        }
    }

    pub fn add_protocol(&mut self, protocol: TProto) {
        self.protocols.push(protocol);
    }

    /// Overrides the per-session byte budget.
    pub fn with_session_byte_cap(mut self, cap: usize) -> Self {
        self.session_byte_cap = cap;
        self
    }

    /// Runs the initiator side: proposes the candidates in order and
    /// returns the first one the remote echoes back.
    pub async fn select_one<TSocket>(
        self,
        mut socket: TSocket,
    ) -> Result<(TProto, TSocket), NegotiationError>
    where
        TSocket: ReadEx + WriteEx + Send,
    {
        let mut reader = MessageReader::new(self.session_byte_cap);

        write_message(&mut socket, PROTOCOL_HEADER).await?;
        let header = reader.next_message(&mut socket).await?;
        if header != PROTOCOL_HEADER {
            return Err(NegotiationError::ProtocolMismatch);
        }

        for candidate in self.protocols {
            let name = candidate.protocol_name().to_vec();
            write_message(&mut socket, &name).await?;
            let reply = reader.next_message(&mut socket).await?;
            if reply == name {
                log::debug!("negotiated protocol {}", candidate.protocol_name_str());
                return Ok((candidate, socket));
            }
            if reply == MSG_NA {
                log::trace!("protocol {} not available", candidate.protocol_name_str());
                continue;
            }
            return Err(NegotiationError::InvalidMessage);
        }

        Err(NegotiationError::Failed)
    }

    /// Runs the responder side against this negotiator's own table.
    pub async fn negotiate<TSocket>(
        self,
        socket: TSocket,
    ) -> Result<(TProto, TSocket), NegotiationError>
    where
        TSocket: ReadEx + WriteEx + Send,
    {
        let table = self.protocols.clone();
        self.negotiate_with(socket, move |name| {
            table.iter().find(|p| p.protocol_name() == name).cloned()
        })
        .await
    }

    /// Runs the responder side with a custom acceptance function.
    ///
    /// `lookup` maps a proposed protocol name to the value to hand back on
    /// success; returning `None` rejects the proposal with `na`. This is
    /// how a router with prefix rules plugs into the dialogue.
    pub async fn negotiate_with<TSocket, F>(
        self,
        mut socket: TSocket,
        mut lookup: F,
    ) -> Result<(TProto, TSocket), NegotiationError>
    where
        TSocket: ReadEx + WriteEx + Send,
        F: FnMut(&[u8]) -> Option<TProto> + Send,
    {
        let mut reader = MessageReader::new(self.session_byte_cap);

        write_message(&mut socket, PROTOCOL_HEADER).await?;
        let header = reader.next_message(&mut socket).await?;
        if header != PROTOCOL_HEADER {
            return Err(NegotiationError::ProtocolMismatch);
        }

        loop {
            let proposal = reader.next_message(&mut socket).await?;
            if proposal == MSG_LS {
                let list =
                    encode_protocol_list(self.protocols.iter().map(|p| p.protocol_name()));
                socket.write_all2(&list).await?;
                socket.flush2().await?;
                continue;
            }
            match lookup(&proposal) {
                Some(found) => {
                    write_message(&mut socket, &proposal).await?;
                    log::debug!("accepted protocol {}", found.protocol_name_str());
                    return Ok((found, socket));
                }
                None => {
                    log::trace!(
                        "rejecting unsupported protocol {}",
                        String::from_utf8_lossy(&proposal)
                    );
                    write_message(&mut socket, MSG_NA).await?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory;
    use crate::Multiaddr;
    use futures::executor::block_on;
    use futures::future::join;

    fn socket_pair() -> (memory::MemoryConn, memory::MemoryConn) {
        memory::pipe(Multiaddr::empty(), Multiaddr::empty())
    }

    fn encode_message(payload: &[u8]) -> Vec<u8> {
        let mut len_buf = encode::u64_buffer();
        let len = encode::u64((payload.len() + 1) as u64, &mut len_buf);
        let mut msg = Vec::new();
        msg.extend_from_slice(len);
        msg.extend_from_slice(payload);
        msg.push(b'\n');
        msg
    }

    #[test]
    fn message_roundtrip() {
        let encoded = encode_message(b"/echo/1.0.0");
        let mut reader = MessageReader::new(DEFAULT_SESSION_BYTE_CAP);
        match reader.consume(&encoded).unwrap() {
            ParseStatus::Ready(payload) => assert_eq!(payload, b"/echo/1.0.0"),
            other => panic!("unexpected status {:?}", other),
        }
    }

    #[test]
    fn reader_is_incremental() {
        let encoded = encode_message(b"/echo/1.0.0");
        let mut reader = MessageReader::new(DEFAULT_SESSION_BYTE_CAP);
        for byte in &encoded[..encoded.len() - 1] {
            assert_eq!(
                reader.consume(std::slice::from_ref(byte)).unwrap(),
                ParseStatus::Underflow
            );
        }
        match reader.consume(&encoded[encoded.len() - 1..]).unwrap() {
            ParseStatus::Ready(payload) => assert_eq!(payload, b"/echo/1.0.0"),
            other => panic!("unexpected status {:?}", other),
        }
    }

    #[test]
    fn reader_enforces_budget() {
        let mut reader = MessageReader::new(8);
        let encoded = encode_message(b"/very/long/protocol/name");
        assert_eq!(reader.consume(&encoded).unwrap(), ParseStatus::Overflow);
    }

    #[test]
    fn reader_rejects_missing_newline() {
        // length says 3, payload "ab" + no terminating newline
        let bad = [3u8, b'a', b'b', b'c'];
        let mut reader = MessageReader::new(DEFAULT_SESSION_BYTE_CAP);
        assert!(matches!(
            reader.consume(&bad),
            Err(NegotiationError::InvalidMessage)
        ));
    }

    #[test]
    fn varint_overflow_is_rejected() {
        let bad = [0xff; 10];
        let mut reader = MessageReader::new(DEFAULT_SESSION_BYTE_CAP);
        assert!(matches!(
            reader.consume(&bad),
            Err(NegotiationError::VarintOverflow)
        ));
    }

    #[test]
    fn protocol_list_roundtrip() {
        let list = encode_protocol_list(vec![&b"/echo/1.0.0"[..], &b"/chat/2.0.0"[..]]);
        let decoded = decode_protocol_list(&list).unwrap();
        assert_eq!(decoded, vec![b"/echo/1.0.0".to_vec(), b"/chat/2.0.0".to_vec()]);
    }

    #[test]
    fn select_first_supported() {
        block_on(async {
            let (a, b) = socket_pair();

            let initiator = Negotiator::new_with_protocols(vec![
                &b"/http/5.0.1"[..],
                &b"/echo/1.0.0"[..],
            ]);
            let responder = Negotiator::new_with_protocols(vec![&b"/echo/1.0.0"[..]]);

            let (dial, listen) =
                join(initiator.select_one(a), responder.negotiate(b)).await;
            let (chosen_out, _) = dial.unwrap();
            let (chosen_in, _) = listen.unwrap();
            assert_eq!(chosen_out, b"/echo/1.0.0");
            assert_eq!(chosen_in, b"/echo/1.0.0");
        });
    }

    #[test]
    fn exhaustion_fails_but_responder_would_continue() {
        block_on(async {
            let (a, b) = socket_pair();

            let initiator = Negotiator::new_with_protocols(vec![&b"/http/5.0.1"[..]]);
            let responder = Negotiator::new_with_protocols(vec![&b"/echo/1.0.0"[..]]);

            let dial = async move {
                let err = initiator.select_one(a).await.unwrap_err();
                assert!(matches!(err, NegotiationError::Failed));
            };
            let listen = async move {
                // the initiator hangs up after exhaustion; the responder
                // sees EOF
                let err = responder.negotiate(b).await.unwrap_err();
                assert!(matches!(err, NegotiationError::IoError(_)));
            };
            join(dial, listen).await;
        });
    }

    #[test]
    fn header_mismatch_aborts() {
        block_on(async {
            let (a, mut b) = socket_pair();

            let initiator = Negotiator::new_with_protocols(vec![&b"/echo/1.0.0"[..]]);
            let imposter = async move {
                // does not speak multistream at all
                b.write_all2(&encode_message(b"/bogus/0.0.0")).await.unwrap();
            };
            let (res, _) = join(initiator.select_one(a), imposter).await;
            assert!(matches!(res.unwrap_err(), NegotiationError::ProtocolMismatch));
        });
    }

    #[test]
    fn determinism() {
        // same tables, same preference order => same outcome, every time
        for _ in 0..8 {
            block_on(async {
                let (a, b) = socket_pair();
                let initiator = Negotiator::new_with_protocols(vec![
                    &b"/one/1.0.0"[..],
                    &b"/two/1.0.0"[..],
                ]);
                let responder = Negotiator::new_with_protocols(vec![
                    &b"/two/1.0.0"[..],
                    &b"/one/1.0.0"[..],
                ]);
                let (dial, _) = join(initiator.select_one(a), responder.negotiate(b)).await;
                // initiator preference wins
                assert_eq!(dial.unwrap().0, b"/one/1.0.0");
            });
        }
    }
}
