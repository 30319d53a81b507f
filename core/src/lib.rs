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

//! Core abstractions of the meshwork stack.
//!
//! The main concepts are:
//!
//! - A [`PeerId`] is the unique global identifier of a node on the network,
//!   derived from the public key it uses to secure its connections, thereby
//!   guaranteeing that identities cannot be spoofed.
//! - A [`Multiaddr`] is a self-describing network address.
//! - The [`transport`] module defines how raw connections are established
//!   and how they are promoted, layer by layer, into secured and muxed
//!   connections ([`transport::upgrade`]).
//! - The [`upgrade`] module defines the generic upgrade machinery and the
//!   [`multistream`] module the negotiation dialogue that agrees on which
//!   upgrade (or application protocol) to apply.
//! - The [`muxing`] module is the seam between the upgrader and a concrete
//!   stream multiplexer implementation.

pub mod either;
pub mod identity;
pub mod multistream;
pub mod muxing;
mod peer_id;
pub mod secure_io;
pub mod security;
pub mod transport;
pub mod upgrade;

pub use identity::{Keypair, PublicKey};
pub use multiaddr::Multiaddr;
pub use peer_id::PeerId;

/// The identifier of a protocol, spoken over a negotiated substream.
///
/// Protocol names are ASCII path strings such as `/echo/1.0.0`.
pub type ProtocolId = &'static [u8];

/// A peer together with the addresses it may be reached at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: PeerId,
    pub addrs: Vec<Multiaddr>,
}

impl PeerInfo {
    pub fn new(id: PeerId, addrs: Vec<Multiaddr>) -> Self {
        PeerInfo { id, addrs }
    }
}
