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

//! meshwork: a multiplexed, protocol-negotiated peer-to-peer networking
//! substrate.
//!
//! This facade re-exports the member crates:
//!
//! - [`core`]: identities, transports, the connection upgrader and the
//!   multistream-select negotiator.
//! - [`yamux`]: the stream multiplexer.
//! - [`swarm`]: connection management, dialing and protocol routing.
//! - [`traits`]: the async I/O traits everything is written against.
//!
//! A node is typically assembled by wrapping a transport with
//! [`core::transport::upgrade::TransportUpgrade`] (security + yamux),
//! handing it to a [`swarm::Swarm`] together with protocol handlers, and
//! driving everything through the swarm's [`swarm::Control`].

pub use meshwork_core as core;
pub use meshwork_swarm as swarm;
pub use meshwork_traits as traits;
pub use meshwork_yamux as yamux;

pub use meshwork_core::{Multiaddr, PeerId, PeerInfo, ProtocolId, PublicKey};
