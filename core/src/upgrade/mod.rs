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

//! Upgraders turn one connection layer into the next.
//!
//! An [`Upgrader`] advertises the protocols it can speak via
//! [`UpgradeInfo`] and, once a protocol has been agreed on, wraps the
//! socket into its output type. Candidate sets are composed with
//! [`select::Selector`] and the agreement itself is driven by
//! [`multistream::Multistream`].

pub mod dummy;
pub mod multistream;
pub mod select;

pub use dummy::DummyUpgrader;
pub use multistream::Multistream;
pub use select::Selector;

use async_trait::async_trait;

use crate::transport::TransportError;

/// The name under which a protocol is negotiated, e.g. `/yamux/1.0.0`.
pub trait ProtocolName {
    /// The raw bytes that go over the wire during negotiation.
    fn protocol_name(&self) -> &[u8];

    /// A lossy human-readable rendering for log output.
    fn protocol_name_str(&self) -> String {
        String::from_utf8_lossy(self.protocol_name()).into_owned()
    }
}

impl ProtocolName for &'static [u8] {
    fn protocol_name(&self) -> &[u8] {
        self
    }
}

impl ProtocolName for &'static str {
    fn protocol_name(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl ProtocolName for Vec<u8> {
    fn protocol_name(&self) -> &[u8] {
        self
    }
}

impl ProtocolName for String {
    fn protocol_name(&self) -> &[u8] {
        self.as_bytes()
    }
}

/// The protocols an upgrader supports, in preference order.
pub trait UpgradeInfo {
    type Info: ProtocolName + Clone + Send + Sync;

    /// All protocol names supported, highest preference first.
    fn protocol_info(&self) -> Vec<Self::Info>;
}

/// Upgrades a connection from one layer to the next.
///
/// The `info` argument is the protocol name that negotiation settled on;
/// it is always one of the names returned by
/// [`UpgradeInfo::protocol_info`].
#[async_trait]
pub trait Upgrader<C>: UpgradeInfo {
    type Output: Send;

    async fn upgrade_inbound(
        self,
        socket: C,
        info: <Self as UpgradeInfo>::Info,
    ) -> Result<Self::Output, TransportError>;

    async fn upgrade_outbound(
        self,
        socket: C,
        info: <Self as UpgradeInfo>::Info,
    ) -> Result<Self::Output, TransportError>;
}
