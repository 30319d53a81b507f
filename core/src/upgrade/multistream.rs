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

use meshwork_traits::{ReadEx, WriteEx};

use crate::multistream::Negotiator;
use crate::transport::TransportError;
use crate::upgrade::{ProtocolName, Upgrader};

/// Applies an upgrader after agreeing on one of its protocols via
/// multistream-select.
///
/// The protocols supported by the inner upgrader are proposed in the order
/// it lists them, so earlier entries have higher priority.
#[derive(Debug, Clone)]
pub struct Multistream<U> {
    inner: U,
}

impl<U> Multistream<U> {
    /// Adds `Multistream` on top of any `Upgrader`.
    pub fn new(inner: U) -> Self {
        Self { inner }
    }
}

impl<U> Multistream<U> {
    /// Responder side: answer the remote's proposals with our supported
    /// set, then upgrade with the agreed protocol.
    pub(crate) async fn select_inbound<C>(self, socket: C) -> Result<U::Output, TransportError>
    where
        U: Upgrader<C> + Send,
        C: ReadEx + WriteEx + Send,
    {
        trace!("starting multistream select for inbound...");
        let protocols = self.inner.protocol_info();
        let negotiator = Negotiator::new_with_protocols(protocols);
        let (info, socket) = negotiator.negotiate(socket).await?;
        trace!("accepted inbound upgrade {}", info.protocol_name_str());
        self.inner.upgrade_inbound(socket, info).await
    }

    /// Initiator side: propose our supported set in preference order, then
    /// upgrade with the agreed protocol.
    pub(crate) async fn select_outbound<C>(self, socket: C) -> Result<U::Output, TransportError>
    where
        U: Upgrader<C> + Send,
        C: ReadEx + WriteEx + Send,
    {
        trace!("starting multistream select for outbound...");
        let protocols = self.inner.protocol_info();
        let negotiator = Negotiator::new_with_protocols(protocols);
        let (info, socket) = negotiator.select_one(socket).await?;
        trace!("selected outbound upgrade {}", info.protocol_name_str());
        self.inner.upgrade_outbound(socket, info).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::either::EitherOutput;
    use crate::transport::memory;
    use crate::upgrade::{DummyUpgrader, Selector};
    use crate::Multiaddr;
    use futures::executor::block_on;
    use futures::future::join;

    #[test]
    fn negotiates_then_upgrades() {
        block_on(async {
            let (a, b) = memory::pipe(Multiaddr::empty(), Multiaddr::empty());

            let outbound = Multistream::new(DummyUpgrader::new()).select_outbound(a);
            let inbound = Multistream::new(DummyUpgrader::new()).select_inbound(b);

            let (o, i) = join(outbound, inbound).await;
            o.unwrap();
            i.unwrap();
        });
    }

    #[test]
    fn negotiates_across_a_selector() {
        block_on(async {
            let (a, b) = memory::pipe(Multiaddr::empty(), Multiaddr::empty());

            let outbound = Multistream::new(Selector::new(DummyUpgrader::new(), DummyUpgrader::new()))
                .select_outbound(a);
            let inbound = Multistream::new(Selector::new(DummyUpgrader::new(), DummyUpgrader::new()))
                .select_inbound(b);

            let (o, i) = join(outbound, inbound).await;
            // the initiator's first candidate wins
            assert!(matches!(o.unwrap(), EitherOutput::A(_)));
            i.unwrap();
        });
    }
}
