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

//! The protocol router.
//!
//! Maps protocol names to [`ProtocolHandler`]s. Exact names are
//! registered straight from a handler's [`UpgradeInfo`]; prefix entries
//! additionally carry a predicate deciding whether a concrete proposal
//! under that prefix is acceptable (useful for versioned protocol
//! families). The responder side of every inbound substream negotiation
//! consults this table.

use std::fmt;
use std::sync::Arc;

use meshwork_core::multistream::Negotiator;
use meshwork_core::muxing::IReadWrite;
use meshwork_core::upgrade::UpgradeInfo;

use crate::protocol_handler::IProtocolHandler;
use crate::SwarmError;

/// Decides whether a proposed protocol name under a registered prefix is
/// accepted.
pub type ProtocolPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

#[derive(Clone)]
struct PrefixEntry {
    prefix: &'static str,
    predicate: ProtocolPredicate,
    handler: IProtocolHandler,
}

/// The table of protocols this node serves.
#[derive(Clone, Default)]
pub struct Muxer {
    /// Handlers registered under their exact protocol names.
    protocol_handlers: Vec<(Vec<u8>, IProtocolHandler)>,
    /// Handlers registered under a protocol-name prefix plus predicate.
    prefix_handlers: Vec<PrefixEntry>,
}

impl fmt::Debug for Muxer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Muxer")
            .field(
                "protocols",
                &self
                    .protocol_handlers
                    .iter()
                    .map(|(p, _)| String::from_utf8_lossy(p).into_owned())
                    .collect::<Vec<_>>(),
            )
            .field(
                "prefixes",
                &self
                    .prefix_handlers
                    .iter()
                    .map(|e| e.prefix)
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Muxer {
    pub fn new() -> Self {
        Muxer::default()
    }

    /// Registers a handler under every protocol name it advertises.
    /// Later registrations of the same name shadow earlier ones.
    pub fn add_protocol_handler(&mut self, handler: IProtocolHandler) {
        for name in handler.protocol_info() {
            log::debug!(
                "registering protocol handler for {}",
                String::from_utf8_lossy(name)
            );
            self.protocol_handlers
                .retain(|(existing, _)| existing.as_slice() != name);
            self.protocol_handlers.push((name.to_vec(), handler.clone()));
        }
    }

    /// Registers a handler for every protocol name starting with `prefix`
    /// that also satisfies `predicate`.
    pub fn add_prefix_handler(
        &mut self,
        prefix: &'static str,
        predicate: ProtocolPredicate,
        handler: IProtocolHandler,
    ) {
        log::debug!("registering prefix protocol handler for {}", prefix);
        self.prefix_handlers.push(PrefixEntry {
            prefix,
            predicate,
            handler,
        });
    }

    /// The exact protocol names served, in registration order. Prefix
    /// entries are open-ended and not listed.
    pub fn supported_protocols(&self) -> Vec<Vec<u8>> {
        self.protocol_handlers
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Finds the handler for a proposed protocol name, if any.
    pub fn lookup(&self, name: &[u8]) -> Option<IProtocolHandler> {
        if let Some((_, handler)) = self
            .protocol_handlers
            .iter()
            .find(|(existing, _)| existing.as_slice() == name)
        {
            return Some(handler.clone());
        }
        let name_str = std::str::from_utf8(name).ok()?;
        self.prefix_handlers
            .iter()
            .find(|e| name_str.starts_with(e.prefix) && (e.predicate)(name_str))
            .map(|e| e.handler.clone())
    }

    /// Runs responder-side negotiation on a fresh inbound substream and
    /// resolves the winning protocol to its handler.
    pub(crate) async fn negotiate(
        &self,
        raw: IReadWrite,
    ) -> Result<(IProtocolHandler, IReadWrite, Vec<u8>), SwarmError> {
        let negotiator = Negotiator::new_with_protocols(self.supported_protocols());
        let table = self.clone();
        let (proto, stream) = negotiator
            .negotiate_with(raw, move |name| {
                if table.lookup(name).is_some() {
                    Some(name.to_vec())
                } else {
                    None
                }
            })
            .await?;
        let handler = self
            .lookup(&proto)
            .ok_or(SwarmError::Internal("handler vanished during negotiation"))?;
        Ok((handler, stream, proto))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol_handler::DummyProtocolHandler;

    #[test]
    fn exact_lookup() {
        let mut muxer = Muxer::new();
        muxer.add_protocol_handler(Box::new(DummyProtocolHandler::new()));
        assert!(muxer.lookup(b"/dummy/1.0.0").is_some());
        assert!(muxer.lookup(b"/dummy/2.0.0").is_some());
        assert!(muxer.lookup(b"/dummy/3.0.0").is_none());
    }

    #[test]
    fn prefix_lookup_consults_predicate() {
        let mut muxer = Muxer::new();
        muxer.add_prefix_handler(
            "/kad/",
            Arc::new(|name| name.ends_with("/1.0.0")),
            Box::new(DummyProtocolHandler::new()),
        );
        assert!(muxer.lookup(b"/kad/mainnet/1.0.0").is_some());
        assert!(muxer.lookup(b"/kad/mainnet/2.0.0").is_none());
        assert!(muxer.lookup(b"/other/1.0.0").is_none());
    }

    #[test]
    fn later_registration_shadows() {
        let mut muxer = Muxer::new();
        muxer.add_protocol_handler(Box::new(DummyProtocolHandler::new()));
        muxer.add_protocol_handler(Box::new(DummyProtocolHandler::new()));
        assert_eq!(muxer.supported_protocols().len(), 2);
    }
}
