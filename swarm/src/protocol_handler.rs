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

use async_trait::async_trait;

use meshwork_core::upgrade::UpgradeInfo;
use meshwork_core::ProtocolId;

use crate::substream::Substream;
use crate::SwarmError;

/// Handles inbound substreams negotiated to one of its protocols.
///
/// A handler advertises its protocols via [`UpgradeInfo`] and is invoked
/// with each negotiated inbound [`Substream`]. Errors are isolated by the
/// swarm: a failing handler never affects other streams on the
/// connection.
#[async_trait]
pub trait ProtocolHandler: UpgradeInfo<Info = ProtocolId> + Send + Sync {
    /// Processes one inbound substream; the negotiated protocol is
    /// available as [`Substream::protocol`].
    async fn handle(&mut self, stream: Substream) -> Result<(), SwarmError>;

    fn box_clone(&self) -> IProtocolHandler;
}

pub type IProtocolHandler = Box<dyn ProtocolHandler>;

impl Clone for IProtocolHandler {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// Implementation of `ProtocolHandler` that doesn't handle anything.
#[derive(Clone, Default)]
pub struct DummyProtocolHandler {}

impl DummyProtocolHandler {
    pub fn new() -> Self {
        DummyProtocolHandler {}
    }
}

impl UpgradeInfo for DummyProtocolHandler {
    type Info = ProtocolId;

    fn protocol_info(&self) -> Vec<Self::Info> {
        vec![b"/dummy/1.0.0", b"/dummy/2.0.0"]
    }
}

#[async_trait]
impl ProtocolHandler for DummyProtocolHandler {
    async fn handle(&mut self, stream: Substream) -> Result<(), SwarmError> {
        log::trace!("dummy protocol handling inbound {:?}", stream);
        Ok(())
    }

    fn box_clone(&self) -> IProtocolHandler {
        Box::new(self.clone())
    }
}
