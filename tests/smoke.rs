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

//! Assembling a node purely through the facade crate.

use async_trait::async_trait;

use meshwork::core::identity::Keypair;
use meshwork::core::security::PlainTextConfig;
use meshwork::core::transport::memory::MemoryTransport;
use meshwork::core::transport::upgrade::TransportUpgrade;
use meshwork::core::upgrade::UpgradeInfo;
use meshwork::swarm::substream::Substream;
use meshwork::swarm::{IProtocolHandler, ProtocolHandler, Swarm, SwarmError};
use meshwork::traits::{ReadEx, WriteEx};
use meshwork::yamux::Config as YamuxConfig;
use meshwork::{PeerInfo, ProtocolId};

#[derive(Clone, Default)]
struct EchoHandler {}

impl UpgradeInfo for EchoHandler {
    type Info = ProtocolId;

    fn protocol_info(&self) -> Vec<Self::Info> {
        vec![b"/echo/1.0.0"]
    }
}

#[async_trait]
impl ProtocolHandler for EchoHandler {
    async fn handle(&mut self, mut stream: Substream) -> Result<(), SwarmError> {
        let mut buf = [0u8; 64];
        loop {
            let n = match stream.read2(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            if stream.write_all2(&buf[..n]).await.is_err() {
                break;
            }
        }
        let _ = stream.close2().await;
        Ok(())
    }

    fn box_clone(&self) -> IProtocolHandler {
        Box::new(self.clone())
    }
}

fn node(key: Keypair) -> Swarm {
    let transport = TransportUpgrade::new(
        MemoryTransport::default(),
        YamuxConfig::default(),
        PlainTextConfig::new(key.clone()),
    );
    Swarm::new(key).with_transport(Box::new(transport))
}

#[async_std::test]
async fn two_nodes_echo_through_the_facade() {
    let server_key = Keypair::generate_ed25519();
    let server_id = server_key.public().to_peer_id();
    let mut server = node(server_key).with_protocol_handler(Box::new(EchoHandler::default()));
    let addr = server.listen_on("/memory/0".parse().unwrap()).unwrap();
    server.start();

    let client = node(Keypair::generate_ed25519());
    let mut control = client.control();
    client.start();

    let peer = PeerInfo::new(server_id, vec![addr]);
    let mut stream = control
        .new_stream(peer, vec![b"/echo/1.0.0"])
        .await
        .unwrap();

    stream.write_all2(b"around the stack").await.unwrap();
    let mut buf = [0u8; 16];
    stream.read_exact2(&mut buf).await.unwrap();
    assert_eq!(&buf, b"around the stack");
    stream.close2().await.unwrap();
}
