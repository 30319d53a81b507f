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

//! End-to-end swarm tests over the memory transport: dial, negotiate,
//! exchange, close, and verify the connection manager forgets everything.

use async_std::task;
use async_trait::async_trait;
use std::time::Duration;

use meshwork_core::identity::Keypair;
use meshwork_core::security::PlainTextConfig;
use meshwork_core::transport::memory::MemoryTransport;
use meshwork_core::transport::upgrade::TransportUpgrade;
use meshwork_core::upgrade::UpgradeInfo;
use meshwork_core::{Multiaddr, PeerId, PeerInfo, ProtocolId};
use meshwork_swarm::protocol_handler::{IProtocolHandler, ProtocolHandler};
use meshwork_swarm::substream::Substream;
use meshwork_swarm::{Connectedness, Control, Direction, Swarm, SwarmError};
use meshwork_traits::{ReadEx, WriteEx};
use meshwork_yamux::Config as YamuxConfig;

const ECHO_PROTOCOL: ProtocolId = b"/echo/1.0.0";

/// Answers every 4-byte "PING" with "PONG", then waits for the remote
/// FIN.
#[derive(Clone, Default)]
struct PingPongHandler {}

impl UpgradeInfo for PingPongHandler {
    type Info = ProtocolId;

    fn protocol_info(&self) -> Vec<Self::Info> {
        vec![ECHO_PROTOCOL]
    }
}

#[async_trait]
impl ProtocolHandler for PingPongHandler {
    async fn handle(&mut self, mut stream: Substream) -> Result<(), SwarmError> {
        let mut buf = [0u8; 4];
        while stream.read_exact2(&mut buf).await.is_ok() {
            if &buf != b"PING" {
                break;
            }
            if stream.write_all2(b"PONG").await.is_err() {
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

fn make_swarm(key: Keypair) -> Swarm {
    let transport = TransportUpgrade::new(
        MemoryTransport::default(),
        YamuxConfig::default(),
        PlainTextConfig::new(key.clone()),
    );
    Swarm::new(key).with_transport(Box::new(transport))
}

/// Brings up a server swarm with the ping-pong handler, returning its
/// identity, address and control.
fn start_server() -> (PeerId, Multiaddr, Control) {
    let key = Keypair::generate_ed25519();
    let peer_id = key.public().to_peer_id();
    let mut swarm = make_swarm(key).with_protocol_handler(Box::new(PingPongHandler::default()));
    let addr = swarm.listen_on("/memory/0".parse().unwrap()).unwrap();
    let control = swarm.control();
    swarm.start();
    (peer_id, addr, control)
}

fn start_client() -> Control {
    let swarm = make_swarm(Keypair::generate_ed25519());
    let control = swarm.control();
    swarm.start();
    control
}

/// Polls the control until the peer count drops to `n` or a deadline
/// passes.
async fn wait_for_peer_count(control: &mut Control, n: usize) {
    for _ in 0..100 {
        let info = control.network_info().await.unwrap();
        if info.num_peers == n {
            return;
        }
        task::sleep(Duration::from_millis(20)).await;
    }
    panic!("peer count never dropped to {}", n);
}

#[async_std::test]
async fn ping_pong_over_a_single_stream() {
    let _ = env_logger::try_init();
    let (server_id, server_addr, _server_ctrl) = start_server();
    let mut client = start_client();

    let peer = PeerInfo::new(server_id.clone(), vec![server_addr]);
    let mut stream = client
        .new_stream(peer.clone(), vec![ECHO_PROTOCOL])
        .await
        .unwrap();
    assert_eq!(stream.protocol(), ECHO_PROTOCOL);
    assert_eq!(
        client.connectedness(peer.clone()).await.unwrap(),
        Connectedness::Connected
    );
    let views = client.connection_views(server_id.clone()).await.unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].remote_peer_id, server_id);
    assert_eq!(views[0].dir, Direction::Outbound);

    stream.write_all2(b"PING").await.unwrap();
    let mut buf = [0u8; 4];
    stream.read_exact2(&mut buf).await.unwrap();
    assert_eq!(&buf, b"PONG");
    stream.close2().await.unwrap();

    // tearing the peer down empties the connection manager
    client.close_peer(server_id).await.unwrap();
    wait_for_peer_count(&mut client, 0).await;
    assert_eq!(
        client.connectedness(peer.clone()).await.unwrap(),
        Connectedness::CanConnect
    );
    assert!(client
        .connection_views(peer.id)
        .await
        .unwrap()
        .is_empty());
}

#[async_std::test]
async fn concurrent_dials_coalesce() {
    let (server_id, server_addr, _server_ctrl) = start_server();
    let client = start_client();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let mut c = client.clone();
        let peer = PeerInfo::new(server_id.clone(), vec![server_addr.clone()]);
        tasks.push(task::spawn(async move { c.connect(peer).await }));
    }
    for t in tasks {
        t.await.unwrap();
    }

    // eight connect calls, one connection
    let mut c = client.clone();
    let info = c.network_info().await.unwrap();
    assert_eq!(info.num_peers, 1);
    assert_eq!(info.num_connections, 1);
}

#[async_std::test]
async fn negotiation_failure_leaves_the_connection_usable() {
    let (server_id, server_addr, _server_ctrl) = start_server();
    let mut client = start_client();

    let peer = PeerInfo::new(server_id.clone(), vec![server_addr.clone()]);
    let err = client
        .new_stream(peer.clone(), vec![b"/http/5.0.1"])
        .await
        .unwrap_err();
    assert!(matches!(err, SwarmError::Negotiation(_)));

    // the muxed connection survived the failed negotiation
    let info = client.network_info().await.unwrap();
    assert_eq!(info.num_connections, 1);

    // and a supported protocol still works on it
    let mut stream = client.new_stream(peer, vec![ECHO_PROTOCOL]).await.unwrap();
    stream.write_all2(b"PING").await.unwrap();
    let mut buf = [0u8; 4];
    stream.read_exact2(&mut buf).await.unwrap();
    assert_eq!(&buf, b"PONG");
    let _ = stream.close2().await;
}

#[async_std::test]
async fn dialing_the_wrong_peer_id_is_rejected() {
    let (_server_id, server_addr, _server_ctrl) = start_server();
    let mut client = start_client();

    let imposter = PeerId::random();
    let err = client
        .connect(PeerInfo::new(imposter, vec![server_addr]))
        .await
        .unwrap_err();
    assert!(matches!(err, SwarmError::PeerIdMismatch { .. }));

    // nothing was registered
    let info = client.network_info().await.unwrap();
    assert_eq!(info.num_peers, 0);
}

#[async_std::test]
async fn dialing_nowhere_fails() {
    let mut client = start_client();

    let err = client
        .connect(PeerInfo::new(PeerId::random(), vec![]))
        .await
        .unwrap_err();
    assert!(matches!(err, SwarmError::NoAddresses));

    let err = client
        .connect(PeerInfo::new(
            PeerId::random(),
            vec!["/memory/1".parse().unwrap()],
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, SwarmError::Dial(_)));
}

#[async_std::test]
async fn churn_leaves_no_connections_behind() {
    let mut servers = Vec::new();
    for _ in 0..16 {
        servers.push(start_server());
    }
    let mut client = start_client();

    for (server_id, server_addr, _ctrl) in &servers {
        let peer = PeerInfo::new(server_id.clone(), vec![server_addr.clone()]);
        let mut stream = client
            .new_stream(peer, vec![ECHO_PROTOCOL])
            .await
            .unwrap();
        stream.write_all2(b"PING").await.unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact2(&mut buf).await.unwrap();
        assert_eq!(&buf, b"PONG");
        stream.close2().await.unwrap();
        client.close_peer(server_id.clone()).await.unwrap();
    }

    wait_for_peer_count(&mut client, 0).await;
}
