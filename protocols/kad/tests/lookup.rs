// Copyright 2018 Parity Technologies (UK) Ltd.
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

//! Iterative lookups against a synthetic network of responder peers.

use async_std::task;
use async_trait::async_trait;
use bytes::Bytes;
use p2p_core::{pipe, Bus, PeerId, Scheduler};
use p2p_kad::{
    node_id::NodeId, session::KadSession, Connectedness, KadControl, KadError, KadMessage,
    KadNetwork, KadPeer, KadStream, Kademlia, KademliaConfig, MessageType,
};
use std::{collections::HashMap, sync::Arc, time::Duration};

/// A fixed network of synthetic peers.
///
/// Every peer only knows its own neighbourhood (the `k` peers closest to
/// itself), so a lookup has to iterate to reach a distant target.
struct Topology {
    peers: Vec<PeerId>,
    neighbours: HashMap<PeerId, Vec<PeerId>>,
    /// Providers a given peer would report for a key.
    provider_knowledge: HashMap<PeerId, Vec<PeerId>>,
    provider_key: Bytes,
}

impl Topology {
    fn new(n: usize, k: usize) -> Topology {
        let peers: Vec<PeerId> = (0..n).map(|_| PeerId::random()).collect();
        let mut neighbours = HashMap::new();
        for peer in &peers {
            let node = NodeId::from_peer(peer);
            let mut others: Vec<PeerId> =
                peers.iter().filter(|p| *p != peer).copied().collect();
            others.sort_by_key(|p| NodeId::from_peer(p).distance(&node));
            others.truncate(k);
            neighbours.insert(*peer, others);
        }
        Topology {
            peers,
            neighbours,
            provider_knowledge: HashMap::new(),
            provider_key: Bytes::new(),
        }
    }

    fn closer_peers(&self, reporter: &PeerId, key: &[u8]) -> Vec<KadPeer> {
        let target = NodeId::from_bytes(key);
        let mut known = self.neighbours[reporter].clone();
        known.sort_by_key(|p| NodeId::from_peer(p).distance(&target));
        known
            .into_iter()
            .take(20)
            .map(|peer| self.peer_info(peer))
            .collect()
    }

    fn peer_info(&self, peer: PeerId) -> KadPeer {
        KadPeer {
            peer_id: peer,
            addresses: vec![Bytes::copy_from_slice(peer.as_bytes())],
            connectedness: Connectedness::CanConnect,
        }
    }
}

struct MockNetwork {
    local: PeerId,
    topology: Arc<Topology>,
}

#[async_trait]
impl KadNetwork for MockNetwork {
    fn local_peer(&self) -> PeerId {
        self.local
    }

    async fn new_stream(&self, peer: &PeerId) -> Result<KadStream, KadError> {
        if !self.topology.neighbours.contains_key(peer) {
            return Err(KadError::NotFound);
        }
        let (ours, theirs) = pipe::pipe(64 * 1024);
        let topology = self.topology.clone();
        let responder = *peer;
        task::spawn(respond(topology, responder, theirs));
        Ok(Box::new(ours))
    }

    fn addresses_of(&self, peer: &PeerId) -> Vec<Bytes> {
        if self.topology.neighbours.contains_key(peer) || *peer == self.local {
            vec![Bytes::copy_from_slice(peer.as_bytes())]
        } else {
            Vec::new()
        }
    }

    fn upsert_addresses(&self, _peer: &PeerId, _addresses: Vec<Bytes>) {}

    fn connectedness(&self, _peer: &PeerId) -> Connectedness {
        Connectedness::NotConnected
    }
}

/// The serving half of a synthetic peer.
async fn respond(topology: Arc<Topology>, me: PeerId, stream: pipe::Endpoint) {
    let mut session = KadSession::new(stream, Duration::from_secs(1));
    while let Some(Ok(request)) = session.next().await {
        let response = match request.message_type {
            MessageType::Ping => KadMessage::ping(),
            MessageType::FindNode => {
                KadMessage::find_node_response(topology.closer_peers(&me, &request.key))
            }
            MessageType::GetProviders => {
                let providers = if request.key == topology.provider_key {
                    topology
                        .provider_knowledge
                        .get(&me)
                        .map(|known| known.iter().map(|p| topology.peer_info(*p)).collect())
                        .unwrap_or_default()
                } else {
                    Vec::new()
                };
                KadMessage::get_providers_response(
                    request.key.clone(),
                    providers,
                    topology.closer_peers(&me, &request.key),
                )
            }
            // Fire-and-forget messages carry no response.
            MessageType::AddProvider | MessageType::PutValue => continue,
            MessageType::GetValue => KadMessage::get_value_response(
                request.key.clone(),
                None,
                topology.closer_peers(&me, &request.key),
            ),
        };
        if session.send(response).await.is_err() {
            break;
        }
    }
    session.close().await;
}

fn spawn_service(topology: Arc<Topology>) -> (PeerId, KadControl) {
    let local = PeerId::random();
    let network = Arc::new(MockNetwork {
        local,
        topology,
    });
    let mut config = KademliaConfig::default();
    config.random_walk_timeout = Duration::from_secs(5);
    config.connection_timeout = Duration::from_secs(1);
    config.response_timeout = Duration::from_secs(1);
    let (service, control) = Kademlia::new(config, network, Scheduler::new(), Bus::new());
    task::spawn(service.run());
    (local, control)
}

// A 50-peer network: the lookup walks from three bootstrap peers to an
// arbitrary target and the routing table fills up along the way.
#[async_std::test]
async fn find_peer_converges_over_fifty_peers() {
    let topology = Arc::new(Topology::new(50, 20));
    let target = topology.peers[42];
    let (_, control) = spawn_service(topology.clone());

    // Bootstrap from the three peers farthest from the target, forcing
    // several iterative rounds.
    let target_node = NodeId::from_peer(&target);
    let mut by_distance = topology.peers.clone();
    by_distance.sort_by_key(|p| NodeId::from_peer(p).distance(&target_node));
    for bootstrap in by_distance.iter().rev().take(3) {
        control.add_peer(*bootstrap, true);
    }

    let found = control.find_peer(target).await.unwrap();
    assert_eq!(found.peer_id, target);
    assert!(!found.addresses.is_empty());

    // The walk populated the table with peers around the target.
    let mut closest = Vec::new();
    for _ in 0..50 {
        closest = control
            .closest_peers(Bytes::copy_from_slice(target.as_bytes()))
            .await
            .unwrap();
        if closest.contains(&target) {
            break;
        }
        task::sleep(Duration::from_millis(20)).await;
    }
    assert!(closest.contains(&target));
    assert!(closest.len() >= 10);
}

// Provider lookup stops at the quorum and returns the accumulated set.
#[async_std::test]
async fn get_providers_stops_at_quorum() {
    let mut topology = Topology::new(30, 20);
    let key = Bytes::from_static(b"the content");
    let providers: Vec<PeerId> = topology.peers[..5].to_vec();
    let advertised = providers[0];

    // Every peer knows the advertised provider plus one more, so the
    // quorum needs answers from several distinct peers.
    topology.provider_key = key.clone();
    for (i, peer) in topology.peers.clone().iter().enumerate() {
        let extra = providers[1 + (i % 4)];
        topology
            .provider_knowledge
            .insert(*peer, vec![advertised, extra]);
    }

    let topology = Arc::new(topology);
    let (_, control) = spawn_service(topology.clone());
    for bootstrap in &topology.peers[..3] {
        control.add_peer(*bootstrap, true);
    }

    let found = control.get_providers(key).await.unwrap();
    assert!(found.len() >= 3 && found.len() <= 5);
    assert!(found.iter().any(|p| p.peer_id == advertised));
    for peer in &found {
        assert!(providers.contains(&peer.peer_id));
    }
}

// With an empty routing table there is nothing to ask.
#[async_std::test]
async fn lookup_without_peers_fails_fast() {
    let topology = Arc::new(Topology::new(5, 4));
    let (_, control) = spawn_service(topology.clone());
    let outcome = control.find_peer(topology.peers[0]).await;
    assert!(matches!(outcome, Err(KadError::NoKnownPeers)));
}

// Bootstrap walks towards the local id and fills the table on the way.
#[async_std::test]
async fn bootstrap_populates_the_table() {
    let topology = Arc::new(Topology::new(30, 10));
    let (local, control) = spawn_service(topology.clone());
    for bootstrap in &topology.peers[..3] {
        control.add_peer(*bootstrap, true);
    }

    control.bootstrap().await.unwrap();

    // Discovery events may still be in flight right after the walk.
    let mut closest = Vec::new();
    for _ in 0..50 {
        closest = control
            .closest_peers(Bytes::copy_from_slice(local.as_bytes()))
            .await
            .unwrap();
        if closest.len() > 3 {
            break;
        }
        task::sleep(Duration::from_millis(20)).await;
    }
    assert!(closest.len() > 3);
}

// Providing announces to the closest peers and registers us locally.
#[async_std::test]
async fn provide_reaches_the_network() {
    let topology = Arc::new(Topology::new(20, 10));
    let (_, control) = spawn_service(topology.clone());
    for bootstrap in &topology.peers[..3] {
        control.add_peer(*bootstrap, true);
    }

    let delivered = control.provide(Bytes::from_static(b"content")).await.unwrap();
    assert!(delivered > 0);
}

// Values are stored locally on put and served back without the network.
#[async_std::test]
async fn put_value_stores_locally() {
    let topology = Arc::new(Topology::new(10, 5));
    let (_, control) = spawn_service(topology.clone());
    for bootstrap in &topology.peers[..3] {
        control.add_peer(*bootstrap, true);
    }

    let key = Bytes::from_static(b"record");
    let value = Bytes::from_static(b"contents");
    // Synthetic peers accept the store silently; local storage counts.
    let _ = control.put_value(key.clone(), value.clone()).await;

    let record = control.get_value(key.clone()).await.unwrap();
    assert_eq!(record.key, key);
    assert_eq!(record.value, value);
}

// The serving side: an inbound stream is answered from the local table.
#[async_std::test]
async fn inbound_find_node_is_served() {
    let topology = Arc::new(Topology::new(10, 5));
    let (_, control) = spawn_service(topology.clone());
    for peer in &topology.peers {
        control.add_peer(*peer, false);
    }

    let remote = topology.peers[0];
    let (client_end, server_end) = pipe::pipe(64 * 1024);
    control.handle_inbound(remote, Box::new(server_end));

    let mut session = KadSession::new(client_end, Duration::from_secs(1));
    let response = session
        .request(KadMessage::find_node(Bytes::copy_from_slice(
            topology.peers[5].as_bytes(),
        )))
        .await
        .unwrap();
    assert_eq!(response.message_type, MessageType::FindNode);
    assert!(!response.closer_peers.is_empty());
    // The requester itself is never in the answer.
    assert!(response.closer_peers.iter().all(|p| p.peer_id != remote));
    session.close().await;
}

// A node that stored a record answers GetProviders for its key with itself.
#[async_std::test]
async fn stored_records_make_the_node_a_provider() {
    let topology = Arc::new(Topology::new(10, 5));
    let (local, control) = spawn_service(topology.clone());
    for bootstrap in &topology.peers[..3] {
        control.add_peer(*bootstrap, true);
    }

    let key = Bytes::from_static(b"held here");
    let _ = control.put_value(key.clone(), Bytes::from_static(b"v")).await;

    let remote = topology.peers[0];
    let (client_end, server_end) = pipe::pipe(64 * 1024);
    control.handle_inbound(remote, Box::new(server_end));

    let mut session = KadSession::new(client_end, Duration::from_secs(1));
    let response = session
        .request(KadMessage::get_providers(key))
        .await
        .unwrap();
    assert!(response
        .provider_peers
        .iter()
        .any(|p| p.peer_id == local));
    session.close().await;
}

// The DHT session works over a real yamux stream.
#[async_std::test]
async fn session_over_yamux() {
    use futures::io::{AsyncRead, AsyncWrite};
    use p2p_yamux::{Config, Connection, Mode};

    async fn drive<T>(mut connection: Connection<T>)
    where
        T: AsyncRead + AsyncWrite + Unpin + Send,
    {
        while let Ok(Some(stream)) = connection.next_stream().await {
            task::spawn(async move {
                let mut session = KadSession::new(stream, Duration::from_secs(1));
                while let Some(Ok(request)) = session.next().await {
                    let response = match request.message_type {
                        MessageType::Ping => KadMessage::ping(),
                        _ => KadMessage::find_node_response(vec![]),
                    };
                    if session.send(response).await.is_err() {
                        break;
                    }
                }
                session.close().await;
            });
        }
    }

    let (a, b) = pipe::pipe(1 << 20);
    let (connection_a, mut control_a) = Connection::new(a, Config::default(), Mode::Client);
    let (connection_b, _control_b) = Connection::new(b, Config::default(), Mode::Server);
    task::spawn(async move {
        let mut connection_a = connection_a;
        while let Ok(Some(_)) = connection_a.next_stream().await {}
    });
    task::spawn(drive(connection_b));

    let stream = control_a.open_stream().await.unwrap();
    let mut session = KadSession::new(stream, Duration::from_secs(1));
    let response = session.request(KadMessage::ping()).await.unwrap();
    assert_eq!(response.message_type, MessageType::Ping);
    session.close().await;
}
