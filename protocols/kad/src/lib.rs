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

//! Kademlia peer routing and content discovery.
//!
//! The [`Kademlia`] service is a single actor owning the routing table and
//! the local record/provider stores. Its [`run`](Kademlia::run) loop
//! multiplexes control requests, inbound DHT streams, query progress and
//! the maintenance timers; iterative lookups execute concurrently inside
//! the loop and feed discovered peers back into the table. Query failures
//! resolve their caller's request and never take the service down.

pub mod codec;
pub mod config;
mod error;
pub mod kbucket;
pub mod message;
pub mod network;
pub mod node_id;
mod proto;
pub mod session;

mod query;
mod store;

pub use config::KademliaConfig;
pub use error::KadError;
pub use kbucket::{AddPeerResult, PeerRoutingTable};
pub use message::{Connectedness, KadMessage, KadPeer, KadRecord, MessageType};
pub use network::{KadNetwork, KadStream, RawStream};
pub use store::ValueRecord;

use bytes::Bytes;
use futures::channel::{mpsc, oneshot};
use futures::prelude::*;
use futures::stream::FuturesUnordered;
use node_id::NodeId;
use p2p_core::{Bus, Handle, PeerId, Scheduler};
use query::QueryContext;
use session::KadSession;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use store::{LocalValueStore, ProviderStore};

type Reply<T> = oneshot::Sender<Result<T, KadError>>;

enum Command {
    FindPeer(PeerId, Reply<KadPeer>),
    GetProviders(Bytes, Reply<Vec<KadPeer>>),
    Provide(Bytes, Reply<usize>),
    PutValue(Bytes, Bytes, Reply<usize>),
    GetValue(Bytes, Reply<KadRecord>),
    ClosestPeers(Bytes, oneshot::Sender<Vec<PeerId>>),
    AddPeer(PeerId, bool),
    Bootstrap(Reply<()>),
    HandleInbound(PeerId, KadStream),
    SweepStores,
}

/// Internal events flowing back into the actor from its tasks.
pub(crate) enum Feedback {
    /// A lookup learned about a peer.
    PeerDiscovered { peer: PeerId },
    /// A serving stream received a request and wants the answer.
    InboundRequest {
        peer: PeerId,
        message: KadMessage,
        reply: oneshot::Sender<Option<KadMessage>>,
    },
}

/// Cloneable handle for talking to a running [`Kademlia`] service.
#[derive(Clone)]
pub struct KadControl {
    sender: mpsc::UnboundedSender<Command>,
}

impl KadControl {
    /// Looks up the addresses of `peer` on the network.
    pub async fn find_peer(&self, peer: PeerId) -> Result<KadPeer, KadError> {
        self.request(|reply| Command::FindPeer(peer, reply)).await
    }

    /// Finds providers for `key`, resolving once the configured quorum of
    /// distinct providers confirmed.
    pub async fn get_providers(&self, key: Bytes) -> Result<Vec<KadPeer>, KadError> {
        self.request(|reply| Command::GetProviders(key, reply)).await
    }

    /// Announces this node as a provider for `key`.
    pub async fn provide(&self, key: Bytes) -> Result<usize, KadError> {
        self.request(|reply| Command::Provide(key, reply)).await
    }

    /// Stores `value` under `key`, locally and on the k closest peers.
    pub async fn put_value(&self, key: Bytes, value: Bytes) -> Result<usize, KadError> {
        self.request(|reply| Command::PutValue(key, value, reply)).await
    }

    /// Reads the record for `key`, from the local store or the network.
    pub async fn get_value(&self, key: Bytes) -> Result<KadRecord, KadError> {
        self.request(|reply| Command::GetValue(key, reply)).await
    }

    /// The table's current view of the peers closest to `key`.
    pub async fn closest_peers(&self, key: Bytes) -> Result<Vec<PeerId>, KadError> {
        let (reply, result) = oneshot::channel();
        self.sender
            .unbounded_send(Command::ClosestPeers(key, reply))
            .map_err(|_| KadError::ServiceShutDown)?;
        result.await.map_err(|_| KadError::Cancelled)
    }

    /// Seeds the routing table. Permanent peers (bootstrap nodes) are never
    /// evicted.
    pub fn add_peer(&self, peer: PeerId, permanent: bool) {
        let _ = self.sender.unbounded_send(Command::AddPeer(peer, permanent));
    }

    /// Runs a random walk towards the local id to populate the table.
    pub async fn bootstrap(&self) -> Result<(), KadError> {
        self.request(Command::Bootstrap).await
    }

    /// Hands an inbound, already negotiated DHT stream to the service.
    pub fn handle_inbound(&self, peer: PeerId, stream: KadStream) {
        let _ = self
            .sender
            .unbounded_send(Command::HandleInbound(peer, stream));
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, KadError> {
        let (reply, result) = oneshot::channel();
        self.sender
            .unbounded_send(make(reply))
            .map_err(|_| KadError::ServiceShutDown)?;
        result.await.map_err(|_| KadError::Cancelled)?
    }
}

/// The DHT actor.
pub struct Kademlia {
    state: State,
    commands: mpsc::UnboundedReceiver<Command>,
    feedback: mpsc::UnboundedReceiver<Feedback>,
    tasks: FuturesUnordered<future::BoxFuture<'static, ()>>,
}

struct State {
    config: Arc<KademliaConfig>,
    network: Arc<dyn KadNetwork>,
    scheduler: Scheduler,
    table: PeerRoutingTable,
    values: LocalValueStore,
    providers: ProviderStore,
    command_sender: mpsc::UnboundedSender<Command>,
    feedback_sender: mpsc::UnboundedSender<Feedback>,
    local_peer: PeerId,
    sweep_timer: Option<Handle>,
}

impl Kademlia {
    /// Creates the service and its control handle.
    pub fn new(
        config: KademliaConfig,
        network: Arc<dyn KadNetwork>,
        scheduler: Scheduler,
        bus: Bus,
    ) -> (Kademlia, KadControl) {
        let config = Arc::new(config);
        let local_peer = network.local_peer();
        let table = PeerRoutingTable::new(&local_peer, config.bucket_size, bus);
        let (command_sender, commands) = mpsc::unbounded();
        let (feedback_sender, feedback) = mpsc::unbounded();
        let values = LocalValueStore::new(config.max_record_age, config.refresh_interval());
        let providers = ProviderStore::new(config.provider_record_ttl);
        let service = Kademlia {
            state: State {
                config,
                network,
                scheduler,
                table,
                values,
                providers,
                command_sender: command_sender.clone(),
                feedback_sender,
                local_peer,
                sweep_timer: None,
            },
            commands,
            feedback,
            tasks: FuturesUnordered::new(),
        };
        (service, KadControl { sender: command_sender })
    }

    /// Drives the service's main loop. Runs for as long as the owning task
    /// keeps polling it.
    pub async fn run(self) {
        let Kademlia {
            mut state,
            mut commands,
            mut feedback,
            mut tasks,
        } = self;

        state.schedule_sweep();
        let mut scheduler = Box::pin(state.scheduler.clone().run()).fuse();

        loop {
            futures::select! {
                command = commands.next() => match command {
                    Some(command) => state.handle_command(command, &mut tasks),
                    None => break,
                },
                event = feedback.next() => if let Some(event) = event {
                    state.handle_feedback(event);
                },
                _ = tasks.select_next_some() => {}
                _ = scheduler => {}
            }
        }
        log::debug!("kademlia service shutting down");
    }

    /// The local peer this service routes for.
    pub fn local_peer(&self) -> PeerId {
        self.state.local_peer
    }
}

impl State {
    fn query_context(&self) -> QueryContext {
        QueryContext {
            config: self.config.clone(),
            network: self.network.clone(),
            feedback: self.feedback_sender.clone(),
            local_peer: self.local_peer,
        }
    }

    /// Lookup seeds: the nearest known peers to the target, twice the
    /// replication factor deep to survive unreachable entries.
    fn seed_for(&self, target: &NodeId) -> Vec<PeerId> {
        self.table.nearest(target, self.config.bucket_size * 2)
    }

    fn schedule_sweep(&mut self) {
        let sender = self.command_sender.clone();
        self.sweep_timer = Some(self.scheduler.schedule_with_handle(
            self.config.sweep_interval,
            move || {
                let _ = sender.unbounded_send(Command::SweepStores);
            },
        ));
    }

    fn handle_command(
        &mut self,
        command: Command,
        tasks: &mut FuturesUnordered<future::BoxFuture<'static, ()>>,
    ) {
        match command {
            Command::FindPeer(target, reply) => {
                // A peer we can already reach needs no walk.
                let addresses = self.network.addresses_of(&target);
                let connectedness = self.network.connectedness(&target);
                if !addresses.is_empty()
                    && matches!(
                        connectedness,
                        Connectedness::Connected | Connectedness::CanConnect
                    )
                {
                    let _ = reply.send(Ok(KadPeer {
                        peer_id: target,
                        addresses,
                        connectedness,
                    }));
                    return;
                }
                let seed = self.seed_for(&NodeId::from_peer(&target));
                if seed.is_empty() {
                    let _ = reply.send(Err(KadError::NoKnownPeers));
                    return;
                }
                let ctx = self.query_context();
                tasks.push(
                    async move {
                        let result = query::find_peer::run(ctx, target, seed).await;
                        let _ = reply.send(result);
                    }
                    .boxed(),
                );
            }
            Command::GetProviders(key, reply) => {
                let seed = self.seed_for(&NodeId::from_bytes(&key));
                if seed.is_empty() {
                    let _ = reply.send(Err(KadError::NoKnownPeers));
                    return;
                }
                let ctx = self.query_context();
                let quorum = self.config.provider_quorum;
                tasks.push(
                    async move {
                        let result = query::get_providers::run(ctx, key, quorum, seed).await;
                        let _ = reply.send(result);
                    }
                    .boxed(),
                );
            }
            Command::Provide(key, reply) => {
                // We are a provider ourselves from now on.
                let now = self.scheduler.now();
                self.providers.add(now, key.clone(), self.local_peer);
                let seed = self.seed_for(&NodeId::from_bytes(&key));
                if seed.is_empty() {
                    let _ = reply.send(Err(KadError::NoKnownPeers));
                    return;
                }
                let ctx = self.query_context();
                tasks.push(
                    async move {
                        let result = query::add_provider::run(ctx, key, seed).await;
                        let _ = reply.send(result);
                    }
                    .boxed(),
                );
            }
            Command::PutValue(key, value, reply) => {
                let now = self.scheduler.now();
                self.values.put(now, key.clone(), value.clone());
                let seed = self.seed_for(&NodeId::from_bytes(&key));
                if seed.is_empty() {
                    let _ = reply.send(Err(KadError::NoKnownPeers));
                    return;
                }
                let ctx = self.query_context();
                let record = KadRecord {
                    key,
                    value,
                    time_received: unix_timestamp(),
                };
                tasks.push(
                    async move {
                        let result = query::put_value::run(ctx, record, seed).await;
                        let _ = reply.send(result);
                    }
                    .boxed(),
                );
            }
            Command::GetValue(key, reply) => {
                if let Some(record) = self.values.get(&key) {
                    let _ = reply.send(Ok(KadRecord {
                        key,
                        value: record.value.clone(),
                        time_received: unix_timestamp(),
                    }));
                    return;
                }
                let seed = self.seed_for(&NodeId::from_bytes(&key));
                if seed.is_empty() {
                    let _ = reply.send(Err(KadError::NoKnownPeers));
                    return;
                }
                let ctx = self.query_context();
                tasks.push(
                    async move {
                        let result = query::get_value::run(ctx, key, seed).await;
                        let _ = reply.send(result);
                    }
                    .boxed(),
                );
            }
            Command::ClosestPeers(key, reply) => {
                let nearest = self
                    .table
                    .nearest(&NodeId::from_bytes(&key), self.config.bucket_size);
                let _ = reply.send(nearest);
            }
            Command::AddPeer(peer, permanent) => {
                self.add_to_table(peer, permanent);
            }
            Command::Bootstrap(reply) => {
                let target = self.local_peer;
                let seed = self.seed_for(&NodeId::from_peer(&target));
                if seed.is_empty() {
                    let _ = reply.send(Err(KadError::NoKnownPeers));
                    return;
                }
                let ctx = self.query_context();
                tasks.push(
                    async move {
                        // The walk is for the side effect of filling the
                        // table; not finding our own id is expected.
                        let result = match query::find_peer::run(ctx, target, seed).await {
                            Ok(_) | Err(KadError::NotFound) | Err(KadError::Timeout) => Ok(()),
                            Err(e) => Err(e),
                        };
                        let _ = reply.send(result);
                    }
                    .boxed(),
                );
            }
            Command::HandleInbound(peer, stream) => {
                self.add_to_table(peer, false);
                let session = KadSession::new(stream, self.config.response_timeout);
                let feedback = self.feedback_sender.clone();
                tasks.push(serve(peer, session, feedback).boxed());
            }
            Command::SweepStores => {
                let now = self.scheduler.now();
                let due = self.values.sweep(now);
                self.providers.sweep(now);
                for key in due {
                    // Re-announce records that reached their refresh time.
                    let seed = self.seed_for(&NodeId::from_bytes(&key));
                    if seed.is_empty() {
                        continue;
                    }
                    let ctx = self.query_context();
                    tasks.push(
                        async move {
                            if let Err(e) = query::add_provider::run(ctx, key, seed).await {
                                log::debug!("record refresh failed: {}", e);
                            }
                        }
                        .boxed(),
                    );
                }
                self.schedule_sweep();
            }
        }
    }

    fn handle_feedback(&mut self, event: Feedback) {
        match event {
            Feedback::PeerDiscovered { peer } => {
                self.add_to_table(peer, false);
            }
            Feedback::InboundRequest {
                peer,
                message,
                reply,
            } => {
                self.add_to_table(peer, false);
                let _ = reply.send(self.answer(&peer, message));
            }
        }
    }

    fn add_to_table(&mut self, peer: PeerId, permanent: bool) {
        if peer == self.local_peer {
            return;
        }
        let connected = self.network.connectedness(&peer) == Connectedness::Connected;
        self.table.add_peer(&peer, permanent, connected);
    }

    /// Builds the wire view of a peer from the table and the address book.
    fn peer_info(&self, peer: &PeerId) -> KadPeer {
        KadPeer {
            peer_id: *peer,
            addresses: self.network.addresses_of(peer),
            connectedness: self.network.connectedness(peer),
        }
    }

    fn closer_peers_for(&self, key: &[u8], requester: &PeerId) -> Vec<KadPeer> {
        self.table
            .nearest(&NodeId::from_bytes(key), self.config.bucket_size)
            .iter()
            .filter(|peer| *peer != requester)
            .map(|peer| self.peer_info(peer))
            .collect()
    }

    /// The serving side of the protocol: answers one request from `peer`,
    /// or returns `None` for fire-and-forget messages.
    fn answer(&mut self, peer: &PeerId, message: KadMessage) -> Option<KadMessage> {
        let now = self.scheduler.now();
        match message.message_type {
            MessageType::Ping => Some(KadMessage::ping()),
            MessageType::FindNode => Some(KadMessage::find_node_response(
                self.closer_peers_for(&message.key, peer),
            )),
            MessageType::GetProviders => {
                let known = self.providers.providers_of(&message.key, now);
                let mut providers: Vec<KadPeer> =
                    known.iter().map(|p| self.peer_info(p)).collect();
                // Holding the record makes this node a provider as well.
                if self.values.contains(&message.key) && !known.contains(&self.local_peer) {
                    providers.push(KadPeer {
                        peer_id: self.local_peer,
                        addresses: self.network.addresses_of(&self.local_peer),
                        connectedness: Connectedness::Connected,
                    });
                }
                Some(KadMessage::get_providers_response(
                    message.key.clone(),
                    providers,
                    self.closer_peers_for(&message.key, peer),
                ))
            }
            MessageType::AddProvider => {
                for provider in message.provider_peers {
                    // Only the sender may advertise itself.
                    if provider.peer_id != *peer {
                        log::debug!("{}: add-provider for a third party, ignored", peer);
                        continue;
                    }
                    self.network
                        .upsert_addresses(&provider.peer_id, provider.addresses.clone());
                    self.providers
                        .add(now, message.key.clone(), provider.peer_id);
                }
                None
            }
            MessageType::PutValue => {
                if let Some(record) = message.record {
                    self.values.put(now, record.key, record.value);
                }
                None
            }
            MessageType::GetValue => {
                let record = self.values.get(&message.key).map(|r| KadRecord {
                    key: message.key.clone(),
                    value: r.value.clone(),
                    time_received: unix_timestamp(),
                });
                Some(KadMessage::get_value_response(
                    message.key.clone(),
                    record,
                    self.closer_peers_for(&message.key, peer),
                ))
            }
        }
    }
}

/// Reads requests off an inbound stream, routes them through the actor and
/// writes the answers back, until the remote is done.
async fn serve(
    peer: PeerId,
    mut session: KadSession<KadStream>,
    feedback: mpsc::UnboundedSender<Feedback>,
) {
    loop {
        let message = match session.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                log::debug!("{}: inbound stream failed: {}", peer, e);
                break;
            }
            None => break,
        };
        let (reply, answer) = oneshot::channel();
        if feedback
            .unbounded_send(Feedback::InboundRequest {
                peer,
                message,
                reply,
            })
            .is_err()
        {
            break;
        }
        match answer.await {
            Ok(Some(response)) => {
                if let Err(e) = session.send(response).await {
                    log::debug!("{}: response failed: {}", peer, e);
                    break;
                }
            }
            Ok(None) => {}
            Err(_) => break,
        }
    }
    session.close().await;
}

fn unix_timestamp() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        .to_string()
}
