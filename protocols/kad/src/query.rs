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

//! Iterative DHT lookups.
//!
//! One engine drives every operation: a frontier of not-yet-queried peers
//! ordered by XOR distance to the target, at most `alpha` requests in
//! flight, newly learned peers folded back into the frontier and reported
//! to the service. The per-operation drivers decide what counts as done.

pub(crate) mod add_provider;
pub(crate) mod find_peer;
pub(crate) mod get_providers;
pub(crate) mod get_value;
pub(crate) mod put_value;

use crate::{
    config::KademliaConfig,
    message::{Connectedness, KadMessage},
    network::KadNetwork,
    node_id::{Distance, NodeId},
    session::{deadline, KadSession},
    Feedback, KadError,
};
use fnv::FnvHashSet;
use futures::channel::mpsc;
use futures::prelude::*;
use futures::stream::FuturesUnordered;
use p2p_core::PeerId;
use std::{
    cmp::Reverse,
    collections::BinaryHeap,
    sync::Arc,
};

/// Everything a query needs from the service.
#[derive(Clone)]
pub(crate) struct QueryContext {
    pub(crate) config: Arc<KademliaConfig>,
    pub(crate) network: Arc<dyn KadNetwork>,
    pub(crate) feedback: mpsc::UnboundedSender<Feedback>,
    pub(crate) local_peer: PeerId,
}

/// Frontier entry ordering: XOR distance first, peer id as the tie break.
#[derive(PartialEq, Eq)]
struct FrontierEntry {
    distance: Distance,
    peer: PeerId,
}

impl Ord for FrontierEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance
            .cmp(&other.distance)
            .then_with(|| self.peer.cmp(&other.peer))
    }
}

impl PartialOrd for FrontierEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Peers still to be queried, closest first, each at most once.
pub(crate) struct Frontier {
    target: NodeId,
    heap: BinaryHeap<Reverse<FrontierEntry>>,
    seen: FnvHashSet<PeerId>,
}

impl Frontier {
    pub(crate) fn new(target: NodeId) -> Self {
        Frontier {
            target,
            heap: BinaryHeap::new(),
            seen: FnvHashSet::default(),
        }
    }

    /// Enqueues a peer unless it has ever been enqueued before.
    pub(crate) fn push(&mut self, peer: PeerId) -> bool {
        if !self.seen.insert(peer) {
            return false;
        }
        let distance = NodeId::from_peer(&peer).distance(&self.target);
        self.heap.push(Reverse(FrontierEntry { distance, peer }));
        true
    }

    pub(crate) fn pop(&mut self) -> Option<PeerId> {
        self.heap.pop().map(|Reverse(entry)| entry.peer)
    }
}

/// The iterative engine shared by all lookup flavours.
pub(crate) struct Lookup {
    ctx: QueryContext,
    frontier: Frontier,
    request: KadMessage,
    in_flight: FuturesUnordered<future::BoxFuture<'static, (PeerId, Result<KadMessage, KadError>)>>,
}

impl Lookup {
    pub(crate) fn new(
        ctx: QueryContext,
        target: NodeId,
        seed: Vec<PeerId>,
        request: KadMessage,
    ) -> Self {
        let mut frontier = Frontier::new(target);
        for peer in seed {
            frontier.push(peer);
        }
        Lookup {
            ctx,
            frontier,
            request,
            in_flight: FuturesUnordered::new(),
        }
    }

    /// The spawn step: fill the in-flight set from the frontier, skipping
    /// ourselves, peers without addresses and peers known unreachable.
    fn fill(&mut self) {
        while self.in_flight.len() < self.ctx.config.query_concurrency {
            let peer = match self.frontier.pop() {
                Some(peer) => peer,
                None => break,
            };
            if peer == self.ctx.local_peer {
                continue;
            }
            if self.ctx.network.addresses_of(&peer).is_empty() {
                continue;
            }
            if self.ctx.network.connectedness(&peer) == Connectedness::CannotConnect {
                continue;
            }
            log::debug!(
                "querying {}; active {}",
                peer,
                self.in_flight.len() + 1
            );
            self.in_flight.push(
                query_one(
                    self.ctx.network.clone(),
                    peer,
                    self.request.clone(),
                    self.ctx.config.clone(),
                )
                .boxed(),
            );
        }
    }

    /// The next completed exchange; `None` once the frontier and the
    /// in-flight set are both exhausted. Successful responses have their
    /// closer peers absorbed before being handed to the driver.
    pub(crate) async fn next(&mut self) -> Option<(PeerId, Result<KadMessage, KadError>)> {
        self.fill();
        if self.in_flight.is_empty() {
            return None;
        }
        let (peer, result) = self.in_flight.next().await?;
        if let Ok(message) = &result {
            self.absorb(&peer, message);
        } else {
            log::debug!("query to {} failed", peer);
        }
        Some((peer, result))
    }

    /// Learns peers from a response: addresses go to the host's address
    /// book, identities to the service (routing table) and the frontier.
    fn absorb(&mut self, from: &PeerId, message: &KadMessage) {
        for peer in &message.closer_peers {
            if peer.connectedness == Connectedness::CannotConnect {
                continue;
            }
            self.ctx
                .network
                .upsert_addresses(&peer.peer_id, peer.addresses.clone());
            let _ = self.ctx.feedback.unbounded_send(Feedback::PeerDiscovered {
                peer: peer.peer_id,
            });
            if peer.peer_id == self.ctx.local_peer || peer.peer_id == *from {
                continue;
            }
            self.frontier.push(peer.peer_id);
        }
    }

    /// Every peer ever placed in the frontier, for drivers that converge on
    /// a closest set.
    pub(crate) fn seen(&self) -> impl Iterator<Item = &PeerId> {
        self.frontier.seen.iter()
    }
}

/// One stream, one exchange.
async fn query_one(
    network: Arc<dyn KadNetwork>,
    peer: PeerId,
    request: KadMessage,
    config: Arc<KademliaConfig>,
) -> (PeerId, Result<KadMessage, KadError>) {
    let result = async {
        let stream = deadline(config.connection_timeout, network.new_stream(&peer))
            .await
            .ok_or(KadError::Timeout)??;
        let mut session = KadSession::new(stream, config.response_timeout);
        let response = session.request(request).await;
        session.close().await;
        response
    }
    .await;
    (peer, result)
}

/// Fire-and-forget delivery of `message` to `peers` with the usual
/// concurrency bound. Returns how many deliveries succeeded.
pub(crate) async fn broadcast(ctx: &QueryContext, peers: Vec<PeerId>, message: KadMessage) -> usize {
    let mut in_flight: FuturesUnordered<future::BoxFuture<'static, Result<(), KadError>>> =
        FuturesUnordered::new();
    let mut queue = peers.into_iter();
    let mut successes = 0;

    loop {
        while in_flight.len() < ctx.config.query_concurrency {
            let peer = match queue.next() {
                Some(peer) => peer,
                None => break,
            };
            if peer == ctx.local_peer
                || ctx.network.addresses_of(&peer).is_empty()
                || ctx.network.connectedness(&peer) == Connectedness::CannotConnect
            {
                continue;
            }
            in_flight.push(
                send_one(ctx.network.clone(), peer, message.clone(), ctx.config.clone()).boxed(),
            );
        }
        match in_flight.next().await {
            Some(Ok(())) => successes += 1,
            Some(Err(e)) => log::debug!("broadcast delivery failed: {}", e),
            None => break,
        }
    }
    successes
}

async fn send_one(
    network: Arc<dyn KadNetwork>,
    peer: PeerId,
    message: KadMessage,
    config: Arc<KademliaConfig>,
) -> Result<(), KadError> {
    let stream = deadline(config.connection_timeout, network.new_stream(&peer))
        .await
        .ok_or(KadError::Timeout)??;
    let mut session = KadSession::new(stream, config.response_timeout);
    session.send(message).await?;
    session.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frontier_pops_closest_first_without_duplicates() {
        let target = NodeId::from_bytes(b"target");
        let mut frontier = Frontier::new(target);

        let peers: Vec<PeerId> = (0..32).map(|_| PeerId::random()).collect();
        for peer in &peers {
            assert!(frontier.push(*peer));
        }
        for peer in &peers {
            // Ever-seen peers never enter twice.
            assert!(!frontier.push(*peer));
        }

        let mut last = None;
        while let Some(peer) = frontier.pop() {
            let distance = NodeId::from_peer(&peer).distance(&target);
            if let Some(previous) = last {
                assert!(previous <= distance);
            }
            last = Some(distance);
        }
    }

    #[test]
    fn frontier_breaks_distance_ties_by_peer_id() {
        // Identical distances only happen for identical node ids, so the
        // tie break is exercised directly on the entry ordering.
        let distance = Distance::from(7u64);
        let a = FrontierEntry {
            distance,
            peer: PeerId::from_bytes(vec![1; 32]).unwrap(),
        };
        let b = FrontierEntry {
            distance,
            peer: PeerId::from_bytes(vec![2; 32]).unwrap(),
        };
        assert!(a < b);
    }
}
