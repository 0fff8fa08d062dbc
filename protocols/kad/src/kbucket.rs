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

//! The peer routing table: a list of k-buckets over the XOR metric.
//!
//! Bucket `i` holds peers whose ids share a common prefix of length `i`
//! with the local id; the last bucket is the catch-all for every deeper
//! prefix. Within a bucket, entries are ordered by recency of interaction,
//! most recent at the front.

use crate::node_id::NodeId;
use p2p_core::{Bus, PeerId, SystemEvent};
use smallvec::SmallVec;
use std::collections::VecDeque;

/// Outcome of [`PeerRoutingTable::add_peer`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AddPeerResult {
    /// The peer entered the table.
    Added,
    /// The peer was known and moved to the most-recent position.
    MovedToFront,
    /// The peer was known; nothing changed.
    Unchanged,
    /// The bucket is full of non-replaceable entries.
    Rejected,
}

#[derive(Clone, Debug)]
struct BucketEntry {
    peer_id: PeerId,
    node_id: NodeId,
    /// Entries for pinned peers (e.g. bootstrap nodes) are never evicted.
    replaceable: bool,
}

#[derive(Clone, Debug, Default)]
struct Bucket {
    entries: VecDeque<BucketEntry>,
}

impl Bucket {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn position(&self, peer: &PeerId) -> Option<usize> {
        self.entries.iter().position(|e| e.peer_id == *peer)
    }

    fn contains(&self, peer: &PeerId) -> bool {
        self.position(peer).is_some()
    }

    /// Moves an existing entry to the most-recent position. Returns false
    /// if the peer is unknown.
    fn move_to_front(&mut self, peer: &PeerId) -> bool {
        match self.position(peer) {
            Some(0) => true,
            Some(i) => {
                let entry = self.entries.remove(i).expect("position is valid");
                self.entries.push_front(entry);
                true
            }
            None => false,
        }
    }

    fn push_front(&mut self, entry: BucketEntry) {
        self.entries.push_front(entry);
    }

    fn remove(&mut self, peer: &PeerId) -> bool {
        match self.position(peer) {
            Some(i) => {
                self.entries.remove(i);
                true
            }
            None => false,
        }
    }

    /// Evicts the least-recent replaceable entry, if any.
    fn remove_replaceable(&mut self) -> Option<PeerId> {
        let i = self.entries.iter().rposition(|e| e.replaceable)?;
        self.entries.remove(i).map(|e| e.peer_id)
    }

    /// Splits off every entry whose common prefix with `local` is deeper
    /// than `depth`.
    fn split(&mut self, depth: usize, local: &NodeId) -> Bucket {
        let mut deeper = Bucket::default();
        let mut keep = VecDeque::new();
        for entry in self.entries.drain(..) {
            if entry.node_id.common_prefix_len(local) > depth {
                deeper.entries.push_back(entry);
            } else {
                keep.push_back(entry);
            }
        }
        self.entries = keep;
        deeper
    }
}

/// The Kademlia routing table.
pub struct PeerRoutingTable {
    local: NodeId,
    bucket_size: usize,
    buckets: Vec<Bucket>,
    bus: Bus,
}

impl PeerRoutingTable {
    pub fn new(local_peer: &PeerId, bucket_size: usize, bus: Bus) -> Self {
        assert!(bucket_size > 1);
        PeerRoutingTable {
            local: NodeId::from_peer(local_peer),
            bucket_size,
            buckets: vec![Bucket::default()],
            bus,
        }
    }

    fn bucket_index(&self, node_id: &NodeId) -> usize {
        let cpl = node_id.common_prefix_len(&self.local);
        cpl.min(self.buckets.len() - 1)
    }

    /// Inserts or refreshes a peer.
    ///
    /// A connected known peer moves to the bucket front. An unknown peer is
    /// pushed to the front of its bucket; a full last bucket is split
    /// first, a full inner bucket evicts its least-recent replaceable entry
    /// or rejects the insertion.
    pub fn add_peer(
        &mut self,
        peer: &PeerId,
        is_permanent: bool,
        is_connected: bool,
    ) -> AddPeerResult {
        let node_id = NodeId::from_peer(peer);
        let index = self.bucket_index(&node_id);
        let bucket = &mut self.buckets[index];

        if is_connected {
            if bucket.move_to_front(peer) {
                return AddPeerResult::MovedToFront;
            }
        } else if bucket.contains(peer) {
            return AddPeerResult::Unchanged;
        }

        let entry = BucketEntry {
            peer_id: *peer,
            node_id,
            replaceable: !is_permanent,
        };

        if bucket.len() < self.bucket_size {
            bucket.push_front(entry);
            self.bus.publish(SystemEvent::PeerAdded(*peer));
            return AddPeerResult::Added;
        }

        if index == self.buckets.len() - 1 {
            // The catch-all is full: unfold it and retry in the resized
            // table.
            self.split_last_bucket();
            let index = self.bucket_index(&entry.node_id);
            if self.buckets[index].len() < self.bucket_size {
                self.buckets[index].push_front(entry);
                self.bus.publish(SystemEvent::PeerAdded(*peer));
                return AddPeerResult::Added;
            }
            return self.replace_in(index, entry);
        }

        self.replace_in(index, entry)
    }

    fn replace_in(&mut self, index: usize, entry: BucketEntry) -> AddPeerResult {
        let peer = entry.peer_id;
        match self.buckets[index].remove_replaceable() {
            Some(evicted) => {
                self.bus.publish(SystemEvent::PeerRemoved(evicted));
                self.buckets[index].push_front(entry);
                self.bus.publish(SystemEvent::PeerAdded(peer));
                AddPeerResult::Added
            }
            None => AddPeerResult::Rejected,
        }
    }

    /// Unfolds the catch-all bucket: every entry belonging to a deeper
    /// prefix moves into a newly appended bucket, recursively while the new
    /// catch-all is still oversized.
    fn split_last_bucket(&mut self) {
        let depth = self.buckets.len() - 1;
        let local = self.local;
        let deeper = self.buckets[depth].split(depth, &local);
        self.buckets.push(deeper);
        if self.buckets[self.buckets.len() - 1].len() > self.bucket_size {
            self.split_last_bucket();
        }
    }

    pub fn remove(&mut self, peer: &PeerId) {
        let node_id = NodeId::from_peer(peer);
        let index = self.bucket_index(&node_id);
        if self.buckets[index].remove(peer) {
            self.bus.publish(SystemEvent::PeerRemoved(*peer));
        }
    }

    /// The `count` known peers closest to `target`, ascending by XOR
    /// distance.
    ///
    /// The bucket matching the target's prefix is scanned; if it cannot
    /// satisfy `count` on its own, both neighbouring buckets are added
    /// before sorting and truncating.
    pub fn nearest(&self, target: &NodeId, count: usize) -> Vec<PeerId> {
        let index = self.bucket_index(target);
        let mut candidates: SmallVec<[&BucketEntry; 20]> =
            self.buckets[index].entries.iter().collect();
        if candidates.len() < count {
            if index > 0 {
                candidates.extend(self.buckets[index - 1].entries.iter());
            }
            if index + 1 < self.buckets.len() {
                candidates.extend(self.buckets[index + 1].entries.iter());
            }
        }
        candidates.sort_by_key(|e| e.node_id.distance(target));
        candidates
            .into_iter()
            .take(count)
            .map(|e| e.peer_id)
            .collect()
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        let node_id = NodeId::from_peer(peer);
        self.buckets[self.bucket_index(&node_id)].contains(peer)
    }

    pub fn size(&self) -> usize {
        self.buckets.iter().map(Bucket::len).sum()
    }

    pub fn all_peers(&self) -> Vec<PeerId> {
        self.buckets
            .iter()
            .flat_map(|b| b.entries.iter().map(|e| e.peer_id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(bucket_size: usize) -> (PeerId, PeerRoutingTable) {
        let local = PeerId::random();
        let table = PeerRoutingTable::new(&local, bucket_size, Bus::new());
        (local, table)
    }

    #[test]
    fn added_peer_is_the_nearest_to_itself() {
        let (_, mut table) = table(20);
        for _ in 0..100 {
            let peer = PeerId::random();
            if table.add_peer(&peer, false, false) == AddPeerResult::Added {
                let nearest = table.nearest(&NodeId::from_peer(&peer), 1);
                assert_eq!(nearest, vec![peer]);
            }
        }
    }

    #[test]
    fn nearest_is_sorted_by_xor_distance() {
        let (_, mut table) = table(20);
        for _ in 0..200 {
            table.add_peer(&PeerId::random(), false, false);
        }
        let target = NodeId::from_peer(&PeerId::random());
        let nearest = table.nearest(&target, 30);
        assert!(!nearest.is_empty());
        let distances: Vec<_> = nearest
            .iter()
            .map(|p| NodeId::from_peer(p).distance(&target))
            .collect();
        for pair in distances.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
    }

    #[test]
    fn full_last_bucket_splits_instead_of_rejecting() {
        let (_, mut table) = table(4);
        let mut added = 0;
        for _ in 0..64 {
            if table.add_peer(&PeerId::random(), false, false) == AddPeerResult::Added {
                added += 1;
            }
        }
        // Splitting must have unfolded more buckets; with capacity 4 and no
        // splits only 4 peers could ever be live.
        assert!(table.buckets.len() > 1);
        assert!(added > 4);
        assert_eq!(table.size(), added);
    }

    #[test]
    fn connected_peer_moves_to_front() {
        let (_, mut table) = table(8);
        let a = PeerId::random();
        let b = PeerId::random();
        // Ensure both land in one table regardless of prefix.
        table.add_peer(&a, false, false);
        table.add_peer(&b, false, false);
        assert_eq!(table.add_peer(&a, false, true), AddPeerResult::MovedToFront);
        assert_eq!(table.add_peer(&a, false, false), AddPeerResult::Unchanged);
    }

    #[test]
    fn permanent_peers_survive_eviction() {
        let local = PeerId::random();
        let mut table = PeerRoutingTable::new(&local, 2, Bus::new());
        let local_node = NodeId::from_peer(&local);

        // Gather peers that all fall into bucket 0 (cpl == 0) so the last
        // bucket never gains capacity for them by splitting.
        let mut shallow = Vec::new();
        while shallow.len() < 4 {
            let peer = PeerId::random();
            if NodeId::from_peer(&peer).common_prefix_len(&local_node) == 0 {
                shallow.push(peer);
            }
        }

        assert_eq!(table.add_peer(&shallow[0], true, false), AddPeerResult::Added);
        assert_eq!(table.add_peer(&shallow[1], true, false), AddPeerResult::Added);
        // Bucket 0 stays the catch-all until a split; force the split path
        // by filling it, then verify pinned entries are never evicted.
        let r2 = table.add_peer(&shallow[2], false, false);
        let r3 = table.add_peer(&shallow[3], false, false);
        assert!(table.contains(&shallow[0]));
        assert!(table.contains(&shallow[1]));
        // Deeper peers got their own buckets after the split; the shallow
        // newcomers can only be rejected or replace a replaceable entry.
        for result in [r2, r3].iter() {
            assert!(matches!(
                result,
                AddPeerResult::Rejected | AddPeerResult::Added
            ));
        }
    }

    #[test]
    fn table_changes_are_published_on_the_bus() {
        use futures::StreamExt;

        let bus = Bus::new();
        let mut events = bus.subscribe();
        let local = PeerId::random();
        let mut table = PeerRoutingTable::new(&local, 8, bus);

        let peer = PeerId::random();
        table.add_peer(&peer, false, false);
        table.remove(&peer);

        futures::executor::block_on(async {
            assert_eq!(events.next().await, Some(SystemEvent::PeerAdded(peer)));
            assert_eq!(events.next().await, Some(SystemEvent::PeerRemoved(peer)));
        });
    }

    #[test]
    fn removing_a_peer_empties_its_slot() {
        let (_, mut table) = table(8);
        let peer = PeerId::random();
        table.add_peer(&peer, false, false);
        assert!(table.contains(&peer));
        table.remove(&peer);
        assert!(!table.contains(&peer));
        assert_eq!(table.size(), 0);
    }
}
