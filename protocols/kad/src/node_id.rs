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

//! Coordinates in the Kademlia XOR metric space.

use p2p_core::PeerId;
use sha2::{Digest, Sha256};
use uint::construct_uint;

construct_uint! {
    /// XOR distance between two node ids, as a 256-bit unsigned integer.
    pub struct Distance(4);
}

/// Position of a key or peer in the XOR space: the SHA-256 digest of its
/// bytes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NodeId([u8; 32]);

impl NodeId {
    /// The coordinate of an arbitrary key (record key, content id).
    pub fn from_bytes(key: &[u8]) -> NodeId {
        let digest = Sha256::digest(key);
        let mut id = [0u8; 32];
        id.copy_from_slice(&digest);
        NodeId(id)
    }

    /// The coordinate of a peer.
    pub fn from_peer(peer: &PeerId) -> NodeId {
        NodeId::from_bytes(peer.as_bytes())
    }

    /// XOR distance to `other`.
    pub fn distance(&self, other: &NodeId) -> Distance {
        let mut bytes = [0u8; 32];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        Distance::from_big_endian(&bytes)
    }

    /// Length of the common bit prefix with `other`. 256 for equal ids.
    pub fn common_prefix_len(&self, other: &NodeId) -> usize {
        let mut len = 0;
        for i in 0..32 {
            let xor = self.0[i] ^ other.0[i];
            if xor == 0 {
                len += 8;
            } else {
                len += xor.leading_zeros() as usize;
                break;
            }
        }
        len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::quickcheck;

    #[test]
    fn distance_properties_hold_for_arbitrary_keys() {
        fn property(a: Vec<u8>, b: Vec<u8>) -> bool {
            let a = NodeId::from_bytes(&a);
            let b = NodeId::from_bytes(&b);
            let symmetric = a.distance(&b) == b.distance(&a);
            let identity = (a.distance(&b) == Distance::zero()) == (a == b);
            let cpl = a.common_prefix_len(&b) == b.common_prefix_len(&a);
            symmetric && identity && cpl
        }
        quickcheck(property as fn(Vec<u8>, Vec<u8>) -> bool)
    }

    #[test]
    fn distance_is_symmetric_and_zero_on_self() {
        let a = NodeId::from_peer(&PeerId::random());
        let b = NodeId::from_peer(&PeerId::random());
        assert_eq!(a.distance(&b), b.distance(&a));
        assert_eq!(a.distance(&a), Distance::zero());
    }

    #[test]
    fn common_prefix_len_matches_distance() {
        let a = NodeId::from_peer(&PeerId::random());
        let b = NodeId::from_peer(&PeerId::random());
        if a == b {
            assert_eq!(a.common_prefix_len(&b), 256);
        } else {
            let cpl = a.common_prefix_len(&b);
            // The first differing bit is at position `cpl`.
            assert_eq!(256 - a.distance(&b).bits(), cpl);
        }
    }

    #[test]
    fn triangle_property_of_xor() {
        let a = NodeId::from_bytes(b"a");
        let b = NodeId::from_bytes(b"b");
        let c = NodeId::from_bytes(b"c");
        // d(a, c) <= d(a, b) + d(b, c) holds for XOR metrics.
        assert!(a.distance(&c) <= a.distance(&b).saturating_add(b.distance(&c)));
    }
}
