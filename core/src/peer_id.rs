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

use sha2::{Digest, Sha256};
use std::fmt;

/// The length in bytes of a peer identity.
pub const PEER_ID_LENGTH: usize = 32;

/// Identity of a peer on the network.
///
/// A `PeerId` is the SHA-256 digest of the peer's serialized public key. It
/// is a plain value type: cheap to copy, totally ordered and hashable, and
/// doubles as the coordinate of the peer in the Kademlia XOR space.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId([u8; PEER_ID_LENGTH]);

impl PeerId {
    /// Builds the `PeerId` that corresponds to a serialized public key.
    pub fn from_public_key(key: &[u8]) -> PeerId {
        let digest = Sha256::digest(key);
        let mut bytes = [0u8; PEER_ID_LENGTH];
        bytes.copy_from_slice(&digest);
        PeerId(bytes)
    }

    /// Interprets `bytes` as an already-computed peer identity.
    ///
    /// Returns the input back if it does not have the length of a digest.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<PeerId, Vec<u8>> {
        if bytes.len() != PEER_ID_LENGTH {
            return Err(bytes);
        }
        let mut id = [0u8; PEER_ID_LENGTH];
        id.copy_from_slice(&bytes);
        Ok(PeerId(id))
    }

    /// Generates a random peer identity.
    ///
    /// This is mainly useful for tests and for random-walk queries.
    pub fn random() -> PeerId {
        PeerId(rand::random())
    }

    /// Returns a raw bytes representation of this `PeerId`.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Turns this `PeerId` into its raw bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PeerId").field(&self.to_string()).finish()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..6] {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, "…")
    }
}

impl AsRef<[u8]> for PeerId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_is_public_key_digest() {
        let key = b"a serialized public key";
        let a = PeerId::from_public_key(key);
        let b = PeerId::from_public_key(key);
        assert_eq!(a, b);
        assert_ne!(a, PeerId::from_public_key(b"another key"));
    }

    #[test]
    fn from_bytes_requires_digest_length() {
        assert!(PeerId::from_bytes(vec![0; 32]).is_ok());
        assert!(PeerId::from_bytes(vec![0; 31]).is_err());
        assert!(PeerId::from_bytes(vec![0; 33]).is_err());
    }

    #[test]
    fn round_trips_through_bytes() {
        let id = PeerId::random();
        let bytes = id.into_bytes();
        assert_eq!(PeerId::from_bytes(bytes), Ok(id));
    }
}
