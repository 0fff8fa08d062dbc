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

//! The host-facing seam of the DHT.
//!
//! The DHT does not dial, negotiate or keep an address book itself; the
//! host provides all of that behind [`KadNetwork`]. Streams handed over are
//! already negotiated to the configured protocol id.

use crate::{message::Connectedness, KadError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::io::{AsyncRead, AsyncWrite};
use p2p_core::PeerId;

/// Object-safe alias for a negotiated DHT stream.
pub trait RawStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> RawStream for T {}

/// A ready-to-use DHT stream.
pub type KadStream = Box<dyn RawStream>;

/// What the host must provide for the DHT to operate.
#[async_trait]
pub trait KadNetwork: Send + Sync {
    /// The identity of this node.
    fn local_peer(&self) -> PeerId;

    /// Opens a new stream to `peer`, negotiated to the DHT protocol.
    async fn new_stream(&self, peer: &PeerId) -> Result<KadStream, KadError>;

    /// Known addresses of `peer`, opaque to the DHT.
    fn addresses_of(&self, peer: &PeerId) -> Vec<Bytes>;

    /// Adds or refreshes addresses learned for `peer`.
    fn upsert_addresses(&self, peer: &PeerId, addresses: Vec<Bytes>);

    /// The host's current view of `peer`'s reachability.
    fn connectedness(&self, peer: &PeerId) -> Connectedness;
}
