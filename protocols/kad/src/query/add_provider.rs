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

use super::{broadcast, put_value::collect_closest, QueryContext};
use crate::{
    message::{Connectedness, KadMessage, KadPeer},
    KadError,
};
use bytes::Bytes;
use p2p_core::PeerId;

/// Advertises this node as a provider for `key` to the `k` closest peers.
/// Resolves with the number of peers that took the advertisement.
pub(crate) async fn run(
    ctx: QueryContext,
    key: Bytes,
    seed: Vec<PeerId>,
) -> Result<usize, KadError> {
    let closest = collect_closest(&ctx, key.to_vec(), seed).await;
    if closest.is_empty() {
        return Err(KadError::NoKnownPeers);
    }
    let announcement = KadPeer {
        peer_id: ctx.local_peer,
        addresses: ctx.network.addresses_of(&ctx.local_peer),
        connectedness: Connectedness::Connected,
    };
    let delivered = broadcast(&ctx, closest, KadMessage::add_provider(key, announcement)).await;
    if delivered == 0 {
        Err(KadError::NoProviders)
    } else {
        Ok(delivered)
    }
}
