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

use super::{broadcast, Lookup, QueryContext};
use crate::{
    message::{KadMessage, KadRecord},
    node_id::NodeId,
    KadError,
};
use futures::future::{self, Either};
use futures_timer::Delay;
use p2p_core::PeerId;

/// The broadcast flavour: converge on the `k` peers closest to the key,
/// then deliver the record to each of them. Resolves with the number of
/// successful deliveries.
pub(crate) async fn run(
    ctx: QueryContext,
    record: KadRecord,
    seed: Vec<PeerId>,
) -> Result<usize, KadError> {
    let closest = collect_closest(&ctx, record.key.to_vec(), seed).await;
    if closest.is_empty() {
        return Err(KadError::NoKnownPeers);
    }
    let delivered = broadcast(&ctx, closest, KadMessage::put_value(record)).await;
    if delivered == 0 {
        Err(KadError::NoProviders)
    } else {
        Ok(delivered)
    }
}

/// Runs a FindNode walk over `key` to discover the closest peers, then
/// returns the `k` best of everything seen.
pub(crate) async fn collect_closest(
    ctx: &QueryContext,
    key: Vec<u8>,
    seed: Vec<PeerId>,
) -> Vec<PeerId> {
    let target = NodeId::from_bytes(&key);
    let request = KadMessage::find_node(bytes::Bytes::from(key));
    let mut lookup = Lookup::new(ctx.clone(), target, seed, request);
    let mut walk_deadline = Delay::new(ctx.config.random_walk_timeout);

    loop {
        match future::select(Box::pin(lookup.next()), &mut walk_deadline).await {
            Either::Left((Some(_), _)) => continue,
            Either::Left((None, _)) | Either::Right(_) => break,
        }
    }

    let mut candidates: Vec<PeerId> = lookup
        .seen()
        .filter(|peer| **peer != ctx.local_peer)
        .copied()
        .collect();
    candidates.sort_by_key(|peer| NodeId::from_peer(peer).distance(&target));
    candidates.truncate(ctx.config.bucket_size);
    candidates
}
