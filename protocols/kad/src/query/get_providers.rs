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

use super::{Lookup, QueryContext};
use crate::{
    message::{Connectedness, KadMessage, KadPeer},
    node_id::NodeId,
    KadError,
};
use bytes::Bytes;
use fnv::FnvHashSet;
use futures::future::{self, Either};
use futures_timer::Delay;
use p2p_core::PeerId;

/// Accumulates distinct providers for `key` until `quorum` of them are
/// confirmed. On timeout or an exhausted frontier whatever accumulated is
/// returned; only an empty result is an error.
pub(crate) async fn run(
    ctx: QueryContext,
    key: Bytes,
    quorum: usize,
    seed: Vec<PeerId>,
) -> Result<Vec<KadPeer>, KadError> {
    let request = KadMessage::get_providers(key.clone());
    let mut lookup = Lookup::new(ctx.clone(), NodeId::from_bytes(&key), seed, request);
    let mut walk_deadline = Delay::new(ctx.config.random_walk_timeout);

    let mut providers: Vec<KadPeer> = Vec::new();
    let mut distinct: FnvHashSet<PeerId> = FnvHashSet::default();

    loop {
        let step = match future::select(Box::pin(lookup.next()), &mut walk_deadline).await {
            Either::Left((step, _)) => step,
            Either::Right(_) => break,
        };
        let message = match step {
            Some((_, Ok(message))) => message,
            Some((_, Err(_))) => continue,
            None => break,
        };
        for provider in &message.provider_peers {
            if provider.connectedness == Connectedness::CannotConnect {
                continue;
            }
            ctx.network
                .upsert_addresses(&provider.peer_id, provider.addresses.clone());
            if distinct.insert(provider.peer_id) {
                providers.push(provider.clone());
            }
        }
        if providers.len() >= quorum {
            return Ok(providers);
        }
    }

    if providers.is_empty() {
        Err(KadError::NoProviders)
    } else {
        Ok(providers)
    }
}
