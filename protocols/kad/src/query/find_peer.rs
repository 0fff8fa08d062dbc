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
use futures::future::{self, Either};
use futures_timer::Delay;
use p2p_core::PeerId;

/// Iteratively walks towards `target` until some peer reports it among its
/// closest, or the frontier dries up, or the walk deadline passes.
pub(crate) async fn run(
    ctx: QueryContext,
    target: PeerId,
    seed: Vec<PeerId>,
) -> Result<KadPeer, KadError> {
    let request = KadMessage::find_node(Bytes::copy_from_slice(target.as_bytes()));
    let mut lookup = Lookup::new(
        ctx.clone(),
        NodeId::from_peer(&target),
        seed,
        request,
    );
    let mut walk_deadline = Delay::new(ctx.config.random_walk_timeout);

    loop {
        let step = match future::select(Box::pin(lookup.next()), &mut walk_deadline).await {
            Either::Left((step, _)) => step,
            Either::Right(_) => return Err(KadError::Timeout),
        };
        let message = match step {
            Some((_, Ok(message))) => message,
            // Failed exchanges just shrink the frontier.
            Some((_, Err(_))) => continue,
            None => return Err(KadError::NotFound),
        };
        for peer in &message.closer_peers {
            if peer.peer_id == target && peer.connectedness != Connectedness::CannotConnect {
                return Ok(peer.clone());
            }
        }
    }
}
