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

//! System-wide pub/sub event bus.

use crate::PeerId;
use futures::channel::mpsc;
use parking_lot::Mutex;
use std::sync::Arc;

/// Events published by the stack's components.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SystemEvent {
    /// A peer entered the routing table.
    PeerAdded(PeerId),
    /// A peer left the routing table.
    PeerRemoved(PeerId),
    /// A new muxed connection became available.
    NewConnection(PeerId),
    /// A muxed connection went away.
    PeerDisconnected(PeerId),
}

/// A broadcast bus. Cloning yields another handle to the same bus.
///
/// Publishing never blocks; subscribers that dropped their receiver are
/// pruned on the next publish.
#[derive(Clone, Default)]
pub struct Bus {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<SystemEvent>>>>,
}

impl Bus {
    pub fn new() -> Self {
        Bus::default()
    }

    /// Registers a new subscriber receiving every event published from now
    /// on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SystemEvent> {
        let (tx, rx) = mpsc::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Delivers `event` to every live subscriber.
    pub fn publish(&self, event: SystemEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.unbounded_send(event.clone()).is_ok());
    }
}
