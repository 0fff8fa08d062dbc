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

//! Peer-to-peer networking core.
//!
//! This facade re-exports the member crates:
//!
//! - [`core`]: peer identities, the cooperative scheduler, the event bus
//!   and the in-memory pipe.
//! - [`yamux`]: stream multiplexing over one reliable, ordered, secured
//!   byte pipe.
//! - [`kad`]: the Kademlia routing table, iterative lookups and local
//!   record stores.
//!
//! Transports, security handshakes and protocol negotiation are external
//! collaborators: the muxer takes any secured `AsyncRead + AsyncWrite`
//! pipe, and the DHT reaches the network through the
//! [`kad::KadNetwork`] seam.

pub use p2p_core as core;
pub use p2p_kad as kad;
pub use p2p_yamux as yamux;

pub use p2p_core::{Bus, PeerId, Scheduler, SystemEvent};
pub use p2p_kad::{KadControl, Kademlia, KademliaConfig};
pub use p2p_yamux::{Connection, Control, Mode, Stream};
