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

use std::io;

/// Errors surfaced by the Kademlia subsystem.
///
/// Query failures resolve the caller's pending request; they never take the
/// DHT service itself down.
#[derive(Debug, thiserror::Error)]
pub enum KadError {
    /// An I/O error on a stream.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    /// An incoming message could not be decoded.
    #[error("message parse error: {0}")]
    MessageParse(#[from] prost::DecodeError),
    /// An outgoing message could not be serialized.
    #[error("message serialize error")]
    MessageSerialize,
    /// The response type does not match the request.
    #[error("unexpected message type in response")]
    UnexpectedMessage,
    /// A peer entry in a message carried an invalid identity.
    #[error("invalid peer in message")]
    InvalidPeer,
    /// The operation did not complete within its deadline.
    #[error("operation timed out")]
    Timeout,
    /// The routing table held no peer to start from.
    #[error("no known peers to query")]
    NoKnownPeers,
    /// An iterative lookup converged without finding the target.
    #[error("peer not found")]
    NotFound,
    /// No provider could be confirmed for the key.
    #[error("no providers found")]
    NoProviders,
    /// No record exists for the key, locally or on the network.
    #[error("value not found")]
    ValueNotFound,
    /// The stream ended before the exchange completed.
    #[error("stream closed by the remote")]
    StreamReset,
    /// The query's owner went away before the query finished.
    #[error("query cancelled")]
    Cancelled,
    /// The DHT service has shut down.
    #[error("the dht service has shut down")]
    ServiceShutDown,
}
