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

use std::time::Duration;

/// Kademlia configuration.
#[derive(Debug, Clone)]
pub struct KademliaConfig {
    /// The protocol id negotiated for DHT streams.
    pub protocol_id: String,
    /// Degree of parallelism of iterative lookups, `alpha` in the papers.
    pub query_concurrency: usize,
    /// Bucket capacity and replication factor, `k` in the papers.
    pub bucket_size: usize,
    /// How many distinct providers confirm a GetProviders lookup.
    pub provider_quorum: usize,
    /// Deadline for opening a stream to a single peer.
    pub connection_timeout: Duration,
    /// Deadline for one request/response exchange on a stream.
    pub response_timeout: Duration,
    /// Overall deadline of one iterative lookup.
    pub random_walk_timeout: Duration,
    /// How long a stored record lives.
    pub max_record_age: Duration,
    /// How long a provider advertisement lives.
    pub provider_record_ttl: Duration,
    /// Cadence of the store maintenance sweep.
    pub sweep_interval: Duration,
}

impl Default for KademliaConfig {
    fn default() -> Self {
        KademliaConfig {
            protocol_id: "/ipfs/kad/1.0.0".to_string(),
            query_concurrency: 3,
            bucket_size: 20,
            provider_quorum: 3,
            connection_timeout: Duration::from_secs(10),
            response_timeout: Duration::from_secs(10),
            random_walk_timeout: Duration::from_secs(30),
            max_record_age: Duration::from_secs(36 * 60 * 60),
            provider_record_ttl: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl KademliaConfig {
    /// The refresh deadline of a fresh record: records are re-announced
    /// after two fifths of their lifetime, well before they can expire.
    pub fn refresh_interval(&self) -> Duration {
        self.max_record_age * 2 / 5
    }
}
