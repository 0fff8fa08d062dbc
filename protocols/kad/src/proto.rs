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

//! Hand-maintained mirror of the Kademlia wire schema (`dht.proto`).
//!
//! Field numbers and semantics must not change; they are fixed by the
//! protocol and shared with every existing deployment.

/// The DHT RPC envelope.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Message {
    #[prost(enumeration = "MessageType", tag = "1")]
    pub r#type: i32,
    #[prost(bytes = "vec", tag = "2")]
    pub key: ::std::vec::Vec<u8>,
    #[prost(message, optional, tag = "3")]
    pub record: ::std::option::Option<Record>,
    #[prost(message, repeated, tag = "8")]
    pub closer_peers: ::std::vec::Vec<Peer>,
    #[prost(message, repeated, tag = "9")]
    pub provider_peers: ::std::vec::Vec<Peer>,
    #[prost(int32, tag = "10")]
    pub cluster_level_raw: i32,
}

/// A stored record.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Record {
    #[prost(bytes = "vec", tag = "1")]
    pub key: ::std::vec::Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub value: ::std::vec::Vec<u8>,
    #[prost(string, tag = "5")]
    pub time_received: ::std::string::String,
}

/// A peer as known by the sender.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Peer {
    #[prost(bytes = "vec", tag = "1")]
    pub id: ::std::vec::Vec<u8>,
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub addrs: ::std::vec::Vec<::std::vec::Vec<u8>>,
    #[prost(enumeration = "ConnectionType", tag = "3")]
    pub connection: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum MessageType {
    PutValue = 0,
    GetValue = 1,
    AddProvider = 2,
    GetProviders = 3,
    FindNode = 4,
    Ping = 5,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ConnectionType {
    /// The sender has not tried to connect to the peer.
    NotConnected = 0,
    /// The sender is currently connected to the peer.
    Connected = 1,
    /// The sender was recently connected to the peer.
    CanConnect = 2,
    /// The sender tried and failed to connect.
    CannotConnect = 3,
}
