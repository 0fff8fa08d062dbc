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

//! Typed view over the wire schema.

use crate::proto;
use bytes::Bytes;
use p2p_core::PeerId;

pub use crate::proto::MessageType;

/// How reachable the sender believes a peer to be.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Connectedness {
    NotConnected,
    Connected,
    CanConnect,
    CannotConnect,
}

impl From<proto::ConnectionType> for Connectedness {
    fn from(raw: proto::ConnectionType) -> Connectedness {
        match raw {
            proto::ConnectionType::NotConnected => Connectedness::NotConnected,
            proto::ConnectionType::Connected => Connectedness::Connected,
            proto::ConnectionType::CanConnect => Connectedness::CanConnect,
            proto::ConnectionType::CannotConnect => Connectedness::CannotConnect,
        }
    }
}

impl From<Connectedness> for proto::ConnectionType {
    fn from(connectedness: Connectedness) -> proto::ConnectionType {
        match connectedness {
            Connectedness::NotConnected => proto::ConnectionType::NotConnected,
            Connectedness::Connected => proto::ConnectionType::Connected,
            Connectedness::CanConnect => proto::ConnectionType::CanConnect,
            Connectedness::CannotConnect => proto::ConnectionType::CannotConnect,
        }
    }
}

/// A peer with its addresses, as carried in closer/provider lists.
///
/// Addresses are opaque byte strings here; parsing them is the concern of
/// the address book.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KadPeer {
    pub peer_id: PeerId,
    pub addresses: Vec<Bytes>,
    pub connectedness: Connectedness,
}

impl KadPeer {
    fn from_proto(mut peer: proto::Peer) -> Option<KadPeer> {
        let peer_id = PeerId::from_bytes(std::mem::take(&mut peer.id)).ok()?;
        let connectedness = proto::ConnectionType::from_i32(peer.connection)
            .unwrap_or(proto::ConnectionType::NotConnected)
            .into();
        Some(KadPeer {
            peer_id,
            addresses: peer.addrs.into_iter().map(Bytes::from).collect(),
            connectedness,
        })
    }

    fn into_proto(self) -> proto::Peer {
        proto::Peer {
            id: self.peer_id.into_bytes(),
            addrs: self.addresses.into_iter().map(|a| a.to_vec()).collect(),
            connection: proto::ConnectionType::from(self.connectedness) as i32,
        }
    }
}

/// A key/value record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KadRecord {
    pub key: Bytes,
    pub value: Bytes,
    /// Opaque receive timestamp as carried on the wire.
    pub time_received: String,
}

/// One Kademlia RPC message, request or response.
///
/// Like on the wire, one shape covers both directions: the type tag plus
/// whichever fields the exchange populates. The session layer matches a
/// response to its request by the type tag.
#[derive(Clone, Debug, PartialEq)]
pub struct KadMessage {
    pub message_type: MessageType,
    pub key: Bytes,
    pub record: Option<KadRecord>,
    pub closer_peers: Vec<KadPeer>,
    pub provider_peers: Vec<KadPeer>,
}

impl KadMessage {
    fn new(message_type: MessageType, key: Bytes) -> Self {
        KadMessage {
            message_type,
            key,
            record: None,
            closer_peers: Vec::new(),
            provider_peers: Vec::new(),
        }
    }

    pub fn ping() -> Self {
        KadMessage::new(MessageType::Ping, Bytes::new())
    }

    pub fn find_node(key: Bytes) -> Self {
        KadMessage::new(MessageType::FindNode, key)
    }

    pub fn find_node_response(closer_peers: Vec<KadPeer>) -> Self {
        let mut msg = KadMessage::new(MessageType::FindNode, Bytes::new());
        msg.closer_peers = closer_peers;
        msg
    }

    pub fn get_providers(key: Bytes) -> Self {
        KadMessage::new(MessageType::GetProviders, key)
    }

    pub fn get_providers_response(
        key: Bytes,
        provider_peers: Vec<KadPeer>,
        closer_peers: Vec<KadPeer>,
    ) -> Self {
        let mut msg = KadMessage::new(MessageType::GetProviders, key);
        msg.provider_peers = provider_peers;
        msg.closer_peers = closer_peers;
        msg
    }

    pub fn add_provider(key: Bytes, provider: KadPeer) -> Self {
        let mut msg = KadMessage::new(MessageType::AddProvider, key);
        msg.provider_peers = vec![provider];
        msg
    }

    pub fn put_value(record: KadRecord) -> Self {
        let mut msg = KadMessage::new(MessageType::PutValue, record.key.clone());
        msg.record = Some(record);
        msg
    }

    pub fn get_value(key: Bytes) -> Self {
        KadMessage::new(MessageType::GetValue, key)
    }

    pub fn get_value_response(
        key: Bytes,
        record: Option<KadRecord>,
        closer_peers: Vec<KadPeer>,
    ) -> Self {
        let mut msg = KadMessage::new(MessageType::GetValue, key);
        msg.record = record;
        msg.closer_peers = closer_peers;
        msg
    }

    pub(crate) fn from_proto(message: proto::Message) -> Result<KadMessage, crate::KadError> {
        let message_type = proto::MessageType::from_i32(message.r#type)
            .ok_or(crate::KadError::UnexpectedMessage)?;
        // Peers with unusable identities are dropped rather than failing
        // the whole message.
        let closer_peers = message
            .closer_peers
            .into_iter()
            .filter_map(KadPeer::from_proto)
            .collect();
        let provider_peers = message
            .provider_peers
            .into_iter()
            .filter_map(KadPeer::from_proto)
            .collect();
        Ok(KadMessage {
            message_type,
            key: Bytes::from(message.key),
            record: message.record.map(|record| KadRecord {
                key: Bytes::from(record.key),
                value: Bytes::from(record.value),
                time_received: record.time_received,
            }),
            closer_peers,
            provider_peers,
        })
    }

    pub(crate) fn into_proto(self) -> proto::Message {
        proto::Message {
            r#type: self.message_type as i32,
            key: self.key.to_vec(),
            record: self.record.map(|record| proto::Record {
                key: record.key.to_vec(),
                value: record.value.to_vec(),
                time_received: record.time_received,
            }),
            closer_peers: self
                .closer_peers
                .into_iter()
                .map(KadPeer::into_proto)
                .collect(),
            provider_peers: self
                .provider_peers
                .into_iter()
                .map(KadPeer::into_proto)
                .collect(),
            cluster_level_raw: 0,
        }
    }
}
