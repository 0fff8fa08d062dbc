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

//! Varint-length-prefixed protobuf framing for DHT streams.

use crate::{message::KadMessage, proto, KadError};
use asynchronous_codec::{BytesMut, Decoder, Encoder};
use bytes::Bytes;
use prost::Message as _;
use unsigned_varint::codec::UviBytes;

/// Hard cap on a single DHT message.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Codec turning a raw stream into a channel of [`KadMessage`]s.
pub struct KadCodec {
    length: UviBytes<Bytes>,
}

impl KadCodec {
    pub fn new() -> Self {
        let mut length = UviBytes::default();
        length.set_max_len(MAX_MESSAGE_SIZE);
        KadCodec { length }
    }
}

impl Default for KadCodec {
    fn default() -> Self {
        KadCodec::new()
    }
}

impl Encoder for KadCodec {
    type Item = KadMessage;
    type Error = KadError;

    fn encode(&mut self, item: KadMessage, dst: &mut BytesMut) -> Result<(), KadError> {
        let proto = item.into_proto();
        let mut buf = Vec::with_capacity(proto.encoded_len());
        proto
            .encode(&mut buf)
            .map_err(|_| KadError::MessageSerialize)?;
        self.length
            .encode(Bytes::from(buf), dst)
            .map_err(KadError::Io)
    }
}

impl Decoder for KadCodec {
    type Item = KadMessage;
    type Error = KadError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<KadMessage>, KadError> {
        let packet = match self.length.decode(src).map_err(KadError::Io)? {
            Some(packet) => packet,
            None => return Ok(None),
        };
        let message = proto::Message::decode(&packet[..])?;
        KadMessage::from_proto(message).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let mut codec = KadCodec::new();
        let msg = KadMessage::find_node(Bytes::from_static(b"some key"));

        let mut buffer = BytesMut::new();
        codec.encode(msg.clone(), &mut buffer).unwrap();
        let back = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(back, msg);
        assert!(buffer.is_empty());
    }

    #[test]
    fn partial_input_yields_nothing() {
        let mut codec = KadCodec::new();
        let msg = KadMessage::ping();

        let mut buffer = BytesMut::new();
        codec.encode(msg, &mut buffer).unwrap();
        let cut = buffer.split_to(buffer.len() - 1);
        let mut partial = cut;
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }
}
