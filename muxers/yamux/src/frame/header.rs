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

//! The 12-byte Yamux frame header.
//!
//! ```text
//! | version (1) | type (1) | flags (2) | stream id (4) | length (4) |
//! ```
//!
//! All multi-byte fields are big-endian. Decoding is strict: an unknown
//! version, type or flag bit fails the whole header, and the caller is
//! expected to terminate the connection.

use std::fmt;

/// Size of an encoded header in bytes.
pub const HEADER_SIZE: usize = 12;

/// The protocol version this implementation speaks.
const VERSION: u8 = 0;

/// Frame types.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum Tag {
    Data = 0,
    WindowUpdate = 1,
    Ping = 2,
    GoAway = 3,
}

/// Header flag bits.
pub const SYN: Flags = Flags(1);
pub const ACK: Flags = Flags(2);
pub const FIN: Flags = Flags(4);
pub const RST: Flags = Flags(8);

const FLAGS_MASK: u16 = 0b1111;

/// A bitset over {SYN, ACK, FIN, RST}.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Hash)]
pub struct Flags(u16);

impl Flags {
    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn val(self) -> u16 {
        self.0
    }
}

impl std::ops::BitOr for Flags {
    type Output = Flags;

    fn bitor(self, other: Flags) -> Flags {
        Flags(self.0 | other.0)
    }
}

impl std::ops::BitOrAssign for Flags {
    fn bitor_assign(&mut self, other: Flags) {
        self.0 |= other.0
    }
}

/// Identifier of a multiplexed stream.
///
/// Stream 0 is the session itself (PING and GOAWAY frames). Odd identifiers
/// are allocated by the dialing side of the connection, even ones by the
/// listening side.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct StreamId(u32);

impl StreamId {
    pub fn new(id: u32) -> Self {
        StreamId(id)
    }

    /// The session id, used by PING and GOAWAY.
    pub const SESSION: StreamId = StreamId(0);

    pub fn is_session(self) -> bool {
        self.0 == 0
    }

    pub fn is_dialer(self) -> bool {
        self.0 % 2 == 1
    }

    pub fn is_listener(self) -> bool {
        !self.is_session() && self.0 % 2 == 0
    }

    pub fn val(self) -> u32 {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl nohash_hasher::IsEnabled for StreamId {}

impl std::hash::Hash for StreamId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write_u32(self.0)
    }
}

/// Error codes carried by a GoAway frame.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum GoAwayCode {
    /// Normal session termination.
    Normal = 0,
    /// The peer violated the protocol.
    ProtocolError = 1,
    /// An internal error on the sender side.
    InternalError = 2,
}

impl GoAwayCode {
    pub fn from_raw(raw: u32) -> Option<GoAwayCode> {
        match raw {
            0 => Some(GoAwayCode::Normal),
            1 => Some(GoAwayCode::ProtocolError),
            2 => Some(GoAwayCode::InternalError),
            _ => None,
        }
    }
}

impl fmt::Display for GoAwayCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GoAwayCode::Normal => f.write_str("normal"),
            GoAwayCode::ProtocolError => f.write_str("protocol error"),
            GoAwayCode::InternalError => f.write_str("internal error"),
        }
    }
}

/// A decoded frame header.
///
/// The meaning of `length` depends on the frame type: payload length for
/// Data frames, credit delta for WindowUpdate, opaque nonce for Ping and
/// error code for GoAway.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Header {
    pub tag: Tag,
    pub flags: Flags,
    pub stream_id: StreamId,
    pub length: u32,
}

impl Header {
    pub fn new(tag: Tag, stream_id: StreamId, length: u32) -> Self {
        Header {
            tag,
            flags: Flags::default(),
            stream_id,
            length,
        }
    }

    pub fn syn(&mut self) {
        self.flags |= SYN
    }

    pub fn ack(&mut self) {
        self.flags |= ACK
    }

    pub fn fin(&mut self) {
        self.flags |= FIN
    }

    pub fn rst(&mut self) {
        self.flags |= RST
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(Header {:?} {} (len {}) (flags {:04b}))",
            self.tag,
            self.stream_id,
            self.length,
            self.flags.val()
        )
    }
}

/// Encodes a header into its 12-byte wire representation.
pub fn encode(header: &Header) -> [u8; HEADER_SIZE] {
    let mut buf = [0u8; HEADER_SIZE];
    buf[0] = VERSION;
    buf[1] = header.tag as u8;
    buf[2..4].copy_from_slice(&header.flags.val().to_be_bytes());
    buf[4..8].copy_from_slice(&header.stream_id.val().to_be_bytes());
    buf[8..12].copy_from_slice(&header.length.to_be_bytes());
    buf
}

/// Decodes a 12-byte header, consuming it atomically.
pub fn decode(buf: &[u8; HEADER_SIZE]) -> Result<Header, HeaderDecodeError> {
    if buf[0] != VERSION {
        return Err(HeaderDecodeError::Version(buf[0]));
    }

    let tag = match buf[1] {
        0 => Tag::Data,
        1 => Tag::WindowUpdate,
        2 => Tag::Ping,
        3 => Tag::GoAway,
        t => return Err(HeaderDecodeError::Type(t)),
    };

    let flags = u16::from_be_bytes([buf[2], buf[3]]);
    if flags & !FLAGS_MASK != 0 {
        return Err(HeaderDecodeError::Flags(flags));
    }

    Ok(Header {
        tag,
        flags: Flags(flags),
        stream_id: StreamId(u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]])),
        length: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
    })
}

/// Possible errors while decoding a frame header.
#[derive(Clone, Copy, Debug, thiserror::Error)]
pub enum HeaderDecodeError {
    /// Unsupported wire version.
    #[error("unknown version {0}")]
    Version(u8),
    /// An unknown frame type.
    #[error("unknown frame type {0}")]
    Type(u8),
    /// Flag bits outside the known set.
    #[error("unknown header flags {0:#06b}")]
    Flags(u16),
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::{quickcheck, Arbitrary, Gen};

    impl Arbitrary for Header {
        fn arbitrary<G: Gen>(g: &mut G) -> Header {
            let tag = match u8::arbitrary(g) % 4 {
                0 => Tag::Data,
                1 => Tag::WindowUpdate,
                2 => Tag::Ping,
                _ => Tag::GoAway,
            };
            Header {
                tag,
                flags: Flags(u16::arbitrary(g) & FLAGS_MASK),
                stream_id: StreamId(u32::arbitrary(g)),
                length: u32::arbitrary(g),
            }
        }
    }

    #[test]
    fn header_round_trip() {
        fn property(header: Header) -> bool {
            decode(&encode(&header)).ok() == Some(header)
        }
        quickcheck(property as fn(Header) -> bool)
    }

    #[test]
    fn bytes_round_trip() {
        fn property(header: Header) -> bool {
            let bytes = encode(&header);
            encode(&decode(&bytes).expect("valid")) == bytes
        }
        quickcheck(property as fn(Header) -> bool)
    }

    #[test]
    fn layout_is_fixed() {
        // SYN data frame carrying "hello" on the first dialer stream.
        let mut header = Header::new(Tag::Data, StreamId::new(1), 5);
        header.syn();
        assert_eq!(
            encode(&header),
            [0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 5]
        );
    }

    #[test]
    fn unknown_version_type_and_flags_are_rejected() {
        let mut bytes = encode(&Header::new(Tag::Ping, StreamId::SESSION, 42));
        bytes[0] = 1;
        assert!(matches!(decode(&bytes), Err(HeaderDecodeError::Version(1))));

        let mut bytes = encode(&Header::new(Tag::Ping, StreamId::SESSION, 42));
        bytes[1] = 9;
        assert!(matches!(decode(&bytes), Err(HeaderDecodeError::Type(9))));

        let mut bytes = encode(&Header::new(Tag::Ping, StreamId::SESSION, 42));
        bytes[2] = 0xff;
        assert!(matches!(decode(&bytes), Err(HeaderDecodeError::Flags(_))));
    }
}
