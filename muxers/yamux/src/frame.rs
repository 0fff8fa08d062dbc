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

pub mod header;
pub(crate) mod io;
pub(crate) mod write_queue;

use bytes::Bytes;
use header::{GoAwayCode, Header, StreamId, Tag, HEADER_SIZE};

pub use io::FrameDecodeError;

/// A complete Yamux frame: a header plus, for Data frames, a payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub header: Header,
    pub body: Bytes,
}

impl Frame {
    pub fn new(header: Header) -> Self {
        Frame {
            header,
            body: Bytes::new(),
        }
    }

    /// A data frame. The body length must fit a `u32`, which every caller
    /// guarantees by never sending more than the peer's window at once.
    pub fn data(id: StreamId, body: Bytes) -> Self {
        debug_assert!(body.len() <= u32::max_value() as usize);
        Frame {
            header: Header::new(Tag::Data, id, body.len() as u32),
            body,
        }
    }

    /// A window update granting `credit` additional bytes to the sender.
    pub fn window_update(id: StreamId, credit: u32) -> Self {
        Frame::new(Header::new(Tag::WindowUpdate, id, credit))
    }

    /// An outgoing ping carrying an opaque nonce.
    pub fn ping(nonce: u32) -> Self {
        let mut header = Header::new(Tag::Ping, StreamId::SESSION, nonce);
        header.syn();
        Frame::new(header)
    }

    /// The answer to a ping, echoing its nonce.
    pub fn pong(nonce: u32) -> Self {
        let mut header = Header::new(Tag::Ping, StreamId::SESSION, nonce);
        header.ack();
        Frame::new(header)
    }

    /// A session termination frame.
    pub fn go_away(code: GoAwayCode) -> Self {
        Frame::new(Header::new(Tag::GoAway, StreamId::SESSION, code as u32))
    }

    /// Half-closes `id` in our direction.
    pub fn close_stream(id: StreamId) -> Self {
        let mut header = Header::new(Tag::Data, id, 0);
        header.fin();
        Frame::new(header)
    }

    /// Hard-resets `id`.
    pub fn reset_stream(id: StreamId) -> Self {
        let mut header = Header::new(Tag::Data, id, 0);
        header.rst();
        Frame::new(header)
    }

    /// The number of bytes this frame occupies on the wire.
    pub fn wire_len(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }
}
