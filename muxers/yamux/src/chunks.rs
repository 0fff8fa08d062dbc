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

use bytes::{Buf, Bytes};
use std::collections::VecDeque;

/// A stream's buffer of received-but-unread bytes.
///
/// Payloads arrive as whole frame bodies and are kept as-is; appending is a
/// queue push, consuming advances the front fragment and drops it once
/// drained. The total length is tracked so flow-control checks are O(1).
#[derive(Debug, Default)]
pub(crate) struct Chunks {
    seq: VecDeque<Bytes>,
    len: usize,
}

impl Chunks {
    pub(crate) fn new() -> Self {
        Chunks::default()
    }

    /// The number of buffered bytes.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends a fragment to the back.
    pub(crate) fn push(&mut self, bytes: Bytes) {
        self.len += bytes.len();
        if !bytes.is_empty() {
            self.seq.push_back(bytes)
        }
    }

    /// Copies up to `out.len()` bytes from the front into `out`, freeing
    /// fragments as they drain. Returns the number of bytes copied.
    pub(crate) fn consume(&mut self, out: &mut [u8]) -> usize {
        let mut n = 0;
        while n < out.len() {
            let chunk = match self.seq.front_mut() {
                Some(chunk) => chunk,
                None => break,
            };
            let k = chunk.len().min(out.len() - n);
            out[n..n + k].copy_from_slice(&chunk[..k]);
            chunk.advance(k);
            n += k;
            if chunk.is_empty() {
                self.seq.pop_front();
            }
        }
        self.len -= n;
        n
    }

    /// Drops all buffered fragments.
    pub(crate) fn clear(&mut self) {
        self.seq.clear();
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_spans_fragments() {
        let mut chunks = Chunks::new();
        chunks.push(Bytes::from_static(b"ab"));
        chunks.push(Bytes::from_static(b"cde"));
        chunks.push(Bytes::from_static(b"f"));
        assert_eq!(chunks.len(), 6);

        let mut out = [0u8; 4];
        assert_eq!(chunks.consume(&mut out), 4);
        assert_eq!(&out, b"abcd");
        assert_eq!(chunks.len(), 2);

        let mut out = [0u8; 8];
        assert_eq!(chunks.consume(&mut out), 2);
        assert_eq!(&out[..2], b"ef");
        assert!(chunks.is_empty());
    }

    #[test]
    fn empty_pushes_are_ignored() {
        let mut chunks = Chunks::new();
        chunks.push(Bytes::new());
        assert!(chunks.is_empty());
        let mut out = [0u8; 1];
        assert_eq!(chunks.consume(&mut out), 0);
    }
}
