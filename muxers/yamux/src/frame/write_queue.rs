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

use super::Frame;
use std::collections::VecDeque;

/// The connection's queue of not-yet-written frames.
///
/// Strictly FIFO: frames leave in the order they entered, which is what
/// guarantees on-wire ordering matches enqueue ordering. The byte budget
/// bounds how much outbound data can pile up per connection; the connection
/// stops accepting stream frames while the queue is over budget, which in
/// turn suspends stream writers on their bounded command channel.
pub(crate) struct WriteQueue {
    frames: VecDeque<Frame>,
    queued_bytes: usize,
    budget: usize,
}

impl WriteQueue {
    pub(crate) fn new(budget: usize) -> Self {
        WriteQueue {
            frames: VecDeque::new(),
            queued_bytes: 0,
            budget,
        }
    }

    /// Appends a frame unconditionally. Control frames (acks, window
    /// updates, pings, resets, GoAway) use this: they are small and must
    /// never be dropped.
    pub(crate) fn push(&mut self, frame: Frame) {
        self.queued_bytes += frame.wire_len();
        self.frames.push_back(frame);
    }

    /// Whether a frame of `len` wire bytes fits the remaining budget.
    pub(crate) fn has_room_for(&self, len: usize) -> bool {
        self.queued_bytes + len <= self.budget
    }

    pub(crate) fn pop(&mut self) -> Option<Frame> {
        let frame = self.frames.pop_front()?;
        self.queued_bytes -= frame.wire_len();
        Some(frame)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn queued_bytes(&self) -> usize {
        self.queued_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::header::StreamId;
    use bytes::Bytes;

    #[test]
    fn fifo_order_and_byte_accounting() {
        let mut queue = WriteQueue::new(1024);
        let first = Frame::data(StreamId::new(1), Bytes::from_static(b"abc"));
        let second = Frame::ping(1);
        queue.push(first.clone());
        queue.push(second.clone());
        assert_eq!(queue.queued_bytes(), first.wire_len() + second.wire_len());

        assert_eq!(queue.pop(), Some(first));
        assert_eq!(queue.pop(), Some(second));
        assert_eq!(queue.pop(), None);
        assert_eq!(queue.queued_bytes(), 0);
    }

    #[test]
    fn budget_is_reported() {
        let mut queue = WriteQueue::new(32);
        assert!(queue.has_room_for(32));
        queue.push(Frame::data(StreamId::new(1), Bytes::from_static(b"0123")));
        assert!(queue.has_room_for(16));
        assert!(!queue.has_room_for(17));
    }
}
