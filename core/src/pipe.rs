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

//! In-memory bidirectional byte pipe.
//!
//! [`pipe`] yields the two ends of a reliable, ordered duplex connection,
//! each implementing `AsyncRead + AsyncWrite` with backpressure and
//! half-close. This is the stand-in for a secured transport connection in
//! tests and examples; it is not a transport.

use futures::io::{AsyncRead, AsyncWrite};
use futures::task::{Context, Poll, Waker};
use parking_lot::Mutex;
use std::{collections::VecDeque, io, pin::Pin, sync::Arc};

/// Creates a connected pair of pipe endpoints, each direction buffering at
/// most `capacity` bytes before writers are suspended.
pub fn pipe(capacity: usize) -> (Endpoint, Endpoint) {
    assert!(capacity > 0);
    let a_to_b = Arc::new(Mutex::new(Lane::new(capacity)));
    let b_to_a = Arc::new(Mutex::new(Lane::new(capacity)));
    let a = Endpoint {
        incoming: b_to_a.clone(),
        outgoing: a_to_b.clone(),
    };
    let b = Endpoint {
        incoming: a_to_b,
        outgoing: b_to_a,
    };
    (a, b)
}

/// One direction of the pipe.
struct Lane {
    buffer: VecDeque<u8>,
    capacity: usize,
    closed: bool,
    reader: Option<Waker>,
    writer: Option<Waker>,
}

impl Lane {
    fn new(capacity: usize) -> Self {
        Lane {
            buffer: VecDeque::new(),
            capacity,
            closed: false,
            reader: None,
            writer: None,
        }
    }

    fn wake_reader(&mut self) {
        if let Some(waker) = self.reader.take() {
            waker.wake();
        }
    }

    fn wake_writer(&mut self) {
        if let Some(waker) = self.writer.take() {
            waker.wake();
        }
    }
}

/// One end of an in-memory duplex connection.
pub struct Endpoint {
    incoming: Arc<Mutex<Lane>>,
    outgoing: Arc<Mutex<Lane>>,
}

impl AsyncRead for Endpoint {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        let mut lane = self.incoming.lock();
        if lane.buffer.is_empty() {
            if lane.closed {
                return Poll::Ready(Ok(0));
            }
            lane.reader = Some(cx.waker().clone());
            return Poll::Pending;
        }
        let mut n = 0;
        while n < buf.len() {
            match lane.buffer.pop_front() {
                Some(byte) => {
                    buf[n] = byte;
                    n += 1;
                }
                None => break,
            }
        }
        lane.wake_writer();
        Poll::Ready(Ok(n))
    }
}

impl AsyncWrite for Endpoint {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut lane = self.outgoing.lock();
        if lane.closed {
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        }
        let free = lane.capacity.saturating_sub(lane.buffer.len());
        if free == 0 {
            lane.writer = Some(cx.waker().clone());
            return Poll::Pending;
        }
        let n = free.min(buf.len());
        lane.buffer.extend(&buf[..n]);
        lane.wake_reader();
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut lane = self.outgoing.lock();
        lane.closed = true;
        lane.wake_reader();
        Poll::Ready(Ok(()))
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        // Readers blocked on us must observe EOF, writers towards us an
        // error on the next backpressure check.
        let mut outgoing = self.outgoing.lock();
        outgoing.closed = true;
        outgoing.wake_reader();
        drop(outgoing);
        let mut incoming = self.incoming.lock();
        incoming.closed = true;
        incoming.wake_writer();
    }
}
