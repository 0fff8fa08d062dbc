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

use crate::{
    chunks::Chunks,
    connection::{self, StreamCommand},
    frame::{
        header::{StreamId, SYN},
        Frame,
    },
    Config,
};
use bytes::Bytes;
use futures::channel::mpsc;
use futures::io::{AsyncRead, AsyncWrite};
use futures::task::{Context, Poll, Waker};
use parking_lot::{Mutex, MutexGuard};
use std::{fmt, io, pin::Pin, sync::Arc};

/// The state of a stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    /// Open bidirectionally.
    Open,
    /// We sent our FIN; reads continue.
    SendClosed,
    /// The remote sent its FIN; writes continue.
    RecvClosed,
    /// Closed in both directions (terminal).
    Closed,
}

impl State {
    pub fn can_read(self) -> bool {
        !matches!(self, State::RecvClosed | State::Closed)
    }

    pub fn can_write(self) -> bool {
        !matches!(self, State::SendClosed | State::Closed)
    }
}

/// Why a stream ended up in [`State::Closed`] involuntarily.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum CloseReason {
    /// The stream was reset, by either side.
    Reset,
    /// The muxed connection underneath is gone.
    ConnectionDead,
}

impl CloseReason {
    fn as_io_error(self) -> io::Error {
        match self {
            CloseReason::Reset => {
                io::Error::new(io::ErrorKind::ConnectionReset, "stream has been reset")
            }
            CloseReason::ConnectionDead => {
                io::Error::new(io::ErrorKind::BrokenPipe, "connection is closed")
            }
        }
    }
}

/// Pending flag for the next outbound frame of this stream.
///
/// Outbound streams open lazily: the SYN rides on the first frame actually
/// sent.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Flag {
    None,
    Syn,
}

/// A multiplexed stream.
///
/// Created outbound via [`crate::Control::open_stream`] or inbound via
/// [`crate::Connection::next_stream`]. Reading and writing use the
/// `AsyncRead`/`AsyncWrite` interface; a clean remote half-close reads as
/// EOF, a reset or a dead connection as an error carrying the cause.
pub struct Stream {
    id: StreamId,
    conn: connection::Id,
    config: Arc<Config>,
    sender: mpsc::Sender<StreamCommand>,
    flag: Flag,
    pending_update: Option<Frame>,
    shared: Arc<Mutex<Shared>>,
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id.val())
            .field("connection", &self.conn)
            .finish()
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(Stream {}/{})", self.conn, self.id)
    }
}

impl Stream {
    pub(crate) fn new(
        id: StreamId,
        conn: connection::Id,
        config: Arc<Config>,
        window: u32,
        credit: u32,
        sender: mpsc::Sender<StreamCommand>,
    ) -> Self {
        Stream {
            id,
            conn,
            config,
            sender,
            flag: Flag::None,
            pending_update: None,
            shared: Arc::new(Mutex::new(Shared::new(window, credit))),
        }
    }

    /// This stream's identifier.
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Whether both directions are closed.
    pub fn is_closed(&self) -> bool {
        self.shared().state() == State::Closed
    }

    pub(crate) fn set_flag(&mut self, flag: Flag) {
        self.flag = flag
    }

    pub(crate) fn shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock()
    }

    pub(crate) fn strong_count(&self) -> usize {
        Arc::strong_count(&self.shared)
    }

    pub(crate) fn clone_shared(&self) -> Self {
        Stream {
            id: self.id,
            conn: self.conn,
            config: self.config.clone(),
            sender: self.sender.clone(),
            flag: Flag::None,
            pending_update: None,
            shared: self.shared.clone(),
        }
    }

    /// Hard-resets the stream.
    ///
    /// Terminal and idempotent: both directions close immediately, any
    /// suspended read or write on another handle wakes up with a reset
    /// error, and an RST frame goes out to the remote.
    pub async fn reset(&mut self) {
        {
            let mut shared = self.shared();
            if shared.state() == State::Closed {
                return;
            }
            shared.close(CloseReason::Reset);
        }
        // If the connection is gone the remote no longer cares.
        let _ = futures::SinkExt::send(&mut self.sender, StreamCommand::Reset(self.id)).await;
    }

    /// Replaces the receive window with `new_size`, crediting the remote
    /// with the difference.
    ///
    /// Fails if `new_size` exceeds the configured maximum window or lies
    /// below what is currently buffered.
    pub async fn set_window(&mut self, new_size: u32) -> io::Result<()> {
        let update = {
            let mut shared = self.shared();
            if new_size > self.config.receive_window
                || (new_size as usize) < shared.buffer.len()
            {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "window size out of range",
                ));
            }
            if let Some(reason) = shared.close_reason {
                return Err(reason.as_io_error());
            }
            if new_size <= shared.window {
                shared.window = new_size;
                None
            } else {
                let delta = new_size - shared.window;
                shared.window = new_size;
                Some(Frame::window_update(self.id, delta))
            }
        };
        if let Some(frame) = update {
            futures::SinkExt::send(&mut self.sender, StreamCommand::Send(frame))
                .await
                .map_err(|_| CloseReason::ConnectionDead.as_io_error())?;
        }
        Ok(())
    }

    /// Applies the pending SYN flag, if any, to an outbound header.
    fn add_flag(&mut self, frame: &mut Frame) {
        if self.flag == Flag::Syn {
            frame.header.flags |= SYN;
            self.flag = Flag::None;
        }
    }

    /// Delivers a previously stashed window update before anything else.
    fn flush_pending_update(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.pending_update.is_some() {
            futures::ready!(self.sender.poll_ready(cx))
                .map_err(|_| CloseReason::ConnectionDead.as_io_error())?;
            let mut frame = self.pending_update.take().expect("is_some checked");
            self.add_flag(&mut frame);
            self.sender
                .start_send(StreamCommand::Send(frame))
                .map_err(|_| CloseReason::ConnectionDead.as_io_error())?;
        }
        Poll::Ready(Ok(()))
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        futures::ready!(self.flush_pending_update(cx))?;

        let (n, update) = {
            let mut shared = self.shared.lock();
            if shared.buffer.is_empty() {
                if !shared.state().can_read() {
                    return match shared.close_reason {
                        // Clean half-close: end-of-file.
                        None => Poll::Ready(Ok(0)),
                        Some(reason) => Poll::Ready(Err(reason.as_io_error())),
                    };
                }
                shared.reader = Some(cx.waker().clone());
                return Poll::Pending;
            }
            let n = shared.buffer.consume(buf);
            // The consumed bytes go back to the peer as credit, but only
            // while it can still send anything.
            let update = if shared.state().can_read() {
                shared.window += n as u32;
                Some(n as u32)
            } else {
                None
            };
            (n, update)
        };

        if let Some(delta) = update {
            let mut frame = Frame::window_update(self.id, delta);
            match self.sender.poll_ready(cx) {
                Poll::Ready(Ok(())) => {
                    self.add_flag(&mut frame);
                    self.sender
                        .start_send(StreamCommand::Send(frame))
                        .map_err(|_| CloseReason::ConnectionDead.as_io_error())?;
                }
                // Channel full or gone: deliver the update with the next
                // operation instead of losing the credit.
                _ => self.pending_update = Some(frame),
            }
        }
        log::trace!("{}/{}: read {} bytes", self.conn, self.id, n);
        Poll::Ready(Ok(n))
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        futures::ready!(self.flush_pending_update(cx))?;
        futures::ready!(self.sender.poll_ready(cx))
            .map_err(|_| CloseReason::ConnectionDead.as_io_error())?;

        let body = {
            let mut shared = self.shared.lock();
            if !shared.state().can_write() {
                let e = match shared.close_reason {
                    Some(reason) => reason.as_io_error(),
                    None => io::Error::new(io::ErrorKind::WriteZero, "stream is closed for writes"),
                };
                return Poll::Ready(Err(e));
            }
            if shared.credit == 0 {
                log::trace!("{}/{}: no credit, suspending writer", self.conn, self.id);
                shared.writer = Some(cx.waker().clone());
                return Poll::Pending;
            }
            let k = (shared.credit as usize)
                .min(buf.len())
                .min(self.config.max_frame_body);
            shared.credit -= k as u32;
            Bytes::copy_from_slice(&buf[..k])
        };

        let n = body.len();
        let mut frame = Frame::data(self.id, body);
        self.add_flag(&mut frame);
        log::trace!("{}/{}: write {} bytes", self.conn, self.id, n);
        self.sender
            .start_send(StreamCommand::Send(frame))
            .map_err(|_| CloseReason::ConnectionDead.as_io_error())?;
        Poll::Ready(Ok(n))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.flush_pending_update(cx)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        futures::ready!(self.flush_pending_update(cx))?;
        if !self.shared().state().can_write() {
            // Closing an already write-closed stream reports success.
            return Poll::Ready(Ok(()));
        }
        futures::ready!(self.sender.poll_ready(cx))
            .map_err(|_| CloseReason::ConnectionDead.as_io_error())?;
        let mut frame = Frame::close_stream(self.id);
        self.add_flag(&mut frame);
        self.sender
            .start_send(StreamCommand::Send(frame))
            .map_err(|_| CloseReason::ConnectionDead.as_io_error())?;
        self.shared()
            .update_state(self.conn, self.id, State::SendClosed);
        Poll::Ready(Ok(()))
    }
}

#[derive(Debug)]
pub(crate) struct Shared {
    state: State,
    /// Bytes the remote may still send before a window update.
    pub(crate) window: u32,
    /// Bytes we may still send before a window update arrives.
    pub(crate) credit: u32,
    pub(crate) buffer: Chunks,
    pub(crate) reader: Option<Waker>,
    pub(crate) writer: Option<Waker>,
    pub(crate) close_reason: Option<CloseReason>,
}

impl Shared {
    fn new(window: u32, credit: u32) -> Self {
        Shared {
            state: State::Open,
            window,
            credit,
            buffer: Chunks::new(),
            reader: None,
            writer: None,
            close_reason: None,
        }
    }

    pub(crate) fn state(&self) -> State {
        self.state
    }

    /// Update the stream state and return the state before the update.
    pub(crate) fn update_state(
        &mut self,
        cid: connection::Id,
        sid: StreamId,
        next: State,
    ) -> State {
        use self::State::*;

        let current = self.state;

        match (current, next) {
            (Closed, _) => {}
            (Open, _) => self.state = next,
            (RecvClosed, Closed) => self.state = Closed,
            (RecvClosed, SendClosed) => self.state = Closed,
            (RecvClosed, _) => {}
            (SendClosed, Closed) => self.state = Closed,
            (SendClosed, RecvClosed) => self.state = Closed,
            (SendClosed, _) => {}
        }

        log::trace!(
            "{}/{}: state: {:?} -> {:?} ({:?})",
            cid,
            sid,
            current,
            next,
            self.state
        );

        current
    }

    /// Closes both directions with `reason`, drops whatever was buffered
    /// and wakes anyone suspended.
    pub(crate) fn close(&mut self, reason: CloseReason) {
        self.state = State::Closed;
        self.buffer.clear();
        if self.close_reason.is_none() {
            self.close_reason = Some(reason);
        }
        self.wake_all();
    }

    pub(crate) fn wake_all(&mut self) {
        if let Some(waker) = self.reader.take() {
            waker.wake();
        }
        if let Some(waker) = self.writer.take() {
            waker.wake();
        }
    }
}
