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

//! The muxed connection.
//!
//! A [`Connection`] owns the underlying byte pipe exclusively. Its poll loop
//! is the single reader and the single writer: inbound frames are decoded
//! and dispatched to the per-stream state, outbound frames from streams and
//! from frame handling are serialized through one write queue, which is what
//! guarantees that frames appear on the wire in the order they were
//! enqueued. Streams talk to the connection over a bounded command channel
//! and never touch the pipe themselves.

pub(crate) mod stream;

use crate::{
    error::ConnectionError,
    frame::{
        header::{self, GoAwayCode, Header, StreamId, Tag, ACK, FIN, RST, SYN},
        io,
        write_queue::WriteQueue,
        Frame, FrameDecodeError,
    },
    Config, DEFAULT_CREDIT, MAX_COMMAND_BACKLOG,
};
use futures::channel::{mpsc, oneshot};
use futures::io::{AsyncRead, AsyncWrite};
use futures::prelude::*;
use futures::task::{Context, Poll};
use futures_timer::Delay;
use nohash_hasher::IntMap;
use std::{fmt, pin::Pin, sync::Arc};

pub use stream::{State, Stream};
pub(crate) use stream::{CloseReason, Flag};

/// How the connection came to be: by dialing or by listening.
///
/// The mode decides which half of the stream id space this side allocates
/// from: dialers use odd ids starting at 1, listeners even ids starting
/// at 2.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub enum Mode {
    Client,
    Server,
}

/// The connection identifier, used only to correlate log output.
#[derive(Clone, Copy)]
pub struct Id(u32);

impl Id {
    pub(crate) fn random() -> Self {
        Id(rand::random())
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// `Stream` to `Connection` commands.
#[derive(Debug)]
pub(crate) enum StreamCommand {
    /// Put a frame on the wire.
    Send(Frame),
    /// Reset the stream and tell the remote.
    Reset(StreamId),
}

/// `Control` to `Connection` commands.
pub(crate) enum ControlCommand {
    OpenStream(oneshot::Sender<Result<Stream, ConnectionError>>),
    CloseConnection(oneshot::Sender<()>),
}

/// What `Active::poll` can produce besides an error.
enum Event {
    /// The remote opened a stream.
    Inbound(Stream),
    /// A `Control` asked us to shut down.
    ShutdownRequested(oneshot::Sender<()>),
    /// The connection ended cleanly.
    Closed,
}

/// A Yamux connection multiplexing streams over one reliable, ordered byte
/// pipe.
///
/// The connection makes progress only while [`Connection::next_stream`] is
/// being polled, so drive it in a task for as long as the connection is in
/// use.
pub struct Connection<T> {
    inner: ConnectionState<T>,
}

enum ConnectionState<T> {
    Active(Active<T>),
    Closing(Closing<T>),
    Closed,
    Poisoned,
}

impl<T: AsyncRead + AsyncWrite + Unpin> Connection<T> {
    /// Wraps `socket` and returns the connection plus a [`crate::Control`]
    /// handle for opening outbound streams.
    pub fn new(socket: T, config: Config, mode: Mode) -> (Self, crate::Control) {
        let (control_sender, control_receiver) = mpsc::channel(MAX_COMMAND_BACKLOG);
        let connection = Connection {
            inner: ConnectionState::Active(Active::new(socket, config, mode, control_receiver)),
        };
        (connection, crate::Control::new(control_sender))
    }

    /// Drives the connection and resolves with the next inbound stream.
    ///
    /// `Ok(None)` means the connection terminated cleanly (local close or a
    /// normal GoAway from the remote).
    pub async fn next_stream(&mut self) -> Result<Option<Stream>, ConnectionError> {
        future::poll_fn(|cx| self.poll_next(cx)).await
    }

    fn poll_next(&mut self, cx: &mut Context<'_>) -> Poll<Result<Option<Stream>, ConnectionError>> {
        loop {
            match std::mem::replace(&mut self.inner, ConnectionState::Poisoned) {
                ConnectionState::Active(mut active) => match active.poll(cx) {
                    Poll::Ready(Ok(Event::Inbound(stream))) => {
                        self.inner = ConnectionState::Active(active);
                        return Poll::Ready(Ok(Some(stream)));
                    }
                    Poll::Ready(Ok(Event::ShutdownRequested(reply))) => {
                        self.inner = ConnectionState::Closing(active.close(reply));
                    }
                    Poll::Ready(Ok(Event::Closed)) => {
                        self.inner = ConnectionState::Closed;
                        return Poll::Ready(Ok(None));
                    }
                    Poll::Ready(Err(e)) => {
                        self.inner = ConnectionState::Closed;
                        return Poll::Ready(Err(e));
                    }
                    Poll::Pending => {
                        self.inner = ConnectionState::Active(active);
                        return Poll::Pending;
                    }
                },
                ConnectionState::Closing(mut closing) => match closing.poll(cx) {
                    Poll::Ready(Ok(())) => {
                        self.inner = ConnectionState::Closed;
                        return Poll::Ready(Ok(None));
                    }
                    Poll::Ready(Err(e)) => {
                        self.inner = ConnectionState::Closed;
                        return Poll::Ready(Err(e));
                    }
                    Poll::Pending => {
                        self.inner = ConnectionState::Closing(closing);
                        return Poll::Pending;
                    }
                },
                ConnectionState::Closed => {
                    self.inner = ConnectionState::Closed;
                    return Poll::Ready(Ok(None));
                }
                ConnectionState::Poisoned => unreachable!("poisoned connection state"),
            }
        }
    }
}

impl<T> Drop for Connection<T> {
    fn drop(&mut self) {
        if let ConnectionState::Active(active) = &mut self.inner {
            active.drop_all_streams(CloseReason::ConnectionDead);
        }
    }
}

impl<T> fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.inner {
            ConnectionState::Active(active) => return fmt::Debug::fmt(active, f),
            ConnectionState::Closing(_) => "Closing",
            ConnectionState::Closed => "Closed",
            ConnectionState::Poisoned => "Poisoned",
        };
        write!(f, "(Connection {})", state)
    }
}

/// Heartbeat state: when to send the next ping and which pong is missing.
struct Heartbeat {
    interval: std::time::Duration,
    timeout: std::time::Duration,
    next_ping: Delay,
    outstanding: Option<(u32, Delay)>,
}

/// An alive connection.
struct Active<T> {
    id: Id,
    mode: Mode,
    config: Arc<Config>,
    socket: io::Io<T>,
    next_id: u32,
    streams: IntMap<StreamId, Stream>,
    stream_sender: mpsc::Sender<StreamCommand>,
    stream_receiver: mpsc::Receiver<StreamCommand>,
    control_receiver: mpsc::Receiver<ControlCommand>,
    pending: WriteQueue,
    dropped_streams: Vec<StreamId>,
    heartbeat: Option<Heartbeat>,
    next_ping_nonce: u32,
    remote_goaway: Option<(GoAwayCode, Delay)>,
    /// Set when a fatal condition still needs its final frames (RST,
    /// GoAway) flushed before the connection dies with this error.
    terminate_after_flush: Option<ConnectionError>,
}

impl<T> fmt::Debug for Active<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("streams", &self.streams.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl<T> Active<T> {
    fn drop_all_streams(&mut self, reason: CloseReason) {
        for (_, stream) in self.streams.drain() {
            stream.shared().close(reason);
        }
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> Active<T> {
    fn new(
        socket: T,
        config: Config,
        mode: Mode,
        control_receiver: mpsc::Receiver<ControlCommand>,
    ) -> Self {
        let id = Id::random();
        log::debug!("new connection: {} ({:?})", id, mode);
        let (stream_sender, stream_receiver) = mpsc::channel(MAX_COMMAND_BACKLOG);
        let heartbeat = config.ping.as_ref().map(|ping| Heartbeat {
            interval: ping.interval,
            timeout: ping.timeout,
            next_ping: Delay::new(ping.interval),
            outstanding: None,
        });
        let socket = io::Io::new(id, socket, config.max_frame_body);
        let pending = WriteQueue::new(config.write_budget);
        Active {
            id,
            mode,
            config: Arc::new(config),
            socket,
            next_id: match mode {
                Mode::Client => 1,
                Mode::Server => 2,
            },
            streams: IntMap::default(),
            stream_sender,
            stream_receiver,
            control_receiver,
            pending,
            dropped_streams: Vec::new(),
            heartbeat,
            next_ping_nonce: 0,
            remote_goaway: None,
            terminate_after_flush: None,
        }
    }

    fn poll(&mut self, cx: &mut Context<'_>) -> Poll<Result<Event, ConnectionError>> {
        loop {
            self.garbage_collect();

            // Write serializer: drain the queue while the sink has capacity.
            while !self.pending.is_empty() {
                match Pin::new(&mut self.socket).poll_ready(cx) {
                    Poll::Ready(Ok(())) => {
                        let frame = self.pending.pop().expect("queue is non-empty");
                        if let Err(e) = Pin::new(&mut self.socket).start_send(frame) {
                            return Poll::Ready(Err(self.cleanup(e.into())));
                        }
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(self.cleanup(e.into()))),
                    Poll::Pending => break,
                }
            }
            let flushed = match Pin::new(&mut self.socket).poll_flush(cx) {
                Poll::Ready(Ok(())) => true,
                Poll::Ready(Err(e)) => return Poll::Ready(Err(self.cleanup(e.into()))),
                Poll::Pending => false,
            };

            if flushed && self.pending.is_empty() {
                if let Some(e) = self.terminate_after_flush.take() {
                    return Poll::Ready(Err(self.cleanup(e)));
                }
            }

            if self.terminate_after_flush.is_none() {
                match self.poll_heartbeat(cx) {
                    Ok(true) => continue,
                    Ok(false) => {}
                    Err(e) => return Poll::Ready(Err(self.cleanup(e))),
                }

                let goaway_over = match &mut self.remote_goaway {
                    Some((code, deadline)) => {
                        let grace_expired = deadline.poll_unpin(cx).is_ready();
                        if grace_expired || (self.streams.is_empty() && flushed) {
                            Some(*code)
                        } else {
                            None
                        }
                    }
                    None => None,
                };
                if let Some(code) = goaway_over {
                    let e = self.cleanup(ConnectionError::RemoteGoAway(code));
                    return if code == GoAwayCode::Normal {
                        Poll::Ready(Ok(Event::Closed))
                    } else {
                        Poll::Ready(Err(e))
                    };
                }

                match self.control_receiver.poll_next_unpin(cx) {
                    Poll::Ready(Some(ControlCommand::OpenStream(reply))) => {
                        let result = if self.remote_goaway.is_some() {
                            Err(ConnectionError::Closed)
                        } else {
                            self.new_outbound()
                        };
                        let _ = reply.send(result);
                        continue;
                    }
                    Poll::Ready(Some(ControlCommand::CloseConnection(reply))) => {
                        return Poll::Ready(Ok(Event::ShutdownRequested(reply)));
                    }
                    Poll::Ready(None) => {
                        // All controls dropped; inbound streams keep the
                        // connection useful.
                    }
                    Poll::Pending => {}
                }

                // Stream frames are accepted only while the write queue has
                // budget left for a maximum-size frame. A full queue thereby
                // suspends writers on their bounded channel.
                let max_wire = self.config.max_frame_body + header::HEADER_SIZE;
                let mut progressed = false;
                while self.pending.has_room_for(max_wire) {
                    match self.stream_receiver.poll_next_unpin(cx) {
                        Poll::Ready(Some(StreamCommand::Send(frame))) => {
                            self.on_send_frame(frame);
                            progressed = true;
                        }
                        Poll::Ready(Some(StreamCommand::Reset(id))) => {
                            self.on_reset(id);
                            progressed = true;
                        }
                        Poll::Ready(None) => {
                            debug_assert!(false, "we always hold a stream sender");
                            break;
                        }
                        Poll::Pending => break,
                    }
                }
                if progressed {
                    continue;
                }
            } else {
                // Fatal frames are on their way out; only the flush matters.
                return Poll::Pending;
            }

            match self.socket.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(frame))) => match self.on_frame(frame) {
                    Ok(Some(event)) => return Poll::Ready(Ok(event)),
                    Ok(None) => continue,
                    Err(e) => return Poll::Ready(Err(self.cleanup(e))),
                },
                Poll::Ready(Some(Err(FrameDecodeError::Io(e)))) => {
                    return Poll::Ready(Err(self.cleanup(e.into())));
                }
                Poll::Ready(Some(Err(e))) => {
                    // A malformed frame: tell the remote, then die.
                    log::error!("{}: decode error: {}", self.id, e);
                    self.pending.push(Frame::go_away(GoAwayCode::ProtocolError));
                    self.terminate_after_flush = Some(ConnectionError::Decode(e));
                    continue;
                }
                Poll::Ready(None) => {
                    // The remote closed the pipe.
                    self.cleanup(ConnectionError::Closed);
                    return Poll::Ready(Ok(Event::Closed));
                }
                Poll::Pending => {}
            }

            return Poll::Pending;
        }
    }

    fn poll_heartbeat(&mut self, cx: &mut Context<'_>) -> Result<bool, ConnectionError> {
        let heartbeat = match &mut self.heartbeat {
            Some(heartbeat) => heartbeat,
            None => return Ok(false),
        };
        if let Some((_, deadline)) = &mut heartbeat.outstanding {
            if deadline.poll_unpin(cx).is_ready() {
                log::error!("{}: missed pong", self.id);
                return Err(ConnectionError::PingTimeout);
            }
        }
        if heartbeat.next_ping.poll_unpin(cx).is_ready() {
            heartbeat.next_ping.reset(heartbeat.interval);
            if heartbeat.outstanding.is_none() {
                let nonce = self.next_ping_nonce;
                self.next_ping_nonce = self.next_ping_nonce.wrapping_add(1);
                heartbeat.outstanding = Some((nonce, Delay::new(heartbeat.timeout)));
                self.pending.push(Frame::ping(nonce));
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn new_outbound(&mut self) -> Result<Stream, ConnectionError> {
        if self.streams.len() >= self.config.max_num_streams {
            log::error!("{}: maximum number of streams reached", self.id);
            return Err(ConnectionError::TooManyStreams);
        }
        let id = match self.next_stream_id() {
            Ok(id) => id,
            Err(e) => {
                // Id space exhaustion is unrecoverable for the session.
                self.pending.push(Frame::go_away(GoAwayCode::InternalError));
                self.terminate_after_flush = Some(ConnectionError::NoMoreStreamIds);
                return Err(e);
            }
        };
        let mut stream = self.make_stream(id, self.config.receive_window, DEFAULT_CREDIT);
        let extra = self.config.receive_window - DEFAULT_CREDIT;
        if extra > 0 {
            let mut frame = Frame::window_update(id, extra);
            frame.header.syn();
            self.pending.push(frame);
        } else {
            // Lazy open: SYN rides on the stream's first frame.
            stream.set_flag(Flag::Syn);
        }
        log::debug!("{}: new outbound {}", self.id, stream);
        self.streams.insert(id, stream.clone_shared());
        Ok(stream)
    }

    fn make_stream(&self, id: StreamId, window: u32, credit: u32) -> Stream {
        Stream::new(
            id,
            self.id,
            self.config.clone(),
            window,
            credit,
            self.stream_sender.clone(),
        )
    }

    fn next_stream_id(&mut self) -> Result<StreamId, ConnectionError> {
        let proposed = StreamId::new(self.next_id);
        self.next_id = self
            .next_id
            .checked_add(2)
            .ok_or(ConnectionError::NoMoreStreamIds)?;
        match self.mode {
            Mode::Client => debug_assert!(proposed.is_dialer()),
            Mode::Server => debug_assert!(proposed.is_listener()),
        }
        Ok(proposed)
    }

    /// Inbound frames must carry stream ids allocated by the *other* side.
    fn is_valid_remote_id(&self, id: StreamId) -> bool {
        match self.mode {
            Mode::Client => id.is_listener(),
            Mode::Server => id.is_dialer(),
        }
    }

    fn on_send_frame(&mut self, frame: Frame) {
        if frame.wire_len() > self.config.write_budget {
            log::error!("{}: frame exceeds the write budget", self.id);
            self.pending.push(Frame::go_away(GoAwayCode::InternalError));
            self.terminate_after_flush = Some(ConnectionError::WriteQueueOverflow);
            return;
        }
        self.pending.push(frame);
    }

    fn on_reset(&mut self, id: StreamId) {
        // The stream marked itself closed already; announce it.
        self.streams.remove(&id);
        self.pending.push(Frame::reset_stream(id));
    }

    fn on_frame(&mut self, frame: Frame) -> Result<Option<Event>, ConnectionError> {
        match frame.header.tag {
            Tag::Data => self.on_data(frame),
            Tag::WindowUpdate => self.on_window_update(frame),
            Tag::Ping => {
                self.on_ping(&frame);
                Ok(None)
            }
            Tag::GoAway => self.on_go_away(&frame),
        }
    }

    fn on_data(&mut self, frame: Frame) -> Result<Option<Event>, ConnectionError> {
        let stream_id = frame.header.stream_id;
        let flags = frame.header.flags;

        if flags.contains(RST) {
            if let Some(stream) = self.streams.remove(&stream_id) {
                stream.shared().close(CloseReason::Reset);
            }
            return Ok(None);
        }

        let is_finish = flags.contains(FIN);

        if flags.contains(SYN) && !flags.contains(ACK) {
            if !self.is_valid_remote_id(stream_id) {
                log::error!("{}: invalid remote stream id {}", self.id, stream_id);
                return self.protocol_violation(ConnectionError::Protocol);
            }
            if self.streams.contains_key(&stream_id) {
                // Id collision: answer with an immediate reset.
                log::error!("{}/{}: stream already exists", self.id, stream_id);
                self.pending.push(Frame::reset_stream(stream_id));
                return Ok(None);
            }
            if self.remote_goaway.is_some() {
                // Draining; no new streams are accepted.
                self.pending.push(Frame::reset_stream(stream_id));
                return Ok(None);
            }
            if self.streams.len() >= self.config.max_num_streams {
                log::error!("{}: maximum number of streams reached", self.id);
                self.pending.push(Frame::go_away(GoAwayCode::InternalError));
                self.terminate_after_flush = Some(ConnectionError::TooManyStreams);
                return Ok(None);
            }
            if frame.body.len() > DEFAULT_CREDIT as usize {
                log::error!("{}/{}: first frame exceeds default credit", self.id, stream_id);
                return self.protocol_violation(ConnectionError::Protocol);
            }
            let stream = self.make_stream(stream_id, self.config.receive_window, DEFAULT_CREDIT);
            self.push_ack(stream_id);
            {
                let mut shared = stream.shared();
                shared.window -= frame.body.len() as u32;
                shared.buffer.push(frame.body);
                if is_finish {
                    shared.update_state(self.id, stream_id, State::RecvClosed);
                }
            }
            log::debug!("{}: new inbound {}", self.id, stream);
            self.streams.insert(stream_id, stream.clone_shared());
            return Ok(Some(Event::Inbound(stream)));
        }

        if let Some(stream) = self.streams.get_mut(&stream_id) {
            let overflow = {
                let mut shared = stream.shared();
                if frame.body.len() > shared.window as usize {
                    true
                } else {
                    shared.window -= frame.body.len() as u32;
                    shared.buffer.push(frame.body);
                    if is_finish {
                        shared.update_state(self.id, stream_id, State::RecvClosed);
                    }
                    if let Some(waker) = shared.reader.take() {
                        waker.wake();
                    }
                    false
                }
            };
            if overflow {
                log::error!("{}/{}: receive window overflow", self.id, stream_id);
                if let Some(stream) = self.streams.remove(&stream_id) {
                    stream.shared().close(CloseReason::Reset);
                }
                self.pending.push(Frame::reset_stream(stream_id));
                self.pending.push(Frame::go_away(GoAwayCode::ProtocolError));
                self.terminate_after_flush = Some(ConnectionError::ReceiveWindowOverflow);
            }
        } else {
            // Frames for dropped streams may still arrive; their reset is
            // already on the wire, so this is not a protocol violation.
            log::trace!("{}/{}: data for unknown stream", self.id, stream_id);
        }

        Ok(None)
    }

    fn on_window_update(&mut self, frame: Frame) -> Result<Option<Event>, ConnectionError> {
        let stream_id = frame.header.stream_id;
        let flags = frame.header.flags;

        if flags.contains(RST) {
            if let Some(stream) = self.streams.remove(&stream_id) {
                stream.shared().close(CloseReason::Reset);
            }
            return Ok(None);
        }

        let is_finish = flags.contains(FIN);

        if flags.contains(SYN) && !flags.contains(ACK) {
            if !self.is_valid_remote_id(stream_id) {
                log::error!("{}: invalid remote stream id {}", self.id, stream_id);
                return self.protocol_violation(ConnectionError::Protocol);
            }
            if self.streams.contains_key(&stream_id) {
                log::error!("{}/{}: stream already exists", self.id, stream_id);
                self.pending.push(Frame::reset_stream(stream_id));
                return Ok(None);
            }
            if self.remote_goaway.is_some() {
                self.pending.push(Frame::reset_stream(stream_id));
                return Ok(None);
            }
            if self.streams.len() >= self.config.max_num_streams {
                log::error!("{}: maximum number of streams reached", self.id);
                self.pending.push(Frame::go_away(GoAwayCode::InternalError));
                self.terminate_after_flush = Some(ConnectionError::TooManyStreams);
                return Ok(None);
            }
            let credit = DEFAULT_CREDIT.saturating_add(frame.header.length);
            let stream = self.make_stream(stream_id, self.config.receive_window, credit);
            self.push_ack(stream_id);
            if is_finish {
                stream
                    .shared()
                    .update_state(self.id, stream_id, State::RecvClosed);
            }
            log::debug!("{}: new inbound {}", self.id, stream);
            self.streams.insert(stream_id, stream.clone_shared());
            return Ok(Some(Event::Inbound(stream)));
        }

        if let Some(stream) = self.streams.get_mut(&stream_id) {
            let mut shared = stream.shared();
            shared.credit = shared.credit.saturating_add(frame.header.length);
            if is_finish {
                shared.update_state(self.id, stream_id, State::RecvClosed);
            }
            shared.wake_all();
        } else {
            log::trace!("{}/{}: window update for unknown stream", self.id, stream_id);
        }

        Ok(None)
    }

    fn on_ping(&mut self, frame: &Frame) {
        let stream_id = frame.header.stream_id;
        let nonce = frame.header.length;

        if frame.header.flags.contains(ACK) {
            if let Some(heartbeat) = &mut self.heartbeat {
                match heartbeat.outstanding {
                    Some((expected, _)) if expected == nonce => heartbeat.outstanding = None,
                    _ => log::trace!("{}: unsolicited pong {}", self.id, nonce),
                }
            }
            return;
        }

        if stream_id.is_session() || self.streams.contains_key(&stream_id) {
            self.pending.push(Frame::pong(nonce));
        } else {
            log::trace!("{}/{}: ping for unknown stream", self.id, stream_id);
        }
    }

    fn on_go_away(&mut self, frame: &Frame) -> Result<Option<Event>, ConnectionError> {
        match GoAwayCode::from_raw(frame.header.length) {
            Some(code) => {
                log::debug!("{}: remote goaway ({})", self.id, code);
                if self.remote_goaway.is_none() {
                    self.remote_goaway = Some((code, Delay::new(self.config.goaway_grace)));
                }
                Ok(None)
            }
            None => {
                log::error!("{}: unknown goaway code {}", self.id, frame.header.length);
                self.protocol_violation(ConnectionError::Protocol)
            }
        }
    }

    /// Announces the violation with a GoAway and schedules the teardown for
    /// after the flush.
    fn protocol_violation(&mut self, error: ConnectionError) -> Result<Option<Event>, ConnectionError> {
        self.pending.push(Frame::go_away(GoAwayCode::ProtocolError));
        self.terminate_after_flush = Some(error);
        Ok(None)
    }

    /// Acknowledges a remote stream, topping up the extra receive window in
    /// the same frame when one is configured.
    fn push_ack(&mut self, id: StreamId) {
        let extra = self.config.receive_window - DEFAULT_CREDIT;
        let mut ack = if extra > 0 {
            Frame::window_update(id, extra)
        } else {
            Frame::new(Header::new(Tag::Data, id, 0))
        };
        ack.header.ack();
        self.pending.push(ack);
    }

    fn close(mut self, reply: oneshot::Sender<()>) -> Closing<T> {
        // Streams do not outlive a local close.
        self.drop_all_streams(CloseReason::ConnectionDead);
        Closing {
            state: ClosingState::DrainCommands,
            control_receiver: self.control_receiver,
            stream_receiver: self.stream_receiver,
            pending: self.pending,
            socket: self.socket,
            replies: vec![reply],
        }
    }

    fn cleanup(&mut self, error: ConnectionError) -> ConnectionError {
        log::debug!("{}: connection closing: {}", self.id, error);
        self.drop_all_streams(CloseReason::ConnectionDead);
        error
    }

    /// Removes streams whose last user handle is gone, telling the remote
    /// what it still needs to know.
    fn garbage_collect(&mut self) {
        let conn_id = self.id;
        for stream in self.streams.values_mut() {
            if stream.strong_count() > 1 {
                continue;
            }
            let stream_id = stream.id();
            let frame = {
                let mut shared = stream.shared();
                let frame = match shared.update_state(conn_id, stream_id, State::Closed) {
                    // Dropped without a close: reset it.
                    State::Open => Some(Frame::reset_stream(stream_id)),
                    // The remote already half-closed; our FIN finishes it.
                    State::RecvClosed => Some(Frame::close_stream(stream_id)),
                    // We half-closed. The remote may be blocked on credit
                    // that will never come now; reset in that case.
                    State::SendClosed => {
                        if shared.window == 0 {
                            Some(Frame::reset_stream(stream_id))
                        } else {
                            None
                        }
                    }
                    State::Closed => None,
                };
                shared.wake_all();
                frame
            };
            if let Some(frame) = frame {
                log::trace!("{}/{}: removing dropped stream", conn_id, stream_id);
                self.pending.push(frame);
            }
            self.dropped_streams.push(stream_id);
        }
        for id in self.dropped_streams.drain(..) {
            self.streams.remove(&id);
        }
    }
}

enum ClosingState {
    DrainCommands,
    SendGoAway,
    FlushAndClose,
}

/// Graceful local shutdown: drain the command channels, flush what is
/// queued, announce GoAway(Normal) and close the pipe.
struct Closing<T> {
    state: ClosingState,
    control_receiver: mpsc::Receiver<ControlCommand>,
    stream_receiver: mpsc::Receiver<StreamCommand>,
    pending: WriteQueue,
    socket: io::Io<T>,
    replies: Vec<oneshot::Sender<()>>,
}

impl<T: AsyncRead + AsyncWrite + Unpin> Closing<T> {
    fn poll(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), ConnectionError>> {
        loop {
            match self.state {
                ClosingState::DrainCommands => {
                    self.control_receiver.close();
                    self.stream_receiver.close();
                    while let Poll::Ready(Some(command)) = self.control_receiver.poll_next_unpin(cx)
                    {
                        match command {
                            ControlCommand::OpenStream(reply) => {
                                let _ = reply.send(Err(ConnectionError::Closed));
                            }
                            ControlCommand::CloseConnection(reply) => self.replies.push(reply),
                        }
                    }
                    while let Poll::Ready(Some(command)) = self.stream_receiver.poll_next_unpin(cx)
                    {
                        match command {
                            StreamCommand::Send(frame) => self.pending.push(frame),
                            StreamCommand::Reset(id) => self.pending.push(Frame::reset_stream(id)),
                        }
                    }
                    self.state = ClosingState::SendGoAway;
                }
                ClosingState::SendGoAway => {
                    while !self.pending.is_empty() {
                        match futures::ready!(Pin::new(&mut self.socket).poll_ready(cx)) {
                            Ok(()) => {
                                let frame = self.pending.pop().expect("queue is non-empty");
                                Pin::new(&mut self.socket)
                                    .start_send(frame)
                                    .map_err(|e| self.finish(e.into()))?;
                            }
                            Err(e) => return Poll::Ready(Err(self.finish(e.into()))),
                        }
                    }
                    match futures::ready!(Pin::new(&mut self.socket).poll_ready(cx)) {
                        Ok(()) => {
                            Pin::new(&mut self.socket)
                                .start_send(Frame::go_away(GoAwayCode::Normal))
                                .map_err(|e| self.finish(e.into()))?;
                            self.state = ClosingState::FlushAndClose;
                        }
                        Err(e) => return Poll::Ready(Err(self.finish(e.into()))),
                    }
                }
                ClosingState::FlushAndClose => {
                    match futures::ready!(Pin::new(&mut self.socket).poll_close(cx)) {
                        Ok(()) => {
                            for reply in self.replies.drain(..) {
                                let _ = reply.send(());
                            }
                            return Poll::Ready(Ok(()));
                        }
                        Err(e) => return Poll::Ready(Err(self.finish(e.into()))),
                    }
                }
            }
        }
    }

    /// Settles the close waiters before surfacing `error`.
    fn finish(&mut self, error: ConnectionError) -> ConnectionError {
        for reply in self.replies.drain(..) {
            let _ = reply.send(());
        }
        error
    }
}
