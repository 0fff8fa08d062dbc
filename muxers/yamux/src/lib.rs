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

//! Yamux stream multiplexing over a single reliable, ordered byte pipe.
//!
//! A [`Connection`] wraps an authenticated pipe (anything `AsyncRead +
//! AsyncWrite`) and multiplexes any number of independently flow-controlled
//! [`Stream`]s over it. Streams are opened outbound through the cloneable
//! [`Control`] handle and accepted inbound from
//! [`Connection::next_stream`], which also drives all I/O of the
//! connection.

mod chunks;
mod connection;
mod control;
mod error;
pub mod frame;

pub use connection::{Connection, Id, Mode, State, Stream};
pub use control::Control;
pub use error::ConnectionError;
pub use frame::header::{GoAwayCode, StreamId, HEADER_SIZE};
pub use frame::{Frame, FrameDecodeError};

use std::time::Duration;

/// The initial receive window and send credit of every stream, as fixed by
/// the Yamux specification: 256 KiB.
pub const DEFAULT_CREDIT: u32 = 256 * 1024;

/// Capacity of the per-connection command channels.
pub(crate) const MAX_COMMAND_BACKLOG: usize = 32;

/// Keep-alive configuration.
#[derive(Clone, Copy, Debug)]
pub struct PingConfig {
    /// How often to ping the remote.
    pub interval: Duration,
    /// How long to wait for the pong before declaring the connection dead.
    pub timeout: Duration,
}

/// Yamux connection configuration.
///
/// The defaults are:
///
/// - receive window = 256 KiB
/// - max. frame body = 1 MiB
/// - max. number of streams = 8192
/// - write queue budget = 4 MiB
/// - keep-alive = off
/// - GoAway drain grace = 5 s
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) receive_window: u32,
    pub(crate) max_frame_body: usize,
    pub(crate) max_num_streams: usize,
    pub(crate) write_budget: usize,
    pub(crate) ping: Option<PingConfig>,
    pub(crate) goaway_grace: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            receive_window: DEFAULT_CREDIT,
            max_frame_body: 1024 * 1024,
            max_num_streams: 8192,
            write_budget: 4 * 1024 * 1024,
            ping: None,
            goaway_grace: Duration::from_secs(5),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Config::default()
    }

    /// Sets the per-stream receive window (must be >= 256 KiB).
    ///
    /// # Panics
    ///
    /// If the given receive window is < 256 KiB.
    pub fn set_receive_window(&mut self, n: u32) -> &mut Self {
        assert!(n >= DEFAULT_CREDIT);
        self.receive_window = n;
        self
    }

    /// Caps the body size of a single frame.
    pub fn set_max_frame_body(&mut self, n: usize) -> &mut Self {
        assert!(n <= u32::max_value() as usize);
        self.max_frame_body = n;
        self
    }

    /// Caps the number of concurrent streams.
    pub fn set_max_num_streams(&mut self, n: usize) -> &mut Self {
        self.max_num_streams = n;
        self
    }

    /// Sets the byte budget of the outbound write queue.
    ///
    /// # Panics
    ///
    /// If the budget cannot hold even one maximum-size frame.
    pub fn set_write_budget(&mut self, n: usize) -> &mut Self {
        assert!(n >= self.max_frame_body + HEADER_SIZE);
        self.write_budget = n;
        self
    }

    /// Enables the keep-alive heartbeat.
    pub fn set_ping(&mut self, ping: PingConfig) -> &mut Self {
        self.ping = Some(ping);
        self
    }

    /// Sets how long existing streams may drain after a remote GoAway.
    pub fn set_goaway_grace(&mut self, grace: Duration) -> &mut Self {
        self.goaway_grace = grace;
        self
    }
}
