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

use crate::frame::header::GoAwayCode;
use crate::frame::FrameDecodeError;
use std::io;

/// Ways a muxed connection can fail.
///
/// A connection-level failure propagates to every live stream: their reads
/// and writes resolve with a broken-pipe error exactly once per pending
/// operation.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// An I/O error on the underlying pipe.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    /// A frame could not be decoded.
    #[error(transparent)]
    Decode(#[from] FrameDecodeError),
    /// The connection is closed.
    #[error("connection is closed")]
    Closed,
    /// The configured stream limit has been reached.
    #[error("maximum number of streams reached")]
    TooManyStreams,
    /// The local stream id space is used up.
    #[error("stream id space exhausted")]
    NoMoreStreamIds,
    /// The remote broke the protocol rules.
    #[error("protocol violation by the remote")]
    Protocol,
    /// The remote sent more data than its receive window allowed.
    #[error("receive window exceeded by the remote")]
    ReceiveWindowOverflow,
    /// A keep-alive ping went unanswered.
    #[error("keep-alive ping timed out")]
    PingTimeout,
    /// The remote terminated the session.
    #[error("remote terminated the session ({0})")]
    RemoteGoAway(GoAwayCode),
    /// A frame could never fit the connection's write budget.
    #[error("write queue budget exceeded")]
    WriteQueueOverflow,
}
