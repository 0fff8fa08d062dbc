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

use crate::connection::{ControlCommand, Stream};
use crate::error::ConnectionError;
use futures::channel::{mpsc, oneshot};
use futures::prelude::*;

/// A handle to a [`crate::Connection`] for opening outbound streams and
/// shutting the connection down.
///
/// Cloneable; all clones talk to the same connection. The connection itself
/// makes progress only while its owner keeps polling
/// [`crate::Connection::next_stream`].
#[derive(Clone)]
pub struct Control {
    sender: mpsc::Sender<ControlCommand>,
}

impl Control {
    pub(crate) fn new(sender: mpsc::Sender<ControlCommand>) -> Self {
        Control { sender }
    }

    /// Opens a new outbound stream.
    pub async fn open_stream(&mut self) -> Result<Stream, ConnectionError> {
        let (reply, result) = oneshot::channel();
        self.sender
            .send(ControlCommand::OpenStream(reply))
            .await
            .map_err(|_| ConnectionError::Closed)?;
        result.await.map_err(|_| ConnectionError::Closed)?
    }

    /// Closes the connection: queued frames are flushed, a GoAway(Normal)
    /// announces the end, and the pipe is shut. Resolves once that has
    /// happened. Closing an already-closed connection reports success.
    pub async fn close(&mut self) -> Result<(), ConnectionError> {
        let (reply, done) = oneshot::channel();
        if self
            .sender
            .send(ControlCommand::CloseConnection(reply))
            .await
            .is_err()
        {
            return Ok(());
        }
        // An error means the connection died before the graceful close got
        // through, which still leaves it closed.
        let _ = done.await;
        Ok(())
    }
}
