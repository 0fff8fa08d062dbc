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

//! One request/response exchange on a DHT stream.

use crate::{codec::KadCodec, message::KadMessage, KadError};
use asynchronous_codec::Framed;
use futures::future::{self, Either};
use futures::io::{AsyncRead, AsyncWrite};
use futures::prelude::*;
use futures_timer::Delay;
use std::time::Duration;

/// Resolves `future` or gives up after `duration`.
pub(crate) async fn deadline<F>(duration: Duration, future: F) -> Option<F::Output>
where
    F: Future + Unpin,
{
    match future::select(future, Delay::new(duration)).await {
        Either::Left((output, _)) => Some(output),
        Either::Right(_) => None,
    }
}

/// A Kademlia message exchange over one stream.
///
/// The dialing side writes a request and waits for the response whose type
/// matches; anything else is an error. Fire-and-forget messages (PutValue,
/// AddProvider) use [`KadSession::send`] and close without reading.
pub struct KadSession<S> {
    io: Framed<S, KadCodec>,
    response_timeout: Duration,
}

impl<S> KadSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, response_timeout: Duration) -> Self {
        KadSession {
            io: Framed::new(stream, KadCodec::new()),
            response_timeout,
        }
    }

    /// Sends `request` and awaits the matching response.
    pub async fn request(&mut self, request: KadMessage) -> Result<KadMessage, KadError> {
        let expected = request.message_type;
        self.io.send(request).await?;
        let response = match deadline(self.response_timeout, self.io.next()).await {
            Some(Some(Ok(response))) => response,
            Some(Some(Err(e))) => return Err(e),
            Some(None) => return Err(KadError::StreamReset),
            None => return Err(KadError::Timeout),
        };
        if response.message_type != expected {
            return Err(KadError::UnexpectedMessage);
        }
        Ok(response)
    }

    /// Sends `message` without expecting an answer.
    pub async fn send(&mut self, message: KadMessage) -> Result<(), KadError> {
        self.io.send(message).await
    }

    /// The next inbound message, for the serving side of a stream.
    pub async fn next(&mut self) -> Option<Result<KadMessage, KadError>> {
        self.io.next().await
    }

    /// Closes the stream, ignoring errors: the exchange is already over.
    pub async fn close(mut self) {
        let _ = self.io.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use p2p_core::pipe;
    use std::time::Duration;

    #[async_std::test]
    async fn request_matches_response_type() {
        let (a, b) = pipe::pipe(4096);
        let mut client = KadSession::new(a, Duration::from_secs(1));
        let mut server = KadSession::new(b, Duration::from_secs(1));

        let server_task = async_std::task::spawn(async move {
            let request = server.next().await.unwrap().unwrap();
            assert_eq!(request.message_type, crate::MessageType::FindNode);
            server
                .send(KadMessage::find_node_response(vec![]))
                .await
                .unwrap();
            server
        });

        let response = client
            .request(KadMessage::find_node(Bytes::from_static(b"key")))
            .await
            .unwrap();
        assert_eq!(response.message_type, crate::MessageType::FindNode);
        server_task.await;
    }

    #[async_std::test]
    async fn mismatched_response_is_an_error() {
        let (a, b) = pipe::pipe(4096);
        let mut client = KadSession::new(a, Duration::from_secs(1));
        let mut server = KadSession::new(b, Duration::from_secs(1));

        let server_task = async_std::task::spawn(async move {
            let _request = server.next().await.unwrap().unwrap();
            server.send(KadMessage::ping()).await.unwrap();
            server
        });

        let result = client
            .request(KadMessage::find_node(Bytes::from_static(b"key")))
            .await;
        assert!(matches!(result, Err(KadError::UnexpectedMessage)));
        server_task.await;
    }

    #[async_std::test]
    async fn silence_times_out() {
        let (a, _b) = pipe::pipe(4096);
        let mut client = KadSession::new(a, Duration::from_millis(50));
        let result = client
            .request(KadMessage::find_node(Bytes::from_static(b"key")))
            .await;
        assert!(matches!(result, Err(KadError::Timeout)));
    }
}
