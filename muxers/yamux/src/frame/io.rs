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

//! Frame-level I/O over the underlying byte pipe.
//!
//! Reading always consumes the 12 header bytes atomically and, for Data
//! frames, exactly `length` payload bytes afterwards. Writing serializes one
//! frame at a time, which is what gives the connection its single logical
//! writer.

use super::header::{self, Header, Tag, HEADER_SIZE};
use super::Frame;
use crate::connection::Id;
use bytes::Bytes;
use futures::io::{AsyncRead, AsyncWrite};
use futures::{
    sink::Sink,
    stream::Stream,
    task::{Context, Poll},
};
use std::{io, pin::Pin};

pub(crate) struct Io<T> {
    id: Id,
    io: T,
    max_body_len: usize,
    read_state: ReadState,
    write_state: WriteState,
}

enum ReadState {
    Header {
        offset: usize,
        buf: [u8; HEADER_SIZE],
    },
    Body {
        header: Header,
        offset: usize,
        buf: Vec<u8>,
    },
}

enum WriteState {
    Idle,
    Writing { offset: usize, buf: Vec<u8> },
}

impl<T> Io<T> {
    pub(crate) fn new(id: Id, io: T, max_body_len: usize) -> Self {
        Io {
            id,
            io,
            max_body_len,
            read_state: ReadState::Header {
                offset: 0,
                buf: [0; HEADER_SIZE],
            },
            write_state: WriteState::Idle,
        }
    }
}

impl<T: AsyncWrite + Unpin> Io<T> {
    /// Pushes the current write buffer into the pipe until it is gone.
    fn poll_write_buffer(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        loop {
            match &mut self.write_state {
                WriteState::Idle => return Poll::Ready(Ok(())),
                WriteState::Writing { offset, buf } => {
                    match Pin::new(&mut self.io).poll_write(cx, &buf[*offset..]) {
                        Poll::Ready(Ok(0)) => {
                            return Poll::Ready(Err(io::ErrorKind::WriteZero.into()))
                        }
                        Poll::Ready(Ok(n)) => {
                            *offset += n;
                            if *offset == buf.len() {
                                self.write_state = WriteState::Idle;
                            }
                        }
                        Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                        Poll::Pending => return Poll::Pending,
                    }
                }
            }
        }
    }
}

impl<T: AsyncWrite + Unpin> Sink<Frame> for Io<T> {
    type Error = io::Error;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().poll_write_buffer(cx)
    }

    fn start_send(self: Pin<&mut Self>, frame: Frame) -> io::Result<()> {
        let this = self.get_mut();
        debug_assert!(matches!(this.write_state, WriteState::Idle));
        log::trace!("{}: sending: {}", this.id, frame.header);
        let mut buf = Vec::with_capacity(frame.wire_len());
        buf.extend_from_slice(&header::encode(&frame.header));
        buf.extend_from_slice(&frame.body);
        this.write_state = WriteState::Writing { offset: 0, buf };
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        futures::ready!(this.poll_write_buffer(cx))?;
        Pin::new(&mut this.io).poll_flush(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        futures::ready!(this.poll_write_buffer(cx))?;
        futures::ready!(Pin::new(&mut this.io).poll_flush(cx))?;
        Pin::new(&mut this.io).poll_close(cx)
    }
}

impl<T: AsyncRead + Unpin> Stream for Io<T> {
    type Item = Result<Frame, FrameDecodeError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match &mut this.read_state {
                ReadState::Header { offset, buf } => {
                    if *offset == HEADER_SIZE {
                        let header = match header::decode(buf) {
                            Ok(header) => header,
                            Err(e) => return Poll::Ready(Some(Err(e.into()))),
                        };
                        log::trace!("{}: received: {}", this.id, header);
                        if header.tag == Tag::Data && header.length > 0 {
                            let len = header.length as usize;
                            if len > this.max_body_len {
                                return Poll::Ready(Some(Err(FrameDecodeError::FrameTooLarge(
                                    len,
                                ))));
                            }
                            this.read_state = ReadState::Body {
                                header,
                                offset: 0,
                                buf: vec![0; len],
                            };
                            continue;
                        }
                        this.read_state = ReadState::Header {
                            offset: 0,
                            buf: [0; HEADER_SIZE],
                        };
                        return Poll::Ready(Some(Ok(Frame::new(header))));
                    }
                    match Pin::new(&mut this.io).poll_read(cx, &mut buf[*offset..]) {
                        Poll::Ready(Ok(0)) => {
                            if *offset == 0 {
                                return Poll::Ready(None);
                            }
                            let e = io::Error::from(io::ErrorKind::UnexpectedEof);
                            return Poll::Ready(Some(Err(e.into())));
                        }
                        Poll::Ready(Ok(n)) => *offset += n,
                        Poll::Ready(Err(e)) => return Poll::Ready(Some(Err(e.into()))),
                        Poll::Pending => return Poll::Pending,
                    }
                }
                ReadState::Body {
                    header,
                    offset,
                    buf,
                } => {
                    if *offset == buf.len() {
                        let header = *header;
                        let body = Bytes::from(std::mem::take(buf));
                        this.read_state = ReadState::Header {
                            offset: 0,
                            buf: [0; HEADER_SIZE],
                        };
                        return Poll::Ready(Some(Ok(Frame { header, body })));
                    }
                    match Pin::new(&mut this.io).poll_read(cx, &mut buf[*offset..]) {
                        Poll::Ready(Ok(0)) => {
                            let e = io::Error::from(io::ErrorKind::UnexpectedEof);
                            return Poll::Ready(Some(Err(e.into())));
                        }
                        Poll::Ready(Ok(n)) => *offset += n,
                        Poll::Ready(Err(e)) => return Poll::Ready(Some(Err(e.into()))),
                        Poll::Pending => return Poll::Pending,
                    }
                }
            }
        }
    }
}

/// Possible errors while reading a frame off the pipe.
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    /// An I/O error on the underlying pipe.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    /// The frame header was malformed.
    #[error("header decode error: {0}")]
    Header(#[from] header::HeaderDecodeError),
    /// A data frame body exceeds the configured maximum.
    #[error("frame body too large ({0} bytes)")]
    FrameTooLarge(usize),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::header::StreamId;
    use futures::{SinkExt, StreamExt};
    use p2p_core::pipe;

    #[async_std::test]
    async fn frames_survive_the_pipe() {
        let (a, b) = pipe::pipe(64);
        let mut out = Io::new(Id::random(), a, 1024);
        let mut inn = Io::new(Id::random(), b, 1024);

        let frame = Frame::data(StreamId::new(1), Bytes::from_static(b"hello"));
        out.send(frame.clone()).await.unwrap();
        assert_eq!(inn.next().await.unwrap().unwrap(), frame);

        let frame = Frame::ping(7);
        out.send(frame.clone()).await.unwrap();
        assert_eq!(inn.next().await.unwrap().unwrap(), frame);
    }

    #[async_std::test]
    async fn oversized_bodies_are_rejected() {
        let (a, b) = pipe::pipe(64);
        let mut out = Io::new(Id::random(), a, 1024);
        let mut inn = Io::new(Id::random(), b, 4);

        out.send(Frame::data(StreamId::new(1), Bytes::from_static(b"hello")))
            .await
            .unwrap();
        assert!(matches!(
            inn.next().await,
            Some(Err(FrameDecodeError::FrameTooLarge(5)))
        ));
    }

    #[async_std::test]
    async fn eof_between_frames_ends_the_stream() {
        let (a, b) = pipe::pipe(64);
        let mut out = Io::new(Id::random(), a, 1024);
        let mut inn = Io::new(Id::random(), b, 1024);

        out.send(Frame::pong(3)).await.unwrap();
        out.close().await.unwrap();

        assert!(matches!(inn.next().await, Some(Ok(_))));
        assert!(inn.next().await.is_none());
    }
}
