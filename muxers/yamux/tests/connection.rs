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

use async_std::task;
use futures::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use p2p_core::pipe::{pipe, Endpoint};
use p2p_yamux::{
    frame::header, Config, Connection, ConnectionError, Mode, PingConfig, Stream, DEFAULT_CREDIT,
};
use std::{io, time::Duration};

/// Polls a connection for its lifetime, dropping inbound streams.
async fn drive<T>(mut connection: Connection<T>) -> Result<(), ConnectionError>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    while connection.next_stream().await?.is_some() {}
    Ok(())
}

/// Accepts streams and echoes everything back on each of them.
async fn echo_server<T>(mut connection: Connection<T>) -> Result<(), ConnectionError>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    while let Some(mut stream) = connection.next_stream().await? {
        task::spawn(async move {
            let mut buf = [0u8; 4096];
            loop {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if stream.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                }
            }
            let _ = stream.close().await;
        });
    }
    Ok(())
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

async fn read_frame(raw: &mut Endpoint) -> (header::Header, Vec<u8>) {
    let mut head = [0u8; header::HEADER_SIZE];
    raw.read_exact(&mut head).await.unwrap();
    let head = header::decode(&head).unwrap();
    let mut body = Vec::new();
    if head.tag == header::Tag::Data && head.length > 0 {
        body = vec![0; head.length as usize];
        raw.read_exact(&mut body).await.unwrap();
    }
    (head, body)
}

// Stream open, echo, half-close on both sides.
#[async_std::test]
async fn open_echo_close() {
    let (a, b) = pipe(1 << 20);
    let (connection_a, mut control_a) = Connection::new(a, Config::default(), Mode::Client);
    let (connection_b, _control_b) = Connection::new(b, Config::default(), Mode::Server);
    let driver_a = task::spawn(drive(connection_a));
    let driver_b = task::spawn(echo_server(connection_b));

    let mut stream = control_a.open_stream().await.unwrap();
    assert_eq!(stream.id().val(), 1);

    stream.write_all(b"hello").await.unwrap();
    let mut out = [0u8; 5];
    stream.read_exact(&mut out).await.unwrap();
    assert_eq!(&out, b"hello");

    stream.close().await.unwrap();
    // The echo side sees our FIN as EOF and closes too.
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());

    control_a.close().await.unwrap();
    driver_a.await.unwrap();
    driver_b.await.unwrap();
}

// The exact frames a listener produces for the canonical echo exchange.
#[async_std::test]
async fn listener_wire_trace() {
    let (mut raw, b) = pipe(1 << 20);
    let (mut connection, _control) = Connection::new(b, Config::default(), Mode::Server);

    let listener = task::spawn(async move {
        let mut stream = connection.next_stream().await.unwrap().unwrap();
        task::spawn(async move {
            let mut buf = [0u8; 5];
            stream.read_exact(&mut buf).await.unwrap();
            stream.write_all(&buf).await.unwrap();
            stream.close().await.unwrap();
        });
        while let Ok(Some(_)) = connection.next_stream().await {}
    });

    // SYN data frame carrying "hello" on stream 1.
    raw.write_all(&[0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 5])
        .await
        .unwrap();
    raw.write_all(b"hello").await.unwrap();

    // First frame back: the bare ACK.
    let (ack, _) = read_frame(&mut raw).await;
    assert_eq!(ack.tag, header::Tag::Data);
    assert!(ack.flags.contains(header::ACK));
    assert_eq!(ack.stream_id.val(), 1);
    assert_eq!(ack.length, 0);

    // Consuming the bytes yields the credit back.
    let (update, _) = read_frame(&mut raw).await;
    assert_eq!(update.tag, header::Tag::WindowUpdate);
    assert_eq!(update.stream_id.val(), 1);
    assert_eq!(update.length, 5);

    // The echo itself, with no flags.
    let (echo, body) = read_frame(&mut raw).await;
    assert_eq!(echo.tag, header::Tag::Data);
    assert_eq!(echo.flags.val(), 0);
    assert_eq!(echo.stream_id.val(), 1);
    assert_eq!(body, b"hello");

    // The listener's half-close.
    let (fin, _) = read_frame(&mut raw).await;
    assert_eq!(fin.tag, header::Tag::Data);
    assert!(fin.flags.contains(header::FIN));
    assert_eq!(fin.stream_id.val(), 1);
    assert_eq!(fin.length, 0);

    drop(raw);
    listener.await;
}

// A 300 KB write suspends at the 256 KiB window and resumes on updates.
#[async_std::test]
async fn flow_control_suspends_and_resumes() {
    let (a, b) = pipe(1 << 20);
    let (connection_a, mut control_a) = Connection::new(a, Config::default(), Mode::Client);
    let (mut connection_b, _control_b) = Connection::new(b, Config::default(), Mode::Server);
    let driver_a = task::spawn(drive(connection_a));

    let receiver = task::spawn(async move {
        let stream = connection_b.next_stream().await.unwrap().unwrap();
        task::spawn(async move {
            while let Ok(Some(_)) = connection_b.next_stream().await {}
        });
        stream
    });

    let data = pattern(300_000);
    let mut stream = control_a.open_stream().await.unwrap();
    let expected = data.clone();
    let mut writer = task::spawn(async move {
        stream.write_all(&data).await.unwrap();
        stream.close().await.unwrap();
    });

    let mut stream_b = receiver.await;

    // Nothing has been consumed yet, so the writer must be stuck after one
    // full window.
    assert!(
        async_std::future::timeout(Duration::from_millis(200), &mut writer)
            .await
            .is_err(),
        "writer finished although no window update was sent"
    );

    let mut first = vec![0u8; 100_000];
    stream_b.read_exact(&mut first).await.unwrap();
    assert_eq!(first[..], expected[..100_000]);

    // The 100 KB update gives the writer room to finish.
    writer.await;

    let mut rest = Vec::new();
    stream_b.read_to_end(&mut rest).await.unwrap();
    assert_eq!(first.len() + rest.len(), 300_000);
    assert_eq!(rest[..], expected[100_000..]);

    assert_eq!(stream_b.write(b"x").await.unwrap(), 1);
    let _ = stream_b.close().await;
    drop(stream_b);
    control_a.close().await.unwrap();
    driver_a.await.unwrap();
}

// A peer violating the receive window gets RST plus GoAway(protocol error),
// and every other stream dies with the connection.
#[async_std::test]
async fn receive_window_overflow_teardown() {
    let (mut raw, b) = pipe(1 << 20);
    let (mut connection, _control) = Connection::new(b, Config::default(), Mode::Server);

    // Two remote streams.
    raw.write_all(&header::encode(&{
        let mut h = header::Header::new(header::Tag::Data, p2p_yamux::StreamId::new(1), 0);
        h.syn();
        h
    }))
    .await
    .unwrap();
    raw.write_all(&header::encode(&{
        let mut h = header::Header::new(header::Tag::Data, p2p_yamux::StreamId::new(3), 0);
        h.syn();
        h
    }))
    .await
    .unwrap();

    let mut violated = connection.next_stream().await.unwrap().unwrap();
    let mut witness = connection.next_stream().await.unwrap().unwrap();

    // A single frame larger than the whole window.
    let oversize = DEFAULT_CREDIT as usize + 1;
    let header = header::Header::new(
        header::Tag::Data,
        p2p_yamux::StreamId::new(1),
        oversize as u32,
    );
    let writer = task::spawn(async move {
        raw.write_all(&header::encode(&header)).await.unwrap();
        raw.write_all(&vec![0u8; oversize]).await.unwrap();
        raw
    });

    // The connection dies reporting the flow-control violation.
    let outcome = connection.next_stream().await;
    assert!(matches!(outcome, Err(ConnectionError::ReceiveWindowOverflow)));

    let mut raw = writer.await;

    // Wire trace: ACK, ACK, then RST for the violator, then GoAway(1).
    let (ack1, _) = read_frame(&mut raw).await;
    assert!(ack1.flags.contains(header::ACK));
    let (ack2, _) = read_frame(&mut raw).await;
    assert!(ack2.flags.contains(header::ACK));
    let (rst, _) = read_frame(&mut raw).await;
    assert_eq!(rst.tag, header::Tag::Data);
    assert!(rst.flags.contains(header::RST));
    assert_eq!(rst.stream_id.val(), 1);
    let (goaway, _) = read_frame(&mut raw).await;
    assert_eq!(goaway.tag, header::Tag::GoAway);
    assert_eq!(goaway.length, 1);

    // The violated stream reads as reset, the witness as a dead connection.
    let mut buf = [0u8; 16];
    let e = violated.read(&mut buf).await.unwrap_err();
    assert_eq!(e.kind(), io::ErrorKind::ConnectionReset);
    let e = witness.read(&mut buf).await.unwrap_err();
    assert_eq!(e.kind(), io::ErrorKind::BrokenPipe);
}

// A reset wakes a pending read exactly once with the reset error, and every
// later operation keeps reporting it.
#[async_std::test]
async fn reset_cancels_pending_reads() {
    let (a, b) = pipe(1 << 20);
    let (connection_a, mut control_a) = Connection::new(a, Config::default(), Mode::Client);
    let (mut connection_b, _control_b) = Connection::new(b, Config::default(), Mode::Server);
    let driver_a = task::spawn(drive(connection_a));

    let resetter = task::spawn(async move {
        let mut stream = connection_b.next_stream().await.unwrap().unwrap();
        task::spawn(async move {
            while let Ok(Some(_)) = connection_b.next_stream().await {}
        });
        // One byte arrives, then the reset.
        stream.write_all(b"x").await.unwrap();
        stream.reset().await;
    });

    let mut stream = control_a.open_stream().await.unwrap();
    stream.write_all(b"go").await.unwrap();

    // The exact read wants more than will ever come.
    let mut out = [0u8; 100];
    let e = stream.read_exact(&mut out).await.unwrap_err();
    resetter.await;
    assert!(
        e.kind() == io::ErrorKind::ConnectionReset || e.kind() == io::ErrorKind::UnexpectedEof
    );

    // Subsequent operations observe the reset as well.
    let e = stream.read(&mut out).await.unwrap_err();
    assert_eq!(e.kind(), io::ErrorKind::ConnectionReset);
    let e = stream.write(b"y").await.unwrap_err();
    assert_eq!(e.kind(), io::ErrorKind::ConnectionReset);

    control_a.close().await.unwrap();
    driver_a.await.unwrap();
}

// Local close sends GoAway(normal); afterwards no new streams can open.
#[async_std::test]
async fn close_refuses_new_streams() {
    let (a, b) = pipe(1 << 20);
    let (connection_a, mut control_a) = Connection::new(a, Config::default(), Mode::Client);
    let (connection_b, _control_b) = Connection::new(b, Config::default(), Mode::Server);
    let driver_a = task::spawn(drive(connection_a));
    let driver_b = task::spawn(drive(connection_b));

    control_a.close().await.unwrap();
    assert!(matches!(
        control_a.open_stream().await,
        Err(ConnectionError::Closed)
    ));

    driver_a.await.unwrap();
    // The remote drains and finishes cleanly on the normal GoAway.
    driver_b.await.unwrap();
}

// Dialer ids are odd, listener ids even, each increasing by two.
#[async_std::test]
async fn stream_id_allocation() {
    let (a, b) = pipe(1 << 20);
    let (connection_a, mut control_a) = Connection::new(a, Config::default(), Mode::Client);
    let (connection_b, mut control_b) = Connection::new(b, Config::default(), Mode::Server);
    let driver_a = task::spawn(drive(connection_a));
    let driver_b = task::spawn(drive(connection_b));

    let s1 = control_a.open_stream().await.unwrap();
    let s3 = control_a.open_stream().await.unwrap();
    let s2 = control_b.open_stream().await.unwrap();
    let s4 = control_b.open_stream().await.unwrap();
    assert_eq!(s1.id().val(), 1);
    assert_eq!(s3.id().val(), 3);
    assert_eq!(s2.id().val(), 2);
    assert_eq!(s4.id().val(), 4);

    drop((s1, s2, s3, s4));
    control_a.close().await.unwrap();
    driver_a.await.unwrap();
    // The remote may race its stream cleanup against our teardown.
    let _ = driver_b.await;
}

// An even SYN from the side that must use odd ids is a protocol violation.
#[async_std::test]
async fn invalid_remote_id_is_fatal() {
    let (mut raw, b) = pipe(1 << 20);
    let (mut connection, _control) = Connection::new(b, Config::default(), Mode::Server);

    // Stream id 2 is listener-allocated; a remote dialer may not use it.
    let mut h = header::Header::new(header::Tag::Data, p2p_yamux::StreamId::new(2), 0);
    h.syn();
    raw.write_all(&header::encode(&h)).await.unwrap();

    let outcome = connection.next_stream().await;
    assert!(matches!(outcome, Err(ConnectionError::Protocol)));

    let (goaway, _) = read_frame(&mut raw).await;
    assert_eq!(goaway.tag, header::Tag::GoAway);
    assert_eq!(goaway.length, 1);
}

// Heartbeats keep a healthy connection alive and kill a mute one.
#[async_std::test]
async fn ping_pong_and_ping_timeout() {
    // Healthy pair: the remote answers pings automatically.
    let (a, b) = pipe(1 << 20);
    let mut config = Config::default();
    config.set_ping(PingConfig {
        interval: Duration::from_millis(30),
        timeout: Duration::from_millis(500),
    });
    let (connection_a, mut control_a) = Connection::new(a, config.clone(), Mode::Client);
    let (connection_b, _control_b) = Connection::new(b, Config::default(), Mode::Server);
    let driver_a = task::spawn(drive(connection_a));
    let driver_b = task::spawn(drive(connection_b));

    task::sleep(Duration::from_millis(200)).await;
    // Still alive after several heartbeat rounds.
    let stream = control_a.open_stream().await.unwrap();
    drop(stream);
    control_a.close().await.unwrap();
    driver_a.await.unwrap();
    // A pong may still be in flight when the pipe goes down.
    let _ = driver_b.await;

    // Mute remote: nothing ever answers.
    let (a, _mute) = pipe(1 << 20);
    let mut config = Config::default();
    config.set_ping(PingConfig {
        interval: Duration::from_millis(20),
        timeout: Duration::from_millis(50),
    });
    let (mut connection, _control) = Connection::new(a, config, Mode::Client);
    let outcome = connection.next_stream().await;
    assert!(matches!(outcome, Err(ConnectionError::PingTimeout)));
}

// Half-close: after the remote's FIN the local side drains the buffer to
// EOF while its own writes keep working.
#[async_std::test]
async fn writes_continue_after_remote_fin() {
    let (a, b) = pipe(1 << 20);
    let (connection_a, mut control_a) = Connection::new(a, Config::default(), Mode::Client);
    let (mut connection_b, _control_b) = Connection::new(b, Config::default(), Mode::Server);
    let driver_a = task::spawn(drive(connection_a));

    let mut stream = control_a.open_stream().await.unwrap();
    stream.write_all(b"request").await.unwrap();
    stream.close().await.unwrap();

    let mut remote = connection_b.next_stream().await.unwrap().unwrap();
    let remote_task = task::spawn(async move {
        // Drain to EOF first...
        let mut incoming = Vec::new();
        remote.read_to_end(&mut incoming).await.unwrap();
        assert_eq!(incoming, b"request");
        // ...then answer on the still-open other direction.
        remote.write_all(b"response").await.unwrap();
        remote.close().await.unwrap();
    });
    task::spawn(async move {
        while let Ok(Some(_)) = connection_b.next_stream().await {}
    });

    let mut answer = Vec::new();
    stream.read_to_end(&mut answer).await.unwrap();
    assert_eq!(answer, b"response");

    // Our write direction is gone since our own FIN.
    let e = stream.write(b"more").await.unwrap_err();
    assert_eq!(e.kind(), io::ErrorKind::WriteZero);

    remote_task.await;
    control_a.close().await.unwrap();
    driver_a.await.unwrap();
}

// The configured stream limit refuses further opens.
#[async_std::test]
async fn stream_limit_is_enforced() {
    let (a, b) = pipe(1 << 20);
    let mut config = Config::default();
    config.set_max_num_streams(1);
    let (connection_a, mut control_a) = Connection::new(a, config, Mode::Client);
    let (connection_b, _control_b) = Connection::new(b, Config::default(), Mode::Server);
    let driver_a = task::spawn(drive(connection_a));
    let driver_b = task::spawn(drive(connection_b));

    let first = control_a.open_stream().await.unwrap();
    assert!(matches!(
        control_a.open_stream().await,
        Err(ConnectionError::TooManyStreams)
    ));

    drop(first);
    control_a.close().await.unwrap();
    driver_a.await.unwrap();
    let _ = driver_b.await;
}

// Window adjustment: growing credits the remote, out-of-range sizes are
// rejected.
#[async_std::test]
async fn set_window_validates_and_credits() {
    let (a, b) = pipe(1 << 20);
    let (connection_a, mut control_a) = Connection::new(a, Config::default(), Mode::Client);
    let (mut connection_b, _control_b) = Connection::new(b, Config::default(), Mode::Server);
    let driver_a = task::spawn(drive(connection_a));

    let mut stream = control_a.open_stream().await.unwrap();
    stream.write_all(b"syn").await.unwrap();

    let mut remote = connection_b.next_stream().await.unwrap().unwrap();
    task::spawn(async move {
        while let Ok(Some(_)) = connection_b.next_stream().await {}
    });

    // Above the maximum window.
    let e = remote.set_window(DEFAULT_CREDIT + 1).await.unwrap_err();
    assert_eq!(e.kind(), io::ErrorKind::InvalidInput);

    // Shrinking and restoring are both fine.
    remote.set_window(1024).await.unwrap();
    remote.set_window(DEFAULT_CREDIT).await.unwrap();

    let _ = remote.close().await;
    drop(remote);
    drop(stream);
    control_a.close().await.unwrap();
    driver_a.await.unwrap();
}

// When the pipe dies, every pending operation resolves exactly once with a
// dead-connection error.
#[async_std::test]
async fn pipe_eof_fails_pending_reads() {
    let (a, b) = pipe(1 << 20);
    let (connection_a, mut control_a) = Connection::new(a, Config::default(), Mode::Client);
    let (mut connection_b, _control_b) = Connection::new(b, Config::default(), Mode::Server);
    let driver_a = task::spawn(drive(connection_a));

    let mut stream = control_a.open_stream().await.unwrap();
    stream.write_all(b"open").await.unwrap();

    // Accept on the remote, then drop the whole remote connection.
    let accepted: Stream = connection_b.next_stream().await.unwrap().unwrap();
    drop(accepted);
    drop(connection_b);

    let mut buf = [0u8; 8];
    let e = stream.read(&mut buf).await.unwrap_err();
    assert!(
        e.kind() == io::ErrorKind::BrokenPipe || e.kind() == io::ErrorKind::ConnectionReset
    );

    let _ = driver_a.await;
}
