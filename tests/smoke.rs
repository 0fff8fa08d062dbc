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

//! Facade-level smoke test: the whole stack is reachable through `p2p::*`.

use async_std::task;
use futures::io::{AsyncReadExt, AsyncWriteExt};
use p2p::core::pipe::pipe;
use p2p::yamux::Config;
use p2p::{Connection, Mode};

#[async_std::test]
async fn echo_through_the_facade() {
    let _ = env_logger::builder().is_test(true).try_init();

    let (a, b) = pipe(1 << 20);
    let (connection_a, mut control_a) = Connection::new(a, Config::default(), Mode::Client);
    let (mut connection_b, _control_b) = Connection::new(b, Config::default(), Mode::Server);

    let driver_a = task::spawn(async move {
        let mut connection_a = connection_a;
        while let Ok(Some(_)) = connection_a.next_stream().await {}
    });
    let echo_b = task::spawn(async move {
        while let Ok(Some(mut stream)) = connection_b.next_stream().await {
            task::spawn(async move {
                let mut buf = [0u8; 256];
                while let Ok(n) = stream.read(&mut buf).await {
                    if n == 0 || stream.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
                let _ = stream.close().await;
            });
        }
    });

    let mut stream = control_a.open_stream().await.unwrap();
    stream.write_all(b"ping over the facade").await.unwrap();
    let mut out = [0u8; 20];
    stream.read_exact(&mut out).await.unwrap();
    assert_eq!(&out, b"ping over the facade");

    stream.close().await.unwrap();
    control_a.close().await.unwrap();
    driver_a.await;
    echo_b.await;
}
