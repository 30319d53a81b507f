// Copyright 2020 Netwarps Ltd.
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

//! Stream lifecycle tests: open/accept, half-close, reset, connection
//! close and keepalive.

use async_std::task;
use std::io;
use std::time::Duration;

use futures_timer::Delay;
use futures::future::{select, Either};
use futures::pin_mut;

use meshwork_core::transport::memory;
use meshwork_core::Multiaddr;
use meshwork_traits::{ReadEx, WriteEx};
use meshwork_yamux::connection::{Connection, Mode, State};
use meshwork_yamux::error::ConnectionError;
use meshwork_yamux::Config;

fn socket_pair() -> (memory::MemoryConn, memory::MemoryConn) {
    memory::pipe(Multiaddr::empty(), Multiaddr::empty())
}

/// Completes with `None` if `fut` does not finish within `ms`.
async fn within<T>(fut: impl std::future::Future<Output = T>, ms: u64) -> Option<T> {
    let delay = Delay::new(Duration::from_millis(ms));
    pin_mut!(fut);
    match select(fut, delay).await {
        Either::Left((out, _)) => Some(out),
        Either::Right(((), _)) => None,
    }
}

#[async_std::test]
async fn echo_over_single_stream() {
    let _ = env_logger::try_init();
    let (a, b) = socket_pair();

    let server_conn = Connection::new(b, Config::default(), Mode::Server);
    let mut server_ctrl = server_conn.control();
    let server_driver = task::spawn(async move {
        let mut conn = server_conn;
        while conn.next_stream().await.is_ok() {}
    });

    let server = task::spawn(async move {
        let mut stream = server_ctrl.accept_stream().await.unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact2(&mut buf).await.unwrap();
        stream.write_all2(&buf).await.unwrap();
        stream.close2().await.unwrap();
        // after our FIN and the client's, the stream is fully closed
        let mut rest = [0u8; 1];
        assert_eq!(stream.read2(&mut rest).await.unwrap(), 0);
        assert_eq!(stream.state(), State::Closed);
    });

    let client_conn = Connection::new(a, Config::default(), Mode::Client);
    let mut client_ctrl = client_conn.control();
    let client_driver = task::spawn(async move {
        let mut conn = client_conn;
        while conn.next_stream().await.is_ok() {}
    });

    let mut stream = client_ctrl.open_stream().await.unwrap();
    stream.write_all2(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    stream.read_exact2(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");
    stream.close2().await.unwrap();

    server.await;
    drop(stream);
    client_ctrl.close().await.unwrap();

    client_driver.await;
    server_driver.await;
}

#[async_std::test]
async fn half_close_keeps_the_other_direction_alive() {
    let (a, b) = socket_pair();

    let server_conn = Connection::new(b, Config::default(), Mode::Server);
    let mut server_ctrl = server_conn.control();
    task::spawn(async move {
        let mut conn = server_conn;
        while conn.next_stream().await.is_ok() {}
    });

    let client_conn = Connection::new(a, Config::default(), Mode::Client);
    let mut client_ctrl = client_conn.control();
    task::spawn(async move {
        let mut conn = client_conn;
        while conn.next_stream().await.is_ok() {}
    });

    let mut out = client_ctrl.open_stream().await.unwrap();
    let mut inb = server_ctrl.accept_stream().await.unwrap();

    // client sends its FIN right away
    out.close2().await.unwrap();
    assert_eq!(out.state(), State::SendClosed);

    // server observes EOF but can still write
    let mut buf = [0u8; 1];
    assert_eq!(inb.read2(&mut buf).await.unwrap(), 0);
    inb.write_all2(b"x").await.unwrap();

    // writes on the closed side fail
    let err = out.write_all2(b"y").await.unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::WriteZero);

    // the half-closed stream still receives
    out.read_exact2(&mut buf).await.unwrap();
    assert_eq!(&buf, b"x");

    inb.close2().await.unwrap();
    assert_eq!(inb.state(), State::Closed);
}

#[async_std::test]
async fn reset_during_read() {
    let (a, b) = socket_pair();

    let server_conn = Connection::new(b, Config::default(), Mode::Server);
    let mut server_ctrl = server_conn.control();
    task::spawn(async move {
        let mut conn = server_conn;
        while conn.next_stream().await.is_ok() {}
    });

    let client_conn = Connection::new(a, Config::default(), Mode::Client);
    let mut client_ctrl = client_conn.control();
    task::spawn(async move {
        let mut conn = client_conn;
        while conn.next_stream().await.is_ok() {}
    });

    let mut out = client_ctrl.open_stream().await.unwrap();
    let mut inb = server_ctrl.accept_stream().await.unwrap();

    let reader = task::spawn(async move {
        let mut buf = [0u8; 16];
        let err = out.read2(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        assert_eq!(out.state(), State::Closed);
        // anything after the reset fails the same way
        let err = out.write_all2(b"nope").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    });

    // give the reader a moment to park itself
    task::sleep(Duration::from_millis(50)).await;
    inb.reset().await.unwrap();
    assert_eq!(inb.state(), State::Closed);

    reader.await;
}

#[async_std::test]
async fn connection_close_fails_streams_and_controls() {
    let (a, b) = socket_pair();

    let server_conn = Connection::new(b, Config::default(), Mode::Server);
    let mut server_ctrl = server_conn.control();
    let server_driver = task::spawn(async move {
        let mut conn = server_conn;
        while conn.next_stream().await.is_ok() {}
    });

    let client_conn = Connection::new(a, Config::default(), Mode::Client);
    let mut client_ctrl = client_conn.control();
    let client_driver = task::spawn(async move {
        let mut conn = client_conn;
        while conn.next_stream().await.is_ok() {}
    });

    let mut out = client_ctrl.open_stream().await.unwrap();
    let _inb = server_ctrl.accept_stream().await.unwrap();

    client_ctrl.close().await.unwrap();
    client_driver.await;

    // the stream fails now that the connection is gone
    let err = out.write_all2(b"too late").await.unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);

    // opening on a closed connection fails
    assert!(matches!(
        client_ctrl.open_stream().await,
        Err(ConnectionError::Closed)
    ));

    // closing again is a no-op
    client_ctrl.close().await.unwrap();

    // the remote drains and terminates as well
    server_driver.await;
}

#[async_std::test]
async fn stream_ids_follow_the_initiator_rule() {
    let (a, b) = socket_pair();

    let server_conn = Connection::new(b, Config::default(), Mode::Server);
    let mut server_ctrl = server_conn.control();
    task::spawn(async move {
        let mut conn = server_conn;
        while conn.next_stream().await.is_ok() {}
    });

    let client_conn = Connection::new(a, Config::default(), Mode::Client);
    let mut client_ctrl = client_conn.control();
    task::spawn(async move {
        let mut conn = client_conn;
        while conn.next_stream().await.is_ok() {}
    });

    let s1 = client_ctrl.open_stream().await.unwrap();
    let s3 = client_ctrl.open_stream().await.unwrap();
    assert_eq!(s1.id().val(), 1);
    assert_eq!(s3.id().val(), 3);

    let s2 = server_ctrl.open_stream().await.unwrap();
    assert_eq!(s2.id().val(), 2);

    // both ends observe distinct ids for every stream
    let accepted1 = server_ctrl.accept_stream().await.unwrap();
    let accepted2 = server_ctrl.accept_stream().await.unwrap();
    assert_ne!(accepted1.id(), accepted2.id());
}

#[async_std::test]
async fn keepalive_times_out_against_a_silent_peer() {
    let (a, _silent) = socket_pair();

    let mut cfg = Config::default();
    cfg.set_ping_interval(Duration::from_millis(50))
        .set_ping_timeout(Duration::from_millis(100));

    let mut conn = Connection::new(a, cfg, Mode::Client);
    let err = loop {
        match conn.next_stream().await {
            Ok(()) => {}
            Err(e) => break e,
        }
    };
    assert!(matches!(err, ConnectionError::KeepaliveTimeout));
}

#[async_std::test]
async fn inactivity_closes_an_idle_connection() {
    let (a, b) = socket_pair();

    let mut cfg = Config::default();
    cfg.set_keepalive(false)
        .set_inactivity_timeout(Some(Duration::from_millis(100)));

    let mut idle = Connection::new(a, cfg, Mode::Client);
    let _other = b;

    let err = within(
        async {
            loop {
                if let Err(e) = idle.next_stream().await {
                    break e;
                }
            }
        },
        2_000,
    )
    .await
    .expect("idle connection should close by itself");
    assert!(matches!(err, ConnectionError::Closed));
}
