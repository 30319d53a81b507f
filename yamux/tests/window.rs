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

//! Flow control: a reader that consumes nothing must stop the writer at
//! exactly the initial window, and reading must hand the credit back.

use async_std::task;
use std::time::Duration;

use futures::future::{select, Either};
use futures::pin_mut;
use futures_timer::Delay;

use meshwork_core::transport::memory;
use meshwork_core::Multiaddr;
use meshwork_traits::{ReadEx, WriteEx};
use meshwork_yamux::connection::{Connection, Mode};
use meshwork_yamux::{Config, DEFAULT_CREDIT};

/// Writes chunks until the stream refuses to accept more within 200ms,
/// returning how many bytes went through.
async fn write_until_blocked(stream: &mut meshwork_yamux::connection::Stream) -> usize {
    let chunk = [0x5au8; 8192];
    let mut written = 0;
    loop {
        let write = stream.write2(&chunk);
        let deadline = Delay::new(Duration::from_millis(200));
        pin_mut!(write, deadline);
        match select(write, deadline).await {
            Either::Left((Ok(n), _)) => written += n,
            Either::Left((Err(e), _)) => panic!("write failed: {}", e),
            Either::Right(((), _)) => break,
        }
    }
    written
}

#[async_std::test]
async fn window_exhaustion_and_credit_return() {
    let (a, b) = memory::pipe(Multiaddr::empty(), Multiaddr::empty());

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

    let mut writer = client_ctrl.open_stream().await.unwrap();
    // the responder accepts the stream but does not read
    let mut reader = server_ctrl.accept_stream().await.unwrap();

    // the writer stalls after exactly the initial window
    let first = write_until_blocked(&mut writer).await;
    assert_eq!(first, DEFAULT_CREDIT as usize);

    // consuming 64 KiB hands exactly that much credit back
    let mut sink = vec![0u8; 65536];
    reader.read_exact2(&mut sink).await.unwrap();

    let second = write_until_blocked(&mut writer).await;
    assert_eq!(second, 65536);

    let _ = writer.reset().await;
}
