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

//! Many streams at once: every byte written on one side must come out on
//! the other, per stream and in order.

use async_std::task;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use meshwork_core::transport::memory;
use meshwork_core::Multiaddr;
use meshwork_traits::{ReadEx, WriteEx};
use meshwork_yamux::connection::{Connection, Mode};
use meshwork_yamux::Config;

const NUM_STREAMS: usize = 10;
const ROUNDTRIPS: usize = 100;
const CHUNK: usize = 32;

#[async_std::test]
async fn parallel_streams_with_concurrent_writes() {
    let _ = env_logger::try_init();
    let (a, b) = memory::pipe(Multiaddr::empty(), Multiaddr::empty());

    // echo server: every accepted stream echoes until EOF
    let server_conn = Connection::new(b, Config::default(), Mode::Server);
    let mut server_ctrl = server_conn.control();
    task::spawn(async move {
        let mut conn = server_conn;
        while conn.next_stream().await.is_ok() {}
    });
    let server_bytes = Arc::new(AtomicUsize::new(0));
    let server_counter = server_bytes.clone();
    task::spawn(async move {
        while let Ok(mut stream) = server_ctrl.accept_stream().await {
            let counter = server_counter.clone();
            task::spawn(async move {
                let mut buf = [0u8; CHUNK];
                loop {
                    let n = match stream.read2(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => n,
                    };
                    counter.fetch_add(n, Ordering::SeqCst);
                    if stream.write_all2(&buf[..n]).await.is_err() {
                        break;
                    }
                }
                let _ = stream.close2().await;
            });
        }
    });

    let client_conn = Connection::new(a, Config::default(), Mode::Client);
    let client_ctrl = client_conn.control();
    task::spawn(async move {
        let mut conn = client_conn;
        while conn.next_stream().await.is_ok() {}
    });

    let client_bytes = Arc::new(AtomicUsize::new(0));
    let mut workers = Vec::new();
    for i in 0..NUM_STREAMS {
        let mut ctrl = client_ctrl.clone();
        let counter = client_bytes.clone();
        workers.push(task::spawn(async move {
            let mut stream = ctrl.open_stream().await.unwrap();
            let mut out = [0u8; CHUNK];
            let mut echo = [0u8; CHUNK];
            for round in 0..ROUNDTRIPS {
                for (k, byte) in out.iter_mut().enumerate() {
                    *byte = (i * 31 + round * 7 + k) as u8;
                }
                stream.write_all2(&out).await.unwrap();
                stream.read_exact2(&mut echo).await.unwrap();
                assert_eq!(out, echo, "stream {} round {}", i, round);
                counter.fetch_add(CHUNK, Ordering::SeqCst);
            }
            stream.close2().await.unwrap();
        }));
    }
    for worker in workers {
        worker.await;
    }

    let total = NUM_STREAMS * ROUNDTRIPS * CHUNK;
    assert_eq!(client_bytes.load(Ordering::SeqCst), total);
    assert_eq!(server_bytes.load(Ordering::SeqCst), total);
}
