//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Many concurrent clients against one channel
//!
//! Every client costs two descriptors in this process (its socket and the
//! server's accepted socket). Runs that do not fit under the soft open-file
//! limit (`ulimit -n`) are skipped with a message. The largest run is also
//! ignored by default:
//!
//! ```text
//! cargo test -p hydra-tcp --test scale_tests -- --ignored
//! ```

use hydra_tcp::{ChannelConfig, MultiChannelServer, ServerConfig};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinSet;

/// Descriptors kept free for the runtime, listeners and the test harness
const DESCRIPTOR_HEADROOM: u64 = 64;

/// Soft open-file limit of this process, if the platform reports one
fn open_file_limit() -> Option<u64> {
    let limits = std::fs::read_to_string("/proc/self/limits").ok()?;
    let line = limits.lines().find(|line| line.starts_with("Max open files"))?;
    let soft = line.trim_start_matches("Max open files").split_whitespace().next()?;
    match soft {
        "unlimited" => Some(u64::MAX),
        soft => soft.parse().ok(),
    }
}

/// Check whether `count` clients fit under the open-file limit
fn fits_descriptor_limit(count: usize) -> bool {
    let needed = 2 * count as u64 + DESCRIPTOR_HEADROOM;
    match open_file_limit() {
        Some(limit) if limit < needed => {
            eprintln!("skipping {count} clients: open-file limit {limit} is below {needed}");
            false
        }
        Some(_) => true,
        // Platform defaults can be as low as 256
        None => count <= 100,
    }
}

async fn exchange_with_clients(count: usize) {
    if !fits_descriptor_limit(count) {
        return;
    }

    let config = ServerConfig::new(vec![ChannelConfig::new(
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        0,
    )]);
    let server = MultiChannelServer::new(config).unwrap();

    let connected = Arc::new(AtomicUsize::new(0));
    let counter = connected.clone();
    server.assign_connection_handler(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    server.assign_packet_handler(|payload, _client| async move {
        Some(payload.into_iter().rev().collect())
    });

    let result = server.start().await;
    assert!(result.is_success(), "{}", result);
    let addr = server.local_addrs()[0].1;

    let mut clients = JoinSet::new();
    for index in 0..count {
        clients.spawn(async move {
            let payload = format!("client-{index:05}").into_bytes();
            let expected: Vec<u8> = payload.iter().rev().copied().collect();

            let mut socket = TcpStream::connect(addr).await.unwrap();
            socket.write_all(&payload).await.unwrap();

            let mut response = vec![0u8; expected.len()];
            socket.read_exact(&mut response).await.unwrap();
            assert_eq!(response, expected);
            socket
        });
    }

    let mut sockets = Vec::with_capacity(count);
    let joined = tokio::time::timeout(Duration::from_secs(120), async {
        while let Some(socket) = clients.join_next().await {
            sockets.push(socket.unwrap());
        }
    })
    .await;
    assert!(joined.is_ok(), "clients did not finish in time");

    assert_eq!(sockets.len(), count);
    assert_eq!(connected.load(Ordering::SeqCst), count);
    assert_eq!(server.client_count(), count);
    assert_eq!(server.metrics().snapshot().packets_received, count as u64);

    server.dispose().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_client() {
    exchange_with_clients(1).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_hundred_clients() {
    exchange_with_clients(100).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_thousand_clients() {
    exchange_with_clients(1_000).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
#[ignore = "slow; run with --ignored"]
async fn test_ten_thousand_clients() {
    exchange_with_clients(10_000).await;
}
