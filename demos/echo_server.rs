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

//! Echo Server Example
//!
//! This example demonstrates a plaintext multi-channel server that:
//! - Listens on ports 4000 and 4001 at the same time
//! - Echoes every payload back reversed
//! - Prints the client table every ten seconds
//!
//! ## Usage
//!
//! Run the server:
//! ```bash
//! RUST_LOG=debug cargo run --example echo_server
//! ```
//!
//! Connect with netcat:
//! ```bash
//! nc localhost 4000
//! ```

use hydra_tcp::{ChannelConfig, MultiChannelServer, ServerConfig};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let any = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
    let config = ServerConfig::new(vec![
        ChannelConfig::new(any, 4000),
        ChannelConfig::new(any, 4001),
    ]);
    let server = MultiChannelServer::new(config)?;

    server.assign_connection_handler(|client| {
        println!("{} connected from {}", client.id, client.peer_addr);
    });
    server.assign_packet_handler(|payload, client| async move {
        println!("{} sent {} byte(s)", client.id, payload.len());
        Some(payload.into_iter().rev().collect())
    });
    server.assign_error_handler(|kind, error| {
        eprintln!("{kind} error: {error}");
    });

    let result = server.start().await;
    println!("{result}");
    if !result.is_success() {
        return Ok(());
    }
    for (channel, addr) in server.local_addrs() {
        println!("{channel} listening on {addr}");
    }
    println!("Press Ctrl+C to stop the server\n");

    let mut report = tokio::time::interval(Duration::from_secs(10));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = report.tick() => {
                for client in server.get_clients_stats() {
                    println!(
                        "{} {} idle {:?}",
                        client.id,
                        client.peer_addr,
                        client.idle_duration()
                    );
                }
            }
        }
    }

    println!("\nShutting down server...");
    println!("{}", server.stop().await);
    server.dispose().await;
    println!("Server stopped");

    Ok(())
}
