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

//! TLS Echo Server Example
//!
//! Serves the same echo handler on a plaintext channel (port 4000) and a TLS
//! channel (port 4443). The TLS channel reads its certificate chain and
//! private key from one PEM bundle:
//!
//! ```bash
//! openssl req -x509 -newkey rsa:2048 -nodes -days 365 \
//!     -keyout server.key -out server.crt -subj "/CN=localhost"
//! cat server.crt server.key > server.pem
//! HYDRA_CERT=server.pem cargo run --example tls_echo_server
//! ```
//!
//! Connect with:
//! ```bash
//! openssl s_client -connect localhost:4443
//! ```

use hydra_tcp::{
    ChannelConfig, ClientInfo, ErrorKind, Handlers, HydraError, MultiChannelServer, ServerConfig,
};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let certificate = std::env::var("HYDRA_CERT").unwrap_or_else(|_| "server.pem".to_string());
    let any = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
    let config = ServerConfig::new(vec![
        ChannelConfig::new(any, 4000),
        ChannelConfig::secure(any, 4443, certificate),
    ]);

    let handlers = Handlers {
        on_connect: Some(Arc::new(|client: &ClientInfo| {
            tracing::info!("{} connected from {}", client.id, client.peer_addr);
        })),
        on_error: Some(Arc::new(|kind: ErrorKind, error: &HydraError| {
            tracing::warn!("{} error: {}", kind, error);
        })),
        ..Default::default()
    };
    let server = MultiChannelServer::new(config)?.with_handlers(handlers);
    server.assign_packet_handler(|payload, _client| async move { Some(payload) });

    let result = server.start().await;
    println!("{result}");
    if !result.is_success() {
        return Ok(());
    }

    tokio::signal::ctrl_c().await?;
    server.dispose().await;

    Ok(())
}
