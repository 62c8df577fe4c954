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

//! Hydra Multi-Channel TCP Server
//!
//! One server process listens on several endpoints ("channels") at once, each
//! optionally TLS-encrypted, and exchanges opaque binary payloads with every
//! connected client through a single set of callbacks:
//!
//! - Any number of plaintext and TLS channels under one lifecycle
//! - A shared client registry addressed by [`ClientId`]
//! - Connect, packet and error callbacks, replaceable at any time
//! - Pluggable payload boundary detection through [`PayloadReader`]
//! - Lock-free metrics
//!
//! # Architecture
//!
//! ```text
//! MultiChannelServer
//!     ↓
//! ChannelRuntime ─── one per channel, owns the TLS acceptor
//!     ↓
//! ChannelWorker ──── accept / sweep / receive loops
//!     ↓
//! ClientRegistry → ClientConnection → ClientStream (plain | TLS)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use hydra_tcp::{ChannelConfig, MultiChannelServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::new(vec![
//!         ChannelConfig::new("0.0.0.0".parse()?, 4000),
//!         ChannelConfig::secure("0.0.0.0".parse()?, 4443, "server.pem"),
//!     ]);
//!     let server = MultiChannelServer::new(config)?;
//!
//!     server.assign_connection_handler(|client| {
//!         println!("{} connected from {}", client.id, client.peer_addr);
//!     });
//!     server.assign_packet_handler(|payload, _client| async move {
//!         Some(payload.into_iter().rev().collect())
//!     });
//!
//!     let result = server.start().await;
//!     println!("{result}");
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.dispose().await;
//!     Ok(())
//! }
//! ```

mod channel;
mod config;
mod connection;
mod error;
mod handler;
mod metrics;
mod reader;
mod registry;
mod server;
mod stream;
mod tls;
mod types;
mod worker;

pub use config::{ChannelConfig, ServerConfig};
pub use error::{HydraError, Result};
pub use handler::{ConnectionHandler, ErrorHandler, Handlers, PacketHandler};
pub use hydra_common::{OperationResult, OperationType};
pub use reader::{PayloadReader, ShortReadReader};
pub use self::metrics::{MetricsSnapshot, ServerMetrics};
pub use server::MultiChannelServer;
pub use types::{ChannelId, ClientId, ClientInfo, ErrorKind, ServerState};
