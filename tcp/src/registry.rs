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

//! Client registry
//!
//! The registry is shared by every channel of a server. It is responsible for:
//! - Minting client IDs
//! - Tracking accepted clients until the sweep removes them
//! - Handing out snapshots to the receive and sweep loops

use crate::connection::ClientConnection;
use crate::{ChannelId, ClientId, ClientInfo, ServerMetrics};
use dashmap::DashMap;
use metrics::{counter, gauge};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};
use tokio::net::TcpStream;

/// A tracked client
#[derive(Debug)]
pub(crate) struct ClientEntry {
    id: ClientId,
    channel_id: ChannelId,
    connection: ClientConnection,
    connected_at: SystemTime,
    started: Instant,
    /// Nanoseconds since `started` of the last successful read
    last_activity: AtomicU64,
}

impl ClientEntry {
    pub(crate) fn id(&self) -> ClientId {
        self.id
    }

    pub(crate) fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub(crate) fn connection(&self) -> &ClientConnection {
        &self.connection
    }

    /// Record a successful read
    pub(crate) fn touch(&self) {
        let elapsed = u64::try_from(self.started.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.last_activity.store(elapsed, Ordering::Relaxed);
    }

    /// Wall-clock time of the last successful read
    pub(crate) fn last_activity(&self) -> SystemTime {
        self.connected_at + Duration::from_nanos(self.last_activity.load(Ordering::Relaxed))
    }

    /// Get client info snapshot
    pub(crate) fn info(&self) -> ClientInfo {
        ClientInfo {
            id: self.id,
            channel_id: self.channel_id,
            peer_addr: self.connection.peer_addr(),
            connected_at: self.connected_at,
            last_activity: self.last_activity(),
            connected: self.connection.is_connected(),
        }
    }
}

/// Registry of every client accepted by a server
pub(crate) struct ClientRegistry {
    /// Tracked clients (lock-free concurrent map)
    clients: DashMap<ClientId, Arc<ClientEntry>>,
    /// Next client ID (monotonically increasing)
    next_id: AtomicU64,
    /// Server metrics
    metrics: Arc<ServerMetrics>,
}

impl ClientRegistry {
    /// Create an empty registry
    pub(crate) fn new(metrics: Arc<ServerMetrics>) -> Self {
        Self {
            clients: DashMap::new(),
            next_id: AtomicU64::new(1),
            metrics,
        }
    }

    fn next_client_id(&self) -> ClientId {
        ClientId::new(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Wrap an accepted socket and start tracking it
    pub(crate) fn register(
        &self,
        channel_id: ChannelId,
        socket: TcpStream,
        secure: bool,
    ) -> io::Result<Arc<ClientEntry>> {
        let connection = ClientConnection::accept(socket, secure)?;
        let entry = Arc::new(ClientEntry {
            id: self.next_client_id(),
            channel_id,
            connection,
            connected_at: SystemTime::now(),
            started: Instant::now(),
            last_activity: AtomicU64::new(0),
        });

        self.clients.insert(entry.id, entry.clone());
        self.metrics.client_accepted();
        counter!("hydra.clients.accepted").increment(1);
        gauge!("hydra.clients.active").increment(1.0);

        Ok(entry)
    }

    /// Get a client by ID
    pub(crate) fn get(&self, id: ClientId) -> Option<Arc<ClientEntry>> {
        self.clients.get(&id).map(|entry| entry.value().clone())
    }

    /// Close a client and stop tracking it
    pub(crate) fn remove(&self, id: ClientId) -> Option<Arc<ClientEntry>> {
        let (_, entry) = self.clients.remove(&id)?;
        entry.connection.close();
        self.metrics.client_closed();
        gauge!("hydra.clients.active").decrement(1.0);
        Some(entry)
    }

    /// All clients in insertion order
    pub(crate) fn snapshot(&self) -> Vec<Arc<ClientEntry>> {
        let mut clients: Vec<_> = self
            .clients
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        clients.sort_unstable_by_key(|entry| entry.id);
        clients
    }

    /// Clients of one channel in insertion order
    pub(crate) fn channel_snapshot(&self, channel_id: ChannelId) -> Vec<Arc<ClientEntry>> {
        let mut clients: Vec<_> = self
            .clients
            .iter()
            .filter(|entry| entry.channel_id == channel_id)
            .map(|entry| entry.value().clone())
            .collect();
        clients.sort_unstable_by_key(|entry| entry.id);
        clients
    }

    /// Info snapshots for every tracked client in insertion order
    pub(crate) fn infos(&self) -> Vec<ClientInfo> {
        self.snapshot().iter().map(|entry| entry.info()).collect()
    }

    /// Remove the channel's clients whose socket is gone
    ///
    /// Returns the number of clients removed.
    pub(crate) fn sweep(&self, channel_id: ChannelId) -> usize {
        self.channel_snapshot(channel_id)
            .into_iter()
            .filter(|entry| !entry.connection.is_alive())
            .filter(|entry| self.remove(entry.id).is_some())
            .count()
    }

    /// Shut down every client socket without removing the entries
    pub(crate) fn close_all(&self) -> usize {
        let mut closed = 0;
        for entry in self.clients.iter() {
            entry.connection.close();
            closed += 1;
        }
        closed
    }

    /// Close and forget every client
    pub(crate) fn clear(&self) -> usize {
        let ids: Vec<ClientId> = self.clients.iter().map(|entry| *entry.key()).collect();
        ids.into_iter()
            .filter(|id| self.remove(*id).is_some())
            .count()
    }

    /// Number of tracked clients
    pub(crate) fn len(&self) -> usize {
        self.clients.len()
    }
}
