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

//! Lock-free metrics for the multi-channel server

use crate::types::ErrorKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Lock-free server metrics
///
/// Every counter is an atomic shared by all channel loops. Use
/// [`ServerMetrics::snapshot`] for a point-in-time view.
#[derive(Debug)]
pub struct ServerMetrics {
    // Clients
    clients_accepted: AtomicU64,
    clients_closed: AtomicU64,

    // Throughput
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
    packets_received: AtomicU64,
    packets_sent: AtomicU64,

    // Errors
    connect_errors: AtomicU64,
    receive_errors: AtomicU64,
    send_errors: AtomicU64,
    lifecycle_errors: AtomicU64,

    created_at: Instant,
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerMetrics {
    /// Create a new metrics instance
    pub fn new() -> Self {
        Self {
            clients_accepted: AtomicU64::new(0),
            clients_closed: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
            packets_sent: AtomicU64::new(0),
            connect_errors: AtomicU64::new(0),
            receive_errors: AtomicU64::new(0),
            send_errors: AtomicU64::new(0),
            lifecycle_errors: AtomicU64::new(0),
            created_at: Instant::now(),
        }
    }

    /// Record an accepted client
    pub fn client_accepted(&self) {
        self.clients_accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a client removed from the registry
    pub fn client_closed(&self) {
        self.clients_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Clients currently tracked
    pub fn active_clients(&self) -> u64 {
        let accepted = self.clients_accepted.load(Ordering::Relaxed);
        accepted.saturating_sub(self.clients_closed.load(Ordering::Relaxed))
    }

    /// Total clients accepted since the server was created
    pub fn total_clients(&self) -> u64 {
        self.clients_accepted.load(Ordering::Relaxed)
    }

    /// Record one payload read from a client
    pub fn packet_received(&self, bytes: usize) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record one payload written to a client
    pub fn packet_sent(&self, bytes: usize) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record an error of the given kind
    pub fn error(&self, kind: ErrorKind) {
        let counter = match kind {
            ErrorKind::Connect => &self.connect_errors,
            ErrorKind::Receive => &self.receive_errors,
            ErrorKind::Send => &self.send_errors,
            ErrorKind::Lifecycle => &self.lifecycle_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of all metrics
    ///
    /// Counters are read one by one, so the snapshot may be slightly skewed
    /// while loops are running. Close enough for monitoring.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_clients: self.clients_accepted.load(Ordering::Relaxed),
            active_clients: self.active_clients(),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            connect_errors: self.connect_errors.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            lifecycle_errors: self.lifecycle_errors.load(Ordering::Relaxed),
            uptime: self.created_at.elapsed(),
        }
    }
}

/// A snapshot of server metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    /// Clients accepted since creation
    pub total_clients: u64,
    /// Clients currently in the registry
    pub active_clients: u64,
    /// Total payload bytes read
    pub bytes_received: u64,
    /// Total payload bytes written
    pub bytes_sent: u64,
    /// Payloads read
    pub packets_received: u64,
    /// Payloads written
    pub packets_sent: u64,
    /// Accept failures
    pub connect_errors: u64,
    /// Read failures
    pub receive_errors: u64,
    /// Write failures
    pub send_errors: u64,
    /// Start/stop failures
    pub lifecycle_errors: u64,
    /// Time since the metrics were created
    pub uptime: Duration,
}

impl MetricsSnapshot {
    /// Calculate total error count
    pub fn total_errors(&self) -> u64 {
        self.connect_errors + self.receive_errors + self.send_errors + self.lifecycle_errors
    }

    /// Calculate packets per second (received)
    pub fn packets_received_per_sec(&self) -> f64 {
        if self.uptime.is_zero() {
            return 0.0;
        }
        self.packets_received as f64 / self.uptime.as_secs_f64()
    }
}
