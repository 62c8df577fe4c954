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

//! Core types for the multi-channel server

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

/// Channel ids are process-wide so two servers never hand out the same one
static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a listening channel (never reused)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    /// Mint a fresh channel ID
    pub(crate) fn next() -> Self {
        Self(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the underlying u64 value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel-{}", self.0)
    }
}

/// Unique identifier for a client (monotonically increasing, never reused)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    /// Create a new client ID
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the underlying u64 value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Server lifecycle state (stored as atomic u8 for lock-free reads)
///
/// `Starting` and `Stopping` only exist for the duration of a single
/// `start`/`stop` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerState {
    /// No channel is running
    Stopped = 0,
    /// Channels are being bound
    Starting = 1,
    /// Every channel is bound and its loops launched
    Running = 2,
    /// Cancellation issued, waiting for loops to exit
    Stopping = 3,
}

impl ServerState {
    /// Convert from u8 (for atomic operations)
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Stopping,
            _ => Self::Stopped,
        }
    }

    /// Convert to u8 (for atomic operations)
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Check if the server is between start and stop
    pub fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
        }
    }
}

/// Class of failure reported to the error handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Accepting a connection failed
    Connect,
    /// Reading a client payload failed
    Receive,
    /// Writing a payload to a client failed
    Send,
    /// Start, stop or restart failed
    Lifecycle,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => write!(f, "connect"),
            Self::Receive => write!(f, "receive"),
            Self::Send => write!(f, "send"),
            Self::Lifecycle => write!(f, "lifecycle"),
        }
    }
}

/// Client information snapshot (for handlers and stats queries)
#[derive(Debug, Clone)]
pub struct ClientInfo {
    /// Client ID
    pub id: ClientId,
    /// Channel the client connected through
    pub channel_id: ChannelId,
    /// Peer address
    pub peer_addr: SocketAddr,
    /// When the connection was accepted
    pub connected_at: SystemTime,
    /// Last successful read
    pub last_activity: SystemTime,
    /// Whether the connection was still open when the snapshot was taken
    pub connected: bool,
}

impl ClientInfo {
    /// Get the idle duration
    pub fn idle_duration(&self) -> Duration {
        self.last_activity.elapsed().unwrap_or_default()
    }
}
