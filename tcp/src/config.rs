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

//! Server and channel configuration
//!
//! A server is built from an ordered list of [`ChannelConfig`]s, one per
//! listening port, plus a handful of tuning knobs. Both types use the builder
//! pattern and are immutable once handed to the server.
//!
//! # Example
//!
//! ```
//! use hydra_tcp::{ChannelConfig, ServerConfig};
//! use std::time::Duration;
//!
//! let config = ServerConfig::new(vec![
//!     ChannelConfig::new("127.0.0.1".parse().unwrap(), 7000),
//!     ChannelConfig::secure("127.0.0.1".parse().unwrap(), 7443, "certs/server.pem"),
//! ])
//! .with_sweep_interval(Duration::from_millis(250));
//!
//! assert!(config.validate().is_ok());
//! ```

use crate::types::ChannelId;
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Static description of one listening endpoint
///
/// The channel id is minted at construction and survives clones, so a
/// channel keeps its identity across server restarts.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    id: ChannelId,
    address: IpAddr,
    port: u16,
    is_secure: bool,
    certificate_path: Option<PathBuf>,
}

impl ChannelConfig {
    /// Create a plaintext channel
    pub fn new(address: IpAddr, port: u16) -> Self {
        Self {
            id: ChannelId::next(),
            address,
            port,
            is_secure: false,
            certificate_path: None,
        }
    }

    /// Create a TLS channel backed by a PEM bundle (certificate chain + key)
    pub fn secure(address: IpAddr, port: u16, certificate_path: impl Into<PathBuf>) -> Self {
        Self::new(address, port).with_certificate(certificate_path)
    }

    /// Enable TLS using the given PEM bundle
    pub fn with_certificate(mut self, certificate_path: impl Into<PathBuf>) -> Self {
        self.is_secure = true;
        self.certificate_path = Some(certificate_path.into());
        self
    }

    /// Channel identity
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Address to bind
    pub fn address(&self) -> IpAddr {
        self.address
    }

    /// Port to bind (0 picks an ephemeral port)
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Address and port combined
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    /// Whether the channel should terminate TLS
    pub fn is_secure(&self) -> bool {
        self.is_secure
    }

    /// Certificate bundle path (only meaningful for secure channels)
    pub fn certificate_path(&self) -> Option<&Path> {
        self.certificate_path.as_deref()
    }
}

/// Server configuration
///
/// # Example
///
/// ```
/// use hydra_tcp::{ChannelConfig, ServerConfig};
/// use std::time::Duration;
///
/// let config = ServerConfig::default()
///     .with_channel(ChannelConfig::new("0.0.0.0".parse().unwrap(), 9000))
///     .with_backlog(4096)
///     .with_stop_timeout(Duration::from_millis(500));
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Channels to listen on, in start order
    pub channels: Vec<ChannelConfig>,

    /// Listener backlog (pending connection queue length)
    pub backlog: u32,

    /// How often each channel reaps disconnected clients
    pub sweep_interval: Duration,

    /// Pause between receive scans that found no readable client
    pub poll_interval: Duration,

    /// Size of the first read of every payload
    pub initial_chunk_size: usize,

    /// Size of every follow-up read once a read filled its buffer
    pub growth_chunk_size: usize,

    /// Upper bound for a single socket read inside the payload reader
    pub read_timeout: Duration,

    /// Upper bound for a server-side TLS handshake
    pub handshake_timeout: Duration,

    /// Upper bound for writing and flushing one response or `send_data` buffer
    pub write_timeout: Duration,

    /// How long `stop` waits for each channel's loops to exit
    pub stop_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            backlog: 100_000,
            sweep_interval: Duration::from_millis(100),
            poll_interval: Duration::from_millis(10),
            initial_chunk_size: 8192,
            growth_chunk_size: 1024,
            read_timeout: Duration::from_millis(50),
            handshake_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(2),
            stop_timeout: Duration::from_millis(100),
        }
    }
}

impl ServerConfig {
    /// Create a new configuration with the given channels
    ///
    /// All other settings will use their default values.
    pub fn new(channels: Vec<ChannelConfig>) -> Self {
        Self {
            channels,
            ..Default::default()
        }
    }

    /// Add a channel
    pub fn with_channel(mut self, channel: ChannelConfig) -> Self {
        self.channels.push(channel);
        self
    }

    /// Set the listener backlog
    pub fn with_backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Set the disconnect sweep interval
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the idle pause between receive scans
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the initial and growth chunk sizes of the payload reader
    pub fn with_chunk_sizes(mut self, initial: usize, growth: usize) -> Self {
        self.initial_chunk_size = initial;
        self.growth_chunk_size = growth;
        self
    }

    /// Set the per-read timeout
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the TLS handshake timeout
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the write timeout
    ///
    /// A client that does not drain its socket within this bound is
    /// disconnected.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the bounded join used by `stop`
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Look up a channel by id
    pub fn channel(&self, id: ChannelId) -> Option<&ChannelConfig> {
        self.channels.iter().find(|c| c.id() == id)
    }

    /// Validate the configuration
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.channels.is_empty() {
            return Err("at least one channel must be configured".to_string());
        }

        let mut seen = HashSet::new();
        for channel in &self.channels {
            if !seen.insert(channel.id()) {
                return Err(format!("channel {} is configured twice", channel.id()));
            }
            if channel.is_secure() && channel.certificate_path().is_none() {
                return Err(format!(
                    "secure channel {} has no certificate path",
                    channel.id()
                ));
            }
        }

        if self.backlog == 0 {
            return Err("backlog must be greater than 0".to_string());
        }

        if self.initial_chunk_size == 0 || self.growth_chunk_size == 0 {
            return Err("chunk sizes must be greater than 0".to_string());
        }

        if self.sweep_interval.is_zero() {
            return Err("sweep_interval must be greater than 0".to_string());
        }

        if self.poll_interval.is_zero() {
            return Err("poll_interval must be greater than 0".to_string());
        }

        if self.read_timeout.is_zero() {
            return Err("read_timeout must be greater than 0".to_string());
        }

        if self.handshake_timeout.is_zero() {
            return Err("handshake_timeout must be greater than 0".to_string());
        }

        if self.write_timeout.is_zero() {
            return Err("write_timeout must be greater than 0".to_string());
        }

        if self.stop_timeout.is_zero() {
            return Err("stop_timeout must be greater than 0".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn localhost() -> IpAddr {
        "127.0.0.1".parse().unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.backlog, 100_000);
        assert_eq!(config.sweep_interval, Duration::from_millis(100));
        assert_eq!(config.poll_interval, Duration::from_millis(10));
        assert_eq!(config.initial_chunk_size, 8192);
        assert_eq!(config.growth_chunk_size, 1024);
        assert_eq!(config.write_timeout, Duration::from_secs(2));
        // No channels yet
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder_pattern() {
        let config = ServerConfig::default()
            .with_channel(ChannelConfig::new(localhost(), 0))
            .with_backlog(128)
            .with_chunk_sizes(4096, 512)
            .with_write_timeout(Duration::from_millis(250))
            .with_stop_timeout(Duration::from_secs(1));

        assert_eq!(config.channels.len(), 1);
        assert_eq!(config.backlog, 128);
        assert_eq!(config.initial_chunk_size, 4096);
        assert_eq!(config.growth_chunk_size, 512);
        assert_eq!(config.write_timeout, Duration::from_millis(250));
        assert_eq!(config.stop_timeout, Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_channel_identity_survives_clone() {
        let channel = ChannelConfig::new(localhost(), 7000);
        let copy = channel.clone();
        assert_eq!(channel.id(), copy.id());
        assert_ne!(channel.id(), ChannelConfig::new(localhost(), 7000).id());
    }

    #[test]
    fn test_secure_channel() {
        let channel = ChannelConfig::secure(localhost(), 7443, "server.pem");
        assert!(channel.is_secure());
        assert_eq!(channel.certificate_path(), Some(Path::new("server.pem")));
        assert_eq!(channel.socket_addr(), "127.0.0.1:7443".parse().unwrap());
    }

    #[test]
    fn test_validation() {
        let channel = ChannelConfig::new(localhost(), 0);
        let mut config = ServerConfig::new(vec![channel.clone()]);
        assert!(config.validate().is_ok());

        // Same channel twice
        config.channels.push(channel);
        assert!(config.validate().is_err());
        config.channels.pop();

        config.backlog = 0;
        assert!(config.validate().is_err());
        config.backlog = 10;

        config.growth_chunk_size = 0;
        assert!(config.validate().is_err());
        config.growth_chunk_size = 1024;

        config.sweep_interval = Duration::ZERO;
        assert!(config.validate().is_err());
        config.sweep_interval = Duration::from_millis(100);

        config.write_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
        config.write_timeout = Duration::from_secs(2);

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_channel_lookup() {
        let a = ChannelConfig::new(localhost(), 1000);
        let b = ChannelConfig::new(localhost(), 1001);
        let config = ServerConfig::new(vec![a.clone(), b.clone()]);
        assert_eq!(config.channel(b.id()).map(|c| c.port()), Some(1001));
        assert!(config.channel(ChannelId::next()).is_none());
    }
}
