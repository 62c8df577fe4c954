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

//! Per-channel runtime state
//!
//! A runtime is created the first time its channel starts and is reused by
//! every later start. It owns the channel's TLS acceptor and the handle of the
//! task running the channel's loops.

use crate::{ChannelConfig, ChannelId, HydraError, Result, tls};
use arc_swap::ArcSwapOption;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

/// Runtime state of one listening channel
pub(crate) struct ChannelRuntime {
    config: ChannelConfig,
    acceptor: Option<TlsAcceptor>,
    running: AtomicBool,
    local_addr: ArcSwapOption<SocketAddr>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelRuntime {
    /// Create the runtime for a channel, loading its TLS credentials
    ///
    /// A secure channel whose certificate file is missing falls back to
    /// plaintext with a warning. A file that exists but cannot be parsed is
    /// an error.
    pub(crate) fn create(config: &ChannelConfig) -> Result<Self> {
        let acceptor = match config.certificate_path() {
            Some(path) if config.is_secure() && path.exists() => {
                tracing::debug!(channel = %config.id(), path = %path.display(), "Loading TLS certificate");
                Some(tls::load_acceptor(path)?)
            }
            Some(path) if config.is_secure() => {
                tracing::warn!(
                    channel = %config.id(),
                    path = %path.display(),
                    "Certificate file not found, channel will accept plaintext connections"
                );
                None
            }
            _ => None,
        };

        Ok(Self {
            config: config.clone(),
            acceptor,
            running: AtomicBool::new(false),
            local_addr: ArcSwapOption::empty(),
            task: Mutex::new(None),
        })
    }

    /// Get the channel ID
    pub(crate) fn id(&self) -> ChannelId {
        self.config.id()
    }

    /// TLS acceptor, if the channel serves TLS
    pub(crate) fn acceptor(&self) -> Option<&TlsAcceptor> {
        self.acceptor.as_ref()
    }

    /// Check if accepted clients must complete a TLS handshake
    pub(crate) fn is_tls(&self) -> bool {
        self.acceptor.is_some()
    }

    /// Check if the channel is between start and stop
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Address of the most recently launched listener
    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.load_full().map(|addr| *addr)
    }

    /// Bind the channel's listener
    ///
    /// Fails with [`HydraError::ChannelAlreadyRunning`] if the previous run
    /// has not been stopped. The bound address is only published by
    /// [`ChannelRuntime::launch`], so a rolled back start leaves no trace.
    pub(crate) fn bind(&self, backlog: u32) -> Result<(TcpListener, SocketAddr)> {
        if self.is_running() {
            return Err(HydraError::ChannelAlreadyRunning(self.id()));
        }

        let addr = self.config.socket_addr();
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        // Deliberate departure from exclusive address use: without
        // SO_REUSEADDR a restart fails to rebind while old client sockets sit
        // in TIME_WAIT. An active listener on the port still makes bind fail.
        #[cfg(unix)]
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(backlog)?;

        let bound = listener.local_addr()?;
        tracing::debug!(channel = %self.id(), "Server channel bound to {}", bound);

        Ok((listener, bound))
    }

    /// Record the spawned task and its listener address, and mark the
    /// channel running
    pub(crate) fn launch(&self, handle: JoinHandle<()>, addr: SocketAddr) {
        self.local_addr.store(Some(Arc::new(addr)));
        tracing::info!(channel = %self.id(), "Server channel listening on {}", addr);
        *self.task() = Some(handle);
        self.running.store(true, Ordering::Release);
    }

    /// Check if the channel task is still alive
    pub(crate) fn is_alive(&self) -> bool {
        self.task()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Wait up to `limit` for the channel task to exit
    ///
    /// The channel is marked stopped either way. A task that outlives the
    /// limit is kept so [`ChannelRuntime::join`] can wait for it later.
    pub(crate) async fn halt(&self, limit: Duration) -> bool {
        self.running.store(false, Ordering::Release);

        let Some(mut handle) = self.task().take() else {
            return true;
        };

        match tokio::time::timeout(limit, &mut handle).await {
            Ok(joined) => {
                if let Err(e) = joined {
                    tracing::error!(channel = %self.id(), "Channel task failed: {}", e);
                }
                true
            }
            Err(_) => {
                tracing::warn!(
                    channel = %self.id(),
                    "Channel task did not exit within {:?}",
                    limit
                );
                *self.task() = Some(handle);
                false
            }
        }
    }

    /// Wait for the channel task to exit, however long it takes
    pub(crate) async fn join(&self) {
        self.running.store(false, Ordering::Release);
        let handle = self.task().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(channel = %self.id(), "Channel task failed: {}", e);
            }
        }
    }

    fn task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
