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

//! Multi-channel server implementation

use crate::channel::ChannelRuntime;
use crate::handler::{FnPacketHandler, HandlerRegistry};
use crate::worker::{ChannelWorker, ServerContext};
use crate::{
    ChannelConfig, ChannelId, ClientId, ClientInfo, ErrorKind, Handlers, HydraError,
    PacketHandler, PayloadReader, Result, ServerConfig, ServerMetrics, ServerState,
    ShortReadReader,
};
use arc_swap::ArcSwap;
use hydra_common::{OperationResult, OperationType};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// A TCP server listening on several channels at once
///
/// Every channel shares one client registry and one handler set. Clients are
/// identified by a [`ClientId`] that stays valid until the client disconnects
/// and is swept.
///
/// Management calls never fail with an error; they return an
/// [`OperationResult`] describing what happened.
///
/// # Example
///
/// ```no_run
/// use hydra_tcp::{ChannelConfig, MultiChannelServer, ServerConfig};
///
/// #[tokio::main]
/// async fn main() -> hydra_tcp::Result<()> {
///     let config = ServerConfig::new(vec![ChannelConfig::new("0.0.0.0".parse().unwrap(), 4000)]);
///     let server = MultiChannelServer::new(config)?;
///
///     server.assign_packet_handler(|payload, _client| async move {
///         Some(payload)
///     });
///
///     let result = server.start().await;
///     assert!(result.is_success(), "{}", result);
///
///     tokio::signal::ctrl_c().await?;
///     server.dispose().await;
///     Ok(())
/// }
/// ```
pub struct MultiChannelServer {
    context: Arc<ServerContext>,
    reader: Arc<dyn PayloadReader>,
    metrics: Arc<ServerMetrics>,
    state: AtomicU8,
    cancel: ArcSwap<CancellationToken>,
    lifecycle: Mutex<()>,
}

impl MultiChannelServer {
    /// Create a server for the given channels
    ///
    /// Nothing is bound until [`MultiChannelServer::start`].
    pub fn new(config: ServerConfig) -> Result<Self> {
        config.validate().map_err(HydraError::InvalidConfig)?;

        let reader = ShortReadReader::new(
            config.initial_chunk_size,
            config.growth_chunk_size,
            config.read_timeout,
        );
        let metrics = Arc::new(ServerMetrics::new());
        let context = ServerContext::new(
            config,
            HandlerRegistry::new(Handlers::default()),
            metrics.clone(),
        );

        Ok(Self {
            context: Arc::new(context),
            reader: Arc::new(reader),
            metrics,
            state: AtomicU8::new(ServerState::Stopped.as_u8()),
            cancel: ArcSwap::from_pointee(CancellationToken::new()),
            lifecycle: Mutex::new(()),
        })
    }

    /// Install a complete handler set
    pub fn with_handlers(self, handlers: Handlers) -> Self {
        self.context.handlers.replace(handlers);
        self
    }

    /// Replace the payload boundary heuristic
    ///
    /// Takes effect on the next start.
    pub fn with_payload_reader(mut self, reader: Arc<dyn PayloadReader>) -> Self {
        self.reader = reader;
        self
    }

    /// Get the server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }

    /// Get the current lifecycle state
    pub fn state(&self) -> ServerState {
        ServerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ServerState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// Get the server metrics
    pub fn metrics(&self) -> Arc<ServerMetrics> {
        self.metrics.clone()
    }

    /// Number of clients in the registry, including ones awaiting the sweep
    pub fn client_count(&self) -> usize {
        self.context.registry.len()
    }

    /// Address a channel is bound to
    ///
    /// `None` until the channel has been started successfully once.
    pub fn local_addr(&self, channel: ChannelId) -> Option<SocketAddr> {
        self.context
            .channels
            .get(&channel)
            .and_then(|runtime| runtime.local_addr())
    }

    /// Bound addresses of every started channel, in configuration order
    pub fn local_addrs(&self) -> Vec<(ChannelId, SocketAddr)> {
        self.runtimes()
            .iter()
            .filter_map(|runtime| runtime.local_addr().map(|addr| (runtime.id(), addr)))
            .collect()
    }

    /// Channel runtimes in configuration order
    fn runtimes(&self) -> Vec<Arc<ChannelRuntime>> {
        self.context
            .config
            .channels
            .iter()
            .filter_map(|channel| {
                self.context
                    .channels
                    .get(&channel.id())
                    .map(|runtime| runtime.value().clone())
            })
            .collect()
    }

    fn runtime_for(&self, config: &ChannelConfig) -> Result<Arc<ChannelRuntime>> {
        if let Some(runtime) = self.context.channels.get(&config.id()) {
            return Ok(runtime.value().clone());
        }

        let runtime = Arc::new(ChannelRuntime::create(config)?);
        self.context.channels.insert(config.id(), runtime.clone());
        Ok(runtime)
    }

    /// Bind and launch every configured channel
    ///
    /// Either every channel starts or none does: a failure drops the listeners
    /// bound so far and leaves already running channels untouched.
    pub async fn start(&self) -> OperationResult {
        let _lifecycle = self.lifecycle.lock().await;
        let was_running = self.state().is_running();

        match self.start_channels() {
            Ok(count) => {
                self.set_state(ServerState::Running);
                tracing::info!("Server started with {} channel(s)", count);
                OperationResult::ok(OperationType::StartServer)
            }
            Err(e) => {
                if !was_running {
                    self.set_state(ServerState::Stopped);
                }
                tracing::error!("Failed to start server: {}", e);
                self.context.report(ErrorKind::Lifecycle, &e);
                OperationResult::failure(
                    OperationType::StartServer,
                    format!("An error occurred during Tcp server starting: {e}"),
                )
            }
        }
    }

    fn start_channels(&self) -> Result<usize> {
        if !self.state().is_running() {
            self.set_state(ServerState::Starting);
        }

        let config = &self.context.config;
        let mut bound = Vec::with_capacity(config.channels.len());
        for channel in &config.channels {
            let runtime = self.runtime_for(channel)?;
            let (listener, addr) = runtime.bind(config.backlog)?;
            bound.push((runtime, listener, addr));
        }

        let cancel = CancellationToken::new();
        self.cancel.store(Arc::new(cancel.clone()));

        let count = bound.len();
        for (runtime, listener, addr) in bound {
            let worker = ChannelWorker::new(
                runtime.clone(),
                self.context.clone(),
                self.reader.clone(),
                cancel.clone(),
            );
            runtime.launch(tokio::spawn(worker.run(listener)), addr);
        }

        Ok(count)
    }

    /// Stop every channel
    ///
    /// Each channel task gets `stop_timeout` to exit. Connected clients stay in
    /// the registry.
    pub async fn stop(&self) -> OperationResult {
        let _lifecycle = self.lifecycle.lock().await;

        if !self.state().is_running() {
            let e = HydraError::ServerNotRunning;
            self.context.report(ErrorKind::Lifecycle, &e);
            return OperationResult::failure(
                OperationType::StopServer,
                "Server is not started, nothing to stop",
            );
        }

        self.set_state(ServerState::Stopping);
        tracing::info!("Stopping server");
        self.cancel.load().cancel();

        let limit = self.context.config.stop_timeout;
        let runtimes = self.runtimes();
        let exited =
            futures_util::future::join_all(runtimes.iter().map(|runtime| runtime.halt(limit)))
                .await;

        self.set_state(ServerState::Stopped);
        let lingering = exited.iter().filter(|exited| !**exited).count();
        if lingering > 0 {
            tracing::warn!("{} channel task(s) still draining after stop", lingering);
        }
        tracing::info!("Server stopped");

        OperationResult::ok(OperationType::StopServer)
    }

    /// Stop, then start again if the stop succeeded
    pub async fn restart(&self) -> OperationResult {
        let stopped = self.stop().await;
        if !stopped.is_success() {
            return stopped.as_operation(OperationType::RestartServer);
        }
        self.start()
            .await
            .as_operation(OperationType::RestartServer)
    }

    /// Check if the server is running and every channel task is alive
    pub fn is_ready(&self) -> bool {
        if !self.state().is_running() {
            return false;
        }
        let runtimes = self.runtimes();
        !runtimes.is_empty() && runtimes.iter().all(|runtime| runtime.is_alive())
    }

    /// Shut down every client socket
    ///
    /// Entries stay in the registry until the next sweep removes them.
    pub fn drop_all_connected_clients(&self) -> usize {
        let closed = self.context.registry.close_all();
        tracing::info!("Dropped {} connected client(s)", closed);
        closed
    }

    /// Install the callback run for every accepted client
    pub fn assign_connection_handler<F>(&self, handler: F)
    where
        F: Fn(&ClientInfo) + Send + Sync + 'static,
    {
        self.context.handlers.set_connection(Arc::new(handler));
    }

    /// Install an async closure as the packet handler
    pub fn assign_packet_handler<F, Fut>(&self, handler: F)
    where
        F: Fn(Vec<u8>, ClientInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<Vec<u8>>> + Send + 'static,
    {
        self.context
            .handlers
            .set_packet(Arc::new(FnPacketHandler(handler)));
    }

    /// Install a [`PacketHandler`] implementation as the packet handler
    pub fn assign_packet_service(&self, handler: Arc<dyn PacketHandler>) {
        self.context.handlers.set_packet(handler);
    }

    /// Install the callback run for background failures
    pub fn assign_error_handler<F>(&self, handler: F)
    where
        F: Fn(ErrorKind, &HydraError) + Send + Sync + 'static,
    {
        self.context.handlers.set_error(Arc::new(handler));
    }

    /// Write a payload to one client
    pub async fn send_data(&self, client: ClientId, data: &[u8]) -> OperationResult {
        let Some(entry) = self.context.registry.get(client) else {
            return OperationResult::failure(
                OperationType::SendDataToClient,
                HydraError::ClientNotFound(client).to_string(),
            );
        };

        match self.context.send(&entry, data).await {
            Ok(()) => OperationResult::ok(OperationType::SendDataToClient),
            Err(e) => {
                tracing::debug!(client = %client, "Send failed: {}", e);
                OperationResult::failure(
                    OperationType::SendDataToClient,
                    format!("An error occured during data send to client: {e}"),
                )
            }
        }
    }

    /// Snapshot of every tracked client in connection order
    pub fn get_clients_stats(&self) -> Vec<ClientInfo> {
        self.context.registry.infos()
    }

    /// Drop every client, cancel every loop and wait for all channel tasks
    pub async fn dispose(self) {
        let _lifecycle = self.lifecycle.lock().await;

        let dropped = self.context.registry.close_all();
        self.set_state(ServerState::Stopping);
        self.cancel.load().cancel();

        let runtimes = self.runtimes();
        futures_util::future::join_all(runtimes.iter().map(|runtime| runtime.join())).await;

        self.context.registry.clear();
        self.set_state(ServerState::Stopped);
        tracing::info!("Server disposed, {} client(s) dropped", dropped);
    }
}

impl std::fmt::Debug for MultiChannelServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiChannelServer")
            .field("state", &self.state())
            .field("channels", &self.context.config.channels.len())
            .field("client_count", &self.client_count())
            .finish()
    }
}

// Implement Drop to ensure cleanup
impl Drop for MultiChannelServer {
    fn drop(&mut self) {
        if self.state().is_running() {
            tracing::warn!("MultiChannelServer dropped while still running");
            self.set_state(ServerState::Stopped);
            self.cancel.load().cancel();
        }
    }
}
