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

//! Channel worker implementation
//!
//! Each running channel is one task driving three loops concurrently:
//! - Accept: admits new clients into the shared registry
//! - Sweep: removes clients whose socket has gone away
//! - Receive: scans the channel's clients, reads ready payloads and writes
//!   handler responses back
//!
//! TLS handshakes run in their own task per client, so a stalled handshake
//! never holds up the receive scan. Every write is bounded by the write
//! timeout.
//!
//! All three stop when the server's cancellation token fires. The accept loop
//! owns the listener, so the port is released as soon as it exits.

use crate::channel::ChannelRuntime;
use crate::connection::Readiness;
use crate::handler::HandlerRegistry;
use crate::registry::{ClientEntry, ClientRegistry};
use crate::{
    ChannelId, ErrorKind, HydraError, PayloadReader, Result, ServerConfig, ServerMetrics,
};
use dashmap::DashMap;
use futures_util::FutureExt;
use metrics::counter;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::select;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

/// Pause after a failed accept so a persistent failure cannot spin
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Clients served between cooperative yields in one receive scan
const SCAN_YIELD_EVERY: usize = 128;

/// State shared by the server and every channel task
pub(crate) struct ServerContext {
    pub(crate) config: ServerConfig,
    pub(crate) registry: ClientRegistry,
    pub(crate) handlers: HandlerRegistry,
    pub(crate) metrics: Arc<ServerMetrics>,
    pub(crate) channels: DashMap<ChannelId, Arc<ChannelRuntime>>,
}

impl ServerContext {
    pub(crate) fn new(
        config: ServerConfig,
        handlers: HandlerRegistry,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        Self {
            registry: ClientRegistry::new(metrics.clone()),
            config,
            handlers,
            metrics,
            channels: DashMap::new(),
        }
    }

    /// Count an error and hand it to the error handler
    pub(crate) fn report(&self, kind: ErrorKind, error: &HydraError) {
        self.metrics.error(kind);
        self.handlers.report(kind, error);
    }

    /// Write one buffer to a client and flush it
    ///
    /// Writers are serialized with readers by the client's stream lock. A
    /// failed write, or one that does not finish within `write_timeout`,
    /// marks the client disconnected.
    pub(crate) async fn send(&self, entry: &ClientEntry, data: &[u8]) -> Result<()> {
        let channel = self
            .channels
            .get(&entry.channel_id())
            .map(|c| c.value().clone())
            .ok_or(HydraError::ChannelNotFound(entry.channel_id()))?;

        let mut stream = entry
            .connection()
            .stream(channel.acceptor(), self.config.handshake_timeout)
            .await?;
        let written = timeout(self.config.write_timeout, async {
            match stream.write_all(data).await {
                Ok(()) => stream.flush().await,
                Err(e) => Err(e),
            }
        })
        .await;
        drop(stream);

        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                entry.connection().mark_disconnected();
                return Err(e.into());
            }
            Err(_) => {
                tracing::debug!(client = %entry.id(), "Write timed out, dropping client");
                entry.connection().mark_disconnected();
                return Err(HydraError::WriteTimeout);
            }
        }

        self.metrics.packet_sent(data.len());
        Ok(())
    }
}

/// The three loops of one channel
pub(crate) struct ChannelWorker {
    channel: Arc<ChannelRuntime>,
    context: Arc<ServerContext>,
    reader: Arc<dyn PayloadReader>,
    cancel: CancellationToken,
}

impl ChannelWorker {
    pub(crate) fn new(
        channel: Arc<ChannelRuntime>,
        context: Arc<ServerContext>,
        reader: Arc<dyn PayloadReader>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            channel,
            context,
            reader,
            cancel,
        }
    }

    /// Run every loop until cancellation
    pub(crate) async fn run(self, listener: TcpListener) {
        let id = self.channel.id();
        tracing::debug!(channel = %id, "Process server channel started");

        tokio::join!(
            self.accept_loop(listener),
            self.sweep_loop(),
            self.receive_loop()
        );

        tracing::debug!(channel = %id, "Process server channel terminated");
    }

    async fn accept_loop(&self, listener: TcpListener) {
        let id = self.channel.id();
        let secure = self.channel.is_tls();

        loop {
            let accepted = select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = listener.accept() => result,
            };

            match accepted {
                Ok((socket, peer_addr)) => {
                    match self.context.registry.register(id, socket, secure) {
                        Ok(entry) => {
                            tracing::debug!(
                                channel = %id,
                                "Client {} connected from {}",
                                entry.id(),
                                peer_addr
                            );
                            if secure {
                                self.establish(entry.clone());
                            }
                            let info = entry.info();
                            let notified = std::panic::catch_unwind(AssertUnwindSafe(|| {
                                self.context.handlers.connected(&info)
                            }));
                            if notified.is_err() {
                                tracing::error!(client = %entry.id(), "Connection handler panicked");
                            }
                        }
                        Err(e) => {
                            tracing::error!(channel = %id, "Failed to register client {}: {}", peer_addr, e);
                            self.context.report(ErrorKind::Connect, &e.into());
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(channel = %id, "Failed to accept connection: {}", e);
                    self.context.report(ErrorKind::Connect, &e.into());

                    select! {
                        _ = self.cancel.cancelled() => break,
                        _ = sleep(ACCEPT_BACKOFF) => {}
                    }
                }
            }
        }

        tracing::debug!(channel = %id, "Accept loop terminated");
    }

    /// Run a secure client's handshake in its own task
    ///
    /// The receive loop skips the client until the session is ready. A
    /// failed handshake closes the client and is reported as a receive error.
    fn establish(&self, entry: Arc<ClientEntry>) {
        let channel = self.channel.clone();
        let context = self.context.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let established = entry
                .connection()
                .stream(channel.acceptor(), context.config.handshake_timeout)
                .await
                .map(drop);

            if let Err(e) = established {
                tracing::debug!(client = %entry.id(), "Handshake failed: {}", e);
                if !cancel.is_cancelled() {
                    context.report(ErrorKind::Receive, &e);
                }
            }
        });
    }

    async fn sweep_loop(&self) {
        let id = self.channel.id();
        let interval = self.context.config.sweep_interval;

        loop {
            let removed = self.context.registry.sweep(id);
            if removed > 0 {
                tracing::debug!(channel = %id, removed, "Swept disconnected clients");
            }

            select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep(interval) => {}
            }
        }

        tracing::debug!(channel = %id, "Sweep loop terminated");
    }

    async fn receive_loop(&self) {
        let id = self.channel.id();
        let poll_interval = self.context.config.poll_interval;

        'scan: while !self.cancel.is_cancelled() {
            let clients = self.context.registry.channel_snapshot(id);
            let mut served = 0;

            for (index, entry) in clients.iter().enumerate() {
                if index % SCAN_YIELD_EVERY == SCAN_YIELD_EVERY - 1 {
                    tokio::task::yield_now().await;
                }

                let connection = entry.connection();
                if !connection.is_established() || !connection.is_connected() {
                    continue;
                }
                let readiness = if connection.take_pending() {
                    Readiness::Readable
                } else {
                    connection.probe()
                };
                if readiness != Readiness::Readable {
                    continue;
                }
                served += 1;

                let outcome = select! {
                    biased;
                    _ = self.cancel.cancelled() => break 'scan,
                    outcome = self.serve(entry) => outcome,
                };
                if let Err((kind, e)) = outcome {
                    tracing::debug!(client = %entry.id(), "{} failed: {}", kind, e);
                    self.context.report(kind, &e);
                }
            }

            if served == 0 {
                select! {
                    _ = self.cancel.cancelled() => break,
                    _ = sleep(poll_interval) => {}
                }
            }
        }

        tracing::debug!(channel = %id, "Receive loop terminated");
    }

    /// Read one payload from a ready client and answer it
    async fn serve(&self, entry: &ClientEntry) -> std::result::Result<(), (ErrorKind, HydraError)> {
        let payload = {
            let mut stream = entry
                .connection()
                .stream(self.channel.acceptor(), self.context.config.handshake_timeout)
                .await
                .map_err(|e| (ErrorKind::Receive, e))?;

            match self.reader.read_payload(&mut *stream).await {
                Ok(Some(payload)) => payload,
                Ok(None) => {
                    tracing::trace!(client = %entry.id(), "Client closed the stream");
                    entry.connection().mark_disconnected();
                    return Ok(());
                }
                Err(e) => {
                    entry.connection().mark_disconnected();
                    return Err((ErrorKind::Receive, e.into()));
                }
            }
        };

        if payload.is_empty() {
            return Ok(());
        }

        entry.touch();
        self.context.metrics.packet_received(payload.len());
        counter!("hydra.packets.received").increment(1);

        let Some(handler) = self.context.handlers.load().on_packet.clone() else {
            return Ok(());
        };

        let response = AssertUnwindSafe(handler.on_packet(payload, entry.info()))
            .catch_unwind()
            .await
            .map_err(|_| {
                (
                    ErrorKind::Receive,
                    HydraError::Other(format!("Packet handler panicked for client {}", entry.id())),
                )
            })?;

        match response {
            Some(response) if !response.is_empty() => self
                .context
                .send(entry, &response)
                .await
                .map_err(|e| (ErrorKind::Send, e)),
            _ => Ok(()),
        }
    }
}
