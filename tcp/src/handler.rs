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

//! Handler traits and the server's handler registry
//!
//! The server calls three user-supplied callbacks: one when a client is
//! accepted, one for every received payload, and one for background errors.
//! The set lives behind an [`ArcSwap`] and is replaced as a whole. A loop
//! iteration that already loaded the previous set keeps using it.

use crate::{ClientInfo, ErrorKind, HydraError};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

/// Callback invoked once per accepted client
pub type ConnectionHandler = Arc<dyn Fn(&ClientInfo) + Send + Sync + 'static>;

/// Callback invoked for background failures
pub type ErrorHandler = Arc<dyn Fn(ErrorKind, &HydraError) + Send + Sync + 'static>;

/// Payload handler trait
///
/// Receives one payload assembled by the payload reader and returns an
/// optional response that is written back on the same stream.
///
/// # Example
///
/// ```no_run
/// use hydra_tcp::{ClientInfo, PacketHandler};
/// use async_trait::async_trait;
///
/// struct Reverse;
///
/// #[async_trait]
/// impl PacketHandler for Reverse {
///     async fn on_packet(&self, payload: Vec<u8>, _client: ClientInfo) -> Option<Vec<u8>> {
///         Some(payload.into_iter().rev().collect())
///     }
/// }
/// ```
#[async_trait]
pub trait PacketHandler: Send + Sync + 'static {
    /// Handle one payload; `None` or an empty vector sends nothing back
    async fn on_packet(&self, payload: Vec<u8>, client: ClientInfo) -> Option<Vec<u8>>;
}

/// Adapter turning an async closure into a [`PacketHandler`]
pub(crate) struct FnPacketHandler<F>(pub(crate) F);

#[async_trait]
impl<F, Fut> PacketHandler for FnPacketHandler<F>
where
    F: Fn(Vec<u8>, ClientInfo) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<Vec<u8>>> + Send + 'static,
{
    async fn on_packet(&self, payload: Vec<u8>, client: ClientInfo) -> Option<Vec<u8>> {
        (self.0)(payload, client).await
    }
}

/// The full set of server callbacks
///
/// # Example
///
/// ```no_run
/// use hydra_tcp::{ClientInfo, ErrorKind, Handlers, HydraError};
/// use std::sync::Arc;
///
/// let handlers = Handlers {
///     on_connect: Some(Arc::new(|client: &ClientInfo| {
///         println!("{} connected from {}", client.id, client.peer_addr);
///     })),
///     on_error: Some(Arc::new(|kind: ErrorKind, error: &HydraError| {
///         eprintln!("{kind} error: {error}");
///     })),
///     ..Default::default()
/// };
/// ```
#[derive(Clone, Default)]
pub struct Handlers {
    /// Called after a client is inserted into the registry
    pub on_connect: Option<ConnectionHandler>,
    /// Called for every non-empty payload
    pub on_packet: Option<Arc<dyn PacketHandler>>,
    /// Called for background failures
    pub on_error: Option<ErrorHandler>,
}

impl std::fmt::Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handlers")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_packet", &self.on_packet.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Atomically replaceable handler set shared by every channel loop
pub(crate) struct HandlerRegistry {
    current: ArcSwap<Handlers>,
}

impl HandlerRegistry {
    pub(crate) fn new(handlers: Handlers) -> Self {
        Self {
            current: ArcSwap::from_pointee(handlers),
        }
    }

    /// Current handler set
    pub(crate) fn load(&self) -> Arc<Handlers> {
        self.current.load_full()
    }

    /// Replace the whole set
    pub(crate) fn replace(&self, handlers: Handlers) {
        self.current.store(Arc::new(handlers));
    }

    pub(crate) fn set_connection(&self, handler: ConnectionHandler) {
        self.current.rcu(|h| Handlers {
            on_connect: Some(handler.clone()),
            ..Handlers::clone(h)
        });
    }

    pub(crate) fn set_packet(&self, handler: Arc<dyn PacketHandler>) {
        self.current.rcu(|h| Handlers {
            on_packet: Some(handler.clone()),
            ..Handlers::clone(h)
        });
    }

    pub(crate) fn set_error(&self, handler: ErrorHandler) {
        self.current.rcu(|h| Handlers {
            on_error: Some(handler.clone()),
            ..Handlers::clone(h)
        });
    }

    /// Fire the connection handler, if one is assigned
    pub(crate) fn connected(&self, client: &ClientInfo) {
        if let Some(ref f) = self.current.load().on_connect {
            f(client);
        }
    }

    /// Fire the error handler, if one is assigned
    pub(crate) fn report(&self, kind: ErrorKind, error: &HydraError) {
        if let Some(ref f) = self.current.load().on_error {
            f(kind, error);
        }
    }
}
