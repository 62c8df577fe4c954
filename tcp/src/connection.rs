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

//! Accepted client socket and its lazily established stream

use crate::stream::{ClientStream, SocketIo, StreamSlot};
use crate::{HydraError, Result};
use socket2::SockRef;
use std::io;
use std::mem::MaybeUninit;
use std::net::{Shutdown, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, instrument, trace};

/// Exclusive access to a client's established stream
pub(crate) type StreamGuard<'a> = tokio::sync::MappedMutexGuard<'a, ClientStream>;

/// Result of a non-blocking readiness probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Readiness {
    /// Bytes are waiting to be read
    Readable,
    /// Open, nothing buffered
    Idle,
    /// Peer closed the connection or the socket failed
    Closed,
}

/// An accepted client socket
///
/// The raw socket handle is shared between the probe/shutdown path and the
/// stream slot, so closing a client never waits on a reader holding the
/// stream lock.
pub(crate) struct ClientConnection {
    socket: Arc<TcpStream>,
    stream: Mutex<StreamSlot>,
    connected: AtomicBool,
    established: AtomicBool,
    pending: AtomicBool,
    peer_addr: SocketAddr,
}

impl ClientConnection {
    /// Wrap an accepted socket
    ///
    /// Plaintext clients get their stream immediately. Secure clients wait for
    /// the first caller of [`ClientConnection::stream`] to run the handshake.
    pub(crate) fn accept(socket: TcpStream, secure: bool) -> io::Result<Self> {
        let peer_addr = socket.peer_addr()?;
        socket.set_nodelay(true)?;
        SockRef::from(&socket).set_keepalive(true)?;

        let socket = Arc::new(socket);
        let slot = if secure {
            StreamSlot::AwaitingHandshake
        } else {
            StreamSlot::Ready(ClientStream::Plain(SocketIo(socket.clone())))
        };

        Ok(Self {
            socket,
            stream: Mutex::new(slot),
            connected: AtomicBool::new(true),
            established: AtomicBool::new(!secure),
            pending: AtomicBool::new(false),
            peer_addr,
        })
    }

    /// Get the peer address
    pub(crate) fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Check whether the connection is still considered open
    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Flag the connection for removal by the next sweep
    pub(crate) fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
    }

    /// Check whether the stream is ready for reads without a handshake
    pub(crate) fn is_established(&self) -> bool {
        self.established.load(Ordering::Acquire)
    }

    /// Consume the flag left by a handshake that finished off the scan path
    ///
    /// The handshake may pull application data into the TLS session, where
    /// a socket peek cannot see it.
    pub(crate) fn take_pending(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    /// Peek at the socket without consuming anything
    ///
    /// A zero-length peek is end of stream. Anything other than `WouldBlock`
    /// is treated as a dead socket.
    pub(crate) fn probe(&self) -> Readiness {
        if !self.is_connected() {
            return Readiness::Closed;
        }

        let mut buf = [MaybeUninit::<u8>::uninit(); 1];
        let readiness = match SockRef::from(self.socket.as_ref()).peek(&mut buf) {
            Ok(0) => Readiness::Closed,
            Ok(_) => Readiness::Readable,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Readiness::Idle,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Readiness::Idle,
            Err(e) => {
                trace!(peer_addr = %self.peer_addr, error = %e, "Probe failed");
                Readiness::Closed
            }
        };

        if readiness == Readiness::Closed {
            self.mark_disconnected();
        }
        readiness
    }

    /// Liveness check used by the sweep
    pub(crate) fn is_alive(&self) -> bool {
        self.probe() != Readiness::Closed
    }

    /// Shut the socket down in both directions and mark it disconnected
    ///
    /// Readers blocked on the socket wake with end of stream. The descriptor
    /// itself is released when the last handle drops.
    pub(crate) fn close(&self) {
        self.mark_disconnected();
        if let Err(e) = SockRef::from(self.socket.as_ref()).shutdown(Shutdown::Both) {
            // Already reset by the peer
            trace!(peer_addr = %self.peer_addr, error = %e, "Shutdown failed");
        }
    }

    /// Lock the client's stream, running the TLS handshake on first use
    ///
    /// A failed or timed out handshake closes the client; every later caller
    /// gets [`HydraError::ConnectionClosed`].
    #[instrument(level = "trace", skip_all, fields(peer_addr = %self.peer_addr))]
    pub(crate) async fn stream(
        &self,
        acceptor: Option<&TlsAcceptor>,
        handshake_timeout: Duration,
    ) -> Result<StreamGuard<'_>> {
        let mut slot = self.stream.lock().await;
        if !self.is_connected() {
            return Err(HydraError::ConnectionClosed);
        }

        if matches!(*slot, StreamSlot::AwaitingHandshake) {
            *slot = StreamSlot::Closed;
            let established = self.handshake(acceptor, handshake_timeout).await;
            match established {
                Ok(stream) => {
                    *slot = StreamSlot::Ready(stream);
                    self.pending.store(true, Ordering::Release);
                    self.established.store(true, Ordering::Release);
                }
                Err(e) => {
                    debug!(peer_addr = %self.peer_addr, error = %e, "TLS handshake failed");
                    self.close();
                    return Err(e);
                }
            }
        }

        MutexGuard::try_map(slot, |slot| match slot {
            StreamSlot::Ready(stream) => Some(stream),
            _ => None,
        })
        .map_err(|_| {
            // Left closed by a handshake whose caller went away
            self.close();
            HydraError::ConnectionClosed
        })
    }

    async fn handshake(
        &self,
        acceptor: Option<&TlsAcceptor>,
        handshake_timeout: Duration,
    ) -> Result<ClientStream> {
        let io = SocketIo(self.socket.clone());
        let Some(acceptor) = acceptor else {
            return Ok(ClientStream::Plain(io));
        };

        match timeout(handshake_timeout, acceptor.accept(io)).await {
            Ok(Ok(tls)) => {
                trace!(peer_addr = %self.peer_addr, "TLS session established");
                Ok(ClientStream::Tls(Box::new(tls)))
            }
            Ok(Err(e)) => Err(HydraError::Io(e)),
            Err(_) => Err(HydraError::HandshakeTimeout),
        }
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("peer_addr", &self.peer_addr)
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustls_pki_types::{PrivatePkcs8KeyDer, ServerName};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio_rustls::TlsConnector;

    async fn accepted(secure: bool) -> (ClientConnection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client_task = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (socket, _) = listener.accept().await.unwrap();
        let client = client_task.await.unwrap();

        (ClientConnection::accept(socket, secure).unwrap(), client)
    }

    fn test_acceptor() -> TlsAcceptor {
        test_pair().0
    }

    /// Acceptor and a connector trusting its self-signed certificate
    fn test_pair() -> (TlsAcceptor, TlsConnector) {
        let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert = generated.cert.der().clone();
        let key = PrivatePkcs8KeyDer::from(generated.key_pair.serialize_der());
        let acceptor = crate::tls::acceptor_from_parts(vec![cert.clone()], key.into()).unwrap();

        let mut roots = rustls::RootCertStore::empty();
        roots.add(cert).unwrap();
        let config = rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_no_client_auth();

        (acceptor, TlsConnector::from(Arc::new(config)))
    }

    async fn wait_for(connection: &ClientConnection, expected: Readiness) {
        for _ in 0..100 {
            if connection.probe() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("connection never became {expected:?}");
    }

    #[tokio::test]
    async fn test_probe_tracks_socket_state() {
        let (connection, mut client) = accepted(false).await;
        assert_eq!(connection.peer_addr(), client.local_addr().unwrap());
        assert_eq!(connection.probe(), Readiness::Idle);

        client.write_all(b"x").await.unwrap();
        wait_for(&connection, Readiness::Readable).await;

        // Peeking never consumes
        let mut stream = connection
            .stream(None, Duration::from_secs(1))
            .await
            .unwrap();
        let mut buf = [0u8; 1];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"x");
        drop(stream);

        drop(client);
        wait_for(&connection, Readiness::Closed).await;
        assert!(!connection.is_connected());
        assert!(!connection.is_alive());
    }

    #[tokio::test]
    async fn test_close_rejects_stream_access() {
        let (connection, mut client) = accepted(false).await;
        connection.close();

        assert!(!connection.is_connected());
        assert!(matches!(
            connection.stream(None, Duration::from_secs(1)).await,
            Err(HydraError::ConnectionClosed)
        ));

        let mut buf = Vec::new();
        assert_eq!(client.read_to_end(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_plaintext_is_established_on_accept() {
        let (connection, _client) = accepted(false).await;
        assert!(connection.is_established());
        assert!(!connection.take_pending());
    }

    #[tokio::test]
    async fn test_handshake_marks_stream_established() {
        let (acceptor, connector) = test_pair();
        let (connection, client) = accepted(true).await;
        assert!(!connection.is_established());

        let client_task = tokio::spawn(async move {
            let name = ServerName::try_from("localhost").unwrap();
            let mut tls = connector.connect(name, client).await.unwrap();
            tls.write_all(b"early").await.unwrap();
            tls.flush().await.unwrap();
            tls
        });

        drop(
            connection
                .stream(Some(&acceptor), Duration::from_secs(5))
                .await
                .unwrap(),
        );
        assert!(connection.is_established());
        assert!(connection.take_pending());
        assert!(!connection.take_pending());

        let _tls = client_task.await.unwrap();
        let mut stream = connection
            .stream(Some(&acceptor), Duration::from_secs(5))
            .await
            .unwrap();
        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"early");
    }

    #[tokio::test]
    async fn test_abandoned_handshake_closes_client() {
        let acceptor = test_acceptor();
        let (connection, _client) = accepted(true).await;

        // The caller gives up while the handshake waits for a client hello
        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            connection.stream(Some(&acceptor), Duration::from_secs(5)),
        )
        .await;
        assert!(abandoned.is_err());
        assert!(connection.is_connected());

        assert!(matches!(
            connection.stream(Some(&acceptor), Duration::from_secs(5)).await,
            Err(HydraError::ConnectionClosed)
        ));
        assert!(!connection.is_connected());
        assert!(!connection.is_established());
    }

    #[tokio::test]
    async fn test_failed_handshake_closes_client() {
        let acceptor = test_acceptor();

        let (connection, mut client) = accepted(true).await;
        client.write_all(b"definitely not a client hello").await.unwrap();

        let result = connection
            .stream(Some(&acceptor), Duration::from_secs(5))
            .await;
        assert!(result.is_err());
        assert!(!connection.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_client_times_out_handshake() {
        let acceptor = test_acceptor();

        let (connection, _client) = accepted(true).await;
        let result = connection
            .stream(Some(&acceptor), Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(HydraError::HandshakeTimeout)));
    }
}
