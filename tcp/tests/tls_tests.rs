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

//! Secure channel tests against a self-signed certificate

use hydra_tcp::{ChannelConfig, ClientId, ErrorKind, MultiChannelServer, ServerConfig};
use rustls::RootCertStore;
use rustls_pki_types::{CertificateDer, ServerName};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

fn localhost() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

/// Self-signed certificate written as a PEM bundle
struct TestCertificate {
    path: PathBuf,
    der: CertificateDer<'static>,
}

impl TestCertificate {
    fn generate(name: &str) -> Self {
        let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let path = std::env::temp_dir().join(format!(
            "hydra-tls-test-{}-{}.pem",
            std::process::id(),
            name
        ));
        let bundle = format!(
            "{}{}",
            generated.cert.pem(),
            generated.key_pair.serialize_pem()
        );
        std::fs::write(&path, bundle).unwrap();

        Self {
            path,
            der: generated.cert.der().clone(),
        }
    }

    fn connector(&self) -> TlsConnector {
        let mut roots = RootCertStore::empty();
        roots.add(self.der.clone()).unwrap();

        let config = rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_no_client_auth();

        TlsConnector::from(Arc::new(config))
    }
}

impl Drop for TestCertificate {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

async fn secure_server(certificate: &TestCertificate) -> (MultiChannelServer, SocketAddr) {
    let config = ServerConfig::new(vec![ChannelConfig::secure(
        localhost(),
        0,
        &certificate.path,
    )]);
    let server = MultiChannelServer::new(config).unwrap();
    let result = server.start().await;
    assert!(result.is_success(), "{}", result);
    let addr = server.local_addrs()[0].1;
    (server, addr)
}

async fn tls_connect(certificate: &TestCertificate, addr: SocketAddr) -> TlsStream<TcpStream> {
    let socket = TcpStream::connect(addr).await.unwrap();
    let name = ServerName::try_from("localhost").unwrap();
    tokio::time::timeout(
        Duration::from_secs(5),
        certificate.connector().connect(name, socket),
    )
    .await
    .unwrap()
    .unwrap()
}

async fn wait_until(limit: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[tokio::test]
async fn test_reverse_over_tls() {
    let certificate = TestCertificate::generate("reverse");
    let (server, addr) = secure_server(&certificate).await;
    server.assign_packet_handler(|payload, _client| async move {
        Some(payload.into_iter().rev().collect())
    });

    let mut client = tls_connect(&certificate, addr).await;
    client.write_all(b"1984").await.unwrap();
    client.flush().await.unwrap();

    let mut buf = [0u8; 4];
    tokio::time::timeout(Duration::from_secs(2), client.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"4891");

    server.dispose().await;
}

#[tokio::test]
async fn test_send_data_uses_established_session() {
    let certificate = TestCertificate::generate("send");
    let (server, addr) = secure_server(&certificate).await;
    let ids = Arc::new(Mutex::new(Vec::<ClientId>::new()));
    let sink = ids.clone();
    server.assign_connection_handler(move |client| sink.lock().unwrap().push(client.id));

    let mut client = tls_connect(&certificate, addr).await;
    assert!(wait_until(Duration::from_secs(2), || ids.lock().unwrap().len() == 1).await);
    let id = ids.lock().unwrap()[0];

    // The receive loop may already have finished the handshake; either way
    // the session is shared
    let result = server.send_data(id, b"welcome").await;
    assert!(result.is_success(), "{}", result);

    let mut buf = [0u8; 7];
    tokio::time::timeout(Duration::from_secs(2), client.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"welcome");

    server.dispose().await;
}

#[tokio::test]
async fn test_plaintext_client_on_secure_channel_is_dropped() {
    let certificate = TestCertificate::generate("plaintext");
    let (server, addr) = secure_server(&certificate).await;
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    server.assign_error_handler(move |kind, _| sink.lock().unwrap().push(kind));

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();

    assert!(wait_until(Duration::from_secs(5), || !errors.lock().unwrap().is_empty()).await);
    assert_eq!(errors.lock().unwrap()[0], ErrorKind::Receive);
    assert!(wait_until(Duration::from_secs(2), || server.client_count() == 0).await);
    assert!(server.is_ready());

    server.dispose().await;
}

#[tokio::test]
async fn test_missing_certificate_serves_plaintext() {
    let path = std::env::temp_dir().join("hydra-tls-test-does-not-exist.pem");
    let config = ServerConfig::new(vec![ChannelConfig::secure(localhost(), 0, path)]);
    let server = MultiChannelServer::new(config).unwrap();
    server.assign_packet_handler(|payload, _client| async move { Some(payload) });
    assert!(server.start().await.is_success());
    let addr = server.local_addrs()[0].1;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"plain").await.unwrap();
    let mut buf = [0u8; 5];
    tokio::time::timeout(Duration::from_secs(2), client.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"plain");

    server.dispose().await;
}

#[tokio::test]
async fn test_stalled_handshakes_do_not_delay_other_clients() {
    let certificate = TestCertificate::generate("stalled");
    let (server, addr) = secure_server(&certificate).await;
    server.assign_packet_handler(|payload, _client| async move {
        Some(payload.into_iter().rev().collect())
    });

    // Each opens a TLS record header and then goes quiet
    let mut stalled = Vec::new();
    for _ in 0..3 {
        let mut socket = TcpStream::connect(addr).await.unwrap();
        socket.write_all(&[0x16]).await.unwrap();
        stalled.push(socket);
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    let exchange = async {
        let mut client = tls_connect(&certificate, addr).await;
        client.write_all(&[0x31, 0x39, 0x38, 0x34]).await.unwrap();
        client.flush().await.unwrap();

        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        buf
    };
    let response = tokio::time::timeout(Duration::from_secs(2), exchange)
        .await
        .expect("stalled handshakes held up the channel");
    assert_eq!(response, [0x34, 0x38, 0x39, 0x31]);
    assert_eq!(server.client_count(), 4);

    drop(stalled);
    server.dispose().await;
}
