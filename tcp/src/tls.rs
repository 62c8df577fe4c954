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

//! Server TLS credential loading
//!
//! A secure channel points at a single PEM bundle containing the certificate
//! chain followed by its private key:
//!
//! ```text
//! openssl req -x509 -newkey rsa:2048 -nodes -days 3650 \
//!     -keyout server.key -out server.crt -subj "/CN=localhost"
//! cat server.crt server.key > server.pem
//! ```

use crate::{HydraError, Result};
use rustls::ServerConfig;
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

/// Build a TLS acceptor from a PEM bundle on disk
///
/// No client certificate is requested.
pub(crate) fn load_acceptor(path: &Path) -> Result<TlsAcceptor> {
    let certificate_error =
        |e: rustls_pki_types::pem::Error| HydraError::Certificate(format!("{}: {}", path.display(), e));

    let certs = CertificateDer::pem_file_iter(path)
        .map_err(certificate_error)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(certificate_error)?;
    if certs.is_empty() {
        return Err(HydraError::Certificate(format!(
            "{}: no certificate found",
            path.display()
        )));
    }

    let key = PrivateKeyDer::from_pem_file(path).map_err(certificate_error)?;

    acceptor_from_parts(certs, key)
}

/// Build a TLS acceptor from an already parsed chain and key
pub(crate) fn acceptor_from_parts(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<TlsAcceptor> {
    let config =
        ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(certs, key)?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("hydra-tls-{}-{}", std::process::id(), name))
    }

    #[test]
    fn test_load_generated_bundle() {
        let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let path = temp_path("bundle.pem");
        let bundle = format!(
            "{}{}",
            generated.cert.pem(),
            generated.key_pair.serialize_pem()
        );
        std::fs::write(&path, bundle).unwrap();

        let result = load_acceptor(&path);
        let _ = std::fs::remove_file(&path);
        assert!(result.is_ok());
    }

    #[test]
    fn test_bundle_without_key_is_rejected() {
        let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let path = temp_path("cert-only.pem");
        std::fs::write(&path, generated.cert.pem()).unwrap();

        let result = load_acceptor(&path);
        let _ = std::fs::remove_file(&path);
        assert!(matches!(result, Err(HydraError::Certificate(_))));
    }

    #[test]
    fn test_garbage_is_rejected() {
        let path = temp_path("garbage.pem");
        std::fs::write(&path, "not a certificate").unwrap();

        let result = load_acceptor(&path);
        let _ = std::fs::remove_file(&path);
        assert!(matches!(result, Err(HydraError::Certificate(_))));
    }
}
