// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use crate::error::AttemptError;

/// Client configuration trusting the platform's root certificates.
pub fn native_client_config() -> Result<Arc<ClientConfig>, rustls::Error> {
    let mut roots = RootCertStore::empty();
    let native_certs = rustls_native_certs::load_native_certs();
    for err in &native_certs.errors {
        debug!("LOGS | Failed to load native certificate: {}", err);
    }

    let mut valid_count = 0;
    for cert in native_certs.certs {
        match roots.add(cert) {
            Ok(()) => valid_count += 1,
            Err(err) => debug!("LOGS | Failed to parse certificate: {:?}", err),
        }
    }
    if valid_count == 0 {
        warn!("LOGS | No valid certificates found in native root store, TLS handshakes will fail");
    }

    client_config(roots)
}

pub fn client_config(roots: RootCertStore) -> Result<Arc<ClientConfig>, rustls::Error> {
    let config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()?
    .with_root_certificates(roots)
    .with_no_client_auth();
    Ok(Arc::new(config))
}

/// Runs the client handshake for `host` over an established TCP stream.
pub async fn handshake(
    connector: &TlsConnector,
    host: &str,
    stream: TcpStream,
) -> Result<TlsStream<TcpStream>, AttemptError> {
    let server_name =
        ServerName::try_from(host.to_string()).map_err(|e| AttemptError::Tls(e.to_string()))?;
    connector
        .connect(server_name, stream)
        .await
        .map_err(|e| AttemptError::Tls(e.to_string()))
}
