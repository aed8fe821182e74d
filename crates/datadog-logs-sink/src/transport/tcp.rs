// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! TCP transport: newline-delimited records on one persistent stream.
//!
//! The stream is opened lazily, wrapped in TLS when enabled, and reused across
//! attempts while it stays healthy. Any connect, handshake or write error drops
//! the connection and is reported as retryable, so the next attempt starts from
//! a fresh connection.
//!
//! Concurrent chunks of one flush never interleave their bytes on the wire: the
//! connection sits behind an async mutex held for the whole attempt.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::api_key::ApiKey;
use crate::config::DatadogConfiguration;
use crate::error::{AttemptError, ConfigError};
use crate::transport::connection::{self, ConnectionFingerprint, ConnectionState};
use crate::transport::{tls, AttemptOutcome, LogTransport, PayloadFormat};

enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Stream {
    async fn write_payload(&mut self, payload: &[u8]) -> io::Result<()> {
        match self {
            Stream::Plain(stream) => {
                stream.write_all(payload).await?;
                stream.flush().await
            }
            Stream::Tls(stream) => {
                stream.write_all(payload).await?;
                stream.flush().await
            }
        }
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        match self {
            Stream::Plain(stream) => stream.shutdown().await,
            Stream::Tls(stream) => stream.shutdown().await,
        }
    }
}

struct Connection {
    stream: Stream,
    fingerprint: Option<ConnectionFingerprint>,
}

pub struct TcpTransport {
    host: String,
    port: u16,
    api_key: ApiKey,
    tls: Option<TlsConnector>,
    timeout: Duration,
    detect_disconnection: bool,
    connection: Mutex<Option<Connection>>,
}

impl TcpTransport {
    pub fn new(
        api_key: ApiKey,
        config: &DatadogConfiguration,
        detect_disconnection: bool,
    ) -> Result<Self, ConfigError> {
        let tls = if config.use_ssl {
            let client_config = tls::native_client_config()
                .map_err(|e| ConfigError::Invalid(format!("Failed to create TLS config: {e}")))?;
            Some(TlsConnector::from(client_config))
        } else {
            None
        };

        Ok(Self {
            host: config.url.clone(),
            port: config.port,
            api_key,
            tls,
            timeout: config.request_timeout,
            detect_disconnection,
            connection: Mutex::new(None),
        })
    }

    async fn connect(&self) -> Result<Connection, AttemptError> {
        let address = format!("{}:{}", self.host, self.port);
        debug!("LOGS | Opening TCP connection to {}", address);

        let stream = timeout(self.timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| AttemptError::Timeout)?
            .map_err(|e| AttemptError::Connect(e.to_string()))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("LOGS | Failed to set TCP_NODELAY: {}", e);
        }
        let fingerprint = ConnectionFingerprint::from_stream(&stream).ok();

        let stream = match &self.tls {
            Some(connector) => {
                let tls_stream = timeout(self.timeout, tls::handshake(connector, &self.host, stream))
                    .await
                    .map_err(|_| AttemptError::Timeout)??;
                Stream::Tls(Box::new(tls_stream))
            }
            None => Stream::Plain(stream),
        };

        Ok(Connection {
            stream,
            fingerprint,
        })
    }

    async fn is_stale(&self, connection: &Connection) -> bool {
        if !self.detect_disconnection {
            return false;
        }
        let Some(fingerprint) = &connection.fingerprint else {
            return false;
        };
        let state = connection::check(fingerprint).await;
        if state == ConnectionState::Closed {
            debug!("LOGS | TCP connection is no longer established, reconnecting");
            return true;
        }
        false
    }
}

#[async_trait]
impl LogTransport for TcpTransport {
    fn payload_format(&self) -> PayloadFormat {
        PayloadFormat::ApiKeyLines {
            api_key: self.api_key.clone(),
        }
    }

    async fn attempt(&self, payload: &Bytes) -> AttemptOutcome {
        let mut guard = self.connection.lock().await;

        let stale = match guard.as_ref() {
            Some(conn) => self.is_stale(conn).await,
            None => false,
        };
        if stale {
            *guard = None;
        }

        if guard.is_none() {
            match self.connect().await {
                Ok(connection) => *guard = Some(connection),
                Err(error) => return AttemptOutcome::Retryable(error),
            }
        }
        let Some(connection) = guard.as_mut() else {
            return AttemptOutcome::Retryable(AttemptError::ConnectionLost);
        };

        match timeout(self.timeout, connection.stream.write_payload(payload)).await {
            Ok(Ok(())) => AttemptOutcome::Success,
            Ok(Err(e)) => {
                *guard = None;
                AttemptOutcome::Retryable(AttemptError::Write(e.to_string()))
            }
            Err(_) => {
                *guard = None;
                AttemptOutcome::Retryable(AttemptError::Timeout)
            }
        }
    }

    async fn close(&self) {
        let Some(mut connection) = self.connection.lock().await.take() else {
            return;
        };
        match timeout(self.timeout, connection.stream.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("LOGS | Failed to close TCP connection: {}", e),
            Err(_) => debug!("LOGS | Timed out closing TCP connection"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn transport(port: u16, use_ssl: bool) -> TcpTransport {
        let config = DatadogConfiguration::tcp("127.0.0.1", port, use_ssl);
        TcpTransport::new(ApiKey::new("test-api-key").unwrap(), &config, false).unwrap()
    }

    fn detecting_transport(port: u16) -> TcpTransport {
        let config = DatadogConfiguration::tcp("127.0.0.1", port, false);
        TcpTransport::new(ApiKey::new("test-api-key").unwrap(), &config, true).unwrap()
    }

    #[tokio::test]
    async fn test_connection_is_reused_across_attempts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            socket.read_to_end(&mut received).await.unwrap();
            received
        });

        let transport = transport(port, false);
        let first = transport
            .attempt(&Bytes::from_static(b"test-api-key {\"a\":1}\n"))
            .await;
        let second = transport
            .attempt(&Bytes::from_static(b"test-api-key {\"b\":2}\n"))
            .await;
        transport.close().await;

        assert_eq!(first, AttemptOutcome::Success);
        assert_eq!(second, AttemptOutcome::Success);
        let received = server.await.unwrap();
        assert_eq!(
            received,
            b"test-api-key {\"a\":1}\ntest-api-key {\"b\":2}\n".to_vec()
        );
    }

    #[tokio::test]
    async fn test_connect_failure_is_retryable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let outcome = transport(port, false)
            .attempt(&Bytes::from_static(b"line\n"))
            .await;

        assert!(matches!(
            outcome,
            AttemptOutcome::Retryable(AttemptError::Connect(_))
        ));
    }

    #[tokio::test]
    async fn test_tls_handshake_failure_is_retryable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let transport = transport(port, true);
        let outcome = transport.attempt(&Bytes::from_static(b"line\n")).await;

        assert!(matches!(
            outcome,
            AttemptOutcome::Retryable(AttemptError::Tls(_))
        ));
        assert!(transport.connection.lock().await.is_none());
    }

    #[tokio::test]
    async fn test_payload_format_carries_api_key() {
        let transport = transport(10514, false);
        assert_eq!(
            transport.payload_format(),
            PayloadFormat::ApiKeyLines {
                api_key: ApiKey::new("test-api-key").unwrap()
            }
        );
    }

    #[tokio::test]
    async fn test_close_without_connection_is_noop() {
        let transport = transport(10514, false);
        transport.close().await;
        assert!(transport.connection.lock().await.is_none());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_dropped_connection_is_detected_and_replaced() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (first_read_tx, first_read_rx) = tokio::sync::oneshot::channel();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut line = [0u8; 4];
            socket.read_exact(&mut line).await.unwrap();
            drop(socket);
            first_read_tx.send(line).unwrap();

            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            socket.read_to_end(&mut received).await.unwrap();
            received
        });

        let transport = detecting_transport(port);
        let first = transport.attempt(&Bytes::from_static(b"k a\n")).await;
        assert_eq!(first, AttemptOutcome::Success);
        assert_eq!(&first_read_rx.await.unwrap(), b"k a\n");
        tokio::time::sleep(Duration::from_millis(100)).await;

        let second = transport.attempt(&Bytes::from_static(b"k b\n")).await;
        transport.close().await;

        assert_eq!(second, AttemptOutcome::Success);
        assert_eq!(server.await.unwrap(), b"k b\n".to_vec());
    }

    #[tokio::test]
    async fn test_write_failure_drops_connection_and_next_attempt_reconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (closed_tx, closed_rx) = tokio::sync::oneshot::channel();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut line = [0u8; 4];
            socket.read_exact(&mut line).await.unwrap();
            drop(socket);
            closed_tx.send(()).unwrap();

            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            socket.read_to_end(&mut received).await.unwrap();
            received
        });

        let transport = transport(port, false);
        assert_eq!(
            transport.attempt(&Bytes::from_static(b"k a\n")).await,
            AttemptOutcome::Success
        );
        closed_rx.await.unwrap();

        // The first write after the peer closed may still be buffered locally.
        let mut failure = None;
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            match transport.attempt(&Bytes::from_static(b"k x\n")).await {
                AttemptOutcome::Success => continue,
                outcome => {
                    failure = Some(outcome);
                    break;
                }
            }
        }
        assert!(matches!(
            failure,
            Some(AttemptOutcome::Retryable(AttemptError::Write(_)))
        ));
        assert!(transport.connection.lock().await.is_none());

        let retried = transport.attempt(&Bytes::from_static(b"k b\n")).await;
        transport.close().await;

        assert_eq!(retried, AttemptOutcome::Success);
        assert_eq!(server.await.unwrap(), b"k b\n".to_vec());
    }

    #[tokio::test]
    async fn test_close_releases_open_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            socket.read_to_end(&mut received).await.unwrap();
            received
        });

        let transport = transport(port, false);
        transport.attempt(&Bytes::from_static(b"k a\n")).await;
        tokio::time::timeout(Duration::from_secs(5), transport.close())
            .await
            .unwrap();

        assert!(transport.connection.lock().await.is_none());
        assert_eq!(server.await.unwrap(), b"k a\n".to_vec());
    }
}
