// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP(S) transport: one `POST` per chunk.
//!
//! # Endpoint
//!
//! - [`IntakeApi::V2`]: `POST {url}/api/v2/logs`, API key in `DD-API-KEY`
//! - [`IntakeApi::LegacyV1`]: `POST {url}/v1/input/{api_key}`
//!
//! Every request carries `Content-Type: application/json` and the
//! `DD-EVP-ORIGIN` / `DD-EVP-ORIGIN-VERSION` pair. With compression enabled
//! the body is zstd encoded and `Content-Encoding: zstd` is added; chunk size
//! limits always apply to the uncompressed payload.
//!
//! # Classification
//!
//! | Response | Outcome |
//! | --- | --- |
//! | 2xx | success |
//! | 429, 5xx | retryable |
//! | other 4xx | fatal |
//! | anything else, network errors, timeouts | retryable |

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE};
use tracing::{debug, error};

use crate::api_key::ApiKey;
use crate::config::{DatadogConfiguration, IntakeApi};
use crate::error::{AttemptError, ConfigError};
use crate::transport::{AttemptOutcome, LogTransport, PayloadFormat};
use crate::{ORIGIN, ORIGIN_VERSION};

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
    compression_level: Option<i32>,
}

impl HttpTransport {
    pub fn new(api_key: ApiKey, config: &DatadogConfiguration) -> Result<Self, ConfigError> {
        let base = config.url.trim_end_matches('/');
        let url = match config.intake_api {
            IntakeApi::V2 => format!("{base}/api/v2/logs"),
            IntakeApi::LegacyV1 => format!("{base}/v1/input/{}", api_key.as_str()),
        };

        Ok(Self {
            client: get_client(config),
            url,
            headers: build_headers(&api_key, config)?,
            compression_level: config.use_compression.then_some(config.compression_level),
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    fn encode(&self, payload: &Bytes) -> (Bytes, bool) {
        let Some(level) = self.compression_level else {
            return (payload.clone(), false);
        };
        match zstd::stream::encode_all(payload.as_ref(), level) {
            Ok(compressed) => (Bytes::from(compressed), true),
            Err(e) => {
                debug!("LOGS | Failed to compress data, sending it uncompressed: {}", e);
                (payload.clone(), false)
            }
        }
    }
}

#[async_trait]
impl LogTransport for HttpTransport {
    fn payload_format(&self) -> PayloadFormat {
        PayloadFormat::json_array()
    }

    async fn attempt(&self, payload: &Bytes) -> AttemptOutcome {
        let (body, compressed) = self.encode(payload);
        let mut request = self.client.post(&self.url).headers(self.headers.clone());
        if compressed {
            request = request.header(CONTENT_ENCODING, HeaderValue::from_static("zstd"));
        }

        match request.body(body).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                if status == 403 {
                    error!(
                        "LOGS | Request was denied by Datadog: Access denied. Please verify that your API key is valid."
                    );
                }
                classify_status(status)
            }
            Err(e) if e.is_timeout() => AttemptOutcome::Retryable(AttemptError::Timeout),
            Err(e) if e.is_connect() => {
                AttemptOutcome::Retryable(AttemptError::Connect(e.to_string()))
            }
            Err(e) => AttemptOutcome::Retryable(AttemptError::Request(e.to_string())),
        }
    }
}

/// Maps an intake response status to an attempt outcome.
#[must_use]
pub fn classify_status(status: u16) -> AttemptOutcome {
    match status {
        200..=299 => AttemptOutcome::Success,
        429 => AttemptOutcome::Retryable(AttemptError::Status(status)),
        400..=499 => AttemptOutcome::Fatal(AttemptError::Status(status)),
        _ => AttemptOutcome::Retryable(AttemptError::Status(status)),
    }
}

fn build_headers(
    api_key: &ApiKey,
    config: &DatadogConfiguration,
) -> Result<HeaderMap, ConfigError> {
    let mut headers = HeaderMap::new();
    if config.intake_api == IntakeApi::V2 {
        let value = HeaderValue::from_str(api_key.as_str()).map_err(|_| {
            ConfigError::Invalid("API key contains characters not allowed in a header".to_string())
        })?;
        headers.insert("DD-API-KEY", value);
    }
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert("DD-EVP-ORIGIN", HeaderValue::from_static(ORIGIN));
    headers.insert("DD-EVP-ORIGIN-VERSION", HeaderValue::from_static(ORIGIN_VERSION));
    Ok(headers)
}

/// Builds the client, falling back to a direct connection when the proxy
/// cannot be used.
#[must_use]
pub fn get_client(config: &DatadogConfiguration) -> reqwest::Client {
    match build_client(config, true) {
        Ok(client) => client,
        Err(e) => {
            error!(
                "LOGS | Unable to parse proxy configuration: {}, falling back to direct connection",
                e
            );
            match build_client(config, false) {
                Ok(client) => client,
                Err(inner) => {
                    error!(
                        "LOGS | Failed to build HTTP client without proxy: {}, using reqwest defaults",
                        inner
                    );
                    reqwest::Client::new()
                }
            }
        }
    }
}

fn build_client(
    config: &DatadogConfiguration,
    allow_proxy: bool,
) -> Result<reqwest::Client, reqwest::Error> {
    let mut client = reqwest::Client::builder()
        .use_rustls_tls()
        .timeout(config.request_timeout)
        .pool_idle_timeout(Some(Duration::from_secs(270)))
        .tcp_keepalive(Some(Duration::from_secs(120)));

    match config.proxy.as_deref() {
        Some(proxy) if allow_proxy => client = client.proxy(reqwest::Proxy::https(proxy)?),
        _ => client = client.no_proxy(),
    }

    client.build()
}
