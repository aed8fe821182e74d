// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of serialized chunks to the intake.
//!
//! Every transport implements [`LogTransport`]: it tells the batch builder how
//! records must be framed ([`PayloadFormat`]) and makes single send attempts
//! whose results it classifies as an [`AttemptOutcome`]. Retrying is left to
//! [`crate::retry::deliver`], so transports stay free of timing logic.
//!
//! | Transport | Framing | Retryable | Fatal |
//! | --- | --- | --- | --- |
//! | [`http::HttpTransport`] | JSON array, ≤ 1000 entries | 429, 5xx, network errors | other 4xx |
//! | [`tcp::TcpTransport`] | `{api_key} {record}\n` lines | connect, TLS and write errors | none |

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::api_key::ApiKey;
use crate::config::{SinkConfig, TransportKind};
use crate::constants::MAX_BATCH_ENTRIES_SIZE;
use crate::error::{AttemptError, ConfigError};

pub mod connection;
pub mod http;
pub mod tcp;
pub mod tls;

/// Result of one send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Retryable(AttemptError),
    Fatal(AttemptError),
}

/// How records are framed into a chunk payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadFormat {
    /// `[record,record,...]`, at most `max_entries` records.
    JsonArray { max_entries: usize },
    /// One `{api_key} {record}\n` line per record.
    ApiKeyLines { api_key: ApiKey },
}

#[async_trait]
pub trait LogTransport: Send + Sync {
    fn payload_format(&self) -> PayloadFormat;

    /// Makes exactly one attempt at sending `payload`.
    async fn attempt(&self, payload: &Bytes) -> AttemptOutcome;

    /// Releases connections. Called once, after the final flush.
    async fn close(&self) {}
}

/// Builds the transport selected by `config.transport.kind`.
pub fn from_config(config: &SinkConfig) -> Result<Arc<dyn LogTransport>, ConfigError> {
    let api_key = config.api_key.clone().ok_or(ConfigError::MissingApiKey)?;
    match config.transport.kind {
        TransportKind::Http => Ok(Arc::new(http::HttpTransport::new(
            api_key,
            &config.transport,
        )?)),
        TransportKind::Tcp => Ok(Arc::new(tcp::TcpTransport::new(
            api_key,
            &config.transport,
            config.detect_tcp_disconnection,
        )?)),
    }
}

impl PayloadFormat {
    #[must_use]
    pub fn json_array() -> Self {
        PayloadFormat::JsonArray {
            max_entries: MAX_BATCH_ENTRIES_SIZE,
        }
    }
}
