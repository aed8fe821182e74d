// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sink and transport configuration.
//!
//! Both structs are plain data: they are validated once when the sink starts
//! and are immutable afterwards. Behaviour that cannot be expressed as data
//! (failure callback, custom formatter, custom transport) is attached through
//! [`crate::sink::SinkBuilder`].

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::api_key::ApiKey;
use crate::constants;
use crate::error::ConfigError;
use crate::retry::{BackoffPolicy, RetryPolicy};

/// Which wire protocol carries the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    /// JSON arrays POSTed to the HTTP intake.
    #[default]
    Http,
    /// Newline-delimited records on a persistent TCP stream.
    Tcp,
}

/// HTTP intake API flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntakeApi {
    /// `POST {url}/api/v2/logs`, API key in the `DD-API-KEY` header.
    #[default]
    V2,
    /// `POST {url}/v1/input/{api_key}`.
    LegacyV1,
}

/// How events are turned into records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
    /// The formatter's JSON object is the record; metadata is merged into it.
    #[default]
    Structured,
    /// Every record is a metadata envelope whose `message` is the formatter
    /// output as text.
    Wrapped,
}

/// Where and how to send the logs.
#[derive(Debug, Clone, PartialEq)]
pub struct DatadogConfiguration {
    /// HTTP: base URL of the intake. TCP: host name of the intake.
    pub url: String,
    /// TCP port. Ignored by the HTTP transport.
    pub port: u16,
    pub use_ssl: bool,
    pub kind: TransportKind,
    /// Send attempts per chunk. `None` picks the transport default.
    pub max_retries: Option<usize>,
    /// `None` picks the transport default.
    pub backoff: Option<BackoffPolicy>,
    /// Duration of one backoff step.
    pub backoff_unit: Duration,
    /// Cap on the backoff, in steps.
    pub max_backoff: u32,
    pub request_timeout: Duration,
    /// Proxy URL for the HTTP transport.
    pub proxy: Option<String>,
    pub intake_api: IntakeApi,
    pub use_compression: bool,
    pub compression_level: i32,
    /// Reuse one render buffer across events, serializing renders through it.
    pub recycle_resources: bool,
}

impl Default for DatadogConfiguration {
    fn default() -> Self {
        Self {
            url: constants::DEFAULT_HTTP_URL.to_string(),
            port: constants::DEFAULT_TCP_SSL_PORT,
            use_ssl: true,
            kind: TransportKind::Http,
            max_retries: None,
            backoff: None,
            backoff_unit: Duration::from_secs(1),
            max_backoff: constants::MAX_BACKOFF,
            request_timeout: constants::DEFAULT_REQUEST_TIMEOUT,
            proxy: None,
            intake_api: IntakeApi::V2,
            use_compression: false,
            compression_level: 3,
            recycle_resources: false,
        }
    }
}

impl DatadogConfiguration {
    /// HTTP transport against `url`.
    pub fn http(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// TCP transport against `host:port`.
    pub fn tcp(host: impl Into<String>, port: u16, use_ssl: bool) -> Self {
        Self {
            url: host.into(),
            port,
            use_ssl,
            kind: TransportKind::Tcp,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn effective_max_retries(&self) -> usize {
        self.max_retries.unwrap_or(match self.kind {
            TransportKind::Http => constants::DEFAULT_HTTP_MAX_RETRIES,
            TransportKind::Tcp => constants::DEFAULT_TCP_MAX_RETRIES,
        })
    }

    #[must_use]
    pub fn effective_backoff(&self) -> BackoffPolicy {
        self.backoff.unwrap_or(match self.kind {
            TransportKind::Http => BackoffPolicy::Exponential,
            TransportKind::Tcp => BackoffPolicy::Quadratic,
        })
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.effective_max_retries(),
            backoff: self.effective_backoff(),
            unit: self.backoff_unit,
            max_backoff: self.max_backoff,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::Invalid("intake URL cannot be empty".to_string()));
        }

        match self.kind {
            TransportKind::Http => {
                if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
                    return Err(ConfigError::Invalid(format!(
                        "HTTP intake URL '{}' must start with http:// or https://",
                        self.url
                    )));
                }
            }
            TransportKind::Tcp => {
                if self.url.contains("://") || self.url.contains('/') {
                    return Err(ConfigError::Invalid(format!(
                        "TCP intake '{}' must be a host name",
                        self.url
                    )));
                }
                if self.port == 0 {
                    return Err(ConfigError::Invalid(
                        "TCP port must be greater than 0".to_string(),
                    ));
                }
            }
        }

        if self.max_retries == Some(0) {
            return Err(ConfigError::Invalid(
                "max retries must allow at least one attempt".to_string(),
            ));
        }

        if self.backoff_unit.is_zero() {
            return Err(ConfigError::Invalid(
                "backoff unit must be greater than 0".to_string(),
            ));
        }

        if !(-7..=22).contains(&self.compression_level) {
            return Err(ConfigError::Invalid(format!(
                "zstd compression level {} is out of range (-7..=22)",
                self.compression_level
            )));
        }

        Ok(())
    }
}

/// Everything the sink needs besides callbacks.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub api_key: Option<ApiKey>,
    pub source: String,
    pub service: Option<String>,
    pub host: Option<String>,
    pub tags: Vec<String>,
    pub transport: DatadogConfiguration,
    /// Events collected before a flush is forced.
    pub batch_size_limit: usize,
    /// Time between two periodic flushes.
    pub batch_period: Duration,
    /// Maximum buffered events; the oldest are dropped beyond it.
    pub queue_limit: Option<usize>,
    pub max_message_size: usize,
    pub max_content_size: usize,
    pub detect_tcp_disconnection: bool,
    pub render_mode: RenderMode,
    pub shutdown_grace_period: Duration,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            source: constants::DEFAULT_SOURCE.to_string(),
            service: None,
            host: None,
            tags: Vec::new(),
            transport: DatadogConfiguration::default(),
            batch_size_limit: constants::DEFAULT_BATCH_SIZE_LIMIT,
            batch_period: constants::DEFAULT_BATCH_PERIOD,
            queue_limit: None,
            max_message_size: constants::DEFAULT_MAX_MESSAGE_SIZE_BYTES,
            max_content_size: constants::MAX_CONTENT_SIZE_BYTES,
            detect_tcp_disconnection: false,
            render_mode: RenderMode::Structured,
            shutdown_grace_period: constants::DEFAULT_SHUTDOWN_GRACE_PERIOD,
        }
    }
}

impl SinkConfig {
    /// Default configuration with the given API key.
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: ApiKey::new(api_key),
            ..Default::default()
        }
    }

    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self {
            api_key: env::var("DD_API_KEY").ok().and_then(|key| ApiKey::new(&key)),
            ..Default::default()
        };

        let use_tcp = env_bool("DD_LOGS_USE_TCP").unwrap_or(false);
        let use_ssl = env_bool("DD_LOGS_USE_SSL").unwrap_or(true);

        if use_tcp {
            let port = if use_ssl {
                constants::DEFAULT_TCP_SSL_PORT
            } else {
                constants::DEFAULT_TCP_PLAIN_PORT
            };
            config.transport = DatadogConfiguration::tcp(constants::DEFAULT_TCP_HOST, port, use_ssl);
        } else {
            config.transport.use_ssl = use_ssl;
            if let Ok(site) = env::var("DD_SITE") {
                if !site.trim().is_empty() {
                    config.transport.url = format!("https://http-intake.logs.{}", site.trim());
                }
            }
        }

        if let Ok(url) = env::var("DD_LOGS_URL") {
            config.transport.url = url.trim().trim_end_matches('/').to_string();
        }
        if let Some(port) = env_parse::<u16>("DD_LOGS_PORT") {
            config.transport.port = port;
        }
        if let Some(max_retries) = env_parse::<usize>("DD_LOGS_MAX_RETRIES") {
            config.transport.max_retries = Some(max_retries);
        }
        if let Some(use_compression) = env_bool("DD_LOGS_USE_COMPRESSION") {
            config.transport.use_compression = use_compression;
        }
        config.transport.proxy = env::var("DD_PROXY_HTTPS")
            .or_else(|_| env::var("HTTPS_PROXY"))
            .ok()
            .filter(|proxy| !proxy.trim().is_empty());

        if let Ok(source) = env::var("DD_SOURCE") {
            if !source.trim().is_empty() {
                config.source = source.trim().to_string();
            }
        }
        config.service = env_string("DD_SERVICE");
        config.host = env_string("DD_HOSTNAME");
        config.tags = env::var("DD_TAGS")
            .map(|tags| parse_tags(&tags))
            .unwrap_or_default();

        if let Some(limit) = env_parse::<usize>("DD_LOGS_BATCH_SIZE") {
            config.batch_size_limit = limit;
        }
        if let Some(period_ms) = env_parse::<u64>("DD_LOGS_BATCH_PERIOD_MS") {
            config.batch_period = Duration::from_millis(period_ms);
        }
        config.queue_limit = env_parse::<usize>("DD_LOGS_QUEUE_LIMIT");
        if let Some(size) = env_parse::<usize>("DD_LOGS_MAX_MESSAGE_SIZE") {
            config.max_message_size = size;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.is_none() {
            return Err(ConfigError::MissingApiKey);
        }

        self.transport.validate()?;

        if self.batch_size_limit == 0 {
            return Err(ConfigError::Invalid(
                "batch size limit must be greater than 0".to_string(),
            ));
        }
        if self.batch_period.is_zero() {
            return Err(ConfigError::Invalid(
                "batch period must be greater than 0".to_string(),
            ));
        }
        if self.queue_limit == Some(0) {
            return Err(ConfigError::Invalid(
                "queue limit must be greater than 0".to_string(),
            ));
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::Invalid(
                "max message size must be greater than 0".to_string(),
            ));
        }
        if self.max_message_size >= self.max_content_size {
            return Err(ConfigError::Invalid(format!(
                "max message size ({}) must be smaller than the max payload size ({})",
                self.max_message_size, self.max_content_size
            )));
        }

        Ok(())
    }
}

/// Splits `DD_TAGS` style input on commas and whitespace.
#[must_use]
pub fn parse_tags(tags: &str) -> Vec<String> {
    tags.split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_string(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|val| val.trim().to_string())
        .filter(|val| !val.is_empty())
}

fn env_bool(name: &str) -> Option<bool> {
    env_string(name).map(|val| matches!(val.to_lowercase().as_str(), "true" | "1" | "yes"))
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env_string(name).and_then(|val| val.parse::<T>().ok())
}
