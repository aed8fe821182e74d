// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Datadog Logs Sink
//!
//! A log shipping sink that batches application log events and forwards them to
//! the Datadog logs intake over HTTP or a persistent TCP (optionally TLS) stream.
//!
//! ## Pipeline
//!
//! ```text
//!   tracing events ──> DatadogLayer ──> SinkHandle::emit (never blocks)
//!                                            │
//!                                            v
//!                                   ┌─────────────────┐
//!                                   │ Batching service│ (period / count / queue limit)
//!                                   └────────┬────────┘
//!                                            v
//!                                   ┌─────────────────┐
//!                                   │   LogRenderer   │ (metadata, size enforcement)
//!                                   └────────┬────────┘
//!                                            v
//!                                   ┌─────────────────┐
//!                                   │  BatchBuilder   │ (chunks bounded by size/count)
//!                                   └────────┬────────┘
//!                                            v
//!                                   ┌─────────────────┐
//!                                   │  LogTransport   │ (HTTP POST | TCP/TLS, retries)
//!                                   └────────┬────────┘
//!                                            v
//!                                   ┌─────────────────┐
//!                                   │ FailureReporter │ (callback or self-diagnostics)
//!                                   └─────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use datadog_logs_sink::{config::SinkConfig, layer::DatadogLayer, sink::SinkBuilder};
//! use tracing_subscriber::layer::SubscriberExt;
//!
//! # async fn run() -> Result<(), datadog_logs_sink::error::ConfigError> {
//! let config = SinkConfig::from_env()?;
//! let sink = SinkBuilder::new(config)
//!     .exception_handler(|err| eprintln!("log delivery failed: {err}"))
//!     .start()?;
//!
//! let subscriber = tracing_subscriber::registry().with(DatadogLayer::new(sink.handle()));
//! tracing::subscriber::set_global_default(subscriber).ok();
//!
//! tracing::info!(user = "alice", "logged in");
//! sink.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![deny(clippy::all)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_comparisons)]

pub mod api_key;
pub mod buffer;
pub mod config;
pub mod constants;
pub mod error;
pub mod event;
pub mod flusher;
pub mod formatter;
pub mod layer;
pub mod logger;
pub mod payload;
pub mod queue;
pub mod renderer;
pub mod reporter;
pub mod retry;
pub mod sink;
pub mod transport;

pub use config::{DatadogConfiguration, SinkConfig, TransportKind};
pub use error::{ConfigError, LogEventError};
pub use event::{ExceptionInfo, Level, LogEvent};
pub use layer::DatadogLayer;
pub use sink::{DatadogSink, SinkBuilder, SinkHandle};

/// Origin reported to the intake in the `DD-EVP-ORIGIN` header.
pub const ORIGIN: &str = "datadog-logs-sink";

/// Version reported to the intake in the `DD-EVP-ORIGIN-VERSION` header.
pub const ORIGIN_VERSION: &str = env!("CARGO_PKG_VERSION");
