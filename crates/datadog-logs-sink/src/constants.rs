// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Intake limits and pipeline defaults.
//!
//! # Intake Constraints
//!
//! The Datadog logs intake enforces:
//! - **Payload size**: maximum uncompressed size of one request body
//! - **Entry size**: maximum size of one log record
//! - **Batch count**: maximum number of records per HTTP request
//!
//! Chunks are sized against these limits before they are sent, so the intake
//! never has to reject a request for being too large.

use std::time::Duration;

/// Maximum uncompressed size of one chunk in bytes.
///
/// 2 MiB minus room for 49 `,` delimiters and the `[` + `]` array brackets.
/// The batch builder accounts for delimiters exactly, so the reserved bytes are
/// slack rather than a requirement.
pub const MAX_CONTENT_SIZE_BYTES: usize = 2 * 1_024 * 1_024 - 51;

/// Default maximum size in bytes of one rendered record.
///
/// Records above this size are split into fragments wrapped with
/// [`TRUNCATION_MARKER`].
pub const DEFAULT_MAX_MESSAGE_SIZE_BYTES: usize = 256_000;

/// Maximum number of records in one HTTP request.
pub const MAX_BATCH_ENTRIES_SIZE: usize = 1_000;

/// Marker placed at the cut points of a split record.
pub const TRUNCATION_MARKER: &str = "...TRUNCATED...";

/// Default number of events collected before a flush is forced.
pub const DEFAULT_BATCH_SIZE_LIMIT: usize = 50;

/// Default time between two periodic flushes.
pub const DEFAULT_BATCH_PERIOD: Duration = Duration::from_secs(2);

/// Default time allowed for the final flush on shutdown.
pub const DEFAULT_SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Default per-request timeout for the HTTP transport and TCP connect.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Default number of HTTP send attempts per chunk.
pub const DEFAULT_HTTP_MAX_RETRIES: usize = 10;

/// Default number of TCP send attempts per chunk.
pub const DEFAULT_TCP_MAX_RETRIES: usize = 5;

/// Cap on the backoff between two attempts, in backoff units.
pub const MAX_BACKOFF: u32 = 30;

/// Datadog HTTP logs intake.
pub const DEFAULT_HTTP_URL: &str = "https://http-intake.logs.datadoghq.com";

/// Datadog TCP logs intake host.
pub const DEFAULT_TCP_HOST: &str = "intake.logs.datadoghq.com";

/// Datadog TCP logs intake port with TLS.
pub const DEFAULT_TCP_SSL_PORT: u16 = 10516;

/// Datadog TCP logs intake port without TLS.
pub const DEFAULT_TCP_PLAIN_PORT: u16 = 10514;

/// Default `ddsource` attached to every record.
pub const DEFAULT_SOURCE: &str = "rust";
