// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy of the sink.
//!
//! Only [`ConfigError`] is ever returned to the code that produces log events,
//! and only at construction time. Everything that goes wrong afterwards is turned
//! into a [`LogEventError`] and handed to the failure reporter.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::event::LogEvent;
use crate::retry::DeliveryOutcome;

/// Errors detected while building the sink.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: missing API key")]
    MissingApiKey,

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Why a single send attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttemptError {
    #[error("intake responded with HTTP {0}")]
    Status(u16),

    #[error("request failed: {0}")]
    Request(String),

    #[error("could not connect: {0}")]
    Connect(String),

    #[error("TLS handshake failed: {0}")]
    Tls(String),

    #[error("could not write payload: {0}")]
    Write(String),

    #[error("connection lost")]
    ConnectionLost,

    #[error("attempt timed out")]
    Timeout,
}

/// Why buffered events were dropped without a send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The event arrived after shutdown started.
    Shutdown,
    /// The final flush did not reach these events before the grace period ran out.
    GracePeriodExpired,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::Shutdown => f.write_str("sink is shutting down"),
            DropReason::GracePeriodExpired => f.write_str("shutdown grace period expired"),
        }
    }
}

/// A delivery problem, reported together with the events it concerns.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LogEventError {
    /// The events cannot fit within the maximum message size, even split.
    #[error("{} log event(s) are too big to be sent", .events.len())]
    TooBig { events: Vec<Arc<LogEvent>> },

    /// A chunk was rejected, exhausted its retries or was cancelled.
    #[error("Could not send payload to Datadog ({} event(s)): {outcome}", .events.len())]
    CannotSend {
        payload: Bytes,
        events: Vec<Arc<LogEvent>>,
        outcome: DeliveryOutcome,
    },

    /// The bounded queue evicted its oldest events to make room.
    #[error("Log queue full, dropped {} oldest event(s)", .events.len())]
    QueueOverflow { events: Vec<Arc<LogEvent>> },

    #[error("Dropped {} event(s): {reason}", .events.len())]
    Dropped {
        events: Vec<Arc<LogEvent>>,
        reason: DropReason,
    },
}

impl LogEventError {
    /// The events this failure concerns.
    #[must_use]
    pub fn events(&self) -> &[Arc<LogEvent>] {
        match self {
            LogEventError::TooBig { events }
            | LogEventError::CannotSend { events, .. }
            | LogEventError::QueueOverflow { events }
            | LogEventError::Dropped { events, .. } => events,
        }
    }
}

/// Errors returned by [`crate::sink::DatadogSink`] control operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("Sink is shut down")]
    Closed,
}
