// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! One flush generation.
//!
//! The [`Flusher`] turns a drained batch of events into chunks, sends every
//! chunk concurrently and hands each failure to the [`FailureReporter`]. It
//! returns only once every send has settled, which is what lets the scheduler
//! keep a single generation in flight.

use std::sync::Arc;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::LogEventError;
use crate::event::LogEvent;
use crate::payload::{BatchBuilder, Chunk};
use crate::reporter::FailureReporter;
use crate::retry::{deliver, DeliveryOutcome, RetryPolicy};
use crate::transport::LogTransport;

/// Counters of one flush generation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushSummary {
    pub chunks: usize,
    pub delivered_events: usize,
    pub failed_events: usize,
    pub oversized_events: usize,
}

#[derive(Clone)]
pub struct Flusher {
    builder: BatchBuilder,
    transport: Arc<dyn LogTransport>,
    policy: RetryPolicy,
    reporter: FailureReporter,
    abort: CancellationToken,
}

impl Flusher {
    #[must_use]
    pub fn new(
        builder: BatchBuilder,
        transport: Arc<dyn LogTransport>,
        policy: RetryPolicy,
        reporter: FailureReporter,
        abort: CancellationToken,
    ) -> Self {
        Flusher {
            builder,
            transport,
            policy,
            reporter,
            abort,
        }
    }

    /// Builds, sends and reports one batch. An empty batch makes no call.
    pub async fn flush(&self, events: Vec<Arc<LogEvent>>) -> FlushSummary {
        let mut summary = FlushSummary::default();
        if events.is_empty() {
            return summary;
        }

        let serialized = self.builder.build(&events);
        summary.chunks = serialized.chunks.len();
        summary.oversized_events = serialized.oversized.len();
        if !serialized.oversized.is_empty() {
            self.reporter.report(LogEventError::TooBig {
                events: serialized.oversized,
            });
        }

        let futures = serialized.chunks.into_iter().map(|chunk| self.send(chunk));
        for (chunk, outcome) in join_all(futures).await {
            if outcome.is_delivered() {
                summary.delivered_events += chunk.events.len();
                continue;
            }
            summary.failed_events += chunk.events.len();
            self.reporter.report(LogEventError::CannotSend {
                payload: chunk.payload,
                events: chunk.events,
                outcome,
            });
        }

        debug!(
            "LOGS | Flushed {} chunk(s): {} event(s) delivered, {} failed, {} too big",
            summary.chunks, summary.delivered_events, summary.failed_events, summary.oversized_events
        );
        summary
    }

    async fn send(&self, chunk: Chunk) -> (Chunk, DeliveryOutcome) {
        let outcome = deliver(
            self.transport.as_ref(),
            &chunk.payload,
            &self.policy,
            &self.abort,
        )
        .await;
        (chunk, outcome)
    }

    /// Releases the transport's resources.
    pub async fn close(&self) {
        self.transport.close().await;
    }
}
