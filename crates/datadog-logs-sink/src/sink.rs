// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batching scheduler.
//!
//! The sink runs as an actor: producers hold a cloneable [`SinkHandle`] and
//! push events through an unbounded channel, so `emit` never blocks. A single
//! background service owns the event queue and drives flushing:
//!
//! ```text
//!    SinkHandle::emit ──┐
//!    SinkHandle::emit ──┼──> channel ──> service loop ──> Flusher (one generation at a time)
//!    DatadogSink::flush ┘                    │
//!                                            └── ticker (batch period)
//! ```
//!
//! A flush starts when the batch period elapses, when `batch_size_limit`
//! events are buffered or when [`DatadogSink::flush`] is called. Once started,
//! generations of at most `batch_size_limit` events are sent back to back
//! until the queue is empty. A new generation never starts before the previous
//! one has settled.
//!
//! On shutdown the channel is closed, whatever is buffered is flushed within
//! the grace period, and anything the grace period did not reach is reported.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::config::SinkConfig;
use crate::error::{ConfigError, DropReason, LogEventError, SinkError};
use crate::event::LogEvent;
use crate::flusher::{FlushSummary, Flusher};
use crate::formatter::LogFormatter;
use crate::payload::BatchBuilder;
use crate::queue::EventQueue;
use crate::renderer::LogRenderer;
use crate::reporter::{ExceptionHandler, FailureReporter};
use crate::transport::{self, LogTransport};

#[derive(Debug)]
pub(crate) enum Message {
    Event(Arc<LogEvent>),
    Flush(oneshot::Sender<()>),
}

/// Cloneable producer side of the sink.
#[derive(Clone, Debug)]
pub struct SinkHandle {
    tx: mpsc::UnboundedSender<Message>,
    reporter: FailureReporter,
}

impl SinkHandle {
    /// Enqueues `event` without blocking. Events emitted after shutdown are
    /// reported as dropped.
    pub fn emit(&self, event: LogEvent) {
        if let Err(mpsc::error::SendError(Message::Event(event))) =
            self.tx.send(Message::Event(Arc::new(event)))
        {
            self.reporter.report(LogEventError::Dropped {
                events: vec![event],
                reason: DropReason::Shutdown,
            });
        }
    }

    /// Flushes every event emitted before the call and waits for the sends to
    /// settle. Failures still go to the failure reporter.
    pub async fn flush(&self) -> Result<(), SinkError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Message::Flush(tx))
            .map_err(|_| SinkError::Closed)?;
        rx.await.map_err(|_| SinkError::Closed)
    }
}

#[cfg(test)]
impl SinkHandle {
    /// Handle whose messages are read back directly instead of by a service.
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = SinkHandle {
            tx,
            reporter: FailureReporter::default(),
        };
        (handle, rx)
    }
}

/// A running sink. Dropping it stops the background service without waiting;
/// call [`DatadogSink::shutdown`] to wait for the final flush.
#[must_use]
pub struct DatadogSink {
    handle: SinkHandle,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for DatadogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatadogSink")
            .field("running", &!self.shutdown.is_cancelled())
            .finish()
    }
}

impl DatadogSink {
    pub fn handle(&self) -> SinkHandle {
        self.handle.clone()
    }

    pub fn emit(&self, event: LogEvent) {
        self.handle.emit(event);
    }

    pub async fn flush(&self) -> Result<(), SinkError> {
        self.handle.flush().await
    }

    /// Stops accepting events, flushes what is buffered within the grace
    /// period and releases the transport.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("LOGS | Sink service task failed: {}", e);
            }
        }
    }
}

impl Drop for DatadogSink {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Assembles a [`DatadogSink`] from a [`SinkConfig`] and optional extensions.
pub struct SinkBuilder {
    config: SinkConfig,
    exception_handler: Option<ExceptionHandler>,
    formatter: Option<Arc<dyn LogFormatter>>,
    transport: Option<Arc<dyn LogTransport>>,
}

impl SinkBuilder {
    #[must_use]
    pub fn new(config: SinkConfig) -> Self {
        SinkBuilder {
            config,
            exception_handler: None,
            formatter: None,
            transport: None,
        }
    }

    /// Callback receiving every delivery failure. It runs on the sink's
    /// background task and must not block.
    #[must_use]
    pub fn exception_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&LogEventError) + Send + Sync + 'static,
    {
        self.exception_handler = Some(Arc::new(handler));
        self
    }

    #[must_use]
    pub fn formatter(mut self, formatter: Arc<dyn LogFormatter>) -> Self {
        self.formatter = Some(formatter);
        self
    }

    /// Replaces the transport built from the configuration.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn LogTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Validates the configuration and spawns the background service on the
    /// current Tokio runtime.
    pub fn start(self) -> Result<DatadogSink, ConfigError> {
        self.config.validate()?;
        let runtime = Handle::try_current().map_err(|_| {
            ConfigError::Invalid("the sink must be started within a Tokio runtime".to_string())
        })?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => transport::from_config(&self.config)?,
        };
        let mut renderer = LogRenderer::from_config(&self.config);
        if let Some(formatter) = self.formatter {
            renderer = renderer.with_formatter(formatter);
        }
        let builder = BatchBuilder::new(
            Arc::new(renderer),
            transport.payload_format(),
            self.config.max_content_size,
        );

        let reporter = FailureReporter::new(self.exception_handler);
        let shutdown = CancellationToken::new();
        let abort = CancellationToken::new();
        let flusher = Flusher::new(
            builder,
            transport,
            self.config.transport.retry_policy(),
            reporter.clone(),
            abort.clone(),
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let service = SinkService {
            rx,
            queue: EventQueue::new(self.config.queue_limit),
            flusher,
            reporter: reporter.clone(),
            batch_size_limit: self.config.batch_size_limit,
            batch_period: self.config.batch_period,
            grace_period: self.config.shutdown_grace_period,
            shutdown: shutdown.clone(),
            abort,
            in_flight: JoinSet::new(),
            draining: false,
            waiters: Vec::new(),
        };
        let task = runtime.spawn(service.run());

        Ok(DatadogSink {
            handle: SinkHandle { tx, reporter },
            shutdown,
            task: Some(task),
        })
    }
}

struct SinkService {
    rx: mpsc::UnboundedReceiver<Message>,
    queue: EventQueue,
    flusher: Flusher,
    reporter: FailureReporter,
    batch_size_limit: usize,
    batch_period: Duration,
    grace_period: Duration,
    shutdown: CancellationToken,
    /// Cancels in-flight sends once the grace period has expired.
    abort: CancellationToken,
    in_flight: JoinSet<FlushSummary>,
    /// Set while generations keep being sent until the queue is empty.
    draining: bool,
    waiters: Vec<oneshot::Sender<()>>,
}

impl SinkService {
    async fn run(mut self) {
        debug!("LOGS | Sink service started");
        let mut ticker = interval_at(Instant::now() + self.batch_period, self.batch_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                Some(result) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    Self::settled(result);
                }
                _ = ticker.tick() => {
                    self.draining = true;
                }
                message = self.rx.recv() => match message {
                    Some(message) => self.handle_message(message),
                    None => break,
                },
            }
            self.pump();
        }

        self.stop().await;
    }

    fn handle_message(&mut self, message: Message) {
        match message {
            Message::Event(event) => {
                if let Some(evicted) = self.queue.push(event) {
                    self.reporter.report(LogEventError::QueueOverflow {
                        events: vec![evicted],
                    });
                }
                if self.queue.len() >= self.batch_size_limit {
                    self.draining = true;
                }
            }
            Message::Flush(waiter) => {
                self.waiters.push(waiter);
                self.draining = true;
            }
        }
    }

    /// Starts the next generation when none is in flight, and resolves flush
    /// waiters once everything has been sent.
    fn pump(&mut self) {
        if !self.in_flight.is_empty() {
            return;
        }
        if self.draining && !self.queue.is_empty() {
            self.start_generation();
            return;
        }
        self.draining = false;
        for waiter in self.waiters.drain(..) {
            // The caller may have stopped waiting.
            let _ = waiter.send(());
        }
    }

    fn start_generation(&mut self) {
        let batch = self.queue.drain_up_to(self.batch_size_limit);
        let flusher = self.flusher.clone();
        self.in_flight
            .spawn(async move { flusher.flush(batch).await });
    }

    fn settled(result: Result<FlushSummary, tokio::task::JoinError>) {
        match result {
            Ok(summary) => debug!(
                "LOGS | Flush settled: {} chunk(s), {} delivered, {} failed, {} oversized",
                summary.chunks,
                summary.delivered_events,
                summary.failed_events,
                summary.oversized_events
            ),
            Err(e) => error!("LOGS | Flush task failed: {}", e),
        }
    }

    async fn stop(mut self) {
        debug!("LOGS | Sink service shutting down");
        self.rx.close();
        while let Ok(message) = self.rx.try_recv() {
            self.handle_message(message);
        }

        let grace = tokio::time::sleep(self.grace_period);
        tokio::pin!(grace);
        let mut expired = false;
        loop {
            if self.in_flight.is_empty() {
                if self.queue.is_empty() {
                    break;
                }
                self.start_generation();
            }
            tokio::select! {
                biased;
                () = &mut grace => {
                    expired = true;
                    break;
                }
                Some(result) = self.in_flight.join_next() => Self::settled(result),
            }
        }

        if expired {
            debug!("LOGS | Shutdown grace period expired, cancelling in-flight sends");
            self.abort.cancel();
            while let Some(result) = self.in_flight.join_next().await {
                Self::settled(result);
            }
            let remaining = self.queue.drain_all();
            if !remaining.is_empty() {
                self.reporter.report(LogEventError::Dropped {
                    events: remaining,
                    reason: DropReason::GracePeriodExpired,
                });
            }
        }

        self.flusher.close().await;
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(());
        }
        debug!("LOGS | Sink service stopped");
    }
}
