// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batch building: rendered records grouped into transport-sized chunks.
//!
//! [`BatchBuilder::build`] renders the events of one flush in order and packs
//! their records into [`Chunk`]s. A new chunk starts whenever the next event
//! would push the payload over the maximum content size or the transport's
//! record limit. All records of one event (the fragments of a split record
//! included) land in the same chunk, so every event ends up in exactly one
//! chunk or in the oversized list, never both.
//!
//! Payload sizes are accounted exactly:
//!
//! | Format | Payload | Size |
//! | --- | --- | --- |
//! | JSON array | `[r1,r2,...,rn]` | `2 + Σ len(ri) + (n - 1)` |
//! | API key lines | `key r1\nkey r2\n...` | `Σ (len(key) + 1 + len(ri) + 1)` |

use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use crate::event::LogEvent;
use crate::renderer::LogRenderer;
use crate::transport::PayloadFormat;

/// One transport-ready batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub payload: Bytes,
    /// Records in the payload, fragments counted individually.
    pub record_count: usize,
    /// Events whose records are in the payload, in arrival order.
    pub events: Vec<Arc<LogEvent>>,
}

#[derive(Debug, Default, PartialEq)]
pub struct SerializedEvents {
    pub chunks: Vec<Chunk>,
    /// Events that cannot fit within the size limits.
    pub oversized: Vec<Arc<LogEvent>>,
}

/// Accumulates the records of one chunk.
pub trait PayloadBuilder {
    /// Current payload size in bytes.
    fn size(&self) -> usize;

    fn record_count(&self) -> usize;

    /// Bytes `records` would add to the payload.
    fn added_size(&self, records: &[String]) -> usize;

    fn push(&mut self, records: &[String], event: Arc<LogEvent>);

    fn is_empty(&self) -> bool {
        self.record_count() == 0
    }

    fn build(self: Box<Self>) -> Chunk;
}

#[derive(Debug)]
pub struct JsonPayloadBuilder {
    buffer: Vec<u8>,
    record_count: usize,
    events: Vec<Arc<LogEvent>>,
}

impl Default for JsonPayloadBuilder {
    fn default() -> Self {
        Self {
            buffer: vec![b'['],
            record_count: 0,
            events: Vec::new(),
        }
    }
}

impl PayloadBuilder for JsonPayloadBuilder {
    fn size(&self) -> usize {
        // the closing bracket is written by `build`
        self.buffer.len() + 1
    }

    fn record_count(&self) -> usize {
        self.record_count
    }

    fn added_size(&self, records: &[String]) -> usize {
        let delimiters = if self.record_count == 0 {
            records.len().saturating_sub(1)
        } else {
            records.len()
        };
        records.iter().map(String::len).sum::<usize>() + delimiters
    }

    fn push(&mut self, records: &[String], event: Arc<LogEvent>) {
        for record in records {
            if self.record_count > 0 {
                self.buffer.push(b',');
            }
            self.buffer.extend_from_slice(record.as_bytes());
            self.record_count += 1;
        }
        self.events.push(event);
    }

    fn build(mut self: Box<Self>) -> Chunk {
        self.buffer.push(b']');
        Chunk {
            payload: Bytes::from(self.buffer),
            record_count: self.record_count,
            events: self.events,
        }
    }
}

#[derive(Debug)]
pub struct LinePayloadBuilder {
    prefix: String,
    buffer: Vec<u8>,
    record_count: usize,
    events: Vec<Arc<LogEvent>>,
}

impl LinePayloadBuilder {
    /// Every line is written as `{prefix} {record}\n`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            buffer: Vec::new(),
            record_count: 0,
            events: Vec::new(),
        }
    }
}

impl PayloadBuilder for LinePayloadBuilder {
    fn size(&self) -> usize {
        self.buffer.len()
    }

    fn record_count(&self) -> usize {
        self.record_count
    }

    fn added_size(&self, records: &[String]) -> usize {
        records
            .iter()
            .map(|record| self.prefix.len() + 1 + record.len() + 1)
            .sum()
    }

    fn push(&mut self, records: &[String], event: Arc<LogEvent>) {
        for record in records {
            self.buffer.extend_from_slice(self.prefix.as_bytes());
            self.buffer.push(b' ');
            self.buffer.extend_from_slice(record.as_bytes());
            self.buffer.push(b'\n');
            self.record_count += 1;
        }
        self.events.push(event);
    }

    fn build(self: Box<Self>) -> Chunk {
        Chunk {
            payload: Bytes::from(self.buffer),
            record_count: self.record_count,
            events: self.events,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchBuilder {
    renderer: Arc<LogRenderer>,
    format: PayloadFormat,
    max_content_size: usize,
}

impl BatchBuilder {
    pub fn new(renderer: Arc<LogRenderer>, format: PayloadFormat, max_content_size: usize) -> Self {
        Self {
            renderer,
            format,
            max_content_size,
        }
    }

    fn max_records(&self) -> usize {
        match &self.format {
            PayloadFormat::JsonArray { max_entries } => *max_entries,
            PayloadFormat::ApiKeyLines { .. } => usize::MAX,
        }
    }

    fn new_builder(&self) -> Box<dyn PayloadBuilder + Send> {
        match &self.format {
            PayloadFormat::JsonArray { .. } => Box::<JsonPayloadBuilder>::default(),
            PayloadFormat::ApiKeyLines { api_key } => {
                Box::new(LinePayloadBuilder::new(api_key.as_str()))
            }
        }
    }

    /// Renders `events` and packs them into chunks, preserving order.
    ///
    /// Pure with respect to its input: building the same events twice yields
    /// the same chunks.
    #[must_use]
    pub fn build(&self, events: &[Arc<LogEvent>]) -> SerializedEvents {
        let mut serialized = SerializedEvents::default();
        let max_records = self.max_records();
        let mut builder = self.new_builder();

        for event in events {
            let records = match self.renderer.render(event) {
                Ok(records) => records,
                Err(e) => {
                    debug!("LOGS | Dropping log event: {}", e);
                    serialized.oversized.push(Arc::clone(event));
                    continue;
                }
            };

            let fits = |builder: &dyn PayloadBuilder| {
                builder.size() + builder.added_size(&records) <= self.max_content_size
                    && builder.record_count() + records.len() <= max_records
            };

            if !builder.is_empty() && !fits(builder.as_ref()) {
                let full = std::mem::replace(&mut builder, self.new_builder());
                serialized.chunks.push(full.build());
            }

            if fits(builder.as_ref()) {
                builder.push(&records, Arc::clone(event));
            } else {
                debug!(
                    "LOGS | Dropping log event: {} record(s) cannot fit in one payload",
                    records.len()
                );
                serialized.oversized.push(Arc::clone(event));
            }
        }

        if !builder.is_empty() {
            serialized.chunks.push(builder.build());
        }
        serialized
    }
}
