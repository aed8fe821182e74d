// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Rendering of one event into intake records.
//!
//! # Metadata
//!
//! The configured `ddsource`, `service`, `host` and `ddtags` are added to every
//! record unless the event already carries a value under the same key.
//!
//! # Render modes
//!
//! - [`RenderMode::Structured`]: the formatter output, with metadata merged
//!   in, is the record.
//! - [`RenderMode::Wrapped`]: the record is an envelope
//!   `{ddsource, service, host, ddtags, message}` whose `message` is the
//!   formatter output serialized as text.
//!
//! # Size enforcement
//!
//! A record larger than `max_message_size` bytes is split. Its text `M` (the
//! structured record itself, or the wrapped message) is cut into fragments, and
//! every fragment is sent in its own envelope with `...TRUNCATED...` markers at
//! the cut points:
//!
//! ```text
//! first:    {"ddsource":"rust","message":"<fragment 1>...TRUNCATED..."}
//! interior: {"ddsource":"rust","message":"...TRUNCATED...<fragment i>...TRUNCATED..."}
//! last:     {"ddsource":"rust","message":"...TRUNCATED...<fragment n>"}
//! ```
//!
//! The budget of a fragment is
//! `usable = max_message_size - envelope_overhead - 2 * len("...TRUNCATED...")`,
//! where `envelope_overhead` is the size of the envelope with an empty message.
//! Fragments are measured by their JSON-escaped size and cut on char
//! boundaries, so each envelope is at most `max_message_size` bytes and the
//! fragments, stripped of markers, concatenate back to `M`. An event whose
//! usable budget cannot hold a single character is too big to send.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::buffer::BufferPool;
use crate::config::{RenderMode, SinkConfig};
use crate::constants::TRUNCATION_MARKER;
use crate::event::LogEvent;
use crate::formatter::{DatadogJsonFormatter, LogFormatter};

/// Why an event produced no record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("record of {size} bytes cannot be split within {max} bytes")]
    TooBig { size: usize, max: usize },

    #[error("failed to serialize record: {0}")]
    Serialize(String),
}

/// Metadata attached to every record. Constant for the renderer's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub source: String,
    pub service: Option<String>,
    pub host: Option<String>,
    /// Tags joined with `,`.
    pub tags: Option<String>,
}

impl Metadata {
    #[must_use]
    pub fn from_config(config: &SinkConfig) -> Self {
        Self {
            source: config.source.clone(),
            service: config.service.clone().filter(|s| !s.trim().is_empty()),
            host: config.host.clone().filter(|h| !h.trim().is_empty()),
            tags: (!config.tags.is_empty()).then(|| config.tags.join(",")),
        }
    }

    fn entries(&self) -> [(&'static str, Option<&str>); 4] {
        [
            ("ddsource", Some(self.source.as_str())),
            ("service", self.service.as_deref()),
            ("host", self.host.as_deref()),
            ("ddtags", self.tags.as_deref()),
        ]
    }

    /// Adds every configured attribute `record` does not already have.
    pub fn merge_into(&self, record: &mut Map<String, Value>) {
        for (key, value) in self.entries() {
            if let Some(value) = value {
                if !record.contains_key(key) {
                    record.insert(key.to_string(), Value::from(value));
                }
            }
        }
    }

    /// Envelope attributes for `formatted`: its own reserved attributes first,
    /// the configured ones otherwise.
    fn envelope(&self, formatted: &Map<String, Value>) -> Map<String, Value> {
        let mut envelope = Map::new();
        for (key, configured) in self.entries() {
            if let Some(value) = formatted.get(key) {
                envelope.insert(key.to_string(), value.clone());
            } else if let Some(value) = configured {
                envelope.insert(key.to_string(), Value::from(value));
            }
        }
        envelope
    }
}

pub struct LogRenderer {
    metadata: Metadata,
    formatter: Arc<dyn LogFormatter>,
    mode: RenderMode,
    max_message_size: usize,
    buffers: BufferPool,
}

impl std::fmt::Debug for LogRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogRenderer")
            .field("metadata", &self.metadata)
            .field("mode", &self.mode)
            .field("max_message_size", &self.max_message_size)
            .field("buffers", &self.buffers)
            .finish_non_exhaustive()
    }
}

impl LogRenderer {
    pub fn new(
        metadata: Metadata,
        formatter: Arc<dyn LogFormatter>,
        mode: RenderMode,
        max_message_size: usize,
        recycle_resources: bool,
    ) -> Self {
        Self {
            metadata,
            formatter,
            mode,
            max_message_size,
            buffers: BufferPool::new(recycle_resources),
        }
    }

    /// Renderer with the default formatter, configured from `config`.
    #[must_use]
    pub fn from_config(config: &SinkConfig) -> Self {
        Self::new(
            Metadata::from_config(config),
            Arc::new(DatadogJsonFormatter::default()),
            config.render_mode,
            config.max_message_size,
            config.transport.recycle_resources,
        )
    }

    #[must_use]
    pub fn with_formatter(mut self, formatter: Arc<dyn LogFormatter>) -> Self {
        self.formatter = formatter;
        self
    }

    #[must_use]
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Renders `event` into one record, or several fragment records when it
    /// exceeds the maximum message size.
    pub fn render(&self, event: &LogEvent) -> Result<Vec<String>, RenderError> {
        let formatted = self.formatter.format(event);
        let envelope = self.metadata.envelope(&formatted);

        let (record, text) = match self.mode {
            RenderMode::Structured => {
                let mut record = formatted;
                self.metadata.merge_into(&mut record);
                let text = self.serialize(&record)?;
                (text.clone(), text)
            }
            RenderMode::Wrapped => {
                let text = self.serialize(&formatted)?;
                let record = self.wrap(&envelope, text.clone())?;
                (record, text)
            }
        };

        if record.len() <= self.max_message_size {
            return Ok(vec![record]);
        }

        let overhead = self.wrap(&envelope, String::new())?.len();
        let usable = self
            .max_message_size
            .saturating_sub(overhead)
            .saturating_sub(2 * TRUNCATION_MARKER.len());
        let too_big = RenderError::TooBig {
            size: record.len(),
            max: self.max_message_size,
        };
        let fragments = split_message(&text, usable).ok_or(too_big)?;

        let last = fragments.len() - 1;
        fragments
            .iter()
            .enumerate()
            .map(|(i, fragment)| {
                let mut message = String::with_capacity(fragment.len() + 2 * TRUNCATION_MARKER.len());
                if i > 0 {
                    message.push_str(TRUNCATION_MARKER);
                }
                message.push_str(fragment);
                if i < last {
                    message.push_str(TRUNCATION_MARKER);
                }
                self.wrap(&envelope, message)
            })
            .collect()
    }

    fn wrap(&self, envelope: &Map<String, Value>, message: String) -> Result<String, RenderError> {
        let mut record = envelope.clone();
        record.insert("message".to_string(), Value::String(message));
        self.serialize(&record)
    }

    fn serialize(&self, record: &Map<String, Value>) -> Result<String, RenderError> {
        self.buffers.with_buffer(|buf| {
            serde_json::to_writer(&mut *buf, record)
                .map_err(|e| RenderError::Serialize(e.to_string()))?;
            String::from_utf8(buf.clone()).map_err(|e| RenderError::Serialize(e.to_string()))
        })
    }
}

/// Size of `c` once written inside a JSON string.
#[must_use]
pub fn escaped_char_len(c: char) -> usize {
    match c {
        '"' | '\\' | '\n' | '\r' | '\t' | '\u{08}' | '\u{0c}' => 2,
        c if (c as u32) < 0x20 => 6,
        c => c.len_utf8(),
    }
}

/// Size of `text` once written inside a JSON string, quotes excluded.
#[must_use]
pub fn escaped_len(text: &str) -> usize {
    text.chars().map(escaped_char_len).sum()
}

/// Cuts `text` into fragments whose escaped size is at most `usable` bytes.
///
/// Returns `None` when `usable` cannot hold the next character.
#[must_use]
pub fn split_message(text: &str, usable: usize) -> Option<Vec<&str>> {
    let mut fragments = Vec::new();
    let mut start = 0;
    let mut size = 0;

    for (index, c) in text.char_indices() {
        let len = escaped_char_len(c);
        if len > usable {
            return None;
        }
        if size + len > usable {
            fragments.push(&text[start..index]);
            start = index;
            size = 0;
        }
        size += len;
    }
    if start < text.len() || fragments.is_empty() {
        fragments.push(&text[start..]);
    }
    Some(fragments)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::event::Level;
    use proptest::prelude::*;
    use serde_json::json;

    fn metadata() -> Metadata {
        Metadata {
            source: "rust".to_string(),
            service: Some("checkout".to_string()),
            host: Some("web-1".to_string()),
            tags: Some("env:prod,team:logs".to_string()),
        }
    }

    fn renderer(mode: RenderMode, max: usize) -> LogRenderer {
        LogRenderer::new(
            metadata(),
            Arc::new(DatadogJsonFormatter::default()),
            mode,
            max,
            false,
        )
    }

    fn message_of(record: &str) -> String {
        let value: Value = serde_json::from_str(record).unwrap();
        value["message"].as_str().unwrap().to_string()
    }

    fn strip_markers(message: &str) -> &str {
        let message = message.strip_prefix(TRUNCATION_MARKER).unwrap_or(message);
        message.strip_suffix(TRUNCATION_MARKER).unwrap_or(message)
    }

    #[test]
    fn test_structured_merges_metadata() {
        let event = LogEvent::new(Level::Information, "hello");
        let records = renderer(RenderMode::Structured, 256_000).render(&event).unwrap();

        assert_eq!(records.len(), 1);
        let value: Value = serde_json::from_str(&records[0]).unwrap();
        assert_eq!(value["ddsource"], "rust");
        assert_eq!(value["service"], "checkout");
        assert_eq!(value["host"], "web-1");
        assert_eq!(value["ddtags"], "env:prod,team:logs");
        assert_eq!(value["message"], "hello");
    }

    #[test]
    fn test_event_values_win_over_metadata() {
        let event = LogEvent::new(Level::Information, "hello")
            .with_property("service", "billing")
            .with_property("ddsource", "worker");
        let records = renderer(RenderMode::Structured, 256_000).render(&event).unwrap();

        let value: Value = serde_json::from_str(&records[0]).unwrap();
        assert_eq!(value["service"], "billing");
        assert_eq!(value["ddsource"], "worker");
        assert_eq!(value["host"], "web-1");
    }

    #[test]
    fn test_wrapped_mode_envelope() {
        let event = LogEvent::new(Level::Information, "hello").with_property("host", "override");
        let records = renderer(RenderMode::Wrapped, 256_000).render(&event).unwrap();

        let value: Value = serde_json::from_str(&records[0]).unwrap();
        let keys: Vec<&String> = value.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["ddsource", "service", "host", "ddtags", "message"]);
        assert_eq!(value["host"], "override");

        let inner: Value = serde_json::from_str(value["message"].as_str().unwrap()).unwrap();
        assert_eq!(inner["message"], "hello");
        assert_eq!(inner["level"], "Information");
        assert!(inner.get("service").is_none());
    }

    #[test]
    fn test_oversized_record_is_split_into_two_fragments() {
        let event = LogEvent::new(Level::Information, "x".repeat(300_000));
        let records = renderer(RenderMode::Structured, 256_000)
            .with_formatter(Arc::new(DatadogJsonFormatter::without_rendered_message()))
            .render(&event)
            .unwrap();

        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.len() <= 256_000));

        let first = message_of(&records[0]);
        let second = message_of(&records[1]);
        assert!(first.ends_with(TRUNCATION_MARKER) && !first.starts_with(TRUNCATION_MARKER));
        assert!(second.starts_with(TRUNCATION_MARKER) && !second.ends_with(TRUNCATION_MARKER));

        let rebuilt = format!("{}{}", strip_markers(&first), strip_markers(&second));
        let original: Value = serde_json::from_str(&rebuilt).unwrap();
        assert_eq!(original["MessageTemplate"], "x".repeat(300_000));
        assert!(original.get("message").is_none());
    }

    #[test]
    fn test_default_formatter_doubles_text_into_three_fragments() {
        let event = LogEvent::new(Level::Information, "x".repeat(300_000));
        let records = renderer(RenderMode::Structured, 256_000).render(&event).unwrap();

        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.len() <= 256_000));
        let middle = message_of(&records[1]);
        assert!(middle.starts_with(TRUNCATION_MARKER) && middle.ends_with(TRUNCATION_MARKER));

        let rebuilt: String = records
            .iter()
            .map(|r| strip_markers(&message_of(r)).to_string())
            .collect();
        let original: Value = serde_json::from_str(&rebuilt).unwrap();
        assert_eq!(original["message"], "x".repeat(300_000));
        assert_eq!(original["MessageTemplate"], "x".repeat(300_000));
    }

    #[test]
    fn test_interior_fragments_have_both_markers() {
        let event = LogEvent::new(Level::Information, "y".repeat(5_000));
        let records = renderer(RenderMode::Wrapped, 1_000).render(&event).unwrap();

        assert!(records.len() > 2);
        for record in &records[1..records.len() - 1] {
            let message = message_of(record);
            assert!(message.starts_with(TRUNCATION_MARKER));
            assert!(message.ends_with(TRUNCATION_MARKER));
        }
        assert!(records.iter().all(|r| r.len() <= 1_000));
    }

    #[test]
    fn test_no_usable_budget_is_too_big() {
        let event = LogEvent::new(Level::Information, "z".repeat(500));
        let result = renderer(RenderMode::Structured, 120).render(&event);

        assert!(matches!(result, Err(RenderError::TooBig { max: 120, .. })));
    }

    #[test]
    fn test_recycled_buffers_render_identically() {
        let event = LogEvent::new(Level::Debug, "same {x}").with_property("x", 1);
        let allocate = renderer(RenderMode::Structured, 256_000).render(&event).unwrap();
        let recycle = LogRenderer::new(
            metadata(),
            Arc::new(DatadogJsonFormatter::default()),
            RenderMode::Structured,
            256_000,
            true,
        );

        assert_eq!(recycle.render(&event).unwrap(), allocate);
        assert_eq!(recycle.render(&event).unwrap(), allocate);
    }

    #[test]
    fn test_custom_formatter() {
        let formatter = |event: &LogEvent| {
            let mut record = Map::new();
            record.insert("msg".to_string(), event.render_message().into());
            record
        };
        let renderer = renderer(RenderMode::Structured, 256_000).with_formatter(Arc::new(formatter));
        let records = renderer.render(&LogEvent::new(Level::Information, "custom")).unwrap();

        let value: Value = serde_json::from_str(&records[0]).unwrap();
        assert_eq!(value["msg"], "custom");
        assert_eq!(value["ddsource"], "rust");
    }

    #[test]
    fn test_metadata_from_config() {
        let config = SinkConfig {
            service: Some(" ".to_string()),
            tags: vec!["a:1".to_string(), "b:2".to_string()],
            ..SinkConfig::new("key")
        };
        let metadata = Metadata::from_config(&config);

        assert_eq!(metadata.source, "rust");
        assert_eq!(metadata.service, None);
        assert_eq!(metadata.tags.as_deref(), Some("a:1,b:2"));

        let mut record = Map::new();
        record.insert("ddtags".to_string(), json!("mine"));
        metadata.merge_into(&mut record);
        assert_eq!(record["ddtags"], "mine");
        assert_eq!(record["ddsource"], "rust");
    }

    #[test]
    fn test_escaped_len() {
        assert_eq!(escaped_len("abc"), 3);
        assert_eq!(escaped_len("a\"b\\"), 6);
        assert_eq!(escaped_len("\n\u{01}"), 8);
        assert_eq!(escaped_len("é"), 2);
        assert_eq!(
            escaped_len("tab\there"),
            serde_json::to_string("tab\there").unwrap().len() - 2
        );
    }

    #[test]
    fn test_split_message_edge_cases() {
        assert_eq!(split_message("", 10), Some(vec![""]));
        assert_eq!(split_message("abc", 0), None);
        assert_eq!(split_message("abcdef", 4), Some(vec!["abcd", "ef"]));
        assert_eq!(split_message("ééé", 3), Some(vec!["é", "é", "é"]));
        assert_eq!(split_message("\u{01}", 5), None);
    }

    proptest! {
        #[test]
        fn prop_plain_fragments_reconstruct_and_count(message in "[a-zA-Z0-9 ]{1,2000}", usable in 1usize..300) {
            let fragments = split_message(&message, usable).unwrap();

            prop_assert_eq!(fragments.concat(), message.clone());
            prop_assert_eq!(fragments.len(), message.len().div_ceil(usable));
            prop_assert!(fragments.iter().all(|f| escaped_len(f) <= usable));
        }

        #[test]
        fn prop_any_text_fragments_fit(message in "\\PC{0,500}", usable in 6usize..200) {
            let fragments = split_message(&message, usable).unwrap();

            prop_assert_eq!(fragments.concat(), message.clone());
            prop_assert!(fragments.iter().all(|f| escaped_len(f) <= usable));
        }

        #[test]
        fn prop_rendered_records_fit_and_reconstruct(
            text in "[a-z\"\\\\ ]{0,3000}",
            max in 300usize..2_000,
            wrapped in any::<bool>(),
        ) {
            let mode = if wrapped { RenderMode::Wrapped } else { RenderMode::Structured };
            let renderer = renderer(mode, max);
            let event = LogEvent::new(Level::Information, text.clone());
            let records = renderer.render(&event).unwrap();

            for record in &records {
                prop_assert!(record.len() <= max);
                let value: Value = serde_json::from_str(record).unwrap();
                prop_assert_eq!(&value["ddsource"], "rust");
                prop_assert_eq!(&value["service"], "checkout");
            }

            if records.len() > 1 {
                let rebuilt: String = records
                    .iter()
                    .map(|r| strip_markers(&message_of(r)).to_string())
                    .collect();
                let original: Value = serde_json::from_str(&rebuilt).unwrap();
                prop_assert_eq!(&original["message"], &Value::String(text));
            }
        }
    }
}
