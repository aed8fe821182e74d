// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Conversion of a [`LogEvent`] into a JSON object.
//!
//! The default [`DatadogJsonFormatter`] produces:
//!
//! ```json
//! {
//!   "Timestamp": "2024-01-15T10:30:00.123Z",
//!   "level": "Information",
//!   "MessageTemplate": "User {user} logged in",
//!   "message": "User alice logged in",
//!   "Exception": "request failed\n ---> connection reset",
//!   "service": "checkout",
//!   "Properties": { "user": "alice" }
//! }
//! ```
//!
//! Event properties named like a reserved intake attribute (`ddsource`,
//! `service`, `host`, `ddtags`) are written at the root instead of under
//! `Properties`, where the renderer lets them win over configured metadata.

use serde_json::{Map, Value};

use crate::event::LogEvent;

/// Attributes the intake reads from the root of a record.
pub const RESERVED_ATTRIBUTES: [&str; 4] = ["ddsource", "service", "host", "ddtags"];

/// Turns an event into the JSON object that becomes (or is wrapped into) the
/// record sent to the intake.
///
/// Implement it to change the record layout; wrapping [`DatadogJsonFormatter`]
/// and editing its output is the simplest way to post-process the default.
pub trait LogFormatter: Send + Sync {
    fn format(&self, event: &LogEvent) -> Map<String, Value>;
}

#[derive(Debug, Clone, Copy)]
pub struct DatadogJsonFormatter {
    render_message: bool,
}

impl Default for DatadogJsonFormatter {
    fn default() -> Self {
        Self {
            render_message: true,
        }
    }
}

impl DatadogJsonFormatter {
    /// Leaves out the rendered `message`, keeping only the template.
    #[must_use]
    pub fn without_rendered_message() -> Self {
        Self {
            render_message: false,
        }
    }
}

impl LogFormatter for DatadogJsonFormatter {
    fn format(&self, event: &LogEvent) -> Map<String, Value> {
        let mut record = Map::new();
        record.insert("Timestamp".to_string(), event.timestamp_rfc3339().into());
        record.insert("level".to_string(), event.level().as_str().into());
        record.insert(
            "MessageTemplate".to_string(),
            event.message_template().into(),
        );
        if self.render_message {
            record.insert("message".to_string(), event.render_message().into());
        }
        if let Some(exception) = event.exception() {
            record.insert("Exception".to_string(), exception.to_string().into());
        }

        let mut properties = Map::new();
        for (name, value) in event.properties() {
            if RESERVED_ATTRIBUTES.contains(&name.as_str()) {
                record.insert(name.clone(), value.clone());
            } else {
                properties.insert(name.clone(), value.clone());
            }
        }
        if !properties.is_empty() {
            record.insert("Properties".to_string(), Value::Object(properties));
        }

        record
    }
}

impl<F> LogFormatter for F
where
    F: Fn(&LogEvent) -> Map<String, Value> + Send + Sync,
{
    fn format(&self, event: &LogEvent) -> Map<String, Value> {
        self(event)
    }
}
