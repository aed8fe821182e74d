// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log events as handed to the sink by the host logging framework.
//!
//! A [`LogEvent`] is immutable once it reaches the sink. The pipeline shares it
//! as `Arc<LogEvent>` so that a failed chunk can hand the exact events it carried
//! back to the failure callback without copying them.

use std::error::Error;
use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Severity of a log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Level {
    Verbose,
    Debug,
    Information,
    Warning,
    Error,
    Fatal,
}

impl Level {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Verbose => "Verbose",
            Level::Debug => "Debug",
            Level::Information => "Information",
            Level::Warning => "Warning",
            Level::Error => "Error",
            Level::Fatal => "Fatal",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&tracing::Level> for Level {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::TRACE => Level::Verbose,
            tracing::Level::DEBUG => Level::Debug,
            tracing::Level::INFO => Level::Information,
            tracing::Level::WARN => Level::Warning,
            tracing::Level::ERROR => Level::Error,
        }
    }
}

/// An error attached to a log event, with its chain of causes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionInfo {
    pub type_name: Option<String>,
    pub message: String,
    pub source: Option<Box<ExceptionInfo>>,
}

impl ExceptionInfo {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            type_name: None,
            message: message.into(),
            source: None,
        }
    }

    #[must_use]
    pub fn with_type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: ExceptionInfo) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Captures an error and every `source()` below it.
    pub fn from_error(error: &(dyn Error + 'static)) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(cause) = current {
            messages.push(cause.to_string());
            current = cause.source();
        }

        let mut chain: Option<ExceptionInfo> = None;
        for message in messages.into_iter().rev() {
            let mut info = ExceptionInfo::new(message);
            info.source = chain.map(Box::new);
            chain = Some(info);
        }
        chain.unwrap_or_else(|| ExceptionInfo::new(String::new()))
    }
}

impl fmt::Display for ExceptionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(type_name) = &self.type_name {
            write!(f, "{type_name}: ")?;
        }
        f.write_str(&self.message)?;
        if let Some(source) = &self.source {
            write!(f, "\n ---> {source}")?;
        }
        Ok(())
    }
}

/// One structured log event.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    timestamp: SystemTime,
    level: Level,
    message_template: String,
    rendered_message: Option<String>,
    properties: Map<String, Value>,
    exception: Option<ExceptionInfo>,
}

impl LogEvent {
    /// Creates an event stamped with the current time.
    pub fn new(level: Level, message_template: impl Into<String>) -> Self {
        Self {
            timestamp: SystemTime::now(),
            level,
            message_template: message_template.into(),
            rendered_message: None,
            properties: Map::new(),
            exception: None,
        }
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Adds a property. A second property with the same name replaces the
    /// first one in place, so keys stay unique and ordered.
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Overrides the message that would otherwise be rendered from the template.
    #[must_use]
    pub fn with_rendered_message(mut self, message: impl Into<String>) -> Self {
        self.rendered_message = Some(message.into());
        self
    }

    #[must_use]
    pub fn with_exception(mut self, exception: ExceptionInfo) -> Self {
        self.exception = Some(exception);
        self
    }

    #[must_use]
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Timestamp in RFC 3339 format, e.g. `2024-01-15T10:30:00.123Z`.
    #[must_use]
    pub fn timestamp_rfc3339(&self) -> String {
        OffsetDateTime::from(self.timestamp)
            .format(&Rfc3339)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn level(&self) -> Level {
        self.level
    }

    #[must_use]
    pub fn message_template(&self) -> &str {
        &self.message_template
    }

    #[must_use]
    pub fn properties(&self) -> &Map<String, Value> {
        &self.properties
    }

    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    #[must_use]
    pub fn exception(&self) -> Option<&ExceptionInfo> {
        self.exception.as_ref()
    }

    /// The message with `{Name}` holes of the template filled from properties.
    ///
    /// Holes may carry a capture hint (`{@Name}`, `{$Name}`) or a format
    /// (`{Name:000}`); both are ignored. Unknown names and `{{`/`}}` escapes are
    /// written back verbatim.
    #[must_use]
    pub fn render_message(&self) -> String {
        if let Some(message) = &self.rendered_message {
            return message.clone();
        }
        render_template(&self.message_template, &self.properties)
    }
}

fn render_template(template: &str, properties: &Map<String, Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open].replace("}}", "}"));
        let after = &rest[open + 1..];

        if let Some(stripped) = after.strip_prefix('{') {
            out.push('{');
            rest = stripped;
            continue;
        }

        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };

        let hole = &after[..close];
        let name = hole
            .trim_start_matches(['@', '$'])
            .split([':', ','])
            .next()
            .unwrap_or_default();

        match properties.get(name) {
            Some(Value::String(s)) => out.push_str(s),
            Some(value) => out.push_str(&value.to_string()),
            None => {
                out.push('{');
                out.push_str(hole);
                out.push('}');
            }
        }
        rest = &after[close + 1..];
    }

    out.push_str(&rest.replace("}}", "}"));
    out
}
