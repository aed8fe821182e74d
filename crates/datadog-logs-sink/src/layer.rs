// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! `tracing` integration.
//!
//! [`DatadogLayer`] turns every `tracing` event into a [`LogEvent`] and hands it
//! to a [`SinkHandle`]. The `message` field becomes the message; every other
//! field becomes a property, and a field recorded as an error becomes the
//! event's exception. The event's target is kept as the `logger.name` property.
//!
//! Events from this crate and from the HTTP/TLS stack it sends with are
//! ignored so the sink never ships its own diagnostics.

use std::error::Error;
use std::fmt;

use serde_json::{Map, Value};
use tracing_core::field::{Field, Visit};
use tracing_core::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::event::{ExceptionInfo, Level, LogEvent};
use crate::sink::SinkHandle;

const IGNORED_TARGETS: [&str; 8] = [
    "datadog_logs_sink",
    "hyper",
    "hyper_util",
    "reqwest",
    "rustls",
    "h2",
    "tokio_rustls",
    "mio",
];

pub const LOGGER_NAME_PROPERTY: &str = "logger.name";

#[derive(Clone, Debug)]
pub struct DatadogLayer {
    handle: SinkHandle,
}

impl DatadogLayer {
    #[must_use]
    pub fn new(handle: SinkHandle) -> Self {
        DatadogLayer { handle }
    }
}

fn is_ignored(target: &str) -> bool {
    IGNORED_TARGETS.iter().any(|ignored| {
        target
            .strip_prefix(ignored)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
    })
}

impl<S: Subscriber> Layer<S> for DatadogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if is_ignored(metadata.target()) {
            return;
        }

        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);

        let message = visitor.message.unwrap_or_default();
        let mut log_event = LogEvent::new(Level::from(metadata.level()), message.clone())
            .with_rendered_message(message)
            .with_property(LOGGER_NAME_PROPERTY, metadata.target());
        for (name, value) in visitor.properties {
            log_event = log_event.with_property(name, value);
        }
        if let Some(exception) = visitor.exception {
            log_event = log_event.with_exception(exception);
        }

        self.handle.emit(log_event);
    }
}

#[derive(Default)]
struct EventVisitor {
    message: Option<String>,
    properties: Map<String, Value>,
    exception: Option<ExceptionInfo>,
}

impl EventVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        self.properties.insert(field.name().to_string(), value);
    }
}

impl Visit for EventVisitor {
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::from(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.insert(field, Value::from(value));
        }
    }

    fn record_error(&mut self, field: &Field, value: &(dyn Error + 'static)) {
        self.exception = Some(ExceptionInfo::from_error(value));
        self.insert(field, Value::from(value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{value:?}"));
        } else {
            self.insert(field, Value::from(format!("{value:?}")));
        }
    }
}
