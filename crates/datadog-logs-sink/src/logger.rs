// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Line formatter for the sink's own diagnostics.
//!
//! Hosts that print their `tracing` output to the console can install this
//! formatter so the sink's messages are easy to tell apart from application
//! logs:
//!
//! ```text
//! DD_LOGS_SINK | WARN | LOGS | Failed to send payload after 10 attempts: intake responded with HTTP 503
//! DD_LOGS_SINK | DEBUG | flush{generation=3}: LOGS | Flushed 2 chunk(s)
//! ```
//!
//! ```rust,ignore
//! let subscriber = tracing_subscriber::fmt()
//!     .event_format(datadog_logs_sink::logger::Formatter)
//!     .finish();
//! ```

use std::fmt;
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;

/// Prefixes every line with `DD_LOGS_SINK` and the level.
#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        write!(&mut writer, "DD_LOGS_SINK | {} | ", metadata.level())?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;

                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}
