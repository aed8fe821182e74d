// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Failure reporting.
//!
//! Every event the sink gives up on ends here, wrapped in a [`LogEventError`].
//! The registered callback receives it; without one the failure is logged as an
//! `error!` so it is never lost silently. The callback runs on the sink's
//! background task and must not block. A panicking callback is caught and
//! logged, and the pipeline carries on.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::error;

use crate::error::LogEventError;

pub type ExceptionHandler = Arc<dyn Fn(&LogEventError) + Send + Sync>;

#[derive(Clone, Default)]
pub struct FailureReporter {
    handler: Option<ExceptionHandler>,
}

impl fmt::Debug for FailureReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailureReporter")
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

impl FailureReporter {
    #[must_use]
    pub fn new(handler: Option<ExceptionHandler>) -> Self {
        Self { handler }
    }

    pub fn report(&self, failure: LogEventError) {
        let Some(handler) = &self.handler else {
            error!("LOGS | {}", failure);
            return;
        };

        if catch_unwind(AssertUnwindSafe(|| handler(&failure))).is_err() {
            error!("LOGS | Exception handler panicked while handling: {}", failure);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::DropReason;
    use crate::event::{Level, LogEvent};
    use std::sync::Mutex;
    use tracing_test::traced_test;

    fn failure() -> LogEventError {
        LogEventError::Dropped {
            events: vec![Arc::new(LogEvent::new(Level::Information, "lost"))],
            reason: DropReason::Shutdown,
        }
    }

    #[test]
    fn test_handler_receives_failure() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let reporter = FailureReporter::new(Some(Arc::new(move |err: &LogEventError| {
            sink.lock().unwrap().push(err.events().len());
        })));

        reporter.report(failure());

        assert_eq!(*received.lock().unwrap(), vec![1]);
    }

    #[test]
    #[traced_test]
    fn test_without_handler_logs_error() {
        FailureReporter::default().report(failure());
        assert!(logs_contain("Dropped 1 event(s): sink is shutting down"));
    }

    #[test]
    #[traced_test]
    fn test_panicking_handler_is_contained() {
        let reporter = FailureReporter::new(Some(Arc::new(|_: &LogEventError| {
            panic!("callback bug");
        })));

        reporter.report(failure());

        assert!(logs_contain("Exception handler panicked"));
    }
}
