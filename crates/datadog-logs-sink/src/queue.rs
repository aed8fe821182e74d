// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::VecDeque;
use std::sync::Arc;

use crate::event::LogEvent;

/// Events buffered by the scheduler between flushes.
///
/// With a limit, a push into a full queue evicts the oldest event so the most
/// recent ones are kept; the evicted event is returned for reporting.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: VecDeque<Arc<LogEvent>>,
    limit: Option<usize>,
}

impl EventQueue {
    #[must_use]
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            events: VecDeque::new(),
            limit,
        }
    }

    /// Appends `event`, returning the event evicted to make room, if any.
    pub fn push(&mut self, event: Arc<LogEvent>) -> Option<Arc<LogEvent>> {
        let evicted = match self.limit {
            Some(limit) if self.events.len() >= limit => self.events.pop_front(),
            _ => None,
        };
        self.events.push_back(event);
        evicted
    }

    /// Removes up to `max` of the oldest events.
    pub fn drain_up_to(&mut self, max: usize) -> Vec<Arc<LogEvent>> {
        let count = max.min(self.events.len());
        self.events.drain(..count).collect()
    }

    pub fn drain_all(&mut self) -> Vec<Arc<LogEvent>> {
        self.events.drain(..).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
