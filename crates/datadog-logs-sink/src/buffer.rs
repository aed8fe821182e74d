// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::{Mutex, PoisonError};

/// Scratch buffer strategy for rendering.
///
/// `Allocate` gives every render its own buffer, so renders never wait on each
/// other. `Recycle` keeps a single buffer per renderer and serializes renders
/// through it, trading throughput for fewer allocations.
#[derive(Debug)]
pub enum BufferPool {
    Allocate,
    Recycle(Mutex<Vec<u8>>),
}

impl BufferPool {
    #[must_use]
    pub fn new(recycle: bool) -> Self {
        if recycle {
            BufferPool::Recycle(Mutex::new(Vec::new()))
        } else {
            BufferPool::Allocate
        }
    }

    /// Runs `f` with an empty buffer.
    pub fn with_buffer<R>(&self, f: impl FnOnce(&mut Vec<u8>) -> R) -> R {
        match self {
            BufferPool::Allocate => f(&mut Vec::new()),
            BufferPool::Recycle(buffer) => {
                let mut buffer = buffer.lock().unwrap_or_else(PoisonError::into_inner);
                buffer.clear();
                let result = f(&mut buffer);
                buffer.clear();
                result
            }
        }
    }
}
