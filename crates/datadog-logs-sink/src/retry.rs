// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Retry loop shared by every transport.
//!
//! A transport only knows how to make one attempt and classify its result as an
//! [`AttemptOutcome`]. [`deliver`] drives attempts for one chunk, sleeps between
//! retryable failures and folds everything into a terminal [`DeliveryOutcome`].
//!
//! # Backoff
//!
//! | Policy | Delay before retry `n` (n ≥ 1) |
//! | --- | --- |
//! | `Exponential` (HTTP default) | `min(2^n, max_backoff) × unit` |
//! | `Quadratic` (TCP default) | `min(n^2, max_backoff) × unit` |
//!
//! The first attempt is never delayed. Both the delays and the attempts
//! themselves are abandoned as soon as the abort token is cancelled.

use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::AttemptError;
use crate::transport::{AttemptOutcome, LogTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffPolicy {
    Exponential,
    Quadratic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per chunk, the first one included.
    pub max_attempts: usize,
    pub backoff: BackoffPolicy,
    pub unit: Duration,
    /// Cap on the delay, in units.
    pub max_backoff: u32,
}

impl RetryPolicy {
    /// Delay to wait before retry number `retry` (the second attempt is retry 1).
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let steps = match self.backoff {
            BackoffPolicy::Exponential => 2u32.checked_pow(retry).unwrap_or(u32::MAX),
            BackoffPolicy::Quadratic => retry.saturating_mul(retry),
        };
        self.unit.saturating_mul(steps.min(self.max_backoff))
    }
}

/// Terminal result of delivering one chunk.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryOutcome {
    #[error("delivered after {attempts} attempt(s)")]
    Delivered { attempts: usize },

    /// The intake refused the payload; it was not retried.
    #[error("rejected after {attempts} attempt(s): {error}")]
    Rejected { attempts: usize, error: AttemptError },

    #[error("gave up after {attempts} attempt(s): {last_error}")]
    Exhausted {
        attempts: usize,
        last_error: AttemptError,
    },

    /// Shutdown aborted the delivery before it settled. `attempts` counts the
    /// attempts that completed before the abort.
    #[error("cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: usize },
}

impl DeliveryOutcome {
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }

    #[must_use]
    pub fn attempts(&self) -> usize {
        match self {
            DeliveryOutcome::Delivered { attempts }
            | DeliveryOutcome::Rejected { attempts, .. }
            | DeliveryOutcome::Exhausted { attempts, .. }
            | DeliveryOutcome::Cancelled { attempts } => *attempts,
        }
    }
}

/// Sends `payload` through `transport` until it succeeds, fails fatally, runs
/// out of attempts or `abort` is cancelled.
pub async fn deliver(
    transport: &dyn LogTransport,
    payload: &Bytes,
    policy: &RetryPolicy,
    abort: &CancellationToken,
) -> DeliveryOutcome {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts = 0;
    let mut retry: u32 = 0;

    loop {
        let outcome = tokio::select! {
            biased;
            () = abort.cancelled() => return DeliveryOutcome::Cancelled { attempts },
            outcome = transport.attempt(payload) => outcome,
        };
        attempts += 1;

        let error = match outcome {
            AttemptOutcome::Success => return DeliveryOutcome::Delivered { attempts },
            AttemptOutcome::Fatal(error) => {
                warn!("LOGS | Payload rejected by the intake, not retrying: {}", error);
                return DeliveryOutcome::Rejected { attempts, error };
            }
            AttemptOutcome::Retryable(error) => error,
        };

        if attempts >= max_attempts {
            warn!(
                "LOGS | Failed to send payload after {} attempts: {}",
                attempts, error
            );
            return DeliveryOutcome::Exhausted {
                attempts,
                last_error: error,
            };
        }

        retry = retry.saturating_add(1);
        let delay = policy.delay_for(retry);
        debug!(
            "LOGS | Attempt {} failed ({}), retrying in {:?}",
            attempts, error, delay
        );

        tokio::select! {
            biased;
            () = abort.cancelled() => return DeliveryOutcome::Cancelled { attempts },
            () = tokio::time::sleep(delay) => {}
        }
    }
}
