//! Retry policy with exponential backoff for reconcile failures
//!
//! There is a single reconcile target (the gateway), so the policy only
//! counts consecutive failures. A success resets the count.

use std::time::Duration;

use tracing::{debug, warn};

/// Consecutive transient failures before waiting for a change instead
const MAX_RETRIES: u32 = 10;

/// Base delay for exponential backoff (seconds)
const BASE_DELAY_SECS: u64 = 5;

/// Upper bound on the delay between retries
const MAX_DELAY_SECS: u64 = 3600;

/// Error classification for retry behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// May succeed on a later attempt without any cluster change
    /// (gateway API unreachable, endpoints not yet populated)
    Transient,
    /// Needs a change to the inputs (invalid ingress, missing frontend IP)
    Permanent,
}

/// Consecutive failure counter
#[derive(Debug, Default)]
pub struct RetryTracker {
    attempts: u32,
}

impl RetryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a failure and return the attempt number
    pub fn increment(&mut self) -> u32 {
        self.attempts = self.attempts.saturating_add(1);
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn get(&self) -> u32 {
        self.attempts
    }
}

/// Delay before retrying, or `None` to wait for the next change or resync
pub fn compute_backoff(attempt: u32, kind: ErrorKind) -> Option<Duration> {
    match kind {
        ErrorKind::Transient if attempt >= MAX_RETRIES => {
            warn!(
                attempt,
                max_retries = MAX_RETRIES,
                "Max retries exceeded, waiting for a change"
            );
            None
        }
        ErrorKind::Transient => {
            // 5s, 10s, 20s, 40s, ... capped at one hour
            let delay_secs = BASE_DELAY_SECS.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
            let capped = delay_secs.min(MAX_DELAY_SECS);
            debug!(attempt, delay_secs = capped, "Scheduling retry with exponential backoff");
            Some(Duration::from_secs(capped))
        }
        ErrorKind::Permanent => {
            warn!("Permanent error, waiting for a change");
            None
        }
    }
}
