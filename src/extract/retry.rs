//! Retry protocol for extraction calls.
//!
//! Backoff delay and input shrink factor are pure functions of the attempt
//! index; the control flow is an explicit state machine so the protocol is
//! testable without a clock or a service.

use std::time::Duration;

/// Bounded attempts against a rate-limited service.
pub const MAX_ATTEMPTS: u32 = 3;

/// Backoff before retrying attempt `attempt` (0-based): 2s, 4s, 6s...
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(2 * (u64::from(attempt) + 1))
}

/// Input scale factor for attempt `attempt` (0-based).
///
/// Each retry shrinks the payload as well as waiting — rate limits are often
/// token-driven, so a smaller payload raises the odds of the retry landing.
pub fn shrink_factor(attempt: u32) -> f64 {
    match attempt {
        0 => 1.0,
        1 => 0.6,
        2 => 0.35,
        _ => 0.25,
    }
}

/// State of one extraction call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// No attempt made yet.
    Idle,
    /// Attempt `n` (0-based) in flight.
    Attempting(u32),
    /// Call succeeded.
    Succeeded,
    /// Attempt `n` hit a transient failure; may be retried.
    FailedTransient(u32),
    /// Non-transient failure; terminal.
    FailedFatal,
}

impl RetryState {
    /// Start the first attempt.
    pub fn begin(self) -> RetryState {
        RetryState::Attempting(0)
    }

    pub fn on_success(self) -> RetryState {
        RetryState::Succeeded
    }

    pub fn on_transient_failure(self) -> RetryState {
        match self {
            RetryState::Attempting(n) => RetryState::FailedTransient(n),
            other => other,
        }
    }

    pub fn on_fatal_failure(self) -> RetryState {
        RetryState::FailedFatal
    }

    /// Next attempt after a transient failure, or `None` when the attempt
    /// budget is spent.
    pub fn retry(self) -> Option<RetryState> {
        match self {
            RetryState::FailedTransient(n) if n + 1 < MAX_ATTEMPTS => {
                Some(RetryState::Attempting(n + 1))
            }
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RetryState::Succeeded | RetryState::FailedFatal)
    }
}
