//! Retry/backoff decisions, kept free of I/O.
//!
//! Each page runs a small state machine:
//!
//! ```text
//! ATTEMPT ──ok──────────────────────────▶ SUCCEED
//!    │
//!    ├─retryable, attempt < max──▶ WAIT(delay) ──▶ ATTEMPT
//!    ├─retryable, attempt = max──▶ FAIL (exhausted)
//!    └─terminal─────────────────▶ FAIL
//! ```
//!
//! [`decide`] is the transition function. It sees only the attempt number,
//! the outcome of that attempt, the policy, and a jitter sample, so every
//! branch is testable without a network or a clock. The driver that sleeps
//! and calls the backend lives in [`crate::pipeline::llm`].

use crate::config::RetryPolicy;
use crate::error::BackendError;
use std::time::Duration;

/// Ceiling applied to server-requested `Retry-After` delays.
pub const MAX_SERVER_DELAY: Duration = Duration::from_secs(60);

/// What to do after one attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// The attempt produced text.
    Succeed(String),
    /// Sleep for the given delay, then attempt again.
    Retry(Duration),
    /// Stop. `exhausted` is true when a retryable failure hit the attempt bound.
    Fail {
        error: BackendError,
        exhausted: bool,
    },
}

/// Transition function of the per-page retry state machine.
///
/// `attempt` is the 1-indexed number of the attempt that produced `outcome`.
/// `jitter_sample` must lie in `[0, 1)`.
pub fn decide(
    attempt: u32,
    outcome: Result<String, BackendError>,
    policy: &RetryPolicy,
    jitter_sample: f64,
) -> Decision {
    let error = match outcome {
        Ok(text) => return Decision::Succeed(text),
        Err(e) => e,
    };

    if !error.is_retryable() {
        return Decision::Fail {
            error,
            exhausted: false,
        };
    }
    if attempt >= policy.max_attempts {
        return Decision::Fail {
            error,
            exhausted: true,
        };
    }

    let mut delay = policy.backoff.delay(attempt, jitter_sample);
    if let Some(secs) = error.retry_after_secs() {
        delay = delay.max(Duration::from_secs(secs).min(MAX_SERVER_DELAY));
    }
    Decision::Retry(delay)
}
