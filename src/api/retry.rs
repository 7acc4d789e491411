//! Retry policy with backoff for transient API failures.
//!
//! Failures are classified into a [`FailureType`], and the [`RetryPolicy`]
//! decides whether to re-issue the call and how long to wait first. Two
//! backoff curves are used:
//!
//! - rate-limit responses (HTTP 429) back off exponentially (`2^attempt`)
//! - server errors, timeouts and network failures back off linearly
//!
//! Permanent failures (other 4xx, malformed responses) are never retried.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use super::error::ApiError;

/// Default maximum attempts, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Base delay for the exponential (rate-limited) curve.
const DEFAULT_RATE_LIMIT_BASE: Duration = Duration::from_secs(2);

/// Step for the linear (transient) curve.
const DEFAULT_TRANSIENT_STEP: Duration = Duration::from_secs(1);

/// Cap applied to any computed delay.
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Maximum jitter added to delays.
const MAX_JITTER: Duration = Duration::from_millis(500);

/// Classification of an API call failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry (5xx, timeout, network).
    Transient,

    /// Failure that won't succeed regardless of retries (4xx other than 429,
    /// malformed response).
    Permanent,

    /// Server rate limiting (HTTP 429); retried with exponential backoff.
    RateLimited,
}

/// Decision on whether to re-issue a failed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the given delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Configuration for retry behavior.
///
/// Delay curves:
///
/// ```text
/// rate-limited: min(base * 2^(attempt-1), cap) + jitter
/// transient:    min(step * attempt,       cap) + jitter
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the initial one.
    max_attempts: u32,

    /// Base delay for the exponential rate-limit curve.
    rate_limit_base: Duration,

    /// Step for the linear transient curve.
    transient_step: Duration,

    /// Maximum delay cap.
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            rate_limit_base: DEFAULT_RATE_LIMIT_BASE,
            transient_step: DEFAULT_TRANSIENT_STEP,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Creates a retry policy with custom settings.
    ///
    /// `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(
        max_attempts: u32,
        rate_limit_base: Duration,
        transient_step: Duration,
        max_delay: Duration,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            rate_limit_base,
            transient_step,
            max_delay,
        }
    }

    /// Creates a policy with a custom attempt ceiling, defaults elsewhere.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Determines whether to retry a failed call.
    ///
    /// `attempt` is the 1-indexed attempt number that just failed.
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if failure_type == FailureType::Permanent {
            return RetryDecision::DoNotRetry {
                reason: "permanent failure - retry would not help".to_string(),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.calculate_delay(failure_type, attempt);

        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Calculates the backoff delay for the attempt that just failed.
    fn calculate_delay(&self, failure_type: FailureType, attempt: u32) -> Duration {
        let raw = match failure_type {
            FailureType::RateLimited => {
                // 2^(attempt-1) doublings of the base: 2s, 4s, 8s, ...
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1)).min(1 << 16);
                self.rate_limit_base.saturating_mul(factor)
            }
            FailureType::Transient | FailureType::Permanent => {
                self.transient_step.saturating_mul(attempt)
            }
        };

        raw.min(self.max_delay) + self.calculate_jitter()
    }

    /// Generates random jitter between 0 and [`MAX_JITTER`].
    ///
    /// Jitter prevents a thundering herd when many concurrent fetches fail
    /// at the same moment and retry together.
    #[allow(clippy::cast_possible_truncation)]
    fn calculate_jitter(&self) -> Duration {
        let mut rng = rand::thread_rng();
        let jitter_ms = rng.gen_range(0..=MAX_JITTER.as_millis() as u64);
        Duration::from_millis(jitter_ms)
    }
}

/// Classifies an API error into a failure type for retry decisions.
///
/// | Error | Type |
/// |-------|------|
/// | HTTP 429 | RateLimited |
/// | HTTP 408, 5xx | Transient |
/// | Other HTTP 4xx | Permanent |
/// | Timeout | Transient |
/// | Network | Transient |
/// | Malformed response | Permanent |
/// | Retries exhausted | Permanent |
#[instrument]
pub fn classify_error(error: &ApiError) -> FailureType {
    match error {
        ApiError::HttpStatus { status, .. } => classify_http_status(*status),
        ApiError::Timeout { .. } | ApiError::Network { .. } => FailureType::Transient,
        ApiError::MalformedResponse { .. } | ApiError::RetriesExhausted { .. } => {
            FailureType::Permanent
        }
    }
}

/// Classifies an HTTP status code into a failure type.
fn classify_http_status(status: u16) -> FailureType {
    match status {
        429 => FailureType::RateLimited,
        408 => FailureType::Transient,
        status if (500..600).contains(&status) => FailureType::Transient,
        status if (400..500).contains(&status) => FailureType::Permanent,
        _ => FailureType::Permanent,
    }
}
