//! Bounded exponential-backoff retry for outbound platform calls.
//!
//! Every authenticated call the adapters make (search, post, reply) goes
//! through [`RetryExecutor::run`]. The retry loop is an explicit bounded
//! loop with an accumulated attempt count, so the retry budget is
//! independently testable and the call stack never grows.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Backoff multiplier applied to request timeouts.
const TIMEOUT_MULTIPLIER: u32 = 5;

/// Backoff multiplier applied to 5xx/transport failures.
const SERVER_MULTIPLIER: u32 = 2;

/// Classification of a single failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// HTTP 429 -- the platform asked us to slow down.
    RateLimited,
    /// Connect/read timeout.
    Timeout,
    /// HTTP 5xx or a transport-level failure.
    Server,
    /// Not retryable (other 4xx, malformed payloads).
    Permanent,
}

impl FailureClass {
    /// Whether another attempt may succeed.
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::Permanent)
    }
}

/// A failed attempt together with its classification.
#[derive(Debug)]
pub struct AttemptError<E> {
    /// How the failure is classified for backoff purposes.
    pub class: FailureClass,
    /// The underlying error.
    pub error: E,
}

impl<E> AttemptError<E> {
    /// Convenience constructor.
    pub fn new(class: FailureClass, error: E) -> Self {
        Self { class, error }
    }
}

/// Retry policy attached to one outbound-call type.
///
/// The delay before attempt `n + 1` is
/// `base_delay * 2^n * multiplier`, where the multiplier depends on the
/// failure class: [`RetryPolicy::rate_limit_multiplier`] for 429s, a fixed
/// factor of 5 for timeouts and 2 for server errors.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Base delay before the exponential factor is applied.
    pub base_delay: Duration,
    /// Multiplier applied when the platform rate-limits us.
    pub rate_limit_multiplier: u32,
}

impl RetryPolicy {
    /// Build a policy.
    pub const fn new(max_retries: u32, base_delay: Duration, rate_limit_multiplier: u32) -> Self {
        Self {
            max_retries,
            base_delay,
            rate_limit_multiplier,
        }
    }

    /// Delay to sleep after the given zero-based failed attempt.
    ///
    /// Always finite; saturates instead of overflowing.
    pub fn delay_for(&self, class: FailureClass, attempt: u32) -> Duration {
        let multiplier = match class {
            FailureClass::RateLimited => self.rate_limit_multiplier,
            FailureClass::Timeout => TIMEOUT_MULTIPLIER,
            FailureClass::Server => SERVER_MULTIPLIER,
            FailureClass::Permanent => return Duration::ZERO,
        };
        let exponential = 2u32.saturating_pow(attempt);
        self.base_delay
            .saturating_mul(exponential.saturating_mul(multiplier))
    }
}

/// Generic retry wrapper shared by all outbound network calls.
pub struct RetryExecutor;

impl RetryExecutor {
    /// Run `op` until it succeeds, fails permanently, or the retry budget
    /// is spent.
    ///
    /// `op` receives the zero-based attempt number. When every attempt
    /// fails retryably the total number of attempts is exactly
    /// `policy.max_retries + 1`.
    ///
    /// # Errors
    ///
    /// Returns the last attempt's underlying error once no further retry
    /// is allowed.
    pub async fn run<T, E, F, Fut>(policy: &RetryPolicy, call: &str, mut op: F) -> Result<T, E>
    where
        E: std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AttemptError<E>>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(failed) => {
                    if !failed.class.is_retryable() || attempt >= policy.max_retries {
                        return Err(failed.error);
                    }
                    let delay = policy.delay_for(failed.class, attempt);
                    warn!(
                        call,
                        error = %failed.error,
                        class = ?failed.class,
                        attempt = attempt.saturating_add(1),
                        max_retries = policy.max_retries,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }
}
