//! Retry and timeout helpers
//!
//! Registration is the only operation this crate retries on its own. Retries
//! are capped and linearly spaced; authentication-class rejections are never
//! retried because repeating them cannot succeed until the user fixes their
//! credentials.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::{MobileError, MobileResult};

/// Registrar responses that mean "your credentials are wrong"
pub fn is_auth_failure(code: Option<u16>) -> bool {
    matches!(code, Some(401) | Some(403) | Some(407))
}

/// Failures that may clear up on their own
///
/// `None` means the engine got no final response (transport timeout).
pub fn is_transient_failure(code: Option<u16>) -> bool {
    match code {
        None => true,
        Some(408) | Some(480) => true,
        Some(c) => (500..600).contains(&c),
    }
}

/// Retry policy for failed registrations
///
/// # Examples
///
/// ```rust
/// use rvoip_mobile_core::recovery::{RegistrationRetryPolicy, RetryDecision};
/// use std::time::Duration;
///
/// let policy = RegistrationRetryPolicy::default();
/// assert_eq!(policy.max_attempts, 3);
///
/// // 503 on the first failure: wait one step
/// assert_eq!(
///     policy.decide(Some(503), 0),
///     RetryDecision::RetryAfter(Duration::from_secs(2))
/// );
/// // 401 is terminal straight away
/// assert!(matches!(policy.decide(Some(401), 0), RetryDecision::GiveUp { .. }));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationRetryPolicy {
    /// Maximum number of automatic retries after the initial attempt
    pub max_attempts: u32,
    /// Linear backoff step; retry `n` waits `n * step`
    pub step: Duration,
    /// Add up to ±10% jitter to each delay
    pub use_jitter: bool,
}

impl Default for RegistrationRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            step: Duration::from_secs(2),
            use_jitter: false,
        }
    }
}

/// Outcome of [`RegistrationRetryPolicy::decide`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp { reason: String },
}

impl RegistrationRetryPolicy {
    /// Decide what to do after a failure, given how many retries were already issued
    pub fn decide(&self, code: Option<u16>, retries_done: u32) -> RetryDecision {
        if is_auth_failure(code) {
            return RetryDecision::GiveUp {
                reason: "authentication rejected".to_string(),
            };
        }
        if !is_transient_failure(code) {
            return RetryDecision::GiveUp {
                reason: format!("non-retryable response {:?}", code),
            };
        }
        if retries_done >= self.max_attempts {
            return RetryDecision::GiveUp {
                reason: format!("gave up after {} retries", retries_done),
            };
        }

        let delay = self.step * (retries_done + 1);
        RetryDecision::RetryAfter(self.jittered(delay))
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.use_jitter {
            return delay;
        }
        let jitter = (rand::random::<f64>() - 0.5) * 0.2;
        let millis = delay.as_millis() as f64;
        Duration::from_millis((millis * (1.0 + jitter)) as u64)
    }
}

/// Execute an operation with a timeout
///
/// Maps an elapsed deadline to [`MobileError::OperationTimedOut`].
pub async fn with_timeout<T, F>(operation_name: &str, timeout: Duration, future: F) -> MobileResult<T>
where
    F: Future<Output = MobileResult<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => {
            error!(
                operation = operation_name,
                timeout_ms = timeout.as_millis() as u64,
                "Operation timed out"
            );
            Err(MobileError::timed_out(operation_name, timeout))
        }
    }
}

/// Log the outcome of one step of a composite operation
///
/// Composite operations (swap, answer-while-holding) keep going after a
/// failed step; hold and resume are idempotent, so the caller can simply
/// retry the whole operation.
pub(crate) fn log_step(operation: &str, step: &str, result: &MobileResult<()>) {
    match result {
        Ok(()) => debug!(operation, step, "Composite step succeeded"),
        Err(e) => warn!(
            operation,
            step,
            error = %e,
            category = e.category(),
            "Composite step failed, continuing with best attempt"
        ),
    }
}
