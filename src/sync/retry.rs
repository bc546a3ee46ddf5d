/// Retry mechanisms with exponential backoff and jitter

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, the first one included
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Backoff multiplier (exponential backoff)
    pub backoff_multiplier: f64,
    /// Maximum jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
    /// Timeout for each individual attempt
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::network_operations()
    }
}

impl RetryPolicy {
    /// Policy for remote preference writes
    pub fn network_operations() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
            attempt_timeout: Some(Duration::from_secs(30)),
        }
    }

    /// Fewer retries, shorter delays
    pub fn quick_operations() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter_factor: 0.05,
            attempt_timeout: Some(Duration::from_secs(5)),
        }
    }

    /// Create a policy with no retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::from_secs(0),
            max_delay: Duration::from_secs(0),
            backoff_multiplier: 1.0,
            jitter_factor: 0.0,
            attempt_timeout: None,
        }
    }

    /// Calculate the delay after `attempt` failed attempts
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::from_secs(0);
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi((attempt - 1) as i32);
        let capped_delay = base_delay.min(self.max_delay.as_secs_f64());

        // Add jitter
        let jitter = if self.jitter_factor > 0.0 {
            let jitter_amount = capped_delay * self.jitter_factor;
            fastrand::f64() * jitter_amount
        } else {
            0.0
        };

        Duration::from_secs_f64((capped_delay + jitter).min(self.max_delay.as_secs_f64()))
    }
}

/// Run `future`, failing with [`Error::Timeout`] once `timeout` elapses
pub async fn with_attempt_timeout<T, Fut>(timeout: Option<Duration>, future: Fut) -> Result<T>
where
    Fut: std::future::Future<Output = Result<T>>,
{
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, future).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!("no response within {:?}", limit))),
        },
        None => future.await,
    }
}

/// Determine if an error should trigger a retry
pub fn should_retry(error: &Error) -> bool {
    match error {
        // Connectivity problems are transient
        Error::Connection(_) => true,
        Error::Timeout(_) => true,
        Error::Io(_) => true,

        Error::Remote { status, .. } => match status {
            408 => true,       // Request timeout
            429 => true,       // Too many requests
            500..=599 => true, // Server errors
            _ => false,
        },

        // Database errors might be retryable depending on the cause
        Error::Database(msg) => {
            let msg = msg.to_lowercase();
            msg.contains("busy") || msg.contains("locked") || msg.contains("timeout")
        }

        Error::Validation(_) => false,
        Error::Json(_) => false,
        Error::UrlParse(_) => false,
        Error::Consumer(_) => false,
        Error::Config(_) => false,
        Error::InvalidAccount(_) => false,
        Error::NoActiveSession => false,
        Error::ReentrantMutation(_) => false,
    }
}

/// Run `operation` until it succeeds, fails with an error that is not
/// worth retrying, or the policy runs out of attempts. The closure gets the
/// 1-based attempt number.
pub async fn retry_operation<T, F, Fut>(operation: F, policy: RetryPolicy) -> Result<T>
where
    F: Fn(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match with_attempt_timeout(policy.attempt_timeout, operation(attempt)).await {
            Ok(value) => return Ok(value),
            Err(error) if should_retry(&error) && attempt < max_attempts => {
                let delay = policy.calculate_delay(attempt);
                debug!("Attempt {} failed, retrying in {:?}: {}", attempt, delay, error);
                sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn test_retry_policy_delay_calculation() {
        let policy = RetryPolicy {
            jitter_factor: 0.0,
            ..RetryPolicy::default()
        };

        assert_eq!(policy.calculate_delay(0), Duration::from_secs(0));
        assert_eq!(policy.calculate_delay(1), Duration::from_millis(500));
        assert_eq!(policy.calculate_delay(2), Duration::from_secs(1));
        assert_eq!(policy.calculate_delay(3), Duration::from_secs(2));

        // Should respect max delay
        assert_eq!(policy.calculate_delay(100), policy.max_delay);
    }

    #[test]
    fn test_jitter_is_bounded() {
        let policy = RetryPolicy::default();
        for _ in 0..50 {
            let delay = policy.calculate_delay(2);
            assert!(delay >= Duration::from_secs(1));
            assert!(delay <= Duration::from_millis(1200));
        }
    }

    #[tokio::test]
    async fn test_retry_eventual_success() {
        let call_count = Arc::new(AtomicU32::new(0));

        let result = retry_operation(
            |attempt| {
                let call_count = call_count.clone();
                async move {
                    call_count.fetch_add(1, Ordering::SeqCst);
                    if attempt < 3 {
                        Err(Error::Connection("Temporary failure".to_string()))
                    } else {
                        Ok(42)
                    }
                }
            },
            fast_policy(3),
        )
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_stops_immediately() {
        let call_count = Arc::new(AtomicU32::new(0));

        let result = retry_operation(
            |_| {
                let call_count = call_count.clone();
                async move {
                    call_count.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, Error>(Error::Remote {
                        status: 400,
                        message: "bad request".to_string(),
                    })
                }
            },
            fast_policy(5),
        )
        .await;

        assert!(matches!(result, Err(Error::Remote { status: 400, .. })));
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let call_count = Arc::new(AtomicU32::new(0));

        let result = retry_operation(
            |_| {
                let call_count = call_count.clone();
                async move {
                    call_count.fetch_add(1, Ordering::SeqCst);
                    Err::<(), Error>(Error::Timeout("slow".to_string()))
                }
            },
            fast_policy(2),
        )
        .await;

        assert!(matches!(result, Err(Error::Timeout(_))));
        assert_eq!(call_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_attempt_timeout() {
        let result = with_attempt_timeout(Some(Duration::from_millis(5)), async {
            sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[test]
    fn test_should_retry() {
        assert!(should_retry(&Error::Connection("reset".to_string())));
        assert!(should_retry(&Error::Timeout("slow".to_string())));
        assert!(should_retry(&Error::Io("broken pipe".to_string())));

        for status in [408, 429, 500, 503] {
            assert!(should_retry(&Error::Remote { status, message: String::new() }));
        }
        for status in [400, 401, 404, 422] {
            assert!(!should_retry(&Error::Remote { status, message: String::new() }));
        }

        assert!(!should_retry(&Error::Json("eof".to_string())));
        assert!(!should_retry(&Error::NoActiveSession));
        assert!(should_retry(&Error::Database("database is locked".to_string())));
    }
}
