//! # Retry
//!
//! Exponential backoff with jitter for transient provider failures (§4.3, §7
//! "Provider transient error"). Adapted from the teacher crate's retry module:
//! same classify-then-backoff shape, generalized from a fixed HTTP-status allowlist
//! to a caller-supplied [`Classify`] so both the Anthropic- and OpenAI-style
//! mailboxes can share it.

use std::time::Duration;

use rand::Rng;

use crate::error::{Error, Result};

/// Whether a failure should be retried, and how its retry-after hint (if any)
/// affects the next backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Retry with computed backoff.
    Transient,
    /// Give up immediately; the error is returned to the caller as-is.
    Terminal,
}

/// A retry policy: bounded attempts, exponential backoff, and jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        RetryPolicy {
            max_attempts,
            ..Default::default()
        }
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = self.backoff_multiplier.powi(attempt as i32);
        let scaled = self.initial_backoff.mul_f64(exp).min(self.max_backoff);
        let jitter_frac: f64 = rand::thread_rng().gen_range(0.5..1.0);
        scaled.mul_f64(jitter_frac)
    }

    /// Run `attempt_fn` up to `max_attempts` times, classifying each failure with
    /// `classify`. Sleeps between attempts using exponential backoff with jitter.
    /// Returns the last error once attempts are exhausted, or immediately on a
    /// `Terminal` classification.
    pub async fn run<T, F, Fut>(&self, classify: impl Fn(&Error) -> Classification, mut attempt_fn: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut last_err = None;
        for attempt in 0..self.max_attempts {
            match attempt_fn().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let classification = classify(&err);
                    if classification == Classification::Terminal {
                        return Err(err);
                    }
                    last_err = Some(err);
                    if attempt + 1 < self.max_attempts {
                        let delay = self.backoff_for(attempt);
                        log::warn!(
                            "transient provider error on attempt {}/{}, retrying in {:?}",
                            attempt + 1,
                            self.max_attempts,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::other("retry budget exhausted with no recorded error")))
    }
}

/// Default classification for HTTP-backed mailboxes: network errors, 429, and 5xx
/// are transient; everything else (4xx other than 429, malformed JSON, etc.) is
/// terminal.
pub fn classify_http(err: &Error) -> Classification {
    match err {
        Error::Http(e) => {
            if let Some(status) = e.status() {
                if status.as_u16() == 429 || status.is_server_error() {
                    Classification::Transient
                } else {
                    Classification::Terminal
                }
            } else {
                // connect/timeout/decode-without-status: network-level, retry
                Classification::Transient
            }
        }
        Error::Timeout => Classification::Transient,
        _ => Classification::Terminal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            backoff_multiplier: 1.5,
        };
        let attempts = AtomicU32::new(0);
        let result = policy
            .run(
                |_| Classification::Transient,
                || async {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(Error::other("not yet"))
                    } else {
                        Ok(42)
                    }
                },
            )
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_stops_immediately_on_terminal() {
        let policy = RetryPolicy::new(5);
        let attempts = AtomicU32::new(0);
        let result: Result<i32> = policy
            .run(
                |_| Classification::Terminal,
                || async {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(Error::invalid_input("bad request"))
                },
            )
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_exhausts_budget_and_returns_last_error() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            backoff_multiplier: 1.0,
        };
        let attempts = AtomicU32::new(0);
        let result: Result<i32> = policy
            .run(
                |_| Classification::Transient,
                || async {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(Error::other("still failing"))
                },
            )
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_classify_http_status_codes() {
        // Errors without an HTTP response (e.g. constructed directly) exercise the
        // non-Http branches.
        assert_eq!(classify_http(&Error::Timeout), Classification::Transient);
        assert_eq!(
            classify_http(&Error::invalid_input("bad")),
            Classification::Terminal
        );
    }
}
