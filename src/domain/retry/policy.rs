//! Retry Policy
//!
//! Bounded retry with configurable backoff. `RetryPolicy::run` never fails:
//! every outcome comes back as an [`AgentResult`].

use super::classifier::classify_error;
use super::result::{AgentResult, ErrorCategory};
use crate::config::duration_secs;
use crate::error::BoxError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Backoff shape applied between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    None,
    Immediate,
    Linear,
    #[default]
    Exponential,
    Random,
}

impl std::fmt::Display for RetryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryStrategy::None => write!(f, "none"),
            RetryStrategy::Immediate => write!(f, "immediate"),
            RetryStrategy::Linear => write!(f, "linear"),
            RetryStrategy::Exponential => write!(f, "exponential"),
            RetryStrategy::Random => write!(f, "random"),
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt
    pub max_retries: u32,
    pub strategy: RetryStrategy,
    #[serde(rename = "base_delay_secs", with = "duration_secs")]
    pub base_delay: Duration,
    #[serde(rename = "max_delay_secs", with = "duration_secs")]
    pub max_delay: Duration,
    /// Only failures in these categories are retried. `None` retries everything.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_categories: Option<Vec<ErrorCategory>>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            strategy: RetryStrategy::Exponential,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            allowed_categories: None,
        }
    }
}

impl RetryPolicy {
    /// A policy making exactly one attempt
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            strategy: RetryStrategy::None,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            allowed_categories: None,
        }
    }

    #[must_use]
    pub fn new(max_retries: u32, strategy: RetryStrategy) -> Self {
        Self {
            max_retries,
            strategy,
            ..Default::default()
        }
    }

    /// Builder: set base and max delay
    #[must_use]
    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    /// Builder: restrict retries to the given categories
    #[must_use]
    pub fn with_allowed_categories(mut self, categories: Vec<ErrorCategory>) -> Self {
        self.allowed_categories = Some(categories);
        self
    }

    /// Delay before retry number `attempt` (1-based), clamped to `max_delay`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base = self.base_delay.as_secs_f64();
        let secs = match self.strategy {
            RetryStrategy::None | RetryStrategy::Immediate => return Duration::ZERO,
            RetryStrategy::Linear => base * f64::from(attempt),
            RetryStrategy::Exponential => base * 2f64.powi(attempt as i32 - 1),
            RetryStrategy::Random => {
                let span = (base * 3.0 * f64::from(attempt) - base).max(0.0);
                base + rand::thread_rng().gen::<f64>() * span
            }
        };
        let secs = secs.min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(secs).unwrap_or(self.max_delay)
    }

    fn retries_category(&self, category: ErrorCategory) -> bool {
        self.allowed_categories
            .as_ref()
            .map_or(true, |allowed| allowed.contains(&category))
    }

    /// Run `operation` until it succeeds or the policy gives up.
    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> AgentResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        self.run_nested(|| {
            let fut = operation();
            async move { fut.await.map(AgentResult::success) }
        })
        .await
    }

    /// Like [`run`](Self::run) for operations that already produce an
    /// `AgentResult`; the inner result is returned as-is with its
    /// `retry_count` replaced by this policy's count.
    pub async fn run_nested<T, E, F, Fut>(&self, mut operation: F) -> AgentResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<AgentResult<T>, E>>,
        E: Into<BoxError>,
    {
        let mut retry_count = 0u32;

        loop {
            let error: BoxError = match operation().await {
                Ok(mut result) => {
                    result.set_retry_count(retry_count);
                    return result;
                }
                Err(e) => e.into(),
            };

            let category = classify_error(&*error);
            let message = error.to_string();

            tracing::warn!(
                attempt = retry_count + 1,
                max_attempts = self.max_retries + 1,
                category = %category,
                error = %message,
                "Operation failed"
            );

            if !self.retries_category(category) {
                tracing::debug!(category = %category, "Category not retryable, giving up");
                return AgentResult::failure(message, category, retry_count);
            }

            if retry_count >= self.max_retries {
                return AgentResult::failure(message, category, retry_count);
            }

            let delay = self.delay_for(retry_count + 1);
            tracing::info!(
                delay_ms = delay.as_millis() as u64,
                strategy = %self.strategy,
                "Retrying operation"
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            retry_count += 1;
        }
    }
}
