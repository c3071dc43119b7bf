//! Call options for activities and child workflows.

use crate::actions::TaskRouter;
use serde::Deserialize;
use std::time::Duration;

/// Declarative retry policy applied inside the workflow with durable timers.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(with = "duration_ms")]
    pub first_retry_interval: Duration,
    pub backoff_coefficient: f64,
    #[serde(with = "duration_ms")]
    pub max_retry_interval: Duration,
    /// Total time budget across all attempts. `None` means unbounded.
    #[serde(default, with = "opt_duration_ms")]
    pub retry_timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RetryPolicyError {
    #[error("max_attempts must be greater than zero")]
    ZeroAttempts,
    #[error("first_retry_interval must be greater than zero")]
    ZeroInterval,
    #[error("backoff_coefficient must be at least 1.0, got {0}")]
    BackoffTooSmall(f64),
    #[error("max_retry_interval must not be shorter than first_retry_interval")]
    MaxIntervalTooShort,
    #[error("retry_timeout must not be shorter than first_retry_interval")]
    TimeoutTooShort,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_RETRY_INTERVAL: Duration = Duration::from_secs(3600);

    pub fn new(max_attempts: u32, first_retry_interval: Duration) -> Result<Self, RetryPolicyError> {
        let policy = Self {
            max_attempts,
            first_retry_interval,
            backoff_coefficient: 1.0,
            max_retry_interval: Self::DEFAULT_MAX_RETRY_INTERVAL.max(first_retry_interval),
            retry_timeout: None,
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Result<Self, RetryPolicyError> {
        self.backoff_coefficient = coefficient;
        self.validate()?;
        Ok(self)
    }

    pub fn with_max_retry_interval(mut self, max: Duration) -> Result<Self, RetryPolicyError> {
        self.max_retry_interval = max;
        self.validate()?;
        Ok(self)
    }

    pub fn with_retry_timeout(mut self, timeout: Duration) -> Result<Self, RetryPolicyError> {
        self.retry_timeout = Some(timeout);
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), RetryPolicyError> {
        if self.max_attempts == 0 {
            return Err(RetryPolicyError::ZeroAttempts);
        }
        if self.first_retry_interval.is_zero() {
            return Err(RetryPolicyError::ZeroInterval);
        }
        if self.backoff_coefficient.is_nan() || self.backoff_coefficient < 1.0 {
            return Err(RetryPolicyError::BackoffTooSmall(self.backoff_coefficient));
        }
        if self.max_retry_interval < self.first_retry_interval {
            return Err(RetryPolicyError::MaxIntervalTooShort);
        }
        if self.retry_timeout.is_some_and(|timeout| timeout < self.first_retry_interval) {
            return Err(RetryPolicyError::TimeoutTooShort);
        }
        Ok(())
    }

    /// Delay before the retry that follows failed attempt number `attempt` (1-based).
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled = self.first_retry_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_retry_interval.as_secs_f64() {
            return self.max_retry_interval;
        }
        Duration::from_secs_f64(scaled)
    }

    /// Whether another attempt may start after `attempt` failures with `elapsed` time spent.
    pub fn should_retry(&self, attempt: u32, elapsed: Duration) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }
        match self.retry_timeout {
            Some(timeout) => elapsed + self.next_delay(attempt) <= timeout,
            None => true,
        }
    }
}

/// Options for [`OrchestrationContext::call_activity`](crate::OrchestrationContext::call_activity).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskOptions {
    pub target_app_id: Option<String>,
    pub retry_policy: Option<RetryPolicy>,
}

impl TaskOptions {
    pub fn with_retry(policy: RetryPolicy) -> Self {
        Self {
            target_app_id: None,
            retry_policy: Some(policy),
        }
    }

    pub fn with_app_id(app_id: impl Into<String>) -> Self {
        Self {
            target_app_id: Some(app_id.into()),
            retry_policy: None,
        }
    }

    pub(crate) fn router(&self) -> Option<TaskRouter> {
        self.target_app_id.as_ref().map(|id| TaskRouter {
            target_app_id: id.clone(),
        })
    }
}

/// Options for [`OrchestrationContext::call_child_workflow`](crate::OrchestrationContext::call_child_workflow).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChildWorkflowOptions {
    /// Explicit child instance id. Generated deterministically when absent.
    pub instance_id: Option<String>,
    pub target_app_id: Option<String>,
    pub retry_policy: Option<RetryPolicy>,
}

impl ChildWorkflowOptions {
    pub fn with_instance_id(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: Some(instance_id.into()),
            ..Default::default()
        }
    }

    pub(crate) fn router(&self) -> Option<TaskRouter> {
        self.target_app_id.as_ref().map(|id| TaskRouter {
            target_app_id: id.clone(),
        })
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

mod opt_duration_ms {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|v| v.map(Duration::from_millis))
    }
}
