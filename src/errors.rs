//! Error taxonomy shared by workflow code, activities and the dispatch loop.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured failure fields recorded in history and carried in responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetails {
    pub error_type: String,
    pub message: String,
    pub stack_trace: Option<String>,
}

impl FailureDetails {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
            stack_trace: None,
        }
    }

    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }

    /// Build failure fields from any error, keeping its source chain as the trace.
    pub fn from_error(error_type: impl Into<String>, err: &(dyn std::error::Error + 'static)) -> Self {
        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(s) = source {
            chain.push(s.to_string());
            source = s.source();
        }
        Self {
            error_type: error_type.into(),
            message: err.to_string(),
            stack_trace: (!chain.is_empty()).then(|| chain.join("\ncaused by: ")),
        }
    }

    /// Case-insensitive match against the recorded error type.
    pub fn is_caused_by(&self, error_type: &str) -> bool {
        self.error_type.eq_ignore_ascii_case(error_type)
    }
}

impl fmt::Display for FailureDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error_type, self.message)
    }
}

/// Error types used when the worker itself produces a failure.
pub mod error_types {
    pub const ACTIVITY_NOT_FOUND: &str = "ActivityNotFound";
    pub const TASK_FAILED: &str = "TaskFailed";
    pub const CANCELED: &str = "Canceled";
    pub const TIMEOUT: &str = "Timeout";
    pub const NONDETERMINISM: &str = "NonDeterminism";
    pub const SERIALIZATION: &str = "Serialization";
    pub const APPLICATION: &str = "ApplicationError";
    pub const PANIC: &str = "Panic";
}

/// What workflow and activity code observe when something goes wrong.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkflowError {
    /// A downstream activity or child workflow recorded a failure in history.
    #[error("task failed: {details}")]
    TaskFailed { details: FailureDetails },

    /// The local wait was canceled through its cancellation token.
    #[error("wait was canceled")]
    Canceled,

    #[error("timed out waiting for external event '{name}'")]
    Timeout { name: String },

    /// History and code disagree about what happened at a sequence id.
    #[error("non-deterministic workflow: {0}")]
    Nondeterminism(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// Raised by user code. `error_type` lets callers branch on cause.
    #[error("{error_type}: {message}")]
    Application { error_type: String, message: String },
}

impl WorkflowError {
    pub fn application(message: impl Into<String>) -> Self {
        Self::Application {
            error_type: error_types::APPLICATION.to_string(),
            message: message.into(),
        }
    }

    pub fn typed(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Application {
            error_type: error_type.into(),
            message: message.into(),
        }
    }

    /// Failure details of a downstream task, if this error wraps one.
    pub fn task_failure(&self) -> Option<&FailureDetails> {
        match self {
            Self::TaskFailed { details } => Some(details),
            _ => None,
        }
    }

    pub fn is_nondeterminism(&self) -> bool {
        matches!(self, Self::Nondeterminism(_))
    }

    /// Convert into the structured fields recorded on a failed completion.
    pub fn to_failure_details(&self) -> FailureDetails {
        match self {
            Self::TaskFailed { details } => FailureDetails {
                error_type: error_types::TASK_FAILED.to_string(),
                message: format!("task failed: {}", details.message),
                stack_trace: Some(details.to_string()),
            },
            Self::Canceled => FailureDetails::new(error_types::CANCELED, self.to_string()),
            Self::Timeout { .. } => FailureDetails::new(error_types::TIMEOUT, self.to_string()),
            Self::Nondeterminism(msg) => FailureDetails::new(error_types::NONDETERMINISM, msg.clone()),
            Self::Serialization(msg) => FailureDetails::new(error_types::SERIALIZATION, msg.clone()),
            Self::Application { error_type, message } => FailureDetails::new(error_type.clone(), message.clone()),
        }
    }
}

impl From<serde_json::Error> for WorkflowError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<String> for WorkflowError {
    fn from(message: String) -> Self {
        Self::application(message)
    }
}

impl From<&str> for WorkflowError {
    fn from(message: &str) -> Self {
        Self::application(message)
    }
}
