/// Error raised at the backend boundary, classified for retry.
///
/// **Retryable**: stream interrupted, backend busy, connection timeout.
/// **Permanent**: malformed work item, unknown instance, rejected response.
///
/// ```rust
/// use durable_worker::providers::ProviderError;
///
/// let busy = ProviderError::retryable("next_work_item", "backend unavailable");
/// assert!(busy.is_retryable());
/// let bad = ProviderError::permanent("complete_activity", "unknown task id");
/// assert!(!bad.is_retryable());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{operation}: {message}")]
pub struct ProviderError {
    /// Provider operation that failed (e.g. "stream_instance_history").
    pub operation: String,
    pub message: String,
    pub retryable: bool,
}

impl ProviderError {
    pub fn retryable(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
            retryable: false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Failure fields for a work item that could not be processed because of this error.
    pub fn to_failure_details(&self) -> crate::FailureDetails {
        crate::FailureDetails::new("ProviderError", self.to_string())
    }
}
