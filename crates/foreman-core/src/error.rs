// Error taxonomy for orchestrator operations

use thiserror::Error;

use crate::provider::ProviderError;
use crate::workflow::WorkflowState;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, ForemanError>;

/// Errors surfaced by the orchestrator.
///
/// The variants are kinds, not sources: every failure anywhere in the system
/// is classified into one of these before it crosses a component boundary,
/// and retry policy keys off the classification alone.
#[derive(Debug, Error)]
pub enum ForemanError {
    /// Caller-supplied input violates a constraint. Never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// State-machine rejection. Never retried.
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: WorkflowState,
        to: WorkflowState,
    },

    /// A bounded resource pool has no free capacity.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Recoverable failure (timeout, rate limit, quorum miss, busy store).
    #[error("transient failure: {0}")]
    Transient(String),

    /// Unrecoverable failure (auth, invalid request, budget, cancel).
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// Invariant violation inside the orchestrator itself.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ForemanError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        ForemanError::Validation(msg.into())
    }

    /// Create a not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        ForemanError::NotFound(msg.into())
    }

    /// Create a transient error
    pub fn transient(msg: impl Into<String>) -> Self {
        ForemanError::Transient(msg.into())
    }

    /// Create a permanent error
    pub fn permanent(msg: impl Into<String>) -> Self {
        ForemanError::Permanent(msg.into())
    }

    /// Whether the retry policy may re-attempt the failed operation.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ForemanError::Transient(_) | ForemanError::ResourceExhausted(_)
        )
    }

    /// The message without its classification prefix; what lands in
    /// phase and workflow `error_message` fields.
    pub fn detail(&self) -> String {
        match self {
            ForemanError::Validation(msg)
            | ForemanError::NotFound(msg)
            | ForemanError::ResourceExhausted(msg)
            | ForemanError::Transient(msg)
            | ForemanError::Permanent(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

impl From<ProviderError> for ForemanError {
    fn from(err: ProviderError) -> Self {
        if err.is_transient() {
            ForemanError::Transient(err.to_string())
        } else {
            ForemanError::Permanent(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_classification() {
        let rate_limited = ProviderError::RateLimited { retry_after: None };
        assert!(ForemanError::from(rate_limited).is_transient());

        let auth = ProviderError::Auth("bad key".into());
        assert!(!ForemanError::from(auth).is_transient());
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = ForemanError::InvalidTransition {
            from: WorkflowState::Created,
            to: WorkflowState::Completed,
        };
        assert_eq!(err.to_string(), "invalid transition: created -> completed");
    }
}
