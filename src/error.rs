use thiserror::Error;

use crate::anthropic::AnthropicError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid job specification: {0}")]
    InvalidJob(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Anthropic API error: {0}")]
    Anthropic(#[from] AnthropicError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Outcome of one collaborator invocation after the retry executor gave up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// Transport failure (connection refused, timeout, 5xx) that survived every attempt.
    #[error("transient failure after {attempts} attempt(s): {message}")]
    Transient { attempts: u32, message: String },

    /// Well-formed rejection from the collaborator (4xx, malformed response). Never retried.
    #[error("rejected: {0}")]
    Rejected(String),
}

impl CallError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CallError::Transient { .. })
    }
}

/// Failure of a single attempt, before retry accounting.
///
/// Collaborator implementations return this; the retry executor decides
/// whether to try again.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttemptError {
    #[error("transport: {0}")]
    Transport(String),

    #[error("rejected: {0}")]
    Rejected(String),
}

impl From<AnthropicError> for AttemptError {
    fn from(err: AnthropicError) -> Self {
        if err.is_transient() {
            AttemptError::Transport(err.to_string())
        } else {
            AttemptError::Rejected(err.to_string())
        }
    }
}

impl From<reqwest::Error> for AttemptError {
    fn from(err: reqwest::Error) -> Self {
        let server_side = err.status().is_some_and(|s| s.is_server_error());
        if err.is_decode() || (err.is_status() && !server_side) {
            AttemptError::Rejected(err.to_string())
        } else {
            AttemptError::Transport(err.to_string())
        }
    }
}

/// Failure of a pipeline stage executor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    /// Malformed or incomplete input to a stage. Never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// An external call exhausted its retries.
    #[error("{0}")]
    Transient(String),

    /// An external call returned a well-formed rejection.
    #[error("{0}")]
    Rejected(String),

    /// Cancellation or job deadline observed between steps.
    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl StageError {
    pub fn kind(&self) -> FailureKind {
        match self {
            StageError::Validation(_) => FailureKind::Business,
            StageError::Rejected(_) => FailureKind::Business,
            StageError::Transient(_) | StageError::Cancelled(_) => FailureKind::System,
        }
    }
}

impl From<CallError> for StageError {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Transient { .. } => StageError::Transient(err.to_string()),
            CallError::Rejected(msg) => StageError::Rejected(msg),
        }
    }
}

/// Classifies a failure for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FailureKind {
    /// Logic/validation failure (bad input, unusable output, quality gate)
    Business,
    /// Infrastructure failure (API timeout, rate limit, network error)
    System,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Business => write!(f, "Business"),
            FailureKind::System => write!(f, "System"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_error_display() {
        let err = CallError::Transient {
            attempts: 3,
            message: "connection refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "transient failure after 3 attempt(s): connection refused"
        );
        assert!(err.is_transient());
        assert!(!CallError::Rejected("400".into()).is_transient());
    }

    #[test]
    fn anthropic_status_classification() {
        let server = AnthropicError::ApiError {
            status: 503,
            message: "overloaded".into(),
        };
        assert!(matches!(AttemptError::from(server), AttemptError::Transport(_)));

        let client = AnthropicError::ApiError {
            status: 400,
            message: "bad request".into(),
        };
        assert!(matches!(AttemptError::from(client), AttemptError::Rejected(_)));

        let limited = AnthropicError::RateLimited { retry_after_ms: 10 };
        assert!(matches!(AttemptError::from(limited), AttemptError::Transport(_)));
    }

    #[test]
    fn stage_error_kinds() {
        assert_eq!(StageError::Validation("x".into()).kind(), FailureKind::Business);
        assert_eq!(StageError::Transient("x".into()).kind(), FailureKind::System);
        let from_call: StageError = CallError::Rejected("nope".into()).into();
        assert_eq!(from_call, StageError::Rejected("nope".into()));
    }

    #[test]
    fn failure_kind_display() {
        assert_eq!(FailureKind::Business.to_string(), "Business");
        assert_eq!(FailureKind::System.to_string(), "System");
    }
}
