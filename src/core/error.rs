use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatrixError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Query URL too long: {length} characters (limit {limit})")]
    UrlTooLong { length: usize, limit: usize },

    #[error("Invalid query: {}", .0.join("; "))]
    InvalidQuery(Vec<String>),

    #[error("Transport error during {operation}: {message}")]
    Transport {
        operation: String,
        message: String,
        status: Option<u16>,
        retryable: bool,
    },

    #[error("Permission denied during {operation}: {message}")]
    Permission { operation: String, message: String },

    #[error("Rollback required after {operation}: {message}")]
    RollbackRequired { operation: String, message: String },

    #[error("Record '{id}' not found in '{entity}'")]
    NotFound { entity: String, id: String },

    #[error("Service has been destroyed")]
    ServiceDestroyed,

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, MatrixError>;

impl MatrixError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery(vec![message.into()])
    }

    /// Errors the caller must not retry. Configuration and query-construction
    /// failures are always fatal; transport errors follow the translator's call.
    pub fn is_non_retryable(&self) -> bool {
        match self {
            Self::Transport { retryable, .. } => !retryable,
            _ => true,
        }
    }

    pub fn requires_rollback(&self) -> bool {
        matches!(self, Self::RollbackRequired { .. })
    }

    pub fn is_permission_error(&self) -> bool {
        matches!(self, Self::Permission { .. })
    }
}

impl From<serde_json::Error> for MatrixError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        let transient = MatrixError::Transport {
            operation: "retrieve_multiple".into(),
            message: "gateway timeout".into(),
            status: Some(504),
            retryable: true,
        };
        assert!(!transient.is_non_retryable());

        assert!(MatrixError::configuration("missing rowEntityName").is_non_retryable());
        assert!(
            MatrixError::UrlTooLong {
                length: 9000,
                limit: 8000
            }
            .is_non_retryable()
        );
    }

    #[test]
    fn test_invalid_query_message_joins_errors() {
        let err = MatrixError::InvalidQuery(vec!["bad entity".into(), "empty in-list".into()]);
        assert_eq!(err.to_string(), "Invalid query: bad entity; empty in-list");
    }

    #[test]
    fn test_rollback_flag() {
        let err = MatrixError::RollbackRequired {
            operation: "create".into(),
            message: "integrity violation".into(),
        };
        assert!(err.requires_rollback());
        assert!(!err.is_permission_error());
    }
}
