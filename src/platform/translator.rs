use std::collections::HashSet;

use super::PlatformError;
use crate::core::MatrixError;

/// Maps a raw platform failure to the engine's error taxonomy.
pub trait ErrorTranslator: Send + Sync {
    fn translate(&self, error: PlatformError, operation: &str) -> MatrixError;
}

/// Status codes that will fail the same way on a retry.
const NON_RETRYABLE_STATUSES: &[u16] = &[400, 404, 409, 412, 422];

#[derive(Debug, Clone, Default)]
pub struct DefaultErrorTranslator {
    rollback_codes: HashSet<String>,
}

impl DefaultErrorTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Platform error codes that must roll back a batch in progress.
    pub fn with_rollback_code(mut self, code: impl Into<String>) -> Self {
        self.rollback_codes.insert(code.into().to_ascii_lowercase());
        self
    }
}

impl ErrorTranslator for DefaultErrorTranslator {
    fn translate(&self, error: PlatformError, operation: &str) -> MatrixError {
        let operation = operation.to_string();

        if matches!(error.status, Some(401) | Some(403)) {
            return MatrixError::Permission {
                operation,
                message: error.message,
            };
        }

        let rollback = error
            .code
            .as_deref()
            .is_some_and(|code| self.rollback_codes.contains(&code.to_ascii_lowercase()));
        if rollback {
            return MatrixError::RollbackRequired {
                operation,
                message: error.message,
            };
        }

        let retryable = !error
            .status
            .is_some_and(|status| NON_RETRYABLE_STATUSES.contains(&status));
        MatrixError::Transport {
            operation,
            message: error.message,
            status: error.status,
            retryable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_statuses() {
        let translator = DefaultErrorTranslator::new();
        for status in [401, 403] {
            let err = translator.translate(PlatformError::new("denied").with_status(status), "create");
            assert!(err.is_permission_error());
        }
    }

    #[test]
    fn test_retry_classification() {
        let translator = DefaultErrorTranslator::new();

        let conflict = translator.translate(PlatformError::new("duplicate").with_status(409), "create");
        assert!(conflict.is_non_retryable());

        let unavailable = translator.translate(PlatformError::new("busy").with_status(503), "retrieve_multiple");
        assert!(!unavailable.is_non_retryable());

        let network = translator.translate(PlatformError::new("connection reset"), "retrieve_multiple");
        assert!(matches!(network, MatrixError::Transport { status: None, retryable: true, .. }));
    }

    #[test]
    fn test_rollback_codes_case_insensitive() {
        let translator = DefaultErrorTranslator::new().with_rollback_code("0x80040237");
        let err = translator.translate(
            PlatformError::new("integrity").with_status(400).with_code("0X80040237"),
            "create",
        );
        assert!(err.requires_rollback());
        assert_eq!(err.to_string(), "Rollback required after create: integrity");
    }
}
