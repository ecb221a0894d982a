use sea_orm::error::DbErr;
use thiserror::Error;
use uuid::Uuid;

/// Service-layer errors for the reconciliation engine.
///
/// Validation outcomes are NOT errors: line and order postability checks
/// return structured result values so every problem can be surfaced at once.
/// `ServiceError` covers failures that abort the operation itself.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Concurrent modification of order {0}")]
    ConcurrentModification(Uuid),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ServiceError {
    /// True when retrying the same operation against fresh state may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::ConcurrentModification(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrent_modification_is_retryable() {
        let id = Uuid::new_v4();
        assert!(ServiceError::ConcurrentModification(id).is_retryable());
        assert!(!ServiceError::NotFound("order".into()).is_retryable());
    }

    #[test]
    fn error_messages_include_context() {
        let err = ServiceError::InvalidStatus("cannot post from 06".into());
        assert_eq!(err.to_string(), "Invalid status: cannot post from 06");
    }
}
