/// Error types for wall-service
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::DenyReason;

/// Failures raised by the persistence collaborator
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Store operation timed out")]
    Timeout,

    #[error("Serialization failure: {0}")]
    Serialization(String),

    #[error("Duplicate row: {0}")]
    Duplicate(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Failures the counter CAS loop may retry inside the same transaction
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Timeout | StoreError::Serialization(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            match db_err.code().as_deref() {
                // query_canceled: statement_timeout fired
                Some("57014") => return StoreError::Timeout,
                // serialization_failure / deadlock_detected
                Some("40001") | Some("40P01") => {
                    return StoreError::Serialization(db_err.message().to_string())
                }
                Some("23505") => return StoreError::Duplicate(db_err.message().to_string()),
                _ => {}
            }
        }
        match err {
            sqlx::Error::PoolTimedOut => StoreError::Timeout,
            sqlx::Error::PoolClosed => StoreError::Unavailable("pool closed".to_string()),
            other => StoreError::Database(other),
        }
    }
}

/// Why an operation was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForbiddenReason {
    /// Scoped visibility denied the requester
    Visibility {
        post_id: i64,
        user_id: Uuid,
        reason: DenyReason,
    },
    /// Campus posting requires a school domain
    NoSchoolDomain { user_id: Uuid },
    /// Only the author may perform this action
    NotOwner {
        entity: &'static str,
        id: i64,
        user_id: Uuid,
    },
}

impl fmt::Display for ForbiddenReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForbiddenReason::Visibility {
                post_id,
                user_id,
                reason,
            } => write!(f, "user {} may not access post {} ({})", user_id, post_id, reason),
            ForbiddenReason::NoSchoolDomain { user_id } => {
                write!(f, "user {} has no school domain", user_id)
            }
            ForbiddenReason::NotOwner {
                entity,
                id,
                user_id,
            } => write!(f, "user {} is not the author of {} {}", user_id, entity, id),
        }
    }
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Not found: {entity} {id}")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Forbidden: {0}")]
    Forbidden(ForbiddenReason),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Conflict on post {post_id}: {detail}")]
    Conflict { post_id: i64, detail: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Coarse error classes a request layer maps onto its own presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    Validation,
    Conflict,
    Internal,
}

impl ServiceError {
    pub fn post_not_found(id: i64) -> Self {
        ServiceError::NotFound { entity: "post", id }
    }

    pub fn comment_not_found(id: i64) -> Self {
        ServiceError::NotFound {
            entity: "comment",
            id,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::NotFound { .. } => ErrorKind::NotFound,
            ServiceError::Forbidden(_) => ErrorKind::Forbidden,
            ServiceError::Validation(_) => ErrorKind::Validation,
            ServiceError::Conflict { .. } => ErrorKind::Conflict,
            ServiceError::Store(_) => ErrorKind::Internal,
        }
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::Validation(err.to_string())
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(StoreError::Timeout.is_retryable());
        assert!(StoreError::Serialization("deadlock".into()).is_retryable());
        assert!(!StoreError::Duplicate("likes".into()).is_retryable());
        assert!(!StoreError::Unavailable("down".into()).is_retryable());
    }

    #[test]
    fn test_pool_timeout_maps_to_timeout() {
        let err: StoreError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, StoreError::Timeout));
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(ServiceError::post_not_found(3).kind(), ErrorKind::NotFound);
        assert_eq!(
            ServiceError::Validation("empty".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            ServiceError::Conflict {
                post_id: 1,
                detail: "stale".into()
            }
            .kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            ServiceError::Store(StoreError::Timeout).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_forbidden_message_names_principal() {
        let user_id = Uuid::new_v4();
        let err = ServiceError::Forbidden(ForbiddenReason::NotOwner {
            entity: "comment",
            id: 9,
            user_id,
        });
        let message = err.to_string();
        assert!(message.contains(&user_id.to_string()));
        assert!(message.contains("comment 9"));
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }
}
