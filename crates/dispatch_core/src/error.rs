//! Error taxonomy for the dispatch engine.
//!
//! Every fallible operation returns [`DispatchError`]. Variants map one-to-one
//! onto the categories surfaced at the service boundary; [`DispatchError::status_code`]
//! gives the HTTP mapping the collaborator layer uses.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// Result type using DispatchError.
pub type Result<T> = std::result::Result<T, DispatchError>;

#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum DispatchError {
    /// Malformed or out-of-range input.
    #[error("validation failed for '{field}': {message}")]
    Validation { field: &'static str, message: String },

    /// Missing or invalid subject.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Entity does not exist.
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    /// State precondition violated: ride already matched, payment already
    /// finalized, idempotency fingerprint mismatch.
    #[error("conflict: {0}")]
    Conflict(String),

    /// An allocation lock or row lock is held elsewhere. Retried internally
    /// by matching; surfaced only on budget exhaustion.
    #[error("lock contention on {resource}")]
    LockContention { resource: String },

    /// Deadline exceeded on a dependency.
    #[error("{dependency} deadline exceeded")]
    Timeout { dependency: &'static str },

    /// A dependency reported a hard failure.
    #[error("{dependency} unavailable: {details}")]
    Unavailable { dependency: &'static str, details: String },
}

impl DispatchError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// HTTP status the boundary layer maps this error to.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation { .. } => 400,
            Self::Unauthorized(_) => 401,
            Self::NotFound { .. } => 404,
            Self::Conflict(_) | Self::LockContention { .. } => 409,
            Self::Timeout { .. } => 504,
            Self::Unavailable { .. } => 503,
        }
    }

    /// Machine-readable category name.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::Unauthorized(_) => "unauthorized",
            Self::NotFound { .. } => "not_found",
            Self::Conflict(_) => "conflict",
            Self::LockContention { .. } => "lock_contention",
            Self::Timeout { .. } => "timeout",
            Self::Unavailable { .. } => "unavailable",
        }
    }

    /// Whether a caller may retry the operation that produced this error
    /// (assuming the operation itself is idempotent).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LockContention { .. } | Self::Timeout { .. } | Self::Unavailable { .. }
        )
    }
}

impl From<sqlx::Error> for DispatchError {
    fn from(err: sqlx::Error) -> Self {
        DispatchError::Unavailable {
            dependency: "state store",
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        DispatchError::Validation {
            field: "body",
            message: err.to_string(),
        }
    }
}

/// Run `fut` under the dependency's deadline; expiry yields
/// [`DispatchError::Timeout`] for that dependency.
pub async fn with_deadline<T, F>(dependency: &'static str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(DispatchError::Timeout { dependency }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_boundary_mapping() {
        let cases = vec![
            (DispatchError::validation("lat", "out of range"), 400),
            (DispatchError::Unauthorized("missing token".into()), 401),
            (DispatchError::not_found("ride", "abc"), 404),
            (DispatchError::conflict("ride already matched"), 409),
            (
                DispatchError::LockContention {
                    resource: "driver:1".into(),
                },
                409,
            ),
            (
                DispatchError::Timeout {
                    dependency: "state store",
                },
                504,
            ),
            (
                DispatchError::Unavailable {
                    dependency: "psp",
                    details: "connection refused".into(),
                },
                503,
            ),
        ];
        for (err, code) in cases {
            assert_eq!(err.status_code(), code, "error {err:?}");
        }
    }

    #[test]
    fn retryable_covers_transient_categories() {
        assert!(DispatchError::Timeout {
            dependency: "state store"
        }
        .is_retryable());
        assert!(!DispatchError::conflict("terminal").is_retryable());
        assert!(!DispatchError::not_found("trip", "x").is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn with_deadline_times_out() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(42)
        };
        let err = with_deadline("state store", Duration::from_secs(2), slow)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Timeout {
                dependency: "state store"
            }
        ));
    }
}
