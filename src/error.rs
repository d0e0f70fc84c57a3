/// Unified error types for the mosque registry
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the registry
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration errors
    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Authentication errors
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Authorization errors
    #[error("Not authorized: {0}")]
    Authorization(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflict errors (e.g., duplicate email)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Verification code does not match the mosque's current code
    #[error("Invalid verification code")]
    InvalidCode,

    /// Verification code matched but is past its expiry
    #[error("Verification code has expired")]
    ExpiredCode,

    /// Another admin already holds the approved slot for this mosque
    #[error("Mosque {mosque_id} already has an approved admin")]
    AlreadyApprovedForMosque { mosque_id: String },

    /// Transition requires a pending admin
    #[error("Admin is not pending (current status: {current})")]
    NotPending { current: String },

    /// Transition requires an approved admin
    #[error("Admin is not approved (current status: {current})")]
    NotApproved { current: String },

    /// Admin may not submit a new binding request
    #[error("Admin cannot reapply: {0}")]
    CannotReapply(String),

    /// Mosque kept because some bound admins could not be re-classified
    #[error("Mosque {mosque_id} kept; cascade failed for admins {failed_admins:?}")]
    CascadeIncomplete {
        mosque_id: String,
        failed_admins: Vec<String>,
    },

    /// Compare-and-set retries exhausted
    #[error("Concurrent modification of {0}; retry the operation")]
    ConcurrentModification(String),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JWT errors
    #[error("JWT error: {0}")]
    Jwt(String),
}

impl RegistryError {
    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            RegistryError::InvalidCode => "INVALID_CODE",
            RegistryError::ExpiredCode => "EXPIRED_CODE",
            RegistryError::AlreadyApprovedForMosque { .. } => "ALREADY_APPROVED_FOR_MOSQUE",
            RegistryError::NotPending { .. } => "NOT_PENDING",
            RegistryError::NotApproved { .. } => "NOT_APPROVED",
            RegistryError::CannotReapply(_) => "CANNOT_REAPPLY",
            RegistryError::CascadeIncomplete { .. } => "CASCADE_INCOMPLETE",
            RegistryError::ConcurrentModification(_) => "CONCURRENT_MODIFICATION",
            RegistryError::Authentication(_) => "AUTHENTICATION_FAILED",
            RegistryError::Authorization(_) => "FORBIDDEN",
            RegistryError::Validation(_) => "INVALID_REQUEST",
            RegistryError::NotFound(_) => "NOT_FOUND",
            RegistryError::Conflict(_) => "CONFLICT",
            RegistryError::Jwt(_) => "INVALID_TOKEN",
            RegistryError::Database(_)
            | RegistryError::Migration(_)
            | RegistryError::Internal(_)
            | RegistryError::Io(_) => "INTERNAL_ERROR",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            RegistryError::Authentication(_) | RegistryError::Jwt(_) => StatusCode::UNAUTHORIZED,
            RegistryError::Authorization(_) => StatusCode::FORBIDDEN,
            RegistryError::Validation(_)
            | RegistryError::InvalidCode
            | RegistryError::ExpiredCode => StatusCode::BAD_REQUEST,
            RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
            RegistryError::Conflict(_)
            | RegistryError::AlreadyApprovedForMosque { .. }
            | RegistryError::NotPending { .. }
            | RegistryError::NotApproved { .. }
            | RegistryError::CannotReapply(_)
            | RegistryError::CascadeIncomplete { .. }
            | RegistryError::ConcurrentModification(_) => StatusCode::CONFLICT,
            RegistryError::Database(_)
            | RegistryError::Migration(_)
            | RegistryError::Internal(_)
            | RegistryError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Convert RegistryError to HTTP response
impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match self {
            RegistryError::Database(_)
            | RegistryError::Migration(_)
            | RegistryError::Internal(_)
            | RegistryError::Io(_) => {
                tracing::error!(error = %self, "internal error while serving request");
                "Internal server error".to_string() // Don't leak details
            }
            _ => self.to_string(),
        };

        let body = Json(ErrorResponse {
            error: self.code().to_string(),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Whether a database error is a UNIQUE constraint violation
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

/// Whether a database error is a FOREIGN KEY constraint violation
pub fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_foreign_key_violation(),
        _ => false,
    }
}
