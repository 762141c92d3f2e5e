//! Error types and HTTP response conversion.
//!
//! The [`Error`] enum covers every failure the HTTP layer can surface:
//!
//! - `Unauthenticated` (401) — identity missing or stale
//! - `Forbidden` (403) — identity known but denied, including RLS rejections
//! - `BadRequest` (400) — malformed input: filters, identifiers, JSON
//! - `NotFound` (404) — unknown collection, record, registration or key
//! - `Conflict` (409) — unique constraint or idempotency collisions
//! - `PreconditionFailed` (412) — matview refresh preconditions and in-flight
//!   refresh contention
//! - `Internal` / `Other` (500) — everything else, with detail kept in logs
//!
//! All errors convert to a JSON body `{"message": ..., "code"?: ..., "field"?: ...}`
//! via [`IntoResponse`]; internal detail is logged, never sent to the client.

use crate::db::errors::DbError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Authentication required but not provided or invalid
    #[error("Not authenticated")]
    Unauthenticated { message: Option<String> },

    /// Identity known, operation denied
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    /// Invalid request data or business rule violation
    #[error("{message}")]
    BadRequest {
        message: String,
        /// Offending column / parameter, when one can be named
        field: Option<String>,
    },

    /// Requested resource not found
    #[error("{resource} {id} not found")]
    NotFound { resource: String, id: String },

    /// Conflict, e.g. unique constraint violations
    #[error("Conflict: {message}")]
    Conflict { message: String, code: Option<String> },

    /// A precondition for the operation does not hold
    #[error("Precondition failed: {message}")]
    PreconditionFailed { message: String, code: Option<String> },

    /// Payload exceeds maximum allowed size
    #[error("Payload too large: {message}")]
    PayloadTooLarge { message: String },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Database operation error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Error::BadRequest {
            message: message.into(),
            field: None,
        }
    }

    pub fn bad_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Error::BadRequest {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn not_found(resource: impl Into<String>, id: impl std::fmt::Display) -> Self {
        Error::NotFound {
            resource: resource.into(),
            id: id.to_string(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Error::Forbidden { message: message.into() }
    }

    pub fn unauthenticated() -> Self {
        Error::Unauthenticated { message: None }
    }

    pub fn precondition(code: &str, message: impl Into<String>) -> Self {
        Error::PreconditionFailed {
            message: message.into(),
            code: Some(code.to_string()),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Error::Forbidden { .. } => StatusCode::FORBIDDEN,
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::PreconditionFailed { .. } => StatusCode::PRECONDITION_FAILED,
            Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Database(db_err) => match db_err {
                DbError::NotFound => StatusCode::NOT_FOUND,
                DbError::UniqueViolation { .. } => StatusCode::CONFLICT,
                DbError::ForeignKeyViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::CheckViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::InsufficientPrivilege { .. } => StatusCode::FORBIDDEN,
                DbError::QueryCanceled => StatusCode::INTERNAL_SERVER_ERROR,
                DbError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// User-safe message, without internal implementation detail.
    pub fn user_message(&self) -> String {
        match self {
            Error::Unauthenticated { message } => message.clone().unwrap_or_else(|| "Authentication required".to_string()),
            Error::Forbidden { message } => message.clone(),
            Error::BadRequest { message, .. } => message.clone(),
            Error::NotFound { resource, id } => format!("{resource} {id} not found"),
            Error::Conflict { message, .. } => message.clone(),
            Error::PreconditionFailed { message, .. } => message.clone(),
            Error::PayloadTooLarge { message } => message.clone(),
            Error::Internal { .. } => "Internal server error".to_string(),
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "Resource not found".to_string(),
                DbError::UniqueViolation { constraint, .. } => match constraint {
                    Some(c) => format!("Duplicate value violates constraint {c}"),
                    None => "Resource already exists".to_string(),
                },
                DbError::ForeignKeyViolation { .. } => "Invalid reference to related resource".to_string(),
                DbError::CheckViolation { constraint, .. } => match constraint {
                    Some(c) => format!("Value rejected by constraint {c}"),
                    None => "Invalid data provided".to_string(),
                },
                DbError::InsufficientPrivilege { .. } => "Not allowed for this row".to_string(),
                DbError::QueryCanceled => "Request canceled".to_string(),
                DbError::Other(_) => "Database error occurred".to_string(),
            },
            Error::Other(_) => "Internal server error".to_string(),
        }
    }

    /// Machine-readable code, when one exists.
    fn code(&self) -> Option<String> {
        match self {
            Error::Conflict { code, .. } => code.clone(),
            Error::PreconditionFailed { code, .. } => code.clone(),
            Error::Database(DbError::UniqueViolation { constraint, .. }) => constraint.clone(),
            _ => None,
        }
    }

    fn field(&self) -> Option<String> {
        match self {
            Error::BadRequest { field, .. } => field.clone(),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<String>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Full error detail goes to the log; the client gets the scrubbed body.
        match &self {
            Error::Database(DbError::Other(_)) | Error::Internal { .. } | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Database(_) => {
                tracing::warn!("Database constraint error: {}", self);
            }
            Error::Unauthenticated { .. } | Error::Forbidden { .. } => {
                tracing::info!("Authorization error: {}", self);
            }
            Error::Conflict { .. } | Error::PreconditionFailed { .. } => {
                tracing::info!("Contention error: {}", self);
            }
            Error::BadRequest { .. } | Error::NotFound { .. } | Error::PayloadTooLarge { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let body = ErrorBody {
            message: self.user_message(),
            code: self.code(),
            field: self.field(),
        };

        (self.status_code(), Json(body)).into_response()
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_error_kinds() {
        assert_eq!(Error::unauthenticated().status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(Error::forbidden("no").status_code(), StatusCode::FORBIDDEN);
        assert_eq!(Error::bad_request("bad").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(Error::not_found("Job", "x").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            Error::precondition("RefreshInProgress", "busy").status_code(),
            StatusCode::PRECONDITION_FAILED
        );
    }

    #[test]
    fn rls_rejection_maps_to_forbidden() {
        let err = Error::Database(DbError::InsufficientPrivilege {
            message: "permission denied for table votes".to_string(),
        });
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        // Raw table detail is scrubbed from the client message.
        assert!(!err.user_message().contains("votes"));
    }

    #[test]
    fn unique_violation_maps_to_conflict_with_constraint_code() {
        let err = Error::Database(DbError::UniqueViolation {
            constraint: Some("votes_poll_user_key".to_string()),
            table: Some("votes".to_string()),
            message: "duplicate key value".to_string(),
        });
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.code().as_deref(), Some("votes_poll_user_key"));
    }

    #[test]
    fn filter_errors_carry_the_offending_field() {
        let err = Error::bad_field("unknown column", "colour");
        assert_eq!(err.field().as_deref(), Some("colour"));
    }
}
