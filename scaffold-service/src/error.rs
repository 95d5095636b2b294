//! Error types and HTTP response conversion

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::repository::{RepositoryError, RepositoryErrorKind, SchemaError};
use crate::responses::ValidationError;

/// Result type alias using the service error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the service
///
/// Large error variants are boxed to reduce stack size
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// Repository error with operation context
    #[error("{0}")]
    Repository(RepositoryError),

    /// Entity column table rejected at startup
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Migration failure
    #[error("Migration error: {0}")]
    Migration(Box<sqlx::migrate::MigrateError>),

    /// NATS error
    #[cfg(feature = "events")]
    #[error("NATS error: {0}")]
    Nats(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Request payload failed validation (422)
    #[error("Validation error: {0}")]
    Validation(ValidationError),

    /// Inbound event that could not be decoded
    #[error("Invalid event: {0}")]
    Event(String),

    /// Internal server error
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,

    /// Optional error code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// HTTP status code
    pub status: u16,
}

impl ErrorResponse {
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: None,
            status: status.as_u16(),
        }
    }

    /// Create error response with a code
    pub fn with_code(
        status: StatusCode,
        code: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            error: error.into(),
            code: Some(code.into()),
            status: status.as_u16(),
        }
    }
}

impl Error {
    /// Status code this error is reported with
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Repository(e) => repository_status(e.kind),
            Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn repository_status(kind: RepositoryErrorKind) -> StatusCode {
    match kind {
        RepositoryErrorKind::ObjectNotFound => StatusCode::NOT_FOUND,
        RepositoryErrorKind::ObjectAlreadyExists => StatusCode::CONFLICT,
        RepositoryErrorKind::DbOperation => StatusCode::SERVICE_UNAVAILABLE,
        RepositoryErrorKind::InvalidFilter => StatusCode::BAD_REQUEST,
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_response = match self {
            Error::Repository(ref e) => {
                let code = match e.kind {
                    RepositoryErrorKind::ObjectNotFound => {
                        tracing::info!(operation = %e.operation, entity = ?e.entity_type, id = ?e.entity_id, "{}", e.message);
                        "NOT_FOUND"
                    }
                    RepositoryErrorKind::ObjectAlreadyExists => {
                        tracing::warn!(operation = %e.operation, source = ?e.source_message, "Object already exists");
                        "CONFLICT"
                    }
                    RepositoryErrorKind::DbOperation => {
                        tracing::error!(
                            operation = %e.operation,
                            entity = ?e.entity_type,
                            source = ?e.source_message,
                            "{}", e.message
                        );
                        "DB_OPERATION_ERROR"
                    }
                    RepositoryErrorKind::InvalidFilter => "INVALID_FILTER",
                };

                // Driver text stays in the logs.
                ErrorResponse::with_code(status, code, e.message.clone())
            }

            Error::Validation(e) => return e.into_response(),

            Error::Config(e) => {
                tracing::error!("Configuration error: {}", e);
                ErrorResponse::with_code(status, "CONFIG_ERROR", e.to_string())
            }

            other => {
                tracing::error!("Internal error: {}", other);
                ErrorResponse::with_code(status, "INTERNAL_ERROR", "Internal server error")
            }
        };

        (status, Json(error_response)).into_response()
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}

impl From<RepositoryError> for Error {
    fn from(err: RepositoryError) -> Self {
        Error::Repository(err)
    }
}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        Error::Validation(err)
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Error::Migration(Box::new(err))
    }
}
