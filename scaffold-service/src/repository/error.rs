//! Repository error types
//!
//! Three layers of failure:
//!
//! - [`FilterError`]: a malformed filter map or assignment set. Raised before
//!   any I/O and never retried.
//! - [`StoreError`]: a fault reported by the storage backend, classified from
//!   the driver error.
//! - [`RepositoryError`]: what repository callers see. Storage faults are
//!   re-signaled as object-not-found, object-already-exists or a catch-all
//!   database operation error, keeping the driver's text.
//!
//! # Example
//!
//! ```rust
//! use scaffold_service::repository::{RepositoryError, RepositoryErrorKind, RepositoryOperation};
//!
//! let error = RepositoryError::not_found(RepositoryOperation::Delete, "Example", "42");
//! assert_eq!(error.kind, RepositoryErrorKind::ObjectNotFound);
//! assert_eq!(
//!     error.to_string(),
//!     "Repository object_not_found error during delete: Object not found [Example: 42]"
//! );
//! ```

use std::fmt;

use super::entity::ColumnKind;

/// A filter map or assignment set that cannot be compiled
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("unknown column `{column}` on {entity}")]
    UnknownColumn { entity: &'static str, column: String },

    #[error("operator `in` on `{column}` requires a sequence")]
    ExpectedSequence { column: String },

    #[error("invalid value for `{column}`: expected {expected}, got {found}")]
    InvalidValue {
        column: String,
        expected: ColumnKind,
        found: String,
    },

    #[error("update requires at least one assignment")]
    EmptyAssignments,

    #[error("column `{0}` is managed by storage and cannot be assigned")]
    ReadOnlyColumn(String),

    #[error("invalid `{key}` parameter: {value}")]
    InvalidPagination { key: &'static str, value: String },
}

/// A fault reported by the storage backend
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("unique constraint violated: {message}")]
    UniqueViolation {
        message: String,
        constraint: Option<String>,
    },

    #[error("connection failure: {0}")]
    Connection(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("cannot decode column `{column}` from {found}")]
    Decode { column: String, found: &'static str },

    #[error("unsupported value: {0}")]
    Unsupported(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::Error as E;
        match err {
            E::Database(db_err) if db_err.is_unique_violation() => Self::UniqueViolation {
                message: db_err.message().to_string(),
                constraint: db_err.constraint().map(str::to_string),
            },
            E::Database(db_err) => Self::Database(db_err.to_string()),
            E::PoolTimedOut => Self::Timeout("connection pool timed out".to_string()),
            E::PoolClosed => Self::Connection("connection pool is closed".to_string()),
            E::WorkerCrashed => Self::Connection("database worker crashed".to_string()),
            E::Io(e) => Self::Connection(e.to_string()),
            E::Tls(e) => Self::Connection(format!("TLS error: {}", e)),
            E::ColumnNotFound(column) => Self::Decode {
                column,
                found: "missing column",
            },
            other => Self::Database(other.to_string()),
        }
    }
}

/// Repository operation being performed when the error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryOperation {
    Get,
    Query,
    Create,
    CreateAll,
    PartialUpdate,
    Delete,
    BulkInsert,
    Begin,
    Flush,
    Refresh,
    Commit,
    Rollback,
}

impl fmt::Display for RepositoryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "get"),
            Self::Query => write!(f, "query"),
            Self::Create => write!(f, "create"),
            Self::CreateAll => write!(f, "create_all"),
            Self::PartialUpdate => write!(f, "partial_update"),
            Self::Delete => write!(f, "delete"),
            Self::BulkInsert => write!(f, "bulk_insert"),
            Self::Begin => write!(f, "begin"),
            Self::Flush => write!(f, "flush"),
            Self::Refresh => write!(f, "refresh"),
            Self::Commit => write!(f, "commit"),
            Self::Rollback => write!(f, "rollback"),
        }
    }
}

/// Category of repository error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryErrorKind {
    /// No row matched
    ObjectNotFound,
    /// A uniqueness constraint rejected the write
    ObjectAlreadyExists,
    /// Any other storage fault, including lost connectivity and timeouts
    DbOperation,
    /// The filter map or assignments were malformed
    InvalidFilter,
}

impl fmt::Display for RepositoryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ObjectNotFound => write!(f, "object_not_found"),
            Self::ObjectAlreadyExists => write!(f, "object_already_exists"),
            Self::DbOperation => write!(f, "db_operation"),
            Self::InvalidFilter => write!(f, "invalid_filter"),
        }
    }
}

/// Structured repository error with operation context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryError {
    /// The operation being performed when the error occurred
    pub operation: RepositoryOperation,
    /// The category of error
    pub kind: RepositoryErrorKind,
    /// Human-readable error message
    pub message: String,
    /// The type of entity involved
    pub entity_type: Option<String>,
    /// The identity of the entity involved
    pub entity_id: Option<String>,
    /// Text of the originating fault
    pub source_message: Option<String>,
}

impl RepositoryError {
    /// Create a new repository error
    pub fn new(
        operation: RepositoryOperation,
        kind: RepositoryErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            kind,
            message: message.into(),
            entity_type: None,
            entity_id: None,
            source_message: None,
        }
    }

    /// Create an "object not found" error with entity context
    pub fn not_found(
        operation: RepositoryOperation,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        Self::new(operation, RepositoryErrorKind::ObjectNotFound, "Object not found")
            .with_entity(entity_type, entity_id)
    }

    /// Create an "object already exists" error
    pub fn already_exists(operation: RepositoryOperation, source: &StoreError) -> Self {
        Self::new(
            operation,
            RepositoryErrorKind::ObjectAlreadyExists,
            "Object already exists",
        )
        .with_source(source)
    }

    /// Create a catch-all database operation error
    pub fn db_operation(operation: RepositoryOperation, source: &StoreError) -> Self {
        Self::new(
            operation,
            RepositoryErrorKind::DbOperation,
            "A database operation error has occurred",
        )
        .with_source(source)
    }

    /// Create an error for a filter map that failed to compile
    pub fn invalid_filter(operation: RepositoryOperation, source: &FilterError) -> Self {
        Self::new(operation, RepositoryErrorKind::InvalidFilter, source.to_string())
    }

    /// Re-signal a storage fault
    ///
    /// Uniqueness violations become [`RepositoryErrorKind::ObjectAlreadyExists`];
    /// everything else is a [`RepositoryErrorKind::DbOperation`].
    pub fn from_store(operation: RepositoryOperation, source: StoreError) -> Self {
        match source {
            StoreError::UniqueViolation { .. } => Self::already_exists(operation, &source),
            _ => Self::db_operation(operation, &source),
        }
    }

    /// Add entity context to an existing error
    pub fn with_entity(
        mut self,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    /// Add the entity type only
    pub fn with_entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    /// Replace the human-readable message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Record the originating fault's text
    pub fn with_source(mut self, source: impl fmt::Display) -> Self {
        self.source_message = Some(source.to_string());
        self
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == RepositoryErrorKind::ObjectNotFound
    }

    pub fn is_already_exists(&self) -> bool {
        self.kind == RepositoryErrorKind::ObjectAlreadyExists
    }
}

impl fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Repository {} error during {}: {}",
            self.kind, self.operation, self.message
        )?;

        match (&self.entity_type, &self.entity_id) {
            (Some(entity_type), Some(id)) => write!(f, " [{}: {}]", entity_type, id)?,
            (Some(entity_type), None) => write!(f, " [{}]", entity_type)?,
            _ => {}
        }

        if let Some(source) = &self.source_message {
            write!(f, ": {}", source)?;
        }

        Ok(())
    }
}

impl std::error::Error for RepositoryError {}

/// Result type alias for repository operations
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Result type alias for storage backends
pub type StoreResult<T> = Result<T, StoreError>;
