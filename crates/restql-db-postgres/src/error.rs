//! Error types for the PostgreSQL execution engine and the translation of
//! driver errors into client-facing responses.

use serde::Serialize;
use sqlx_core::error::Error as SqlxError;
use sqlx_postgres::{PgDatabaseError, PgErrorPosition};
use tracing::error;

/// PostgreSQL error code for unique violation (23505).
pub const PG_UNIQUE_VIOLATION: &str = "23505";

/// PostgreSQL error code for foreign key violation (23503).
pub const PG_FOREIGN_KEY_VIOLATION: &str = "23503";

/// PostgreSQL error code for undefined table (42P01).
pub const PG_UNDEFINED_TABLE: &str = "42P01";

/// PostgreSQL error code for insufficient privilege (42501).
pub const PG_INSUFFICIENT_PRIVILEGE: &str = "42501";

/// PostgreSQL error code for serialization failure (40001).
pub const PG_SERIALIZATION_FAILURE: &str = "40001";

/// PostgreSQL error code for deadlock detected (40P01).
pub const PG_DEADLOCK_DETECTED: &str = "40P01";

/// PostgreSQL error code for query canceled, including statement timeout (57014).
pub const PG_QUERY_CANCELED: &str = "57014";

const REDACTED_MESSAGE: &str = "internal database error";

/// Errors raised while executing a compiled statement.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] SqlxError),

    #[error("configuration error: {message}")]
    Config { message: String },

    /// The database answered with something other than the expected JSON shape.
    #[error("unexpected result: {message}")]
    Decode { message: String },
}

impl DbError {
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// The client-facing translation of this error, before redaction.
    pub fn response(&self) -> DbErrorResponse {
        match self {
            Self::Sqlx(SqlxError::Database(db_err)) => {
                let failure = match db_err.try_downcast_ref::<PgDatabaseError>() {
                    Some(pg) => DatabaseFailure::from_pg(pg),
                    None => DatabaseFailure::new(
                        db_err.code().as_deref().unwrap_or_default(),
                        db_err.message(),
                    ),
                };
                translate_sqlstate(&failure)
            }
            Self::Sqlx(SqlxError::PoolTimedOut) => DbErrorResponse::new(
                503,
                "unavailable",
                "timed out waiting for a database connection",
            )
            .retryable(),
            Self::Sqlx(SqlxError::PoolClosed) => {
                DbErrorResponse::new(503, "unavailable", "database pool is closed")
            }
            Self::Sqlx(SqlxError::Io(e)) => {
                DbErrorResponse::new(503, "unavailable", e.to_string()).retryable()
            }
            Self::Sqlx(SqlxError::RowNotFound) => {
                DbErrorResponse::new(404, "not_found", "no rows returned")
            }
            Self::Sqlx(other) => DbErrorResponse::new(500, "database_error", other.to_string()),
            Self::Config { message } => DbErrorResponse::new(500, "configuration_error", message),
            Self::Decode { message } => DbErrorResponse::new(500, "database_error", message),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.response().is_retryable()
    }

    pub fn is_safe(&self) -> bool {
        self.response().is_safe()
    }

    /// Response safe to hand to a client. 5xx errors are logged here and
    /// returned without their message or details.
    pub fn to_client_response(&self) -> DbErrorResponse {
        let response = self.response();
        if response.is_safe() {
            return response;
        }
        error!(
            status = response.status,
            error_type = response.error_type,
            message = %response.message,
            detail = ?response.details.detail,
            "database error"
        );
        response.redacted()
    }
}

/// Structured fields reported by the database alongside an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// 1-based character position in the statement text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint: Option<String>,
}

/// Error body returned for execution failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DbErrorResponse {
    pub status: u16,
    #[serde(rename = "type")]
    pub error_type: &'static str,
    pub message: String,
    pub details: ErrorDetails,
    #[serde(skip)]
    retryable: bool,
}

impl DbErrorResponse {
    pub fn new(status: u16, error_type: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            error_type,
            message: message.into(),
            details: ErrorDetails::default(),
            retryable: false,
        }
    }

    fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Transient failures (serialization conflicts, deadlocks, lost connections).
    /// Constraint and permission errors are never retryable.
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Whether message and details may be shown to the client verbatim.
    pub fn is_safe(&self) -> bool {
        self.status < 500
    }

    pub fn redacted(self) -> Self {
        Self {
            message: REDACTED_MESSAGE.to_string(),
            details: ErrorDetails::default(),
            ..self
        }
    }
}

/// Driver-independent view of an error reported by the database.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseFailure {
    pub code: String,
    pub message: String,
    pub details: ErrorDetails,
}

impl DatabaseFailure {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: ErrorDetails::default(),
        }
    }

    fn from_pg(err: &PgDatabaseError) -> Self {
        let position = match err.position() {
            Some(PgErrorPosition::Original(position)) => Some(position),
            _ => None,
        };
        Self {
            code: err.code().to_string(),
            message: err.message().to_string(),
            details: ErrorDetails {
                detail: err.detail().map(str::to_string),
                hint: err.hint().map(str::to_string),
                position,
                table: err.table().map(str::to_string),
                column: err.column().map(str::to_string),
                constraint: err.constraint().map(str::to_string),
            },
        }
    }
}

/// Map a SQLSTATE to an HTTP status and error type.
pub fn translate_sqlstate(failure: &DatabaseFailure) -> DbErrorResponse {
    let code = failure.code.as_str();
    let class = code.get(..2).unwrap_or_default();

    let response = match (class, code) {
        (_, PG_UNIQUE_VIOLATION) | (_, PG_FOREIGN_KEY_VIOLATION) => {
            DbErrorResponse::new(409, "conflict", &failure.message)
        }
        ("23", _) => DbErrorResponse::new(400, "constraint_violation", &failure.message),
        ("22", _) => DbErrorResponse::new(400, "invalid_data", &failure.message),
        (_, PG_INSUFFICIENT_PRIVILEGE) => {
            DbErrorResponse::new(403, "permission_denied", &failure.message)
        }
        (_, PG_UNDEFINED_TABLE) => DbErrorResponse::new(404, "not_found", &failure.message),
        ("42", _) => DbErrorResponse::new(400, "invalid_query", &failure.message),
        (_, PG_SERIALIZATION_FAILURE) | (_, PG_DEADLOCK_DETECTED) => {
            DbErrorResponse::new(503, "transaction_conflict", &failure.message).retryable()
        }
        (_, PG_QUERY_CANCELED) => DbErrorResponse::new(504, "timeout", &failure.message),
        ("08", _) | ("53", _) => {
            DbErrorResponse::new(503, "unavailable", &failure.message).retryable()
        }
        ("P0", _) => DbErrorResponse::new(400, "raised", &failure.message),
        _ => DbErrorResponse::new(500, "database_error", &failure.message),
    };
    response.with_details(failure.details.clone())
}

pub type Result<T> = std::result::Result<T, DbError>;
