//! Error taxonomy for query parsing and compilation.
//!
//! Two classes of compile-time errors exist:
//!
//! - [`SyntaxError`]: the input could not be tokenized or parsed.
//! - [`ValidationError`]: the input is well formed but references something the
//!   catalog does not allow (unknown table or column, incompatible literal, ...).
//!
//! Both map to HTTP 400 and are wrapped by [`QueryError`]. Database driver errors
//! are never produced here; they belong to the execution engine.

use serde::Serialize;
use thiserror::Error;

/// Malformed query text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyntaxError {
    #[error("Empty input")]
    EmptyInput,

    #[error("Empty token at position {position}")]
    EmptyToken { position: usize },

    #[error("Unterminated {quote} quote opened at position {position}")]
    UnbalancedQuotes { quote: char, position: usize },

    #[error("Unbalanced parenthesis at position {position}")]
    UnbalancedParens { position: usize },

    #[error("Malformed cast in '{token}'")]
    MalformedCast { token: String },

    #[error("Malformed alias in '{token}'")]
    MalformedAlias { token: String },

    #[error("Malformed embed '{token}'")]
    MalformedEmbed { token: String },

    #[error("Embedded resource '{resource}' has an empty select")]
    EmptyEmbedSelect { resource: String },

    #[error("Wildcard cannot carry an alias or cast: '{token}'")]
    InvalidWildcard { token: String },

    #[error("Nesting deeper than {max} levels")]
    NestingTooDeep { max: usize },

    #[error("Malformed order entry '{token}'")]
    MalformedOrder { token: String },

    #[error("Invalid order modifier '{modifier}' in '{token}'")]
    InvalidOrderModifier { token: String, modifier: String },

    #[error("Column '{column}' appears more than once in order")]
    DuplicateOrderColumn { column: String },

    #[error("Unexpected character '{ch}' at position {position}")]
    UnexpectedChar { ch: char, position: usize },

    #[error("Unexpected '{found}' at position {position}, expected {expected}")]
    UnexpectedToken {
        found: String,
        expected: &'static str,
        position: usize,
    },

    #[error("Unexpected end of input, expected {expected}")]
    UnexpectedEnd { expected: &'static str },

    #[error("Operator '{operator}' requires at least one value")]
    EmptyList { operator: &'static str },
}

impl SyntaxError {
    /// Suggestion shown to the client alongside the message.
    pub fn hint(&self) -> Option<String> {
        let hint = match self {
            Self::EmptyInput => "Provide at least one column or expression",
            Self::EmptyToken { .. } => "Remove the stray separator",
            Self::UnbalancedQuotes { .. } => "Close the quoted section",
            Self::UnbalancedParens { .. } => "Check that every '(' has a matching ')'",
            Self::MalformedCast { .. } => "Casts look like 'column::type'",
            Self::MalformedAlias { .. } => "Aliases look like 'alias:column' with exactly one ':'",
            Self::MalformedEmbed { .. } => {
                "Embeds look like 'alias:resource!constraint(column,...)'"
            }
            Self::EmptyEmbedSelect { .. } => "List at least one column inside the parentheses",
            Self::InvalidWildcard { .. } => "Select '*' on its own",
            Self::NestingTooDeep { .. } => "Reduce the nesting of the expression",
            Self::MalformedOrder { .. } => "Order entries look like 'column.desc.nullslast'",
            Self::InvalidOrderModifier { .. } => {
                "Use one of asc, desc, nullsfirst, nullslast (direction first)"
            }
            Self::DuplicateOrderColumn { .. } => "Order by each column at most once",
            Self::UnexpectedChar { .. } => "Quote values that contain special characters",
            Self::UnexpectedToken { .. } | Self::UnexpectedEnd { .. } => {
                "Filters look like 'column op value', combined with and/or/not"
            }
            Self::EmptyList { .. } => "Lists look like '(value1,value2)'",
        };
        Some(hint.to_string())
    }

    /// The offending fragment, when one is available.
    pub fn detail(&self) -> Option<String> {
        match self {
            Self::MalformedCast { token }
            | Self::MalformedAlias { token }
            | Self::MalformedEmbed { token }
            | Self::InvalidWildcard { token }
            | Self::MalformedOrder { token } => Some(token.clone()),
            Self::InvalidOrderModifier { modifier, .. } => Some(modifier.clone()),
            Self::EmptyEmbedSelect { resource } => Some(resource.clone()),
            Self::DuplicateOrderColumn { column } => Some(column.clone()),
            Self::UnexpectedToken { found, .. } => Some(found.clone()),
            Self::UnexpectedChar { ch, .. } => Some(ch.to_string()),
            Self::EmptyList { operator } => Some((*operator).to_string()),
            Self::UnbalancedQuotes { quote, .. } => Some(quote.to_string()),
            Self::EmptyInput
            | Self::EmptyToken { .. }
            | Self::UnbalancedParens { .. }
            | Self::NestingTooDeep { .. }
            | Self::UnexpectedEnd { .. } => None,
        }
    }

    /// Byte offset in the input, when one is available.
    pub fn position(&self) -> Option<usize> {
        match self {
            Self::EmptyToken { position }
            | Self::UnbalancedQuotes { position, .. }
            | Self::UnbalancedParens { position }
            | Self::UnexpectedChar { position, .. }
            | Self::UnexpectedToken { position, .. } => Some(*position),
            _ => None,
        }
    }
}

/// Well-formed input that the catalog or compiler limits reject.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Unknown table '{table}'")]
    UnknownTable { table: String },

    #[error("Unknown column '{column}' on table '{table}'")]
    UnknownColumn { table: String, column: String },

    #[error("Invalid identifier '{name}'")]
    InvalidIdentifier { name: String },

    #[error("Column '{column}' is not a json column and has no nested fields")]
    NotJsonColumn { column: String },

    #[error("Value '{value}' is not a valid {expected} for column '{column}'")]
    TypeMismatch {
        column: String,
        expected: String,
        value: String,
    },

    #[error("Operator '{operator}' cannot be used on column '{column}': {reason}")]
    UnsupportedOperator {
        column: String,
        operator: &'static str,
        reason: &'static str,
    },

    #[error("Unsupported cast type '{cast}'")]
    UnsupportedCast { cast: String },

    #[error("No relationship between '{from}' and '{to}'")]
    NoRelationship { from: String, to: String },

    #[error("More than one relationship between '{from}' and '{to}'")]
    AmbiguousRelationship {
        from: String,
        to: String,
        candidates: Vec<String>,
    },

    #[error("No relationship named '{constraint}' between '{from}' and '{to}'")]
    UnknownRelationship {
        from: String,
        to: String,
        constraint: String,
    },

    #[error("Output key '{key}' is selected more than once")]
    DuplicateOutputKey { key: String },

    #[error("Limit {limit} exceeds maximum of {max}")]
    LimitExceeded { limit: u64, max: u64 },

    #[error("Query too complex: {reason}")]
    QueryTooComplex { reason: String },

    #[error("{operation} is not supported for {statement} statements")]
    NotSupportedForStatement {
        operation: &'static str,
        statement: &'static str,
    },

    #[error("{statement} requires a filter")]
    MissingFilter { statement: &'static str },

    #[error("Invalid payload: {reason}")]
    InvalidPayload { reason: String },

    #[error("Invalid catalog: {reason}")]
    InvalidCatalog { reason: String },
}

impl ValidationError {
    pub fn unknown_table(table: impl Into<String>) -> Self {
        Self::UnknownTable {
            table: table.into(),
        }
    }

    pub fn unknown_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self::UnknownColumn {
            table: table.into(),
            column: column.into(),
        }
    }

    pub fn type_mismatch(
        column: impl Into<String>,
        expected: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::TypeMismatch {
            column: column.into(),
            expected: expected.into(),
            value: value.into(),
        }
    }

    pub fn invalid_payload(reason: impl Into<String>) -> Self {
        Self::InvalidPayload {
            reason: reason.into(),
        }
    }

    pub fn invalid_catalog(reason: impl Into<String>) -> Self {
        Self::InvalidCatalog {
            reason: reason.into(),
        }
    }

    pub fn hint(&self) -> Option<String> {
        match self {
            Self::UnknownTable { .. } => Some("Check the resource name in the URL".to_string()),
            Self::UnknownColumn { table, .. } => {
                Some(format!("Only columns declared for '{table}' can be referenced"))
            }
            Self::InvalidIdentifier { .. } => {
                Some("Identifiers may contain letters, digits and '_'".to_string())
            }
            Self::AmbiguousRelationship { candidates, .. } => Some(format!(
                "Disambiguate with 'resource!constraint(...)', one of: {}",
                candidates.join(", ")
            )),
            Self::UnsupportedCast { .. } => Some(
                "Supported casts: text, integer, bigint, float8, numeric, boolean, uuid, date, time, timestamp, timestamptz, json, jsonb"
                    .to_string(),
            ),
            Self::MissingFilter { .. } => {
                Some("Add a filter to restrict the affected rows".to_string())
            }
            Self::LimitExceeded { max, .. } => Some(format!("Use a limit of at most {max}")),
            _ => None,
        }
    }

    pub fn detail(&self) -> Option<String> {
        match self {
            Self::UnknownTable { table } => Some(table.clone()),
            Self::UnknownColumn { column, .. }
            | Self::NotJsonColumn { column }
            | Self::UnsupportedOperator { column, .. } => Some(column.clone()),
            Self::InvalidIdentifier { name } => Some(name.clone()),
            Self::TypeMismatch { value, .. } => Some(value.clone()),
            Self::UnsupportedCast { cast } => Some(cast.clone()),
            Self::UnknownRelationship { constraint, .. } => Some(constraint.clone()),
            Self::DuplicateOutputKey { key } => Some(key.clone()),
            _ => None,
        }
    }
}

/// Error categories for logging and response typing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Syntax,
    Validation,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Syntax => "syntax_error",
            Self::Validation => "validation_error",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Any compile-time error raised by the query pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl QueryError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Syntax(_) => ErrorCategory::Syntax,
            Self::Validation(_) => ErrorCategory::Validation,
        }
    }

    /// HTTP status for the error. Compile errors are always client errors.
    pub fn status(&self) -> u16 {
        400
    }

    pub fn hint(&self) -> Option<String> {
        match self {
            Self::Syntax(e) => e.hint(),
            Self::Validation(e) => e.hint(),
        }
    }

    pub fn detail(&self) -> Option<String> {
        match self {
            Self::Syntax(e) => e.detail(),
            Self::Validation(e) => e.detail(),
        }
    }

    /// Structured body for client display.
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            status: self.status(),
            error_type: self.category().as_str(),
            message: self.to_string(),
            hint: self.hint(),
            detail: self.detail(),
        }
    }
}

/// Serializable error shape returned to clients for compile errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub status: u16,
    #[serde(rename = "type")]
    pub error_type: &'static str,
    pub message: String,
    pub hint: Option<String>,
    pub detail: Option<String>,
}

/// Convenience result type for query operations.
pub type Result<T> = std::result::Result<T, QueryError>;
