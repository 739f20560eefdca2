//! PostgreSQL execution engine for restql.
//!
//! Runs [`restql_query::CompiledStatement`]s against a `sqlx` connection pool
//! and translates driver errors into client-facing responses.

pub mod config;
pub mod error;
pub mod executor;
pub mod pool;

pub use config::PostgresConfig;
pub use error::{DatabaseFailure, DbError, DbErrorResponse, ErrorDetails, translate_sqlstate};
pub use executor::{ExecutionResult, PostgresExecutor, StatementExecutor};
pub use pool::{connect_options, create_pool, pool_options};
