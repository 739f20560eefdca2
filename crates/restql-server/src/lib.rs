//! HTTP front end for restql.
//!
//! Exposes every catalog table at `/{table}` and runs the compiled
//! statements through a [`restql_db_postgres::StatementExecutor`].

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod server;

pub use config::AppConfig;
pub use error::ApiError;
pub use handlers::AppState;
pub use server::{RestqlServer, ServerBuilder, StartupError, build_app};
