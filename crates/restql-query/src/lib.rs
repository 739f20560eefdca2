//! Query compilation for restql.
//!
//! Parses the `select`, `filter` and `order` request strings into ASTs,
//! validates them against an attribute catalog and compiles them into
//! parameterized PostgreSQL statements.
//!
//! ```ignore
//! let engine = QueryEngine::new(catalog, CompilerConfig::default(), &CacheConfig::default())?;
//! let raw = RawQuery::default().select("id,author:users(name)").filter("id gt 10");
//! let statement = engine.compile_select("posts", &raw)?;
//! ```

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod lexer;
pub mod order;
pub mod query_cache;
pub mod select;
pub mod sql_builder;

pub use catalog::{
    AttributeCatalog, Cardinality, Catalog, ColumnDef, ColumnType, DefaultPredicate, Relationship,
    ResolvedRelationship, TableDef,
};
pub use config::{CacheConfig, CompilerConfig};
pub use engine::{EngineInitError, QueryEngine, RawQuery};
pub use error::{ErrorBody, ErrorCategory, QueryError, Result, SyntaxError, ValidationError};
pub use filter::{Comparison, Expression, FilterParser, LogicalOp, Operand, Operator};
pub use lexer::{Token, TokenKind, tokenize};
pub use order::{Direction, NullsOrder, OrderSpec, parse_order};
pub use query_cache::{CacheStatsSnapshot, ParsedQuery, QueryCache, QueryCacheKey};
pub use select::{ColumnNode, EmbedNode, SelectNode, SelectParser, parse_select, render_select};
pub use sql_builder::{
    CompiledStatement, FilterOptions, Pagination, QueryBuilder, SqlValue, StatementKind,
    escape_identifier,
};
