//! Execution of compiled statements.
//!
//! Every statement comes back from the database as a single JSON array, so the
//! caller never decodes rows column by column:
//!
//! - SELECT: `SELECT COALESCE(json_agg(_r), '[]'::json) FROM (<select>) _r`
//! - mutation with RETURNING: the statement runs as a data-modifying CTE that is
//!   aggregated the same way
//! - mutation without RETURNING: only the affected row count is reported
//!
//! Mutations run inside one transaction. Nothing is retried here.

use async_trait::async_trait;
use restql_query::{CompiledStatement, SqlValue, StatementKind};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx_core::query::{Query, query};
use sqlx_core::row::Row;
use sqlx_core::types::Json;
use sqlx_postgres::{PgArguments, PgPool, Postgres};
use tracing::{debug, instrument};

use crate::error::{DbError, Result};

/// Rows produced by a statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    /// JSON array of row objects; `None` for a mutation without RETURNING.
    pub rows: Option<JsonValue>,
    pub rows_affected: u64,
}

impl ExecutionResult {
    pub fn from_rows(rows: JsonValue) -> Result<Self> {
        let count = rows
            .as_array()
            .map(Vec::len)
            .ok_or_else(|| DbError::decode("expected a JSON array of rows"))?;
        Ok(Self {
            rows: Some(rows),
            rows_affected: count as u64,
        })
    }

    pub fn affected(rows_affected: u64) -> Self {
        Self {
            rows: None,
            rows_affected,
        }
    }
}

/// Runs compiled statements.
#[async_trait]
pub trait StatementExecutor: Send + Sync {
    async fn execute(&self, statement: &CompiledStatement) -> Result<ExecutionResult>;

    /// Liveness check for health endpoints.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

pub struct PostgresExecutor {
    pool: PgPool,
}

impl PostgresExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl StatementExecutor for PostgresExecutor {
    #[instrument(
        skip(self, statement),
        fields(
            table = %statement.table,
            kind = statement.kind.as_str(),
            params = statement.params.len()
        )
    )]
    async fn execute(&self, statement: &CompiledStatement) -> Result<ExecutionResult> {
        if statement.kind == StatementKind::Select {
            let sql = wrap_select(&statement.sql);
            let row = bind_params(query(&sql), &statement.params)
                .fetch_one(&self.pool)
                .await?;
            return ExecutionResult::from_rows(row.try_get(0)?);
        }

        // Dropping an uncommitted transaction rolls it back.
        let mut tx = self.pool.begin().await?;
        let result = if statement.has_returning {
            let sql = wrap_returning(&statement.sql);
            let row = bind_params(query(&sql), &statement.params)
                .fetch_one(&mut *tx)
                .await?;
            ExecutionResult::from_rows(row.try_get(0)?)?
        } else {
            let done = bind_params(query(&statement.sql), &statement.params)
                .execute(&mut *tx)
                .await?;
            ExecutionResult::affected(done.rows_affected())
        };
        tx.commit().await?;

        debug!(rows_affected = result.rows_affected, "statement committed");
        Ok(result)
    }

    async fn ping(&self) -> Result<()> {
        crate::pool::ping(&self.pool).await
    }
}

/// Aggregate the rows of a SELECT into one JSON array.
pub fn wrap_select(sql: &str) -> String {
    format!("SELECT COALESCE(json_agg(\"_r\"), '[]'::json) FROM ({sql}) AS \"_r\"")
}

/// Aggregate the RETURNING rows of a mutation into one JSON array.
pub fn wrap_returning(sql: &str) -> String {
    format!("WITH \"_m\" AS ({sql}) SELECT COALESCE(json_agg(\"_m\"), '[]'::json) FROM \"_m\"")
}

fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &'q [SqlValue],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            SqlValue::Text(s) => query.bind(s.as_str()),
            SqlValue::Integer(i) => query.bind(*i),
            SqlValue::Float(f) => query.bind(*f),
            SqlValue::Boolean(b) => query.bind(*b),
            SqlValue::Json(v) => query.bind(Json(v)),
            SqlValue::TextArray(items) => query.bind(items.clone()),
            SqlValue::Null => query.bind(None::<String>),
        };
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sqlx_core::arguments::Arguments;
    use sqlx_core::executor::Execute;

    #[test]
    fn test_wrapping() {
        assert_eq!(
            wrap_select("SELECT 1 AS \"x\""),
            "SELECT COALESCE(json_agg(\"_r\"), '[]'::json) FROM (SELECT 1 AS \"x\") AS \"_r\""
        );
        assert!(wrap_returning("DELETE FROM \"t\" RETURNING 1").starts_with(
            "WITH \"_m\" AS (DELETE FROM \"t\" RETURNING 1) SELECT COALESCE(json_agg(\"_m\")"
        ));
    }

    #[test]
    fn test_bind_params_binds_every_value() {
        let params = vec![
            SqlValue::Text("a".into()),
            SqlValue::Integer(7),
            SqlValue::Float(1.5),
            SqlValue::Boolean(true),
            SqlValue::Json(json!({"k": [1, 2]})),
            SqlValue::TextArray(vec!["x".into(), "y".into()]),
            SqlValue::Null,
        ];
        let sql = "SELECT $1::text, $2::bigint, $3::float8, $4::boolean, $5::jsonb, $6::text[], $7::jsonb";
        let mut bound = bind_params(query(sql), &params);
        let arguments = bound
            .take_arguments()
            .expect("every value encodes")
            .expect("arguments present");
        assert_eq!(arguments.len(), params.len());
    }

    #[test]
    fn test_wrapping_keeps_statement_intact() {
        let select = "SELECT \"t0\".\"id\" AS \"id\" FROM \"public\".\"users\" AS \"t0\" WHERE \"t0\".\"id\" = $1::bigint";
        let wrapped = wrap_select(select);
        assert!(wrapped.contains(&format!("FROM ({select}) AS \"_r\"")));

        let insert = "INSERT INTO \"public\".\"users\" AS \"t0\" (\"name\") VALUES ($1::text) RETURNING \"t0\".\"id\" AS \"id\"";
        assert_eq!(
            wrap_returning(insert),
            format!(
                "WITH \"_m\" AS ({insert}) SELECT COALESCE(json_agg(\"_m\"), '[]'::json) FROM \"_m\""
            )
        );
    }

    #[test]
    fn test_execution_result() {
        let result = ExecutionResult::from_rows(json!([{"id": 1}, {"id": 2}])).unwrap();
        assert_eq!(result.rows_affected, 2);

        assert!(matches!(
            ExecutionResult::from_rows(json!({"id": 1})),
            Err(DbError::Decode { .. })
        ));

        let result = ExecutionResult::affected(3);
        assert_eq!(result.rows, None);
        assert_eq!(result.rows_affected, 3);
    }
}
