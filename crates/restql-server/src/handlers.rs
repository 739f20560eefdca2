//! Table routes and health checks.
//!
//! Each table route compiles the request through the shared [`QueryEngine`]
//! and hands the statement to the [`StatementExecutor`]. Mutations answer
//! `204 No Content` unless the client sends `Prefer: return=representation`.

use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State, rejection::QueryRejection},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use restql_db_postgres::{ExecutionResult, StatementExecutor};
use restql_query::{CompiledStatement, QueryEngine, RawQuery};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<QueryEngine>,
    pub executor: Arc<dyn StatementExecutor>,
}

impl AppState {
    pub fn new(engine: QueryEngine, executor: Arc<dyn StatementExecutor>) -> Self {
        Self {
            engine: Arc::new(engine),
            executor,
        }
    }
}

pub async fn healthz(State(state): State<AppState>) -> Response {
    match state.executor.ping().await {
        Ok(()) => Json(json!({
            "status": "ok",
            "cache": state.engine.cache_stats(),
        }))
        .into_response(),
        Err(e) => {
            warn!(error = %e, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable" })),
            )
                .into_response()
        }
    }
}

pub async fn select_rows(
    State(state): State<AppState>,
    Path(table): Path<String>,
    query: Result<Query<RawQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let raw = raw_query(query)?;
    let statement = state.engine.compile_select(&table, &raw)?;
    let result = run(&state, &statement).await?;
    Ok(Json(result.rows.unwrap_or_else(|| json!([]))).into_response())
}

pub async fn insert_rows(
    State(state): State<AppState>,
    Path(table): Path<String>,
    query: Result<Query<RawQuery>, QueryRejection>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let raw = raw_query(query)?;
    let rows = json_body(&body)?;
    let returning = wants_representation(&headers);
    let statement = state.engine.compile_insert(&table, &rows, &raw, returning)?;
    let result = run(&state, &statement).await?;
    Ok(mutation_response(StatusCode::CREATED, result, returning))
}

pub async fn update_rows(
    State(state): State<AppState>,
    Path(table): Path<String>,
    query: Result<Query<RawQuery>, QueryRejection>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let raw = raw_query(query)?;
    let set = json_body(&body)?;
    let returning = wants_representation(&headers);
    let statement = state.engine.compile_update(&table, &set, &raw, returning)?;
    let result = run(&state, &statement).await?;
    Ok(mutation_response(StatusCode::OK, result, returning))
}

pub async fn delete_rows(
    State(state): State<AppState>,
    Path(table): Path<String>,
    query: Result<Query<RawQuery>, QueryRejection>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let raw = raw_query(query)?;
    let returning = wants_representation(&headers);
    let statement = state.engine.compile_delete(&table, &raw, returning)?;
    let result = run(&state, &statement).await?;
    Ok(mutation_response(StatusCode::OK, result, returning))
}

async fn run(state: &AppState, statement: &CompiledStatement) -> Result<ExecutionResult, ApiError> {
    let result = state.executor.execute(statement).await?;
    debug!(
        table = %statement.table,
        kind = statement.kind.as_str(),
        rows = result.rows_affected,
        "statement executed"
    );
    Ok(result)
}

fn raw_query(query: Result<Query<RawQuery>, QueryRejection>) -> Result<RawQuery, ApiError> {
    query
        .map(|Query(raw)| raw)
        .map_err(|e| ApiError::bad_request(e.body_text()))
}

fn json_body(body: &[u8]) -> Result<Value, ApiError> {
    if body.is_empty() {
        return Err(ApiError::bad_request("request body is empty"));
    }
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(format!("invalid JSON body: {e}")))
}

fn mutation_response(status: StatusCode, result: ExecutionResult, returning: bool) -> Response {
    match result.rows {
        Some(rows) if returning => (status, Json(rows)).into_response(),
        _ => StatusCode::NO_CONTENT.into_response(),
    }
}

/// `Prefer` may repeat and may carry several comma-separated preferences.
fn wants_representation(headers: &HeaderMap) -> bool {
    headers
        .get_all("prefer")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|pref| pref.trim().eq_ignore_ascii_case("return=representation"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_prefer_header() {
        let mut headers = HeaderMap::new();
        assert!(!wants_representation(&headers));

        headers.insert("prefer", HeaderValue::from_static("return=minimal"));
        assert!(!wants_representation(&headers));

        headers.append(
            "prefer",
            HeaderValue::from_static("count=exact, return=representation"),
        );
        assert!(wants_representation(&headers));
    }

    #[test]
    fn test_json_body() {
        assert!(matches!(json_body(b""), Err(ApiError::BadRequest(_))));
        assert!(matches!(json_body(b"{nope"), Err(ApiError::BadRequest(_))));
        assert_eq!(json_body(br#"{"a":1}"#).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_mutation_response_status() {
        let with_rows = ExecutionResult::from_rows(json!([{"id": 1}])).unwrap();
        assert_eq!(
            mutation_response(StatusCode::CREATED, with_rows.clone(), true).status(),
            StatusCode::CREATED
        );
        assert_eq!(
            mutation_response(StatusCode::CREATED, with_rows, false).status(),
            StatusCode::NO_CONTENT
        );
        assert_eq!(
            mutation_response(StatusCode::OK, ExecutionResult::affected(2), false).status(),
            StatusCode::NO_CONTENT
        );
    }
}
