//! HTTP error responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use restql_db_postgres::DbError;
use restql_query::QueryError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request could not be compiled.
    #[error(transparent)]
    Query(#[from] QueryError),

    /// The compiled statement failed in the database.
    #[error(transparent)]
    Database(#[from] DbError),

    /// The request itself is malformed (query string, body).
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    UnsupportedMediaType(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn unsupported_media_type(msg: impl Into<String>) -> Self {
        Self::UnsupportedMediaType(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Query(e) => status_from_u16(e.status()),
            Self::Database(e) => status_from_u16(e.response().status),
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        }
    }
}

fn status_from_u16(status: u16) -> StatusCode {
    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            Self::Query(e) => serde_json::to_value(e.to_body()),
            Self::Database(e) => serde_json::to_value(e.to_client_response()),
            Self::BadRequest(message) => Ok(json!({
                "status": status.as_u16(),
                "type": "bad_request",
                "message": message,
            })),
            Self::UnsupportedMediaType(message) => Ok(json!({
                "status": status.as_u16(),
                "type": "unsupported_media_type",
                "message": message,
            })),
        };
        match body {
            Ok(body) => (status, Json(body)).into_response(),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize error body");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}
