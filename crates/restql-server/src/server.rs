use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Request, Response},
    middleware,
    routing::get,
};
use restql_db_postgres::{PostgresExecutor, StatementExecutor, create_pool};
use restql_query::QueryEngine;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::{Span, field::Empty};

use crate::{
    config::{AppConfig, ServerConfig},
    handlers::{self, AppState},
    middleware as app_middleware,
};

pub struct RestqlServer {
    addr: SocketAddr,
    app: Router,
}

pub fn build_app(state: AppState, cfg: &ServerConfig) -> Router {
    let router = Router::new()
        .route("/healthz", get(handlers::healthz))
        .route(
            "/{table}",
            get(handlers::select_rows)
                .post(handlers::insert_rows)
                .patch(handlers::update_rows)
                .delete(handlers::delete_rows),
        )
        .with_state(state)
        // Outermost last: the request id exists before the trace span opens.
        .layer(middleware::from_fn(app_middleware::require_json_body))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request<_>| {
                    let req_id = req
                        .extensions()
                        .get::<HeaderValue>()
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = Empty,
                        request_id = %req_id
                    )
                })
                .on_response(|res: &Response<_>, latency: Duration, span: &Span| {
                    span.record("http.status_code", res.status().as_u16());
                    tracing::info!(
                        http.status = res.status().as_u16(),
                        latency_ms = latency.as_millis() as u64,
                        "request completed"
                    );
                }),
        )
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn(app_middleware::request_id))
        .layer(DefaultBodyLimit::max(cfg.body_limit_bytes));

    if cfg.max_concurrent_requests > 0 {
        router.layer(ConcurrencyLimitLayer::new(cfg.max_concurrent_requests))
    } else {
        router
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Engine(#[from] restql_query::EngineInitError),

    #[error(transparent)]
    Database(#[from] restql_db_postgres::DbError),

    #[error("configuration error: {0}")]
    Config(String),
}

#[derive(Default)]
pub struct ServerBuilder {
    config: AppConfig,
    addr: Option<SocketAddr>,
    executor: Option<Arc<dyn StatementExecutor>>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = Some(addr);
        self
    }

    /// Use `executor` instead of connecting to PostgreSQL.
    pub fn with_executor(mut self, executor: Arc<dyn StatementExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub async fn build(self) -> Result<RestqlServer, StartupError> {
        self.config.validate().map_err(StartupError::Config)?;

        let engine = QueryEngine::new(
            self.config.catalog.clone(),
            self.config.compiler.clone(),
            &self.config.cache,
        )?;

        let executor = match self.executor {
            Some(executor) => executor,
            None => {
                let pool = create_pool(&self.config.postgres).await?;
                Arc::new(PostgresExecutor::new(pool)) as Arc<dyn StatementExecutor>
            }
        };

        tracing::info!(
            tables = self.config.catalog.tables.len(),
            relationships = self.config.catalog.relationships.len(),
            "query engine ready"
        );

        let addr = self.addr.unwrap_or_else(|| self.config.addr());
        let app = build_app(AppState::new(engine, executor), &self.config.server);
        Ok(RestqlServer { addr, app })
    }
}

impl RestqlServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn run(self) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
