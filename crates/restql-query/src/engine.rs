//! Query engine facade: parse (with caching) and compile in one call.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::catalog::{AttributeCatalog, Catalog};
use crate::config::{CacheConfig, CompilerConfig};
use crate::error::{QueryError, Result, ValidationError};
use crate::filter::FilterParser;
use crate::order::parse_order;
use crate::query_cache::{CacheStatsSnapshot, ParsedQuery, QueryCache, QueryCacheKey};
use crate::select::{SelectNode, SelectParser};
use crate::sql_builder::{
    CompiledStatement, FilterOptions, Pagination, QueryBuilder, StatementKind,
};

/// Raw request parameters, as they arrive in the query string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RawQuery {
    pub select: Option<String>,
    pub filter: Option<String>,
    pub order: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl RawQuery {
    pub fn select(mut self, select: impl Into<String>) -> Self {
        self.select = Some(select.into());
        self
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn order(mut self, order: impl Into<String>) -> Self {
        self.order = Some(order.into());
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    fn has_pagination(&self) -> bool {
        self.limit.is_some() || self.offset.is_some()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineInitError {
    #[error("invalid catalog: {0}")]
    Catalog(#[from] ValidationError),

    #[error("invalid compiler configuration: {0}")]
    Config(String),
}

/// Shared, immutable after construction; safe to use from many requests at once.
pub struct QueryEngine {
    catalog: Arc<dyn AttributeCatalog>,
    config: CompilerConfig,
    cache: QueryCache,
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl QueryEngine {
    pub fn new(
        catalog: Catalog,
        config: CompilerConfig,
        cache: &CacheConfig,
    ) -> std::result::Result<Self, EngineInitError> {
        catalog.validate()?;
        config.validate().map_err(EngineInitError::Config)?;
        Ok(Self {
            catalog: Arc::new(catalog),
            config,
            cache: QueryCache::from_config(cache),
        })
    }

    pub fn catalog(&self) -> &dyn AttributeCatalog {
        self.catalog.as_ref()
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn cache_stats(&self) -> CacheStatsSnapshot {
        self.cache.stats()
    }

    /// Parse the select, filter and order strings for `table`.
    ///
    /// A missing select means `*`.
    pub fn parse(&self, table: &str, raw: &RawQuery) -> Result<Arc<ParsedQuery>> {
        let key = QueryCacheKey::new(
            table,
            raw.select.as_deref(),
            raw.filter.as_deref(),
            raw.order.as_deref(),
        );
        if let Some(parsed) = self.cache.get(&key) {
            return Ok(parsed);
        }

        let parsed = Arc::new(self.parse_uncached(table, raw).inspect_err(|e| {
            warn!(table, category = %e.category(), error = %e, "rejected query");
        })?);
        self.cache.insert(key, Arc::clone(&parsed));
        Ok(parsed)
    }

    fn parse_uncached(&self, table: &str, raw: &RawQuery) -> Result<ParsedQuery> {
        let table_def = self.catalog.require_table(table)?;

        let select = match raw.select.as_deref() {
            Some(select) => SelectParser::new(self.config.max_embed_depth).parse(select)?,
            None => vec![SelectNode::wildcard()],
        };
        let filter = raw
            .filter
            .as_deref()
            .map(|filter| {
                FilterParser::new(table_def)
                    .with_limits(self.config.max_filter_depth, self.config.max_conditions)
                    .parse(filter)
            })
            .transpose()?;
        let order = match raw.order.as_deref() {
            Some(order) => parse_order(order)?,
            None => Vec::new(),
        };

        Ok(ParsedQuery {
            select,
            filter,
            order,
        })
    }

    pub fn compile_select(&self, table: &str, raw: &RawQuery) -> Result<CompiledStatement> {
        let parsed = self.parse(table, raw)?;
        self.log_rejection(table, StatementKind::Select, || {
            QueryBuilder::select(self.catalog(), &self.config, table)?
                .apply_select(&parsed.select)?
                .apply_filters(parsed.filter.as_ref(), FilterOptions { apply_extra: true })?
                .apply_order(&parsed.order)?
                .apply_limit_offset(Pagination::new(raw.limit, raw.offset))?
                .build()
        })
    }

    /// `rows` is one JSON object or an array of them. The select of `raw`
    /// becomes the RETURNING list when `returning` is set.
    pub fn compile_insert(
        &self,
        table: &str,
        rows: &JsonValue,
        raw: &RawQuery,
        returning: bool,
    ) -> Result<CompiledStatement> {
        let parsed = self.parse(table, raw)?;
        self.log_rejection(table, StatementKind::Insert, || {
            let builder = QueryBuilder::insert(self.catalog(), &self.config, table, rows)?;
            self.finish_mutation(builder, &parsed, raw, returning)
        })
    }

    pub fn compile_update(
        &self,
        table: &str,
        set: &JsonValue,
        raw: &RawQuery,
        returning: bool,
    ) -> Result<CompiledStatement> {
        let parsed = self.parse(table, raw)?;
        self.log_rejection(table, StatementKind::Update, || {
            let builder = QueryBuilder::update(self.catalog(), &self.config, table, set)?;
            self.finish_mutation(builder, &parsed, raw, returning)
        })
    }

    pub fn compile_delete(
        &self,
        table: &str,
        raw: &RawQuery,
        returning: bool,
    ) -> Result<CompiledStatement> {
        let parsed = self.parse(table, raw)?;
        self.log_rejection(table, StatementKind::Delete, || {
            let builder = QueryBuilder::delete(self.catalog(), &self.config, table)?;
            self.finish_mutation(builder, &parsed, raw, returning)
        })
    }

    fn finish_mutation(
        &self,
        mut builder: QueryBuilder<'_>,
        parsed: &ParsedQuery,
        raw: &RawQuery,
        returning: bool,
    ) -> Result<CompiledStatement> {
        // Inserts have no WHERE; a filter on one is passed through to be rejected.
        if builder.kind() != StatementKind::Insert || parsed.filter.is_some() {
            builder =
                builder.apply_filters(parsed.filter.as_ref(), FilterOptions { apply_extra: true })?;
        }
        if !parsed.order.is_empty() {
            builder = builder.apply_order(&parsed.order)?;
        }
        if raw.has_pagination() {
            builder = builder.apply_limit_offset(Pagination::new(raw.limit, raw.offset))?;
        }
        if returning {
            builder = builder.apply_returning(&parsed.select)?;
        }
        builder.build()
    }

    fn log_rejection(
        &self,
        table: &str,
        kind: StatementKind,
        compile: impl FnOnce() -> Result<CompiledStatement>,
    ) -> Result<CompiledStatement> {
        compile().inspect_err(|e: &QueryError| {
            warn!(
                table,
                statement = kind.as_str(),
                category = %e.category(),
                error = %e,
                "rejected query"
            );
        })
    }
}
