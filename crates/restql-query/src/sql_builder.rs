//! AST-to-SQL compiler.
//!
//! Turns parsed select, filter and order trees into a parameterized PostgreSQL
//! statement.
//!
//! ## Features
//!
//! - **Allow-listing**: every table, column and relationship is resolved against the catalog
//! - **Parameterized values**: literals only ever appear as `$n::type` placeholders
//! - **Embeds**: correlated sub-selects aggregated with `row_to_json` / `json_agg`
//! - **Mutations**: INSERT, UPDATE and DELETE with a RETURNING list built from a select tree
//!
//! ## Example
//!
//! ```ignore
//! let statement = QueryBuilder::select(&catalog, &config, "posts")?
//!     .apply_select(&parse_select("id,title,author:users(name)")?)?
//!     .apply_filters(Some(&filter), FilterOptions { apply_extra: true })?
//!     .apply_order(&parse_order("id.desc")?)?
//!     .apply_limit_offset(Pagination::new(Some(10), Some(20)))?
//!     .build()?;
//! ```

use std::collections::HashSet;
use std::fmt;

use serde_json::Value as JsonValue;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};
use tracing::debug;

use crate::catalog::{
    AttributeCatalog, Cardinality, ColumnDef, ColumnType, DefaultPredicate, ResolvedRelationship,
    TableDef,
};
use crate::config::CompilerConfig;
use crate::error::{Result, SyntaxError, ValidationError};
use crate::filter::{self, Expression, LogicalOp, Operand, Operator};
use crate::lexer::is_identifier;
use crate::order::OrderSpec;
use crate::select::{ColumnNode, EmbedNode, SelectNode};

// ============================================================================
// Values and identifiers
// ============================================================================

/// A bound parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Json(JsonValue),
    TextArray(Vec<String>),
    Null,
}

impl SqlValue {
    /// Get the value as a string for display/debugging.
    pub fn as_display_str(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Integer(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Boolean(b) => b.to_string(),
            Self::Json(v) => v.to_string(),
            Self::TextArray(items) => format!("{{{}}}", items.join(",")),
            Self::Null => "NULL".to_string(),
        }
    }

    /// Coerce a literal from query text to the element type of `column`.
    pub fn coerce_literal(
        column: &ColumnDef,
        raw: &str,
    ) -> std::result::Result<Self, ValidationError> {
        let mismatch = || {
            ValidationError::type_mismatch(&column.name, column.data_type.sql_name(), raw)
        };

        let value = match column.data_type {
            ColumnType::Text => Self::Text(raw.to_string()),
            ColumnType::Integer => Self::Integer(raw.parse::<i32>().map_err(|_| mismatch())?.into()),
            ColumnType::BigInt => Self::Integer(raw.parse::<i64>().map_err(|_| mismatch())?),
            ColumnType::Float => {
                let f = raw.parse::<f64>().map_err(|_| mismatch())?;
                if !f.is_finite() {
                    return Err(mismatch());
                }
                Self::Float(f)
            }
            ColumnType::Numeric => {
                if !raw.parse::<f64>().is_ok_and(f64::is_finite) {
                    return Err(mismatch());
                }
                Self::Text(raw.to_string())
            }
            ColumnType::Boolean => match raw.to_ascii_lowercase().as_str() {
                "true" => Self::Boolean(true),
                "false" => Self::Boolean(false),
                _ => return Err(mismatch()),
            },
            ColumnType::Uuid => {
                let id = uuid::Uuid::parse_str(raw).map_err(|_| mismatch())?;
                Self::Text(id.hyphenated().to_string())
            }
            ColumnType::Date => {
                if !is_date(raw) {
                    return Err(mismatch());
                }
                Self::Text(raw.to_string())
            }
            ColumnType::Time => {
                if !is_time(raw) {
                    return Err(mismatch());
                }
                Self::Text(raw.to_string())
            }
            ColumnType::Timestamp => {
                if !is_timestamp(raw) {
                    return Err(mismatch());
                }
                Self::Text(raw.to_string())
            }
            ColumnType::TimestampTz => {
                if !is_timestamptz(raw) {
                    return Err(mismatch());
                }
                Self::Text(raw.to_string())
            }
            ColumnType::Json | ColumnType::Jsonb => Self::Json(
                serde_json::from_str(raw).unwrap_or_else(|_| JsonValue::String(raw.to_string())),
            ),
        };
        Ok(value)
    }

    /// Coerce a JSON payload value (insert row or update set) for `column`.
    pub fn coerce_json(
        column: &ColumnDef,
        value: &JsonValue,
    ) -> std::result::Result<Self, ValidationError> {
        if value.is_null() {
            return Ok(Self::Null);
        }
        if column.array {
            let items = value.as_array().ok_or_else(|| {
                ValidationError::type_mismatch(&column.name, column.sql_type(), value.to_string())
            })?;
            let elements = items
                .iter()
                .map(|item| {
                    if column.data_type.is_json() {
                        return Ok(item.to_string());
                    }
                    Self::coerce_json_scalar(column, item).map(|v| v.as_display_str())
                })
                .collect::<std::result::Result<Vec<_>, _>>()?;
            return Ok(Self::TextArray(elements));
        }
        if column.data_type.is_json() {
            return Ok(Self::Json(value.clone()));
        }
        Self::coerce_json_scalar(column, value)
    }

    fn coerce_json_scalar(
        column: &ColumnDef,
        value: &JsonValue,
    ) -> std::result::Result<Self, ValidationError> {
        let mismatch = || {
            ValidationError::type_mismatch(
                &column.name,
                column.data_type.sql_name(),
                value.to_string(),
            )
        };

        match (value, column.data_type) {
            (JsonValue::String(s), _) => Self::coerce_literal(column, s),
            (JsonValue::Number(n), ColumnType::Integer) => n
                .as_i64()
                .and_then(|i| i32::try_from(i).ok())
                .map(|i| Self::Integer(i.into()))
                .ok_or_else(mismatch),
            (JsonValue::Number(n), ColumnType::BigInt) => {
                n.as_i64().map(Self::Integer).ok_or_else(mismatch)
            }
            (JsonValue::Number(n), ColumnType::Float) => {
                n.as_f64().map(Self::Float).ok_or_else(mismatch)
            }
            (JsonValue::Number(n), ColumnType::Numeric | ColumnType::Text) => {
                Ok(Self::Text(n.to_string()))
            }
            (JsonValue::Bool(b), ColumnType::Boolean) => Ok(Self::Boolean(*b)),
            (JsonValue::Bool(b), ColumnType::Text) => Ok(Self::Text(b.to_string())),
            _ => Err(mismatch()),
        }
    }
}

fn is_date(raw: &str) -> bool {
    Date::parse(raw, format_description!("[year]-[month]-[day]")).is_ok()
}

fn is_time(raw: &str) -> bool {
    [
        format_description!("[hour]:[minute]:[second].[subsecond]"),
        format_description!("[hour]:[minute]:[second]"),
        format_description!("[hour]:[minute]"),
    ]
    .iter()
    .any(|format| Time::parse(raw, format).is_ok())
}

fn is_timestamp(raw: &str) -> bool {
    [
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]"),
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]"),
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
        format_description!("[year]-[month]-[day]T[hour]:[minute]"),
    ]
    .iter()
    .any(|format| PrimitiveDateTime::parse(raw, format).is_ok())
        || is_date(raw)
}

fn is_timestamptz(raw: &str) -> bool {
    OffsetDateTime::parse(raw, &time::format_description::well_known::Rfc3339).is_ok()
        || is_timestamp(raw)
}

/// Quote a validated identifier (table, column, alias, output key).
pub fn escape_identifier(name: &str) -> std::result::Result<String, ValidationError> {
    if !is_identifier(name) {
        return Err(ValidationError::InvalidIdentifier {
            name: name.to_string(),
        });
    }
    Ok(format!("\"{name}\""))
}

/// JSON keys are rendered as string literals, so they get the identifier check
/// (or are plain array indexes).
pub(crate) fn check_json_key(key: &str) -> std::result::Result<(), ValidationError> {
    if is_identifier(key) || (!key.is_empty() && key.bytes().all(|b| b.is_ascii_digit())) {
        Ok(())
    } else {
        Err(ValidationError::InvalidIdentifier {
            name: key.to_string(),
        })
    }
}

/// `base->'a'->'b'`, or `->>` on the last key when `as_text`.
fn json_accessor(base: String, path: &[String], as_text: bool) -> String {
    let mut accessor = base;
    for (i, key) in path.iter().enumerate() {
        let arrow = if as_text && i + 1 == path.len() {
            "->>"
        } else {
            "->"
        };
        if key.bytes().all(|b| b.is_ascii_digit()) {
            accessor = format!("{accessor}{arrow}{key}");
        } else {
            accessor = format!("{accessor}{arrow}'{key}'");
        }
    }
    accessor
}

fn column_ref(alias: &str, column: &str) -> std::result::Result<String, ValidationError> {
    Ok(format!(
        "{}.{}",
        escape_identifier(alias)?,
        escape_identifier(column)?
    ))
}

fn table_ref(table: &TableDef) -> std::result::Result<String, ValidationError> {
    Ok(format!(
        "{}.{}",
        escape_identifier(&table.schema)?,
        escape_identifier(&table.name)?
    ))
}

// ============================================================================
// Statement types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
}

impl StatementKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Select => "SELECT",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }

    pub fn is_mutation(self) -> bool {
        !matches!(self, Self::Select)
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pagination {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl Pagination {
    pub fn new(limit: Option<u64>, offset: Option<u64>) -> Self {
        Self { limit, offset }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterOptions {
    /// AND in the table's default predicates, with or without a user filter.
    pub apply_extra: bool,
}

/// A compiled statement ready for execution.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledStatement {
    pub kind: StatementKind,
    pub schema: String,
    pub table: String,
    pub sql: String,
    pub params: Vec<SqlValue>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub has_returning: bool,
}

impl fmt::Display for CompiledStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql)
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// A select node checked against the catalog.
#[derive(Debug, Clone)]
enum ResolvedItem<'a> {
    Column {
        column: &'a ColumnDef,
        json_path: Vec<String>,
        cast: Option<ColumnType>,
        key: String,
    },
    Embed {
        table: &'a TableDef,
        relationship: ResolvedRelationship<'a>,
        items: Vec<ResolvedItem<'a>>,
        key: String,
    },
}

impl ResolvedItem<'_> {
    fn key(&self) -> &str {
        match self {
            Self::Column { key, .. } | Self::Embed { key, .. } => key,
        }
    }
}

enum Payload<'a> {
    None,
    /// Insert rows; `None` cells render as DEFAULT.
    Rows {
        columns: Vec<&'a ColumnDef>,
        rows: Vec<Vec<Option<SqlValue>>>,
    },
    Set(Vec<(&'a ColumnDef, SqlValue)>),
}

#[derive(Default)]
struct RenderContext {
    params: Vec<SqlValue>,
    aliases: usize,
}

impl RenderContext {
    fn next_alias(&mut self) -> String {
        let alias = format!("t{}", self.aliases);
        self.aliases += 1;
        alias
    }

    fn bind(&mut self, value: SqlValue, sql_type: &str) -> String {
        self.params.push(value);
        format!("${}::{sql_type}", self.params.len())
    }
}

// ============================================================================
// Query builder
// ============================================================================

/// Builder for one statement against one table.
///
/// Every `apply_*` call validates its input immediately; `build` only renders.
pub struct QueryBuilder<'a> {
    catalog: &'a dyn AttributeCatalog,
    config: &'a CompilerConfig,
    table: &'a TableDef,
    kind: StatementKind,
    payload: Payload<'a>,
    select: Vec<ResolvedItem<'a>>,
    returning: Option<Vec<ResolvedItem<'a>>>,
    filter: Option<Expression>,
    apply_extra: bool,
    order: Vec<OrderSpec>,
    pagination: Pagination,
}

impl<'a> QueryBuilder<'a> {
    fn new(
        catalog: &'a dyn AttributeCatalog,
        config: &'a CompilerConfig,
        table: &str,
        kind: StatementKind,
    ) -> Result<Self> {
        let table = catalog.require_table(table)?;
        Ok(Self {
            catalog,
            config,
            table,
            kind,
            payload: Payload::None,
            select: Vec::new(),
            returning: None,
            filter: None,
            apply_extra: false,
            order: Vec::new(),
            pagination: Pagination::default(),
        })
    }

    pub fn select(
        catalog: &'a dyn AttributeCatalog,
        config: &'a CompilerConfig,
        table: &str,
    ) -> Result<Self> {
        Self::new(catalog, config, table, StatementKind::Select)
    }

    /// Insert one row (JSON object) or many (array of objects).
    pub fn insert(
        catalog: &'a dyn AttributeCatalog,
        config: &'a CompilerConfig,
        table: &str,
        rows: &JsonValue,
    ) -> Result<Self> {
        let mut builder = Self::new(catalog, config, table, StatementKind::Insert)?;

        let objects = match rows {
            JsonValue::Object(map) => vec![map],
            JsonValue::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_object().ok_or_else(|| {
                        ValidationError::invalid_payload("every row must be a JSON object")
                    })
                })
                .collect::<std::result::Result<Vec<_>, _>>()?,
            _ => {
                return Err(ValidationError::invalid_payload(
                    "expected a JSON object or an array of objects",
                )
                .into());
            }
        };
        if objects.is_empty() {
            return Err(ValidationError::invalid_payload("no rows to insert").into());
        }

        let table = builder.table;
        let mut columns: Vec<&'a ColumnDef> = Vec::new();
        for object in &objects {
            for key in object.keys() {
                let column = table.require_column(key)?;
                if !columns.iter().any(|c| c.name == column.name) {
                    columns.push(column);
                }
            }
        }
        if columns.is_empty() {
            return Err(ValidationError::invalid_payload("rows have no columns").into());
        }

        let mut out = Vec::with_capacity(objects.len());
        for object in &objects {
            let row = columns
                .iter()
                .map(|column| {
                    object
                        .get(&column.name)
                        .map(|value| SqlValue::coerce_json(column, value))
                        .transpose()
                })
                .collect::<std::result::Result<Vec<_>, _>>()?;
            out.push(row);
        }

        builder.payload = Payload::Rows { columns, rows: out };
        Ok(builder)
    }

    /// Update the filtered rows with the columns of a JSON object.
    pub fn update(
        catalog: &'a dyn AttributeCatalog,
        config: &'a CompilerConfig,
        table: &str,
        set: &JsonValue,
    ) -> Result<Self> {
        let mut builder = Self::new(catalog, config, table, StatementKind::Update)?;
        let object = set
            .as_object()
            .ok_or_else(|| ValidationError::invalid_payload("expected a JSON object"))?;
        if object.is_empty() {
            return Err(ValidationError::invalid_payload("nothing to update").into());
        }

        let table = builder.table;
        let assignments = object
            .iter()
            .map(|(key, value)| {
                let column = table.require_column(key)?;
                Ok((column, SqlValue::coerce_json(column, value)?))
            })
            .collect::<std::result::Result<Vec<_>, ValidationError>>()?;

        builder.payload = Payload::Set(assignments);
        Ok(builder)
    }

    pub fn delete(
        catalog: &'a dyn AttributeCatalog,
        config: &'a CompilerConfig,
        table: &str,
    ) -> Result<Self> {
        Self::new(catalog, config, table, StatementKind::Delete)
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    pub fn table(&self) -> &TableDef {
        self.table
    }

    fn unsupported(&self, operation: &'static str) -> ValidationError {
        ValidationError::NotSupportedForStatement {
            operation,
            statement: self.kind.as_str(),
        }
    }

    /// Output columns of a SELECT.
    pub fn apply_select(mut self, nodes: &[SelectNode]) -> Result<Self> {
        if self.kind != StatementKind::Select {
            return Err(self.unsupported("select").into());
        }
        self.select = self.resolve_items(self.table, nodes, 0)?;
        Ok(self)
    }

    /// WHERE clause from a user filter plus, with `apply_extra`, the table's
    /// default predicates.
    pub fn apply_filters(
        mut self,
        filter: Option<&Expression>,
        options: FilterOptions,
    ) -> Result<Self> {
        if self.kind == StatementKind::Insert {
            return Err(self.unsupported("filter").into());
        }
        if let Some(expr) = filter {
            let count = expr.comparison_count();
            if count > self.config.max_conditions {
                return Err(ValidationError::QueryTooComplex {
                    reason: format!(
                        "{count} conditions (max {})",
                        self.config.max_conditions
                    ),
                }
                .into());
            }
            // Render into a scratch context so bad expressions fail here.
            self.render_expression(expr, "t0", &mut RenderContext::default())?;
        }
        self.filter = filter.cloned();
        self.apply_extra = options.apply_extra;
        Ok(self)
    }

    pub fn apply_order(mut self, order: &[OrderSpec]) -> Result<Self> {
        if self.kind != StatementKind::Select {
            return Err(self.unsupported("order").into());
        }
        for spec in order {
            self.render_order_term(spec, "t0")?;
        }
        self.order = order.to_vec();
        Ok(self)
    }

    pub fn apply_limit_offset(mut self, pagination: Pagination) -> Result<Self> {
        if self.kind != StatementKind::Select {
            return Err(self.unsupported("limit/offset").into());
        }
        if let Some(limit) = pagination.limit
            && limit > self.config.max_limit
        {
            return Err(ValidationError::LimitExceeded {
                limit,
                max: self.config.max_limit,
            }
            .into());
        }
        self.pagination = pagination;
        Ok(self)
    }

    /// RETURNING list for a mutation, built the same way as a select list.
    pub fn apply_returning(mut self, nodes: &[SelectNode]) -> Result<Self> {
        if self.kind == StatementKind::Select {
            return Err(self.unsupported("returning").into());
        }
        self.returning = Some(self.resolve_items(self.table, nodes, 0)?);
        Ok(self)
    }

    pub fn build(mut self) -> Result<CompiledStatement> {
        if matches!(self.kind, StatementKind::Update | StatementKind::Delete)
            && self.config.require_filter_for_mutations
            && self.filter.is_none()
        {
            return Err(ValidationError::MissingFilter {
                statement: self.kind.as_str(),
            }
            .into());
        }

        let mut ctx = RenderContext::default();
        let root = ctx.next_alias();
        let target = format!("{} AS {}", table_ref(self.table)?, escape_identifier(&root)?);

        let mut sql = match self.kind {
            StatementKind::Select => {
                let items = if self.select.is_empty() {
                    self.resolve_items(self.table, &[SelectNode::wildcard()], 0)?
                } else {
                    std::mem::take(&mut self.select)
                };
                let list = self.render_items(&items, &root, &mut ctx)?;
                format!("SELECT {list} FROM {target}")
            }
            StatementKind::Insert => {
                let Payload::Rows { columns, rows } = &self.payload else {
                    return Err(ValidationError::invalid_payload("no rows to insert").into());
                };
                let names = columns
                    .iter()
                    .map(|c| escape_identifier(&c.name))
                    .collect::<std::result::Result<Vec<_>, _>>()?
                    .join(", ");
                let mut tuples = Vec::with_capacity(rows.len());
                for row in rows {
                    let cells = row
                        .iter()
                        .zip(columns)
                        .map(|(cell, column)| match cell {
                            Some(value) => ctx.bind(value.clone(), &column.sql_type()),
                            None => "DEFAULT".to_string(),
                        })
                        .collect::<Vec<_>>();
                    tuples.push(format!("({})", cells.join(", ")));
                }
                format!("INSERT INTO {target} ({names}) VALUES {}", tuples.join(", "))
            }
            StatementKind::Update => {
                let Payload::Set(assignments) = &self.payload else {
                    return Err(ValidationError::invalid_payload("nothing to update").into());
                };
                let mut sets = Vec::with_capacity(assignments.len());
                for (column, value) in assignments {
                    let placeholder = ctx.bind(value.clone(), &column.sql_type());
                    sets.push(format!("{} = {placeholder}", escape_identifier(&column.name)?));
                }
                format!("UPDATE {target} SET {}", sets.join(", "))
            }
            StatementKind::Delete => format!("DELETE FROM {target}"),
        };

        if let Some(where_sql) = self.build_where_clause(&root, &mut ctx)? {
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
        }

        let mut limit = None;
        let mut offset = None;
        if self.kind == StatementKind::Select {
            let order_clause = self
                .order
                .iter()
                .map(|spec| self.render_order_term(spec, &root))
                .collect::<Result<Vec<_>>>()?;
            if !order_clause.is_empty() {
                sql.push_str(" ORDER BY ");
                sql.push_str(&order_clause.join(", "));
            }

            limit = self.pagination.limit.or(self.config.default_limit);
            offset = self.pagination.offset;
            if let Some(limit) = limit {
                sql.push_str(&format!(" LIMIT {limit}"));
            }
            if let Some(offset) = offset {
                sql.push_str(&format!(" OFFSET {offset}"));
            }
        }

        let has_returning = self.returning.is_some();
        if let Some(items) = &self.returning {
            let list = self.render_items(items, &root, &mut ctx)?;
            sql.push_str(" RETURNING ");
            sql.push_str(&list);
        }

        debug!(
            table = %self.table.name,
            kind = self.kind.as_str(),
            params = ctx.params.len(),
            sql = %sql,
            "compiled statement"
        );

        Ok(CompiledStatement {
            kind: self.kind,
            schema: self.table.schema.clone(),
            table: self.table.name.clone(),
            sql,
            params: ctx.params,
            limit,
            offset,
            has_returning,
        })
    }

    fn resolve_items(
        &self,
        table: &'a TableDef,
        nodes: &[SelectNode],
        depth: usize,
    ) -> Result<Vec<ResolvedItem<'a>>> {
        let mut items = Vec::with_capacity(nodes.len());
        for node in nodes {
            match node {
                SelectNode::Column(column) if column.is_wildcard() => {
                    items.extend(table.columns.iter().map(|column| ResolvedItem::Column {
                        column,
                        json_path: Vec::new(),
                        cast: None,
                        key: column.name.clone(),
                    }));
                }
                SelectNode::Column(column) => items.push(resolve_column(table, column)?),
                SelectNode::Embed(embed) => items.push(self.resolve_embed(table, embed, depth)?),
            }
        }

        let mut keys = HashSet::new();
        for item in &items {
            if !keys.insert(item.key()) {
                return Err(ValidationError::DuplicateOutputKey {
                    key: item.key().to_string(),
                }
                .into());
            }
        }
        Ok(items)
    }

    fn resolve_embed(
        &self,
        parent: &'a TableDef,
        embed: &EmbedNode,
        depth: usize,
    ) -> Result<ResolvedItem<'a>> {
        if depth + 1 > self.config.max_embed_depth {
            return Err(SyntaxError::NestingTooDeep {
                max: self.config.max_embed_depth,
            }
            .into());
        }

        let catalog = self.catalog;
        let target = catalog.require_table(&embed.resource)?;
        let candidates = catalog.relationships_between(&parent.name, &target.name);

        let relationship = match &embed.constraint {
            Some(constraint) => candidates
                .into_iter()
                .find(|r| r.relationship.name == *constraint)
                .ok_or_else(|| ValidationError::UnknownRelationship {
                    from: parent.name.clone(),
                    to: target.name.clone(),
                    constraint: constraint.clone(),
                })?,
            None => {
                if candidates.len() > 1 {
                    return Err(ValidationError::AmbiguousRelationship {
                        from: parent.name.clone(),
                        to: target.name.clone(),
                        candidates: candidates
                            .iter()
                            .map(|r| r.relationship.name.clone())
                            .collect(),
                    }
                    .into());
                }
                candidates
                    .into_iter()
                    .next()
                    .ok_or_else(|| ValidationError::NoRelationship {
                        from: parent.name.clone(),
                        to: target.name.clone(),
                    })?
            }
        };

        let items = self.resolve_items(target, &embed.select, depth + 1)?;
        if items.is_empty() {
            return Err(SyntaxError::EmptyEmbedSelect {
                resource: embed.resource.clone(),
            }
            .into());
        }

        let key = embed.output_key().to_string();
        escape_identifier(&key)?;
        Ok(ResolvedItem::Embed {
            table: target,
            relationship,
            items,
            key,
        })
    }

    fn render_items(
        &self,
        items: &[ResolvedItem<'a>],
        alias: &str,
        ctx: &mut RenderContext,
    ) -> Result<String> {
        let mut rendered = Vec::with_capacity(items.len());
        for item in items {
            let sql = match item {
                ResolvedItem::Column {
                    column,
                    json_path,
                    cast,
                    key,
                } => {
                    let mut expr = column_ref(alias, &column.name)?;
                    if !json_path.is_empty() {
                        expr = json_accessor(expr, json_path, cast.is_some());
                    }
                    if let Some(cast) = cast {
                        expr = format!("({expr})::{}", cast.sql_name());
                    }
                    format!("{expr} AS {}", escape_identifier(key)?)
                }
                ResolvedItem::Embed {
                    table,
                    relationship,
                    items,
                    key,
                } => self.render_embed(table, relationship, items, key, alias, ctx)?,
            };
            rendered.push(sql);
        }
        Ok(rendered.join(", "))
    }

    /// Correlated sub-select producing one json object (many-to-one) or a
    /// json array (one-to-many).
    fn render_embed(
        &self,
        table: &TableDef,
        relationship: &ResolvedRelationship<'a>,
        items: &[ResolvedItem<'a>],
        key: &str,
        parent_alias: &str,
        ctx: &mut RenderContext,
    ) -> Result<String> {
        let alias = ctx.next_alias();
        let row = escape_identifier(&format!("{alias}_row"))?;
        let list = self.render_items(items, &alias, ctx)?;

        let mut conditions = vec![format!(
            "{} = {}",
            column_ref(&alias, relationship.child_column())?,
            column_ref(parent_alias, relationship.parent_column())?
        )];
        if self.apply_extra {
            for predicate in &table.default_predicates {
                conditions.push(render_default_predicate(table, predicate, &alias, ctx)?);
            }
        }

        let inner = format!(
            "SELECT {list} FROM {} AS {} WHERE {}",
            table_ref(table)?,
            escape_identifier(&alias)?,
            conditions.join(" AND ")
        );
        let key = escape_identifier(key)?;

        Ok(match relationship.cardinality {
            Cardinality::ManyToOne => {
                format!("(SELECT row_to_json({row}) FROM ({inner} LIMIT 1) AS {row}) AS {key}")
            }
            Cardinality::OneToMany => format!(
                "(SELECT COALESCE(json_agg({row}), '[]'::json) FROM ({inner}) AS {row}) AS {key}"
            ),
        })
    }

    fn build_where_clause(&self, alias: &str, ctx: &mut RenderContext) -> Result<Option<String>> {
        let mut parts = Vec::new();
        if let Some(expr) = &self.filter {
            parts.push(self.render_expression(expr, alias, ctx)?);
        }
        if self.apply_extra {
            for predicate in &self.table.default_predicates {
                parts.push(render_default_predicate(self.table, predicate, alias, ctx)?);
            }
        }
        if parts.is_empty() {
            Ok(None)
        } else {
            Ok(Some(parts.join(" AND ")))
        }
    }

    fn render_expression(
        &self,
        expr: &Expression,
        alias: &str,
        ctx: &mut RenderContext,
    ) -> Result<String> {
        match expr {
            Expression::Comparison(cmp) => {
                let column = filter::resolve_parts(self.table, &cmp.column, &cmp.json_path)?;
                let json_path = &cmp.json_path;
                let text_path = !json_path.is_empty();
                let mut lhs = column_ref(alias, &column.name)?;
                if text_path {
                    lhs = json_accessor(lhs, json_path, true);
                }
                let sql_type = if text_path {
                    "text".to_string()
                } else {
                    column.data_type.sql_name().to_string()
                };
                let whole_json = column.data_type.is_json() && !column.array && !text_path;

                let op = cmp.operator;
                let sql = match (op, &cmp.value) {
                    (Operator::IsNull | Operator::IsNotNull, _) => {
                        format!("{lhs} {}", op.as_sql())
                    }
                    (Operator::In, Operand::List(values))
                        if !values.is_empty() && !column.array && !whole_json =>
                    {
                        let placeholders = values
                            .iter()
                            .map(|v| ctx.bind(v.clone(), &sql_type))
                            .collect::<Vec<_>>()
                            .join(", ");
                        format!("{lhs} IN ({placeholders})")
                    }
                    (Operator::Contains | Operator::Overlaps, Operand::List(values))
                        if !values.is_empty() && column.array && !text_path =>
                    {
                        let array =
                            SqlValue::TextArray(values.iter().map(SqlValue::as_display_str).collect());
                        let placeholder = ctx.bind(array, &column.sql_type());
                        format!("{lhs} {} {placeholder}", op.as_sql())
                    }
                    (Operator::Eq | Operator::Neq, Operand::Scalar(value)) if whole_json => {
                        let lhs = if column.data_type == ColumnType::Json {
                            format!("{lhs}::jsonb")
                        } else {
                            lhs
                        };
                        let placeholder = ctx.bind(value.clone(), "jsonb");
                        format!("{lhs} {} {placeholder}", op.as_sql())
                    }
                    (
                        Operator::Eq
                        | Operator::Neq
                        | Operator::Lt
                        | Operator::Lte
                        | Operator::Gt
                        | Operator::Gte
                        | Operator::Like
                        | Operator::ILike,
                        Operand::Scalar(value),
                    ) if !column.array && !whole_json => {
                        let placeholder = ctx.bind(value.clone(), &sql_type);
                        format!("{lhs} {} {placeholder}", op.as_sql())
                    }
                    _ => {
                        return Err(ValidationError::UnsupportedOperator {
                            column: column.name.clone(),
                            operator: op.as_str(),
                            reason: "operand does not fit this operator and column",
                        }
                        .into());
                    }
                };
                Ok(sql)
            }
            Expression::Logical {
                op: LogicalOp::Not,
                operands,
            } => match operands.as_slice() {
                [inner] => Ok(format!("NOT ({})", self.render_expression(inner, alias, ctx)?)),
                _ => Err(ValidationError::QueryTooComplex {
                    reason: "'not' takes exactly one operand".to_string(),
                }
                .into()),
            },
            Expression::Logical { op, operands } => {
                if operands.is_empty() {
                    return Err(ValidationError::QueryTooComplex {
                        reason: "empty logical group".to_string(),
                    }
                    .into());
                }
                let joiner = if *op == LogicalOp::And { " AND " } else { " OR " };
                let parts = operands
                    .iter()
                    .map(|operand| self.render_expression(operand, alias, ctx))
                    .collect::<Result<Vec<_>>>()?;
                Ok(format!("({})", parts.join(joiner)))
            }
        }
    }

    fn render_order_term(&self, spec: &OrderSpec, alias: &str) -> Result<String> {
        let column = filter::resolve_parts(self.table, &spec.column, &spec.json_path)?;
        if column.data_type == ColumnType::Json && !column.array && spec.json_path.is_empty() {
            return Err(ValidationError::UnsupportedOperator {
                column: column.name.clone(),
                operator: "order",
                reason: "json has no ordering; order by a nested field or use jsonb",
            }
            .into());
        }
        let mut term = column_ref(alias, &column.name)?;
        if !spec.json_path.is_empty() {
            term = json_accessor(term, &spec.json_path, true);
        }
        term.push(' ');
        term.push_str(spec.direction.as_sql());
        if let Some(nulls) = spec.nulls {
            term.push(' ');
            term.push_str(nulls.as_sql());
        }
        Ok(term)
    }
}

fn resolve_column<'a>(table: &'a TableDef, node: &ColumnNode) -> Result<ResolvedItem<'a>> {
    let (column, json_path) = filter::resolve_path(table, &node.path)?;
    let cast = node
        .cast
        .as_deref()
        .map(|cast| {
            ColumnType::from_name(cast).ok_or_else(|| ValidationError::UnsupportedCast {
                cast: cast.to_string(),
            })
        })
        .transpose()?;
    let key = node.output_key().to_string();
    escape_identifier(&key)?;
    Ok(ResolvedItem::Column {
        column,
        json_path,
        cast,
        key,
    })
}

fn render_default_predicate(
    table: &TableDef,
    predicate: &DefaultPredicate,
    alias: &str,
    ctx: &mut RenderContext,
) -> Result<String> {
    let column = table.require_column(predicate.column())?;
    let lhs = column_ref(alias, &column.name)?;
    Ok(match predicate {
        DefaultPredicate::IsNull { .. } => format!("{lhs} IS NULL"),
        DefaultPredicate::IsNotNull { .. } => format!("{lhs} IS NOT NULL"),
        DefaultPredicate::Equals { value, .. } => {
            if column.array {
                return Err(ValidationError::UnsupportedOperator {
                    column: column.name.clone(),
                    operator: Operator::Eq.as_str(),
                    reason: "array columns support cs, ov and is null",
                }
                .into());
            }
            let placeholder = ctx.bind(
                SqlValue::coerce_literal(column, value)?,
                column.data_type.sql_name(),
            );
            format!("{lhs} = {placeholder}")
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, Relationship};
    use crate::error::QueryError;
    use crate::filter::FilterParser;
    use crate::order::parse_order;
    use crate::select::parse_select;
    use serde_json::json;

    fn catalog() -> Catalog {
        Catalog::new()
            .with_table(
                TableDef::new("users")
                    .with_column(ColumnDef::new("id", ColumnType::Integer))
                    .with_column(ColumnDef::new("name", ColumnType::Text))
                    .with_column(ColumnDef::new("active", ColumnType::Boolean))
                    .with_default_predicate(DefaultPredicate::Equals {
                        column: "active".into(),
                        value: "true".into(),
                    }),
            )
            .with_table(
                TableDef::new("posts")
                    .with_schema("blog")
                    .with_column(ColumnDef::new("id", ColumnType::Integer))
                    .with_column(ColumnDef::new("title", ColumnType::Text))
                    .with_column(ColumnDef::new("author_id", ColumnType::Integer))
                    .with_column(ColumnDef::new("editor_id", ColumnType::Integer))
                    .with_column(ColumnDef::new("meta", ColumnType::Jsonb))
                    .with_column(ColumnDef::array("tags", ColumnType::Text))
                    .with_column(ColumnDef::new("deleted_at", ColumnType::TimestampTz))
                    .with_default_predicate(DefaultPredicate::IsNull {
                        column: "deleted_at".into(),
                    }),
            )
            .with_relationship(Relationship {
                name: "fk_author".into(),
                from_table: "posts".into(),
                from_column: "author_id".into(),
                to_table: "users".into(),
                to_column: "id".into(),
            })
            .with_relationship(Relationship {
                name: "fk_editor".into(),
                from_table: "posts".into(),
                from_column: "editor_id".into(),
                to_table: "users".into(),
                to_column: "id".into(),
            })
    }

    fn filter(catalog: &Catalog, table: &str, input: &str) -> Expression {
        FilterParser::new(catalog.table(table).unwrap())
            .parse(input)
            .unwrap()
    }

    #[test]
    fn test_simple_select() {
        let catalog = catalog();
        let config = CompilerConfig::default();
        let stmt = QueryBuilder::select(&catalog, &config, "posts")
            .unwrap()
            .apply_select(&parse_select("id,heading:title,meta.source,x:id::text").unwrap())
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT \"t0\".\"id\" AS \"id\", \"t0\".\"title\" AS \"heading\", \
             \"t0\".\"meta\"->'source' AS \"source\", (\"t0\".\"id\")::text AS \"x\" \
             FROM \"blog\".\"posts\" AS \"t0\""
        );
        assert!(stmt.params.is_empty());
        assert_eq!(stmt.kind, StatementKind::Select);
        assert_eq!(stmt.schema, "blog");
        assert_eq!(stmt.to_string(), stmt.sql);
    }

    #[test]
    fn test_default_select_lists_allowed_columns() {
        let catalog = catalog();
        let config = CompilerConfig::default();
        let stmt = QueryBuilder::select(&catalog, &config, "users")
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT \"t0\".\"id\" AS \"id\", \"t0\".\"name\" AS \"name\", \
             \"t0\".\"active\" AS \"active\" FROM \"public\".\"users\" AS \"t0\""
        );
    }

    #[test]
    fn test_filter_values_are_parameters() {
        let catalog = catalog();
        let config = CompilerConfig::default();
        let expr = filter(&catalog, "posts", "title eq 'x OR 1=1' or id in (7,8)");
        let stmt = QueryBuilder::select(&catalog, &config, "posts")
            .unwrap()
            .apply_select(&parse_select("id").unwrap())
            .unwrap()
            .apply_filters(Some(&expr), FilterOptions::default())
            .unwrap()
            .build()
            .unwrap();
        assert!(stmt.sql.ends_with(
            "WHERE (\"t0\".\"title\" = $1::text OR \"t0\".\"id\" IN ($2::integer, $3::integer))"
        ));
        assert!(!stmt.sql.contains("1=1"));
        assert_eq!(
            stmt.params,
            vec![
                SqlValue::Text("x OR 1=1".into()),
                SqlValue::Integer(7),
                SqlValue::Integer(8)
            ]
        );
    }

    #[test]
    fn test_json_path_and_array_filters() {
        let catalog = catalog();
        let config = CompilerConfig::default();
        let expr = filter(&catalog, "posts", "meta.source.kind eq import and tags cs (a,b)");
        let stmt = QueryBuilder::select(&catalog, &config, "posts")
            .unwrap()
            .apply_select(&parse_select("id").unwrap())
            .unwrap()
            .apply_filters(Some(&expr), FilterOptions::default())
            .unwrap()
            .build()
            .unwrap();
        assert!(stmt.sql.ends_with(
            "WHERE (\"t0\".\"meta\"->'source'->>'kind' = $1::text AND \"t0\".\"tags\" @> $2::text[])"
        ));
        assert_eq!(
            stmt.params[1],
            SqlValue::TextArray(vec!["a".into(), "b".into()])
        );
    }

    #[test]
    fn test_default_predicates_without_user_filter() {
        let catalog = catalog();
        let config = CompilerConfig::default();
        let stmt = QueryBuilder::select(&catalog, &config, "posts")
            .unwrap()
            .apply_select(&parse_select("id").unwrap())
            .unwrap()
            .apply_filters(None, FilterOptions { apply_extra: true })
            .unwrap()
            .build()
            .unwrap();
        assert!(stmt.sql.ends_with("WHERE \"t0\".\"deleted_at\" IS NULL"));
    }

    #[test]
    fn test_many_to_one_embed() {
        let catalog = catalog();
        let config = CompilerConfig::default();
        let stmt = QueryBuilder::select(&catalog, &config, "posts")
            .unwrap()
            .apply_select(&parse_select("id,author:users!fk_author(name)").unwrap())
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT \"t0\".\"id\" AS \"id\", (SELECT row_to_json(\"t1_row\") FROM \
             (SELECT \"t1\".\"name\" AS \"name\" FROM \"public\".\"users\" AS \"t1\" \
             WHERE \"t1\".\"id\" = \"t0\".\"author_id\" LIMIT 1) AS \"t1_row\") AS \"author\" \
             FROM \"blog\".\"posts\" AS \"t0\""
        );
    }

    #[test]
    fn test_one_to_many_embed_with_defaults() {
        let catalog = catalog();
        let config = CompilerConfig::default();
        let stmt = QueryBuilder::select(&catalog, &config, "users")
            .unwrap()
            .apply_select(&parse_select("name,posts!fk_author(id,title)").unwrap())
            .unwrap()
            .apply_filters(None, FilterOptions { apply_extra: true })
            .unwrap()
            .build()
            .unwrap();
        assert!(stmt.sql.contains(
            "(SELECT COALESCE(json_agg(\"t1_row\"), '[]'::json) FROM (SELECT \"t1\".\"id\" AS \"id\", \
             \"t1\".\"title\" AS \"title\" FROM \"blog\".\"posts\" AS \"t1\" WHERE \
             \"t1\".\"author_id\" = \"t0\".\"id\" AND \"t1\".\"deleted_at\" IS NULL) AS \"t1_row\") AS \"posts\""
        ));
        assert!(stmt.sql.ends_with("WHERE \"t0\".\"active\" = $1::boolean"));
        assert_eq!(stmt.params, vec![SqlValue::Boolean(true)]);
    }

    #[test]
    fn test_relationship_errors() {
        let catalog = catalog();
        let config = CompilerConfig::default();
        let compile = |select: &str| {
            QueryBuilder::select(&catalog, &config, "posts")
                .and_then(|b| b.apply_select(&parse_select(select).unwrap()))
        };
        assert!(matches!(
            compile("users(name)").err(),
            Some(QueryError::Validation(ValidationError::AmbiguousRelationship { candidates, .. }))
                if candidates == vec!["fk_author".to_string(), "fk_editor".to_string()]
        ));
        assert!(matches!(
            compile("users!fk_nope(name)").err(),
            Some(QueryError::Validation(ValidationError::UnknownRelationship { .. }))
        ));
        assert!(matches!(
            compile("posts(id)").err(),
            Some(QueryError::Validation(ValidationError::NoRelationship { .. }))
        ));
        assert!(matches!(
            compile("comments(id)").err(),
            Some(QueryError::Validation(ValidationError::UnknownTable { .. }))
        ));
    }

    #[test]
    fn test_select_validation_errors() {
        let catalog = catalog();
        let config = CompilerConfig::default();
        let compile = |select: &str| {
            QueryBuilder::select(&catalog, &config, "posts")
                .and_then(|b| b.apply_select(&parse_select(select).unwrap()))
                .err()
        };
        assert!(matches!(
            compile("id,secret"),
            Some(QueryError::Validation(ValidationError::UnknownColumn { .. }))
        ));
        assert!(matches!(
            compile("id,id"),
            Some(QueryError::Validation(ValidationError::DuplicateOutputKey { key })) if key == "id"
        ));
        assert!(matches!(
            compile("*,title"),
            Some(QueryError::Validation(ValidationError::DuplicateOutputKey { .. }))
        ));
        assert!(matches!(
            compile("id::money"),
            Some(QueryError::Validation(ValidationError::UnsupportedCast { .. }))
        ));
        assert!(matches!(
            compile("title.x"),
            Some(QueryError::Validation(ValidationError::NotJsonColumn { .. }))
        ));
        assert!(matches!(
            compile("bad-key:id"),
            Some(QueryError::Validation(ValidationError::InvalidIdentifier { .. }))
        ));
    }

    #[test]
    fn test_order_and_pagination() {
        let catalog = catalog();
        let config = CompilerConfig::default();
        let stmt = QueryBuilder::select(&catalog, &config, "posts")
            .unwrap()
            .apply_select(&parse_select("id").unwrap())
            .unwrap()
            .apply_order(&parse_order("title.desc.nullslast,id.asc").unwrap())
            .unwrap()
            .apply_limit_offset(Pagination::new(Some(10), Some(20)))
            .unwrap()
            .build()
            .unwrap();
        assert!(stmt.sql.ends_with(
            "ORDER BY \"t0\".\"title\" DESC NULLS LAST, \"t0\".\"id\" ASC LIMIT 10 OFFSET 20"
        ));
        assert_eq!(stmt.limit, Some(10));
        assert_eq!(stmt.offset, Some(20));
    }

    #[test]
    fn test_order_by_json_field_versus_quoted_name() {
        let catalog = catalog();
        let config = CompilerConfig::default();
        let order = |input: &str| {
            QueryBuilder::select(&catalog, &config, "posts")
                .unwrap()
                .apply_select(&parse_select("id").unwrap())
                .unwrap()
                .apply_order(&parse_order(input).unwrap())
                .and_then(QueryBuilder::build)
        };

        let stmt = order("meta.source.desc").unwrap();
        assert!(stmt.sql.ends_with("ORDER BY \"t0\".\"meta\"->>'source' DESC"));

        assert!(matches!(
            order("\"meta.source\".desc").err(),
            Some(QueryError::Validation(ValidationError::UnknownColumn { column, .. }))
                if column == "meta.source"
        ));
    }

    #[test]
    fn test_order_by_whole_json_column_rejected() {
        let catalog = Catalog::new().with_table(
            TableDef::new("events")
                .with_column(ColumnDef::new("id", ColumnType::Integer))
                .with_column(ColumnDef::new("raw", ColumnType::Json))
                .with_column(ColumnDef::new("doc", ColumnType::Jsonb)),
        );
        let config = CompilerConfig::default();
        let order = |input: &str| {
            QueryBuilder::select(&catalog, &config, "events")
                .unwrap()
                .apply_order(&parse_order(input).unwrap())
                .and_then(QueryBuilder::build)
        };

        assert!(matches!(
            order("raw.desc").err(),
            Some(QueryError::Validation(ValidationError::UnsupportedOperator {
                column,
                operator: "order",
                ..
            })) if column == "raw"
        ));
        let by_field = order("raw.kind.desc").unwrap();
        assert!(by_field.sql.ends_with("ORDER BY \"t0\".\"raw\"->>'kind' DESC"));
        let by_jsonb = order("doc").unwrap();
        assert!(by_jsonb.sql.ends_with("ORDER BY \"t0\".\"doc\" ASC"));
    }

    #[test]
    fn test_limit_bounds() {
        let catalog = catalog();
        let config = CompilerConfig {
            max_limit: 50,
            default_limit: Some(25),
            ..Default::default()
        };
        assert!(matches!(
            QueryBuilder::select(&catalog, &config, "posts")
                .unwrap()
                .apply_limit_offset(Pagination::new(Some(51), None))
                .err(),
            Some(QueryError::Validation(ValidationError::LimitExceeded { limit: 51, max: 50 }))
        ));

        let stmt = QueryBuilder::select(&catalog, &config, "posts")
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(stmt.limit, Some(25));
        assert!(stmt.sql.ends_with(" LIMIT 25"));
    }

    #[test]
    fn test_insert_fills_missing_columns_with_default() {
        let catalog = catalog();
        let config = CompilerConfig::default();
        let stmt = QueryBuilder::insert(
            &catalog,
            &config,
            "posts",
            &json!([{"title": "a", "author_id": 1}, {"title": "b", "tags": ["x"]}]),
        )
        .unwrap()
        .apply_returning(&parse_select("id,author:users!fk_author(name)").unwrap())
        .unwrap()
        .build()
        .unwrap();
        assert!(stmt.sql.starts_with(
            "INSERT INTO \"blog\".\"posts\" AS \"t0\" (\"author_id\", \"title\", \"tags\") VALUES \
             ($1::integer, $2::text, DEFAULT), (DEFAULT, $3::text, $4::text[]) RETURNING \"t0\".\"id\" AS \"id\", \
             (SELECT row_to_json(\"t1_row\")"
        ));
        assert!(stmt.has_returning);
        assert_eq!(
            stmt.params,
            vec![
                SqlValue::Integer(1),
                SqlValue::Text("a".into()),
                SqlValue::Text("b".into()),
                SqlValue::TextArray(vec!["x".into()]),
            ]
        );
        assert_eq!(stmt.limit, None);
    }

    #[test]
    fn test_insert_payload_errors() {
        let catalog = catalog();
        let config = CompilerConfig::default();
        let insert = |rows| QueryBuilder::insert(&catalog, &config, "posts", &rows).err();
        assert!(matches!(
            insert(json!([])),
            Some(QueryError::Validation(ValidationError::InvalidPayload { .. }))
        ));
        assert!(matches!(
            insert(json!("x")),
            Some(QueryError::Validation(ValidationError::InvalidPayload { .. }))
        ));
        assert!(matches!(
            insert(json!({"secret": 1})),
            Some(QueryError::Validation(ValidationError::UnknownColumn { .. }))
        ));
        assert!(matches!(
            insert(json!({"author_id": "one"})),
            Some(QueryError::Validation(ValidationError::TypeMismatch { .. }))
        ));
    }

    #[test]
    fn test_update_and_delete() {
        let catalog = catalog();
        let config = CompilerConfig::default();
        let expr = filter(&catalog, "posts", "id eq 3");

        let stmt = QueryBuilder::update(&catalog, &config, "posts", &json!({"title": "new", "meta": {"k": 1}}))
            .unwrap()
            .apply_filters(Some(&expr), FilterOptions { apply_extra: true })
            .unwrap()
            .apply_returning(&parse_select("id").unwrap())
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(
            stmt.sql,
            "UPDATE \"blog\".\"posts\" AS \"t0\" SET \"meta\" = $1::jsonb, \"title\" = $2::text \
             WHERE \"t0\".\"id\" = $3::integer AND \"t0\".\"deleted_at\" IS NULL \
             RETURNING \"t0\".\"id\" AS \"id\""
        );
        assert_eq!(stmt.params[0], SqlValue::Json(json!({"k": 1})));

        let stmt = QueryBuilder::delete(&catalog, &config, "posts")
            .unwrap()
            .apply_filters(Some(&expr), FilterOptions::default())
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(
            stmt.sql,
            "DELETE FROM \"blog\".\"posts\" AS \"t0\" WHERE \"t0\".\"id\" = $1::integer"
        );
        assert!(!stmt.has_returning);
    }

    #[test]
    fn test_mutations_require_filter() {
        let catalog = catalog();
        let config = CompilerConfig::default();
        assert!(matches!(
            QueryBuilder::delete(&catalog, &config, "posts")
                .unwrap()
                .apply_filters(None, FilterOptions { apply_extra: true })
                .unwrap()
                .build()
                .err(),
            Some(QueryError::Validation(ValidationError::MissingFilter { statement: "DELETE" }))
        ));

        let relaxed = CompilerConfig {
            require_filter_for_mutations: false,
            ..Default::default()
        };
        let stmt = QueryBuilder::delete(&catalog, &relaxed, "posts")
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(stmt.sql, "DELETE FROM \"blog\".\"posts\" AS \"t0\"");
    }

    #[test]
    fn test_operations_restricted_by_statement() {
        let catalog = catalog();
        let config = CompilerConfig::default();
        assert!(matches!(
            QueryBuilder::select(&catalog, &config, "posts")
                .unwrap()
                .apply_returning(&parse_select("id").unwrap())
                .err(),
            Some(QueryError::Validation(ValidationError::NotSupportedForStatement { .. }))
        ));
        assert!(matches!(
            QueryBuilder::delete(&catalog, &config, "posts")
                .unwrap()
                .apply_order(&parse_order("id").unwrap())
                .err(),
            Some(QueryError::Validation(ValidationError::NotSupportedForStatement { .. }))
        ));
        assert!(matches!(
            QueryBuilder::insert(&catalog, &config, "posts", &json!({"id": 1}))
                .unwrap()
                .apply_filters(None, FilterOptions::default())
                .err(),
            Some(QueryError::Validation(ValidationError::NotSupportedForStatement { .. }))
        ));
    }

    #[test]
    fn test_hand_built_expression_is_checked() {
        let catalog = catalog();
        let config = CompilerConfig::default();
        let expr = Expression::comparison(
            "password",
            Operator::Eq,
            Operand::Scalar(SqlValue::Text("x".into())),
        );
        assert!(matches!(
            QueryBuilder::select(&catalog, &config, "users")
                .unwrap()
                .apply_filters(Some(&expr), FilterOptions::default())
                .err(),
            Some(QueryError::Validation(ValidationError::UnknownColumn { .. }))
        ));

        let shape = Expression::comparison("id", Operator::In, Operand::Scalar(SqlValue::Integer(1)));
        assert!(matches!(
            QueryBuilder::select(&catalog, &config, "users")
                .unwrap()
                .apply_filters(Some(&shape), FilterOptions::default())
                .err(),
            Some(QueryError::Validation(ValidationError::UnsupportedOperator { .. }))
        ));
    }

    #[test]
    fn test_coerce_literal() {
        let ts = ColumnDef::new("at", ColumnType::Timestamp);
        assert!(SqlValue::coerce_literal(&ts, "2024-05-01 10:00:00").is_ok());
        assert!(SqlValue::coerce_literal(&ts, "2024-05-01T10:00:00.123").is_ok());
        assert!(SqlValue::coerce_literal(&ts, "yesterday").is_err());

        let tz = ColumnDef::new("at", ColumnType::TimestampTz);
        assert!(SqlValue::coerce_literal(&tz, "2024-05-01T10:00:00+02:00").is_ok());

        let t = ColumnDef::new("at", ColumnType::Time);
        assert!(SqlValue::coerce_literal(&t, "10:30").is_ok());
        assert!(SqlValue::coerce_literal(&t, "25:30").is_err());

        let small = ColumnDef::new("n", ColumnType::Integer);
        assert!(SqlValue::coerce_literal(&small, "3000000000").is_err());
        let big = ColumnDef::new("n", ColumnType::BigInt);
        assert_eq!(
            SqlValue::coerce_literal(&big, "3000000000").unwrap(),
            SqlValue::Integer(3_000_000_000)
        );

        let id = ColumnDef::new("id", ColumnType::Uuid);
        assert_eq!(
            SqlValue::coerce_literal(&id, "67E55044-10B1-426F-9247-BB680E5FE0C8").unwrap(),
            SqlValue::Text("67e55044-10b1-426f-9247-bb680e5fe0c8".into())
        );
    }

    #[test]
    fn test_escape_identifier() {
        assert_eq!(escape_identifier("posts").unwrap(), "\"posts\"");
        assert!(escape_identifier("posts\"; drop").is_err());
    }
}
