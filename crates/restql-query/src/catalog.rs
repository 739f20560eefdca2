//! Table attribute catalog.
//!
//! The catalog is the allow-list consulted during parsing and compilation: a
//! table, column or relationship that is not declared here cannot be referenced
//! by a query. It is declared in configuration; nothing is introspected.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::lexer::is_identifier;

/// Column types understood by the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ColumnType {
    Text,
    Integer,
    BigInt,
    Float,
    Numeric,
    Boolean,
    Uuid,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Json,
    Jsonb,
}

impl ColumnType {
    /// PostgreSQL type name used in casts.
    pub fn sql_name(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::BigInt => "bigint",
            Self::Float => "float8",
            Self::Numeric => "numeric",
            Self::Boolean => "boolean",
            Self::Uuid => "uuid",
            Self::Date => "date",
            Self::Time => "time",
            Self::Timestamp => "timestamp",
            Self::TimestampTz => "timestamptz",
            Self::Json => "json",
            Self::Jsonb => "jsonb",
        }
    }

    /// Resolve a type name, accepting common PostgreSQL aliases.
    pub fn from_name(name: &str) -> Option<Self> {
        let ty = match name.trim().to_ascii_lowercase().as_str() {
            "text" | "varchar" | "character varying" | "char" | "bpchar" | "citext" => Self::Text,
            "integer" | "int" | "int4" | "smallint" | "int2" => Self::Integer,
            "bigint" | "int8" => Self::BigInt,
            "float" | "float8" | "double precision" | "real" | "float4" => Self::Float,
            "numeric" | "decimal" => Self::Numeric,
            "boolean" | "bool" => Self::Boolean,
            "uuid" => Self::Uuid,
            "date" => Self::Date,
            "time" => Self::Time,
            "timestamp" => Self::Timestamp,
            "timestamptz" => Self::TimestampTz,
            "json" => Self::Json,
            "jsonb" => Self::Jsonb,
            _ => return None,
        };
        Some(ty)
    }

    pub fn is_json(self) -> bool {
        matches!(self, Self::Json | Self::Jsonb)
    }

    pub fn is_textual(self) -> bool {
        matches!(self, Self::Text)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_name())
    }
}

impl TryFrom<String> for ColumnType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_name(&value).ok_or_else(|| format!("unknown column type '{value}'"))
    }
}

impl From<ColumnType> for String {
    fn from(value: ColumnType) -> Self {
        value.sql_name().to_string()
    }
}

/// A declared column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: ColumnType,
    #[serde(default)]
    pub array: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            data_type,
            array: false,
        }
    }

    pub fn array(name: impl Into<String>, data_type: ColumnType) -> Self {
        Self {
            array: true,
            ..Self::new(name, data_type)
        }
    }

    /// Cast suffix for a bound value of this column, e.g. `integer` or `text[]`.
    pub fn sql_type(&self) -> String {
        if self.array {
            format!("{}[]", self.data_type.sql_name())
        } else {
            self.data_type.sql_name().to_string()
        }
    }
}

/// Table-level predicates ANDed into every filtered statement, e.g. soft-delete scoping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DefaultPredicate {
    IsNull { column: String },
    IsNotNull { column: String },
    Equals { column: String, value: String },
}

impl DefaultPredicate {
    pub fn column(&self) -> &str {
        match self {
            Self::IsNull { column } | Self::IsNotNull { column } | Self::Equals { column, .. } => {
                column
            }
        }
    }
}

fn default_schema() -> String {
    "public".to_string()
}

/// A declared table and its allow-listed columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    #[serde(default = "default_schema")]
    pub schema: String,
    pub name: String,
    pub columns: Vec<ColumnDef>,
    #[serde(default)]
    pub default_predicates: Vec<DefaultPredicate>,
}

impl TableDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: default_schema(),
            name: name.into(),
            columns: Vec::new(),
            default_predicates: Vec::new(),
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn with_column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_default_predicate(mut self, predicate: DefaultPredicate) -> Self {
        self.default_predicates.push(predicate);
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn require_column(&self, name: &str) -> Result<&ColumnDef, ValidationError> {
        self.column(name)
            .ok_or_else(|| ValidationError::unknown_column(&self.name, name))
    }
}

/// A named foreign key: `from_table.from_column` references `to_table.to_column`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub name: String,
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
}

/// Which way a relationship is traversed from the embedding table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// The embedding table holds the foreign key; embeds one object.
    ManyToOne,
    /// The embedded table holds the foreign key; embeds an array.
    OneToMany,
}

/// A relationship as seen from a particular embedding table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRelationship<'a> {
    pub relationship: &'a Relationship,
    pub cardinality: Cardinality,
}

impl ResolvedRelationship<'_> {
    /// Column on the embedding (parent) side of the join.
    pub fn parent_column(&self) -> &str {
        match self.cardinality {
            Cardinality::ManyToOne => &self.relationship.from_column,
            Cardinality::OneToMany => &self.relationship.to_column,
        }
    }

    /// Column on the embedded (child) side of the join.
    pub fn child_column(&self) -> &str {
        match self.cardinality {
            Cardinality::ManyToOne => &self.relationship.to_column,
            Cardinality::OneToMany => &self.relationship.from_column,
        }
    }
}

/// Synchronous lookup of tables and relationships.
pub trait AttributeCatalog: Send + Sync {
    fn table(&self, name: &str) -> Option<&TableDef>;

    fn relationships(&self) -> &[Relationship];

    fn require_table(&self, name: &str) -> Result<&TableDef, ValidationError> {
        self.table(name)
            .ok_or_else(|| ValidationError::unknown_table(name))
    }

    /// Relationships usable to embed `to` inside `from`, in either direction.
    ///
    /// A self-referencing relationship is only traversed forward.
    fn relationships_between(&self, from: &str, to: &str) -> Vec<ResolvedRelationship<'_>> {
        let mut found = Vec::new();
        for relationship in self.relationships() {
            if relationship.from_table == from && relationship.to_table == to {
                found.push(ResolvedRelationship {
                    relationship,
                    cardinality: Cardinality::ManyToOne,
                });
            } else if relationship.from_table == to && relationship.to_table == from {
                found.push(ResolvedRelationship {
                    relationship,
                    cardinality: Cardinality::OneToMany,
                });
            }
        }
        found
    }
}

/// In-memory catalog, usually deserialized from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub tables: Vec<TableDef>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: TableDef) -> Self {
        self.tables.push(table);
        self
    }

    pub fn with_relationship(mut self, relationship: Relationship) -> Self {
        self.relationships.push(relationship);
        self
    }

    /// Check identifiers, uniqueness and that every reference resolves.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut tables: HashMap<&str, &TableDef> = HashMap::new();
        for table in &self.tables {
            for ident in [&table.schema, &table.name] {
                check_identifier(ident)?;
            }
            if tables.insert(table.name.as_str(), table).is_some() {
                return Err(ValidationError::invalid_catalog(format!(
                    "table '{}' is declared more than once",
                    table.name
                )));
            }

            let mut columns = HashSet::new();
            for column in &table.columns {
                check_identifier(&column.name)?;
                if !columns.insert(column.name.as_str()) {
                    return Err(ValidationError::invalid_catalog(format!(
                        "column '{}.{}' is declared more than once",
                        table.name, column.name
                    )));
                }
            }
            for predicate in &table.default_predicates {
                table.require_column(predicate.column())?;
            }
        }

        let mut names = HashSet::new();
        for rel in &self.relationships {
            check_identifier(&rel.name)?;
            if !names.insert(rel.name.as_str()) {
                return Err(ValidationError::invalid_catalog(format!(
                    "relationship '{}' is declared more than once",
                    rel.name
                )));
            }
            let from = tables
                .get(rel.from_table.as_str())
                .ok_or_else(|| ValidationError::unknown_table(&rel.from_table))?;
            let to = tables
                .get(rel.to_table.as_str())
                .ok_or_else(|| ValidationError::unknown_table(&rel.to_table))?;
            from.require_column(&rel.from_column)?;
            to.require_column(&rel.to_column)?;
        }
        Ok(())
    }
}

impl AttributeCatalog for Catalog {
    fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.iter().find(|t| t.name == name)
    }

    fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }
}

fn check_identifier(name: &str) -> Result<(), ValidationError> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(ValidationError::InvalidIdentifier {
            name: name.to_string(),
        })
    }
}
