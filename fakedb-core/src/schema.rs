//! Declared column schemas for relational tables.
//!
//! Tables are created with an explicit [`TableSchema`]; rows are checked against
//! it on every insert and update.
//!
//! ```ignore
//! use fakedb::schema::{ColumnType, TableSchema};
//!
//! let schema = TableSchema::builder()
//!     .column("id", ColumnType::Int)
//!     .column("name", ColumnType::Text)
//!     .primary_key("id")
//!     .build()?;
//!
//! // Equivalent, using type names:
//! let schema = TableSchema::from_pairs([("id", "int"), ("name", "str")])?;
//! ```

use std::{fmt, str::FromStr};

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};

use crate::{
    error::{FakeDbError, FakeDbResult},
    record::describe,
};

/// The value type a column accepts. Null is accepted by every non-key column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Int,
    Float,
    Text,
    Bool,
    DateTime,
    Bytes,
    /// Nested documents, arrays or scalars.
    Json,
    Any,
}

impl ColumnType {
    /// Returns `true` if a value of this shape may be stored in the column.
    pub fn accepts(&self, value: &Bson) -> bool {
        match (self, value) {
            (_, Bson::Null) => true,
            (ColumnType::Any | ColumnType::Json, _) => true,
            (ColumnType::Int, Bson::Int32(_) | Bson::Int64(_)) => true,
            (ColumnType::Float, Bson::Double(_) | Bson::Int32(_) | Bson::Int64(_)) => true,
            (ColumnType::Text, Bson::String(_)) => true,
            (ColumnType::Bool, Bson::Boolean(_)) => true,
            (ColumnType::DateTime, Bson::DateTime(_)) => true,
            (ColumnType::Bytes, Bson::Binary(_)) => true,
            _ => false,
        }
    }

    /// Returns `true` if the column can hold a primary key.
    pub fn is_keyable(&self) -> bool {
        matches!(
            self,
            ColumnType::Int | ColumnType::Text | ColumnType::Bool | ColumnType::DateTime | ColumnType::Bytes | ColumnType::Any
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::Int => "int",
            ColumnType::Float => "float",
            ColumnType::Text => "text",
            ColumnType::Bool => "bool",
            ColumnType::DateTime => "datetime",
            ColumnType::Bytes => "bytes",
            ColumnType::Json => "json",
            ColumnType::Any => "any",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ColumnType {
    type Err = FakeDbError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Ok(match name.trim().to_ascii_lowercase().as_str() {
            "int" | "integer" | "bigint" | "smallint" => ColumnType::Int,
            "float" | "double" | "real" | "numeric" | "decimal" => ColumnType::Float,
            "str" | "string" | "text" | "varchar" => ColumnType::Text,
            "bool" | "boolean" => ColumnType::Bool,
            "datetime" | "timestamp" | "date" => ColumnType::DateTime,
            "bytes" | "blob" | "binary" => ColumnType::Bytes,
            "json" | "jsonb" | "dict" | "list" => ColumnType::Json,
            "any" => ColumnType::Any,
            other => {
                return Err(FakeDbError::InvalidArgument(format!(
                    "unknown column type '{other}'"
                )));
            }
        })
    }
}

/// A declared column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ColumnType,
}

/// Ordered column declarations plus the primary-key column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    columns: Vec<Column>,
    primary_key: String,
}

impl TableSchema {
    pub fn builder() -> TableSchemaBuilder {
        TableSchemaBuilder::default()
    }

    /// Builds a schema from `(column, type name)` pairs; the first column is the primary key.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> FakeDbResult<Self> {
        pairs
            .into_iter()
            .try_fold(TableSchema::builder(), |builder, (name, ty)| {
                Ok::<_, FakeDbError>(builder.column(name, ty.parse::<ColumnType>()?))
            })?
            .build()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// The declared type of the primary-key column.
    pub fn primary_key_type(&self) -> ColumnType {
        self.column(&self.primary_key)
            .map(|column| column.ty)
            .unwrap_or(ColumnType::Any)
    }

    /// Checks a full row and returns it in declared column order, missing columns set to null.
    pub fn normalize_row(&self, table: &str, row: &Document) -> FakeDbResult<Document> {
        self.check_fields(table, row)?;

        Ok(self
            .columns
            .iter()
            .map(|column| {
                (
                    column.name.clone(),
                    row.get(&column.name).cloned().unwrap_or(Bson::Null),
                )
            })
            .collect())
    }

    /// Checks that every field of a row or patch is a declared column holding an accepted value.
    pub fn check_fields(&self, table: &str, fields: &Document) -> FakeDbResult<()> {
        for (name, value) in fields {
            let column = self.column(name).ok_or_else(|| {
                FakeDbError::Schema(table.to_string(), format!("unknown column '{name}'"))
            })?;

            if !column.ty.accepts(value) {
                return Err(FakeDbError::Schema(
                    table.to_string(),
                    format!(
                        "column '{}' expects {}, got {}",
                        name,
                        column.ty,
                        describe(value)
                    ),
                ));
            }
        }

        Ok(())
    }

    /// Checks that a projection names only declared columns.
    pub fn check_projection(&self, table: &str, columns: &[String]) -> FakeDbResult<()> {
        match columns.iter().find(|name| self.column(name).is_none()) {
            Some(name) => Err(FakeDbError::Schema(
                table.to_string(),
                format!("unknown column '{name}' in projection"),
            )),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
pub struct TableSchemaBuilder {
    columns: Vec<Column>,
    primary_key: Option<String>,
}

impl TableSchemaBuilder {
    /// Declares a column; order of declaration is the column order of stored rows.
    pub fn column(mut self, name: impl Into<String>, ty: ColumnType) -> Self {
        self.columns.push(Column { name: name.into(), ty });
        self
    }

    /// Names the primary-key column. Defaults to the first declared column.
    pub fn primary_key(mut self, name: impl Into<String>) -> Self {
        self.primary_key = Some(name.into());
        self
    }

    pub fn build(self) -> FakeDbResult<TableSchema> {
        let first = self
            .columns
            .first()
            .ok_or_else(|| FakeDbError::InvalidArgument("a table needs at least one column".into()))?;
        let primary_key = self.primary_key.unwrap_or_else(|| first.name.clone());

        for (index, column) in self.columns.iter().enumerate() {
            if column.name.is_empty() {
                return Err(FakeDbError::InvalidArgument("column names must be non-empty".into()));
            }
            if self.columns[..index].iter().any(|other| other.name == column.name) {
                return Err(FakeDbError::InvalidArgument(format!(
                    "column '{}' declared twice",
                    column.name
                )));
            }
        }

        match self.columns.iter().find(|column| column.name == primary_key) {
            None => Err(FakeDbError::InvalidArgument(format!(
                "primary key '{primary_key}' is not a declared column"
            ))),
            Some(column) if !column.ty.is_keyable() => Err(FakeDbError::InvalidArgument(format!(
                "primary key '{}' cannot have type {}",
                primary_key, column.ty
            ))),
            Some(_) => Ok(TableSchema {
                columns: self.columns,
                primary_key,
            }),
        }
    }
}
