//! In-memory tabular format produced by extraction drivers.
//!
//! [`TabularData`] is the hand-off unit between pipeline stages: an ordered
//! schema plus row-major cells. Drivers coerce richer driver-side types onto
//! the eight logical types on read (offset-bearing timestamps become naive
//! UTC, GUIDs become strings, anything unknown becomes a string).

use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical column type carried by a [`TabularData`] schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalType {
    Int32,
    Int64,
    Decimal,
    Float64,
    Bool,
    String,
    Timestamp,
    Binary,
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Decimal => "decimal",
            Self::Float64 => "float64",
            Self::Bool => "bool",
            Self::String => "string",
            Self::Timestamp => "timestamp",
            Self::Binary => "binary",
        };
        f.write_str(s)
    }
}

/// One column of a [`TabularData`] schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub logical_type: LogicalType,
    pub nullable: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, logical_type: LogicalType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            logical_type,
            nullable,
        }
    }
}

/// A single nullable cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int32(i32),
    Int64(i64),
    Decimal(BigDecimal),
    Float64(f64),
    Bool(bool),
    Text(String),
    /// Naive UTC; drivers strip any offset before constructing this.
    Timestamp(NaiveDateTime),
    Binary(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The string payload if this cell is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Ordered schema plus row-major rows.
///
/// Cloning performs a deep copy; the transform engine relies on this to hand
/// each execution's steps a private, freely mutable table.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TabularData {
    pub columns: Vec<ColumnDef>,
    pub rows: Vec<Vec<Value>>,
}

impl TabularData {
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of the named column, case-sensitive.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Append a row. The caller must supply one cell per column.
    ///
    /// # Errors
    ///
    /// Returns an error if the cell count does not match the schema width.
    pub fn push_row(&mut self, row: Vec<Value>) -> anyhow::Result<()> {
        if row.len() != self.columns.len() {
            anyhow::bail!(
                "row width {} does not match schema width {}",
                row.len(),
                self.columns.len()
            );
        }
        self.rows.push(row);
        Ok(())
    }
}
