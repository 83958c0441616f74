//! Row schemas and fingerprints
//!
//! A schema describes one row of a cursor's result set: an ordered list of
//! named, typed, possibly-nullable columns. Schemas are fingerprinted so a
//! compiled parser can be cached per `(target type, schema)` pair.

use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;
use serde::Serialize;

use crate::value::BasicType;

/// One column of a result-set row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub runtime_type: BasicType,
    pub nullable: bool,
    /// Position within the row. Stable for a given schema.
    pub position: u16,
}

/// Ordered sequence of columns describing one row.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    /// Build a schema from `(name, runtime type, nullable)` triples.
    /// Positions are assigned in order.
    pub fn new(columns: impl IntoIterator<Item = (String, BasicType, bool)>) -> Self {
        let columns = columns
            .into_iter()
            .enumerate()
            .map(|(i, (name, runtime_type, nullable))| Column {
                name,
                runtime_type,
                nullable,
                position: i as u16,
            })
            .collect();
        Self { columns }
    }

    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn get(&self, position: u16) -> Option<&Column> {
        self.columns.get(position as usize)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Stable hash over the sequence of `(case-folded name, normalized
    /// runtime type, nullable)`.
    ///
    /// Integer widths collapse to i64 and float widths to f64 before
    /// hashing, so providers that report `int` vs `long` for the same
    /// literal agree on the fingerprint.
    pub fn fingerprint(&self) -> SchemaFingerprint {
        let mut hasher = FxHasher::default();
        for column in &self.columns {
            fold_name(&column.name).hash(&mut hasher);
            normalize_type(column.runtime_type).hash(&mut hasher);
            column.nullable.hash(&mut hasher);
        }
        SchemaFingerprint(hasher.finish())
    }
}

/// Cache key component identifying a schema shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SchemaFingerprint(pub u64);

/// Case-fold a column name for comparison and hashing.
pub fn fold_name(name: &str) -> String {
    name.to_lowercase()
}

fn normalize_type(ty: BasicType) -> BasicType {
    match ty {
        BasicType::I16 | BasicType::I32 | BasicType::I64 => BasicType::I64,
        BasicType::F32 | BasicType::F64 => BasicType::F64,
        other => other,
    }
}

/// Fluent schema construction for tests and callers.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    columns: Vec<(String, BasicType, bool)>,
}

impl SchemaBuilder {
    /// Add a non-nullable column.
    pub fn column(mut self, name: &str, runtime_type: BasicType) -> Self {
        self.columns.push((name.to_string(), runtime_type, false));
        self
    }

    /// Add a nullable column.
    pub fn nullable(mut self, name: &str, runtime_type: BasicType) -> Self {
        self.columns.push((name.to_string(), runtime_type, true));
        self
    }

    pub fn build(self) -> Schema {
        Schema::new(self.columns)
    }
}
