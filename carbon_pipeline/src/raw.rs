//! Raw API rows and the response shapes they are extracted from.
//!
//! The API does not commit to a single JSON layout. [`ResponseShape`] resolves
//! the layout once, at the fetch boundary, so everything downstream only sees a
//! [`RawTable`].

use serde_json::{Map, Value};

/// Column name given to rows that arrive as bare scalars instead of objects.
pub const SCALAR_COLUMN: &str = "value";

/// Loosely-typed tabular rows as returned by the API.
///
/// Column order is first-seen order across all rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    columns: Vec<String>,
    rows: Vec<Map<String, Value>>,
}

impl RawTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: Vec<Map<String, Value>>) -> Self {
        let mut table = Self::new();
        for row in rows {
            table.push(row);
        }
        table
    }

    /// Build from JSON array elements; scalar elements become single-column rows.
    pub fn from_values(values: Vec<Value>) -> Self {
        Self::from_rows(
            values
                .into_iter()
                .map(|value| match value {
                    Value::Object(map) => map,
                    other => {
                        let mut map = Map::new();
                        map.insert(SCALAR_COLUMN.to_string(), other);
                        map
                    }
                })
                .collect(),
        )
    }

    pub fn push(&mut self, row: Map<String, Value>) {
        for key in row.keys() {
            if !self.columns.iter().any(|c| c == key) {
                self.columns.push(key.clone());
            }
        }
        self.rows.push(row);
    }

    /// Append every row of `other`, keeping order.
    pub fn extend(&mut self, other: RawTable) {
        for row in other.rows {
            self.push(row);
        }
    }

    pub fn concat(tables: impl IntoIterator<Item = RawTable>) -> Self {
        let mut combined = Self::new();
        for table in tables {
            combined.extend(table);
        }
        combined
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Map<String, Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// The JSON layouts the carbon-intensity endpoint has been seen to return.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseShape {
    /// Object with at least one array-valued property (`data`, `history`, ...).
    /// The first such property, in document order, holds the rows.
    Envelope { key: String, rows: Vec<Value> },
    /// Object without any array property: the object itself is one row.
    SingleRecord(Map<String, Value>),
    /// Top-level array of rows.
    List(Vec<Value>),
    /// Scalar or null body; carries no rows.
    Unrecognized,
}

impl ResponseShape {
    pub fn classify(body: Value) -> Self {
        match body {
            Value::Object(mut map) => {
                let key = map
                    .iter()
                    .find(|(_, v)| v.is_array())
                    .map(|(k, _)| k.clone());
                match key {
                    Some(key) => match map.remove(&key) {
                        Some(Value::Array(rows)) => ResponseShape::Envelope { key, rows },
                        _ => ResponseShape::Unrecognized,
                    },
                    None => ResponseShape::SingleRecord(map),
                }
            }
            Value::Array(rows) => ResponseShape::List(rows),
            _ => ResponseShape::Unrecognized,
        }
    }

    pub fn into_table(self) -> RawTable {
        match self {
            ResponseShape::Envelope { rows, .. } | ResponseShape::List(rows) => {
                RawTable::from_values(rows)
            }
            ResponseShape::SingleRecord(map) => RawTable::from_rows(vec![map]),
            ResponseShape::Unrecognized => RawTable::new(),
        }
    }
}
