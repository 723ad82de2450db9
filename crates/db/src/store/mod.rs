//! Generic row-level data access used by the relationship and ordering core.
//!
//! Rows are JSON objects keyed by column name so the same calls serve every
//! configured collection. Implementations must bind values as parameters and
//! reject identifiers that are not plain column/table names.

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

mod sqlite;

pub use sqlite::SqliteStore;

pub type Row = Map<String, Value>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),
    #[error("refusing to {0} {1} without a filter")]
    UnboundedWrite(&'static str, String),
    #[error("empty update patch for {0}")]
    EmptyPatch(String),
    #[error("{0}")]
    Rejected(String),
}

/// Match condition for select/update/delete.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `column = value`; a `Null` value matches `IS NULL`.
    Eq(String, Value),
    /// `column IN (...)`; an empty list matches nothing.
    In(String, Vec<Value>),
    IsNull(String),
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(column.into(), value.into())
    }

    pub fn is_in<I, V>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Filter::In(column.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn column(&self) -> &str {
        match self {
            Filter::Eq(column, _) | Filter::In(column, _) | Filter::IsNull(column) => column,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub table: String,
    /// Empty means every column.
    pub columns: Vec<String>,
    pub filters: Vec<Filter>,
    pub order_by: Vec<OrderBy>,
}

impl Select {
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            filters: Vec::new(),
            order_by: Vec::new(),
        }
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.order_by.push(OrderBy {
            column: column.into(),
            descending: false,
        });
        self
    }
}

/// The data-access surface the core expects from the backing database.
#[async_trait]
pub trait DataStore: Send + Sync {
    async fn select(&self, query: &Select) -> Result<Vec<Row>, StoreError>;

    /// Insert rows and return them as stored. An empty row inserts column defaults.
    async fn insert(&self, table: &str, rows: &[Row]) -> Result<Vec<Row>, StoreError>;

    async fn update(&self, table: &str, patch: &Row, filters: &[Filter])
    -> Result<Vec<Row>, StoreError>;

    /// Returns the number of rows removed.
    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<u64, StoreError>;

    async fn upsert(
        &self,
        table: &str,
        rows: &[Row],
        conflict_columns: &[&str],
    ) -> Result<Vec<Row>, StoreError>;
}

/// JSON form of a record id: integers when the text parses as one, strings otherwise.
pub fn id_value(id: &str) -> Value {
    match id.parse::<i64>() {
        Ok(n) => Value::from(n),
        Err(_) => Value::String(id.to_string()),
    }
}

/// String form of an id column value. `None` for nulls and non-scalar values.
pub fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn validate_identifier(name: &str) -> Result<&str, StoreError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(name)
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}
