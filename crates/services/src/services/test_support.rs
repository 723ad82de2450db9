use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use db::{
    DBService,
    store::{DataStore, Filter, Row, Select, SqliteStore, StoreError},
};
use serde_json::Value;

use super::collection::CollectionRegistry;

pub(crate) fn registry() -> CollectionRegistry {
    CollectionRegistry::from_json_str(include_str!("../../../../config/collections.json"))
        .expect("shipped collection config parses")
}

pub(crate) async fn sqlite_store() -> Arc<SqliteStore> {
    let db = DBService::new_in_memory().await.expect("in-memory database");
    Arc::new(SqliteStore::new(db.pool))
}

pub(crate) fn row(value: Value) -> Row {
    value.as_object().cloned().expect("object literal")
}

pub(crate) async fn pairs(
    store: &dyn DataStore,
    table: &str,
    source_key: &str,
    target_key: &str,
) -> Vec<(i64, i64)> {
    let rows = store
        .select(&Select::from(table).columns([source_key, target_key]))
        .await
        .expect("select junction rows");
    let mut pairs: Vec<(i64, i64)> = rows
        .iter()
        .map(|r| {
            (
                r[source_key].as_i64().expect("integer source"),
                r[target_key].as_i64().expect("integer target"),
            )
        })
        .collect();
    pairs.sort();
    pairs
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    Insert,
    Update,
    Delete,
    Upsert,
}

/// Store wrapper that fails chosen operations on chosen tables.
pub(crate) struct FlakyStore {
    inner: Arc<dyn DataStore>,
    failing: Mutex<Vec<(Op, String)>>,
}

impl FlakyStore {
    pub(crate) fn new(inner: Arc<dyn DataStore>) -> Self {
        Self {
            inner,
            failing: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn fail(&self, op: Op, table: &str) {
        self.failing.lock().unwrap().push((op, table.to_string()));
    }

    pub(crate) fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    fn check(&self, op: Op, table: &str) -> Result<(), StoreError> {
        let failing = self.failing.lock().unwrap();
        if failing.iter().any(|(o, t)| *o == op && t == table) {
            return Err(StoreError::Rejected(format!("injected {op:?} failure on {table}")));
        }
        Ok(())
    }
}

#[async_trait]
impl DataStore for FlakyStore {
    async fn select(&self, query: &Select) -> Result<Vec<Row>, StoreError> {
        self.inner.select(query).await
    }

    async fn insert(&self, table: &str, rows: &[Row]) -> Result<Vec<Row>, StoreError> {
        self.check(Op::Insert, table)?;
        self.inner.insert(table, rows).await
    }

    async fn update(
        &self,
        table: &str,
        patch: &Row,
        filters: &[Filter],
    ) -> Result<Vec<Row>, StoreError> {
        self.check(Op::Update, table)?;
        self.inner.update(table, patch, filters).await
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<u64, StoreError> {
        self.check(Op::Delete, table)?;
        self.inner.delete(table, filters).await
    }

    async fn upsert(
        &self,
        table: &str,
        rows: &[Row],
        conflict_columns: &[&str],
    ) -> Result<Vec<Row>, StoreError> {
        self.check(Op::Upsert, table)?;
        self.inner.upsert(table, rows, conflict_columns).await
    }
}
