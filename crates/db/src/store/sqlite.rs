use async_trait::async_trait;
use serde_json::{Number, Value};
use sqlx::{
    Column, QueryBuilder, Row as _, Sqlite, SqlitePool, TypeInfo, ValueRef, sqlite::SqliteRow,
};
use tracing::debug;

use super::{DataStore, Filter, Row, Select, StoreError, validate_identifier};

/// [`DataStore`] over a SQLite pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn quoted(name: &str) -> Result<String, StoreError> {
    Ok(format!("\"{}\"", validate_identifier(name)?))
}

fn push_value(qb: &mut QueryBuilder<'_, Sqlite>, value: &Value) {
    match value {
        Value::Null => {
            qb.push("NULL");
        }
        Value::Bool(b) => {
            qb.push_bind(*b);
        }
        Value::Number(n) => match n.as_i64() {
            Some(i) => {
                qb.push_bind(i);
            }
            None => {
                qb.push_bind(n.as_f64().unwrap_or_default());
            }
        },
        Value::String(s) => {
            qb.push_bind(s.clone());
        }
        // Nested values are stored as their JSON text.
        other => {
            qb.push_bind(other.to_string());
        }
    }
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, filters: &[Filter]) -> Result<(), StoreError> {
    for (i, filter) in filters.iter().enumerate() {
        qb.push(if i == 0 { " WHERE " } else { " AND " });
        match filter {
            Filter::Eq(column, Value::Null) | Filter::IsNull(column) => {
                qb.push(quoted(column)?).push(" IS NULL");
            }
            Filter::Eq(column, value) => {
                qb.push(quoted(column)?).push(" = ");
                push_value(qb, value);
            }
            Filter::In(column, values) if values.is_empty() => {
                quoted(column)?;
                qb.push("0 = 1");
            }
            Filter::In(column, values) => {
                qb.push(quoted(column)?).push(" IN (");
                for (j, value) in values.iter().enumerate() {
                    if j > 0 {
                        qb.push(", ");
                    }
                    push_value(qb, value);
                }
                qb.push(")");
            }
        }
    }
    Ok(())
}

fn push_column_list(qb: &mut QueryBuilder<'_, Sqlite>, columns: &[&String]) -> Result<(), StoreError> {
    qb.push("(");
    for (i, column) in columns.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        qb.push(quoted(column)?);
    }
    qb.push(")");
    Ok(())
}

fn push_values(qb: &mut QueryBuilder<'_, Sqlite>, columns: &[&String], rows: &[Row]) {
    qb.push(" VALUES ");
    for (i, row) in rows.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        qb.push("(");
        for (j, column) in columns.iter().enumerate() {
            if j > 0 {
                qb.push(", ");
            }
            push_value(qb, row.get(column.as_str()).unwrap_or(&Value::Null));
        }
        qb.push(")");
    }
}

/// Decode a row by the storage class of each value, since dynamic queries carry no schema.
fn decode_row(row: &SqliteRow) -> Result<Row, StoreError> {
    let mut out = Row::new();
    for column in row.columns() {
        let index = column.ordinal();
        let raw = row.try_get_raw(index)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            let storage = raw.type_info().name().to_string();
            match storage.as_str() {
                "INTEGER" | "BOOLEAN" => Value::from(row.try_get_unchecked::<i64, _>(index)?),
                "REAL" => Number::from_f64(row.try_get_unchecked::<f64, _>(index)?)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
                "BLOB" => {
                    let bytes = row.try_get_unchecked::<Vec<u8>, _>(index)?;
                    Value::String(String::from_utf8_lossy(&bytes).into_owned())
                }
                _ => Value::String(row.try_get_unchecked::<String, _>(index)?),
            }
        };
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

/// Consecutive runs of rows sharing one column set, so each run is a single statement.
fn uniform_batches(rows: &[Row]) -> impl Iterator<Item = &[Row]> {
    rows.chunk_by(|a, b| a.keys().eq(b.keys()))
}

#[async_trait]
impl DataStore for SqliteStore {
    async fn select(&self, query: &Select) -> Result<Vec<Row>, StoreError> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT ");
        if query.columns.is_empty() {
            qb.push("*");
        } else {
            for (i, column) in query.columns.iter().enumerate() {
                if i > 0 {
                    qb.push(", ");
                }
                qb.push(quoted(column)?);
            }
        }
        qb.push(" FROM ").push(quoted(&query.table)?);
        push_filters(&mut qb, &query.filters)?;
        for (i, order) in query.order_by.iter().enumerate() {
            qb.push(if i == 0 { " ORDER BY " } else { ", " });
            qb.push(quoted(&order.column)?);
            qb.push(if order.descending { " DESC" } else { " ASC" });
        }

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(decode_row).collect()
    }

    async fn insert(&self, table: &str, rows: &[Row]) -> Result<Vec<Row>, StoreError> {
        let table_sql = quoted(table)?;
        let mut inserted = Vec::with_capacity(rows.len());

        for batch in uniform_batches(rows) {
            let columns: Vec<&String> = batch[0].keys().collect();
            if columns.is_empty() {
                let sql = format!("INSERT INTO {table_sql} DEFAULT VALUES RETURNING *");
                for _ in batch {
                    let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
                    inserted.push(decode_row(&row)?);
                }
                continue;
            }

            let mut qb = QueryBuilder::<Sqlite>::new(format!("INSERT INTO {table_sql} "));
            push_column_list(&mut qb, &columns)?;
            push_values(&mut qb, &columns, batch);
            qb.push(" RETURNING *");
            for row in qb.build().fetch_all(&self.pool).await? {
                inserted.push(decode_row(&row)?);
            }
        }

        debug!(table, rows = inserted.len(), "Inserted rows");
        Ok(inserted)
    }

    async fn update(
        &self,
        table: &str,
        patch: &Row,
        filters: &[Filter],
    ) -> Result<Vec<Row>, StoreError> {
        if patch.is_empty() {
            return Err(StoreError::EmptyPatch(table.to_string()));
        }
        if filters.is_empty() {
            return Err(StoreError::UnboundedWrite("update", table.to_string()));
        }

        let mut qb = QueryBuilder::<Sqlite>::new(format!("UPDATE {} SET ", quoted(table)?));
        for (i, (column, value)) in patch.iter().enumerate() {
            if i > 0 {
                qb.push(", ");
            }
            qb.push(quoted(column)?).push(" = ");
            push_value(&mut qb, value);
        }
        push_filters(&mut qb, filters)?;
        qb.push(" RETURNING *");

        let rows = qb.build().fetch_all(&self.pool).await?;
        debug!(table, rows = rows.len(), "Updated rows");
        rows.iter().map(decode_row).collect()
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<u64, StoreError> {
        if filters.is_empty() {
            return Err(StoreError::UnboundedWrite("delete", table.to_string()));
        }

        let mut qb = QueryBuilder::<Sqlite>::new(format!("DELETE FROM {}", quoted(table)?));
        push_filters(&mut qb, filters)?;
        let result = qb.build().execute(&self.pool).await?;
        debug!(table, rows = result.rows_affected(), "Deleted rows");
        Ok(result.rows_affected())
    }

    async fn upsert(
        &self,
        table: &str,
        rows: &[Row],
        conflict_columns: &[&str],
    ) -> Result<Vec<Row>, StoreError> {
        if conflict_columns.is_empty() {
            return Err(StoreError::Rejected(format!(
                "upsert into {table} needs at least one conflict column"
            )));
        }
        let table_sql = quoted(table)?;
        let mut conflict_sql = Vec::with_capacity(conflict_columns.len());
        for column in conflict_columns {
            conflict_sql.push(quoted(column)?);
        }
        let conflict_sql = conflict_sql.join(", ");

        let mut written = Vec::with_capacity(rows.len());
        for batch in uniform_batches(rows) {
            let columns: Vec<&String> = batch[0].keys().collect();
            if columns.is_empty() {
                return Err(StoreError::Rejected(format!("empty row in upsert into {table}")));
            }

            let mut qb = QueryBuilder::<Sqlite>::new(format!("INSERT INTO {table_sql} "));
            push_column_list(&mut qb, &columns)?;
            push_values(&mut qb, &columns, batch);
            qb.push(format!(" ON CONFLICT ({conflict_sql}) "));

            let updates: Vec<&&String> = columns
                .iter()
                .filter(|c| !conflict_columns.contains(&c.as_str()))
                .collect();
            if updates.is_empty() {
                qb.push("DO NOTHING");
            } else {
                qb.push("DO UPDATE SET ");
                for (i, column) in updates.iter().enumerate() {
                    if i > 0 {
                        qb.push(", ");
                    }
                    let column = quoted(column)?;
                    qb.push(format!("{column} = excluded.{column}"));
                }
            }
            qb.push(" RETURNING *");

            for row in qb.build().fetch_all(&self.pool).await? {
                written.push(decode_row(&row)?);
            }
        }

        debug!(table, rows = written.len(), "Upserted rows");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{DBService, store::id_value};

    async fn store() -> SqliteStore {
        let db = DBService::new_in_memory().await.expect("in-memory database");
        SqliteStore::new(db.pool)
    }

    fn row(value: Value) -> Row {
        value.as_object().cloned().expect("object literal")
    }

    #[tokio::test]
    async fn test_insert_then_select_filtered_and_ordered() {
        let store = store().await;
        let inserted = store
            .insert(
                "tasks",
                &[
                    row(json!({"title": "b", "checklist_id": 1, "order_index": 1})),
                    row(json!({"title": "a", "checklist_id": 1, "order_index": 0})),
                    row(json!({"title": "c", "checklist_id": 2, "order_index": 0})),
                ],
            )
            .await
            .unwrap();
        assert_eq!(inserted.len(), 3);
        assert!(inserted.iter().all(|r| r["id"].is_i64()));

        let rows = store
            .select(
                &Select::from("tasks")
                    .columns(["title", "order_index"])
                    .filter(Filter::eq("checklist_id", 1))
                    .order_by("order_index"),
            )
            .await
            .unwrap();
        let titles: Vec<&Value> = rows.iter().map(|r| &r["title"]).collect();
        assert_eq!(titles, vec![&json!("a"), &json!("b")]);
        assert_eq!(rows[0].len(), 2);
    }

    #[tokio::test]
    async fn test_insert_empty_row_uses_defaults() {
        let store = store().await;
        let inserted = store.insert("projects", &[Row::new()]).await.unwrap();
        assert_eq!(inserted.len(), 1);
        assert_eq!(inserted[0]["status"], json!("planning"));
        assert_eq!(inserted[0]["name"], json!(""));
        assert_eq!(inserted[0]["company_id"], Value::Null);
    }

    #[tokio::test]
    async fn test_insert_mixed_shapes() {
        let store = store().await;
        let inserted = store
            .insert(
                "users",
                &[
                    row(json!({"name": "ana"})),
                    row(json!({"name": "bo", "email": "bo@example.com"})),
                ],
            )
            .await
            .unwrap();
        assert_eq!(inserted.len(), 2);
        assert_eq!(inserted[1]["email"], json!("bo@example.com"));
    }

    #[tokio::test]
    async fn test_string_ids_match_integer_columns() {
        let store = store().await;
        store
            .insert(
                "task_assignees",
                &[row(json!({"task_id": id_value("42"), "user_id": "5"}))],
            )
            .await
            .unwrap();
        let rows = store
            .select(&Select::from("task_assignees").filter(Filter::eq("task_id", "42")))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["user_id"], json!(5));
    }

    #[tokio::test]
    async fn test_update_and_null_filter() {
        let store = store().await;
        store
            .insert(
                "media",
                &[
                    row(json!({"title": "hero", "task_id": 3})),
                    row(json!({"title": "logo"})),
                ],
            )
            .await
            .unwrap();

        let updated = store
            .update(
                "media",
                &row(json!({"task_id": 9})),
                &[Filter::eq("task_id", Value::Null)],
            )
            .await
            .unwrap();
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0]["title"], json!("logo"));
        assert_eq!(updated[0]["task_id"], json!(9));
    }

    #[tokio::test]
    async fn test_unbounded_writes_are_rejected() {
        let store = store().await;
        let err = store.delete("tasks", &[]).await.unwrap_err();
        assert!(matches!(err, StoreError::UnboundedWrite("delete", _)));
        let err = store
            .update("tasks", &row(json!({"title": "x"})), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnboundedWrite("update", _)));
        let err = store
            .update("tasks", &Row::new(), &[Filter::eq("id", 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::EmptyPatch(_)));
    }

    #[tokio::test]
    async fn test_delete_with_empty_in_list_removes_nothing() {
        let store = store().await;
        store
            .insert("users", &[row(json!({"name": "a"})), row(json!({"name": "b"}))])
            .await
            .unwrap();
        let removed = store
            .delete("users", &[Filter::In("id".to_string(), vec![])])
            .await
            .unwrap();
        assert_eq!(removed, 0);
        let removed = store
            .delete("users", &[Filter::is_in("name", ["a"])])
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn test_upsert_updates_existing_rows() {
        let store = store().await;
        let inserted = store
            .insert(
                "wireframe_sections",
                &[
                    row(json!({"name": "hero", "wireframe_id": 1})),
                    row(json!({"name": "footer", "wireframe_id": 1})),
                ],
            )
            .await
            .unwrap();
        let hero = inserted[0]["id"].clone();
        let footer = inserted[1]["id"].clone();

        store
            .upsert(
                "wireframe_sections",
                &[
                    row(json!({"id": footer, "order_index": 0})),
                    row(json!({"id": hero, "order_index": 1})),
                ],
                &["id"],
            )
            .await
            .unwrap();

        let rows = store
            .select(
                &Select::from("wireframe_sections")
                    .filter(Filter::eq("wireframe_id", 1))
                    .order_by("order_index"),
            )
            .await
            .unwrap();
        assert_eq!(rows[0]["name"], json!("footer"));
        assert_eq!(rows[1]["name"], json!("hero"));
    }

    #[tokio::test]
    async fn test_rejects_injected_identifiers() {
        let store = store().await;
        let err = store
            .select(&Select::from("tasks; DROP TABLE tasks"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidIdentifier(_)));
    }
}
