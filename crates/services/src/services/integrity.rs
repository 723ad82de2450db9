//! Schema and reference checks: configured tables exist, migrations ran, and no
//! relationship row points at a record that has been deleted.

use std::{
    collections::{BTreeSet, HashSet},
    sync::Arc,
};

use db::store::{DataStore, Select, StoreError, id_string};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{info, warn};
use ts_rs::TS;

use super::collection::{CollectionRegistry, Relation};

#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Relationship rows in `table.column` whose ids are missing from `references`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct OrphanedReference {
    pub table: String,
    pub column: String,
    pub references: String,
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct IntegrityReport {
    pub migrations_applied: usize,
    pub missing_tables: Vec<String>,
    pub orphaned_references: Vec<OrphanedReference>,
}

impl IntegrityReport {
    pub fn is_ok(&self) -> bool {
        self.migrations_applied > 0
            && self.missing_tables.is_empty()
            && self.orphaned_references.is_empty()
    }

    pub fn summary(&self) -> String {
        if self.migrations_applied == 0 {
            "Database not initialized - migrations need to be run".to_string()
        } else if !self.missing_tables.is_empty() {
            format!("Missing tables: {}", self.missing_tables.join(", "))
        } else if !self.orphaned_references.is_empty() {
            let orphans: usize = self.orphaned_references.iter().map(|o| o.ids.len()).sum();
            format!(
                "{orphans} orphaned references across {} columns",
                self.orphaned_references.len()
            )
        } else {
            format!("Database OK - {} migrations applied", self.migrations_applied)
        }
    }
}

pub struct IntegrityChecker {
    pool: SqlitePool,
    store: Arc<dyn DataStore>,
}

impl IntegrityChecker {
    pub fn new(pool: SqlitePool, store: Arc<dyn DataStore>) -> Self {
        Self { pool, store }
    }

    /// Applied migration count; zero when the migrations table does not exist.
    pub async fn migrations_applied(&self) -> Result<usize, IntegrityError> {
        if !self.table_exists("_sqlx_migrations").await? {
            warn!("Database not initialized - _sqlx_migrations table does not exist");
            return Ok(0);
        }
        let applied = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(applied as usize)
    }

    /// Tables from `required` that do not exist.
    pub async fn missing_tables(&self, required: &[String]) -> Result<Vec<String>, IntegrityError> {
        let mut missing = Vec::new();
        for table in required {
            if !self.table_exists(table).await? {
                missing.push(table.clone());
            }
        }
        Ok(missing)
    }

    async fn table_exists(&self, table: &str) -> Result<bool, IntegrityError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    /// Every table the registry reads or writes.
    pub fn required_tables(registry: &CollectionRegistry) -> Vec<String> {
        let mut tables = BTreeSet::new();
        for collection in registry.iter() {
            tables.insert(collection.table().to_string());
            for (_, relation) in collection.relation_fields() {
                tables.insert(relation.target_table().to_string());
                if let Relation::Junction(junction) = relation {
                    tables.insert(junction.junction_table.clone());
                }
            }
        }
        tables.into_iter().collect()
    }

    /// Junction rows whose owner or target is gone, and target rows whose
    /// foreign key names a missing owner.
    pub async fn orphaned_references(
        &self,
        registry: &CollectionRegistry,
    ) -> Result<Vec<OrphanedReference>, IntegrityError> {
        let mut orphans = Vec::new();
        for collection in registry.iter() {
            for (_, relation) in collection.relation_fields() {
                match relation {
                    Relation::Junction(junction) => {
                        let owners = self
                            .ids(collection.table(), &collection.primary_key)
                            .await?;
                        let targets = self
                            .ids(&junction.target_table, &junction.target_id_column)
                            .await?;
                        let rows = self
                            .store
                            .select(
                                &Select::from(&junction.junction_table)
                                    .columns([junction.source_key.as_str(), junction.target_key.as_str()]),
                            )
                            .await?;

                        let dangling = |column: &str, known: &HashSet<String>| -> Vec<String> {
                            rows.iter()
                                .filter_map(|row| row.get(column).and_then(id_string))
                                .filter(|id| !known.contains(id))
                                .collect::<BTreeSet<_>>()
                                .into_iter()
                                .collect()
                        };
                        for (column, references, known) in [
                            (&junction.source_key, collection.table(), &owners),
                            (&junction.target_key, junction.target_table.as_str(), &targets),
                        ] {
                            let ids = dangling(column.as_str(), known);
                            if !ids.is_empty() {
                                orphans.push(OrphanedReference {
                                    table: junction.junction_table.clone(),
                                    column: column.clone(),
                                    references: references.to_string(),
                                    ids,
                                });
                            }
                        }
                    }
                    Relation::DirectForeignKey(direct) => {
                        let owners = self
                            .ids(collection.table(), &collection.primary_key)
                            .await?;
                        let ids: Vec<String> = self
                            .ids(&direct.target_table, &direct.foreign_key)
                            .await?
                            .into_iter()
                            .filter(|id| !owners.contains(id))
                            .collect::<BTreeSet<_>>()
                            .into_iter()
                            .collect();
                        if !ids.is_empty() {
                            orphans.push(OrphanedReference {
                                table: direct.target_table.clone(),
                                column: direct.foreign_key.clone(),
                                references: collection.table().to_string(),
                                ids,
                            });
                        }
                    }
                }
            }
        }
        Ok(orphans)
    }

    async fn ids(&self, table: &str, column: &str) -> Result<HashSet<String>, IntegrityError> {
        let rows = self
            .store
            .select(&Select::from(table).columns([column]))
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get(column).and_then(id_string))
            .collect())
    }

    pub async fn report(&self, registry: &CollectionRegistry) -> Result<IntegrityReport, IntegrityError> {
        let migrations_applied = self.migrations_applied().await?;
        let missing_tables = self
            .missing_tables(&Self::required_tables(registry))
            .await?;
        // Reference checks would fail on absent tables.
        let orphaned_references = if missing_tables.is_empty() {
            self.orphaned_references(registry).await?
        } else {
            Vec::new()
        };

        let report = IntegrityReport {
            migrations_applied,
            missing_tables,
            orphaned_references,
        };
        if report.is_ok() {
            info!(migrations_applied, "Integrity check passed");
        } else {
            warn!(summary = %report.summary(), "Integrity check found problems");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use db::{DBService, store::SqliteStore};
    use serde_json::json;

    use super::*;
    use crate::services::test_support::{registry, row};

    async fn checker() -> (IntegrityChecker, Arc<SqliteStore>) {
        let db = DBService::new_in_memory().await.unwrap();
        let store = Arc::new(SqliteStore::new(db.pool.clone()));
        (IntegrityChecker::new(db.pool, store.clone()), store)
    }

    #[tokio::test]
    async fn test_clean_database_passes() {
        let (checker, _) = checker().await;
        let report = checker.report(&registry()).await.unwrap();
        assert!(report.is_ok(), "{}", report.summary());
        assert!(report.summary().starts_with("Database OK"));
    }

    #[test]
    fn test_required_tables_include_junctions_and_targets() {
        let tables = IntegrityChecker::required_tables(&registry());
        for table in ["tasks", "task_assignees", "project_brands", "contract_part_links", "users"] {
            assert!(tables.iter().any(|t| t == table), "missing {table}");
        }
    }

    #[tokio::test]
    async fn test_missing_tables_are_reported() {
        let (checker, _) = checker().await;
        let missing = checker
            .missing_tables(&["tasks".to_string(), "invoices".to_string()])
            .await
            .unwrap();
        assert_eq!(missing, vec!["invoices".to_string()]);
    }

    #[tokio::test]
    async fn test_orphaned_junction_and_foreign_key_rows() {
        let (checker, store) = checker().await;
        let task = store.insert("tasks", &[row(json!({"title": "Edit"}))]).await.unwrap();
        let user = store.insert("users", &[row(json!({"name": "Ana"}))]).await.unwrap();
        store
            .insert(
                "task_assignees",
                &[
                    row(json!({"task_id": task[0]["id"], "user_id": user[0]["id"]})),
                    row(json!({"task_id": task[0]["id"], "user_id": 77})),
                    row(json!({"task_id": 55, "user_id": user[0]["id"]})),
                ],
            )
            .await
            .unwrap();
        store
            .insert("brands", &[row(json!({"name": "Ghost", "company_id": 404}))])
            .await
            .unwrap();

        let orphans = checker.orphaned_references(&registry()).await.unwrap();

        assert!(orphans.contains(&OrphanedReference {
            table: "task_assignees".into(),
            column: "user_id".into(),
            references: "users".into(),
            ids: vec!["77".into()],
        }));
        assert!(orphans.contains(&OrphanedReference {
            table: "task_assignees".into(),
            column: "task_id".into(),
            references: "tasks".into(),
            ids: vec!["55".into()],
        }));
        assert!(orphans.contains(&OrphanedReference {
            table: "brands".into(),
            column: "company_id".into(),
            references: "companies".into(),
            ids: vec!["404".into()],
        }));
        assert_eq!(orphans.len(), 3);

        let report = checker.report(&registry()).await.unwrap();
        assert!(!report.is_ok());
        assert_eq!(report.summary(), "3 orphaned references across 3 columns");
    }
}
