//! Full-replace synchronisation of multi-relationship fields.
//!
//! For junction relations every row owned by the record is deleted and the
//! desired set re-inserted. For direct foreign keys the owner's id is cleared
//! from the target table and then assigned to the desired rows. Neither path
//! runs in a transaction: a failure after the first step leaves the relation
//! empty until the next successful sync.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use db::store::{DataStore, Filter, Row, Select, StoreError, id_string, id_value};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use ts_rs::TS;

use super::{
    collection::{DirectForeignKeyRelation, JunctionRelation, Relation},
    normalize::dedup_ids,
};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to clear {table} rows for {record_id}: {source}")]
    Delete {
        table: String,
        record_id: String,
        #[source]
        source: StoreError,
    },
    #[error("failed to insert {table} rows for {record_id}: {source}")]
    Insert {
        table: String,
        record_id: String,
        #[source]
        source: StoreError,
    },
    #[error("failed to detach {table}.{column} from {record_id}: {source}")]
    Clear {
        table: String,
        column: String,
        record_id: String,
        #[source]
        source: StoreError,
    },
    #[error("failed to attach {table}.{column} to {record_id}: {source}")]
    Assign {
        table: String,
        column: String,
        record_id: String,
        #[source]
        source: StoreError,
    },
    #[error("post-sync hook for {table}.{field} failed: {source}")]
    Hook {
        table: String,
        field: String,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct SyncReport {
    /// Junction rows deleted, or target rows detached for foreign keys.
    pub removed: u64,
    /// Rows linked to the record after the sync.
    pub linked: usize,
}

/// What a post-sync hook is told about the sync that just succeeded.
#[derive(Debug, Clone, Copy)]
pub struct SyncContext<'a> {
    pub table: &'a str,
    pub field: &'a str,
    pub record_id: &'a str,
    /// Desired ids in selection order, duplicates removed.
    pub ids: &'a [String],
}

/// Domain-specific follow-up to a relationship sync, registered per `(table, field)`.
#[async_trait]
pub trait PostSyncHook: Send + Sync {
    async fn after_sync(&self, store: &dyn DataStore, ctx: &SyncContext<'_>) -> anyhow::Result<()>;
}

/// Promotes the first brand selected on a project to its company's primary brand.
pub struct PrimaryBrandHook;

#[async_trait]
impl PostSyncHook for PrimaryBrandHook {
    async fn after_sync(&self, store: &dyn DataStore, ctx: &SyncContext<'_>) -> anyhow::Result<()> {
        let Some(first_brand) = ctx.ids.first() else {
            return Ok(());
        };

        let projects = store
            .select(
                &Select::from(ctx.table)
                    .columns(["company_id"])
                    .filter(Filter::eq("id", id_value(ctx.record_id))),
            )
            .await?;
        let Some(company_id) = projects.first().and_then(|p| p.get("company_id")).and_then(id_string)
        else {
            debug!(project_id = ctx.record_id, "Project has no company, skipping brand promotion");
            return Ok(());
        };

        let mut patch = Row::new();
        patch.insert("primary_brand_id".to_string(), id_value(first_brand));
        store
            .update("companies", &patch, &[Filter::eq("id", id_value(&company_id))])
            .await?;
        info!(
            company_id = %company_id,
            brand_id = %first_brand,
            "Promoted primary brand"
        );
        Ok(())
    }
}

pub struct RelationshipSync {
    store: Arc<dyn DataStore>,
    hooks: HashMap<(String, String), Arc<dyn PostSyncHook>>,
}

impl RelationshipSync {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self {
            store,
            hooks: HashMap::new(),
        }
    }

    /// Engine with the stock hooks installed.
    pub fn with_default_hooks(store: Arc<dyn DataStore>) -> Self {
        let mut sync = Self::new(store);
        sync.register_hook("projects", "brands", Arc::new(PrimaryBrandHook));
        sync
    }

    pub fn register_hook(&mut self, table: &str, field: &str, hook: Arc<dyn PostSyncHook>) {
        self.hooks
            .insert((table.to_string(), field.to_string()), hook);
    }

    pub fn store(&self) -> &Arc<dyn DataStore> {
        &self.store
    }

    /// Make the related ids of `record_id` through `field` exactly `desired_ids`.
    pub async fn sync(
        &self,
        table: &str,
        field: &str,
        record_id: &str,
        relation: &Relation,
        desired_ids: &[String],
    ) -> Result<SyncReport, SyncError> {
        let ids = dedup_ids(desired_ids);
        let report = match relation {
            Relation::Junction(junction) => self.sync_junction(record_id, junction, &ids).await?,
            Relation::DirectForeignKey(direct) => self.sync_direct(record_id, direct, &ids).await?,
        };

        if let Some(hook) = self.hooks.get(&(table.to_string(), field.to_string())) {
            let ctx = SyncContext {
                table,
                field,
                record_id,
                ids: &ids,
            };
            hook.after_sync(self.store.as_ref(), &ctx)
                .await
                .map_err(|source| {
                    error!(table, field, record_id, error = %source, "Post-sync hook failed");
                    SyncError::Hook {
                        table: table.to_string(),
                        field: field.to_string(),
                        source,
                    }
                })?;
        }

        info!(
            table,
            field,
            record_id,
            removed = report.removed,
            linked = report.linked,
            "Relationship synced"
        );
        Ok(report)
    }

    async fn sync_junction(
        &self,
        record_id: &str,
        relation: &JunctionRelation,
        ids: &[String],
    ) -> Result<SyncReport, SyncError> {
        let table = &relation.junction_table;
        let removed = self
            .store
            .delete(table, &[Filter::eq(&relation.source_key, id_value(record_id))])
            .await
            .map_err(|source| {
                error!(table = %table, record_id, error = %source, "Junction delete failed");
                SyncError::Delete {
                    table: table.clone(),
                    record_id: record_id.to_string(),
                    source,
                }
            })?;

        if ids.is_empty() {
            return Ok(SyncReport { removed, linked: 0 });
        }

        let rows: Vec<Row> = ids
            .iter()
            .enumerate()
            .map(|(position, id)| {
                let mut row = Row::new();
                row.insert(relation.source_key.clone(), id_value(record_id));
                row.insert(relation.target_key.clone(), id_value(id));
                if let Some(order_column) = &relation.order_column {
                    row.insert(order_column.clone(), Value::from(position as i64));
                }
                row
            })
            .collect();

        let inserted = self.store.insert(table, &rows).await.map_err(|source| {
            // The delete above already ran; the relation stays empty until the next sync.
            warn!(
                table = %table,
                record_id,
                removed,
                error = %source,
                "Junction insert failed after clearing existing rows"
            );
            SyncError::Insert {
                table: table.clone(),
                record_id: record_id.to_string(),
                source,
            }
        })?;

        Ok(SyncReport {
            removed,
            linked: inserted.len(),
        })
    }

    async fn sync_direct(
        &self,
        record_id: &str,
        relation: &DirectForeignKeyRelation,
        ids: &[String],
    ) -> Result<SyncReport, SyncError> {
        let table = &relation.target_table;
        let column = &relation.foreign_key;

        let mut detach = Row::new();
        detach.insert(column.clone(), Value::Null);
        let detached = self
            .store
            .update(table, &detach, &[Filter::eq(column, id_value(record_id))])
            .await
            .map_err(|source| {
                error!(table = %table, column = %column, record_id, error = %source, "Foreign key clear failed");
                SyncError::Clear {
                    table: table.clone(),
                    column: column.clone(),
                    record_id: record_id.to_string(),
                    source,
                }
            })?;

        if ids.is_empty() {
            return Ok(SyncReport {
                removed: detached.len() as u64,
                linked: 0,
            });
        }

        let mut attach = Row::new();
        attach.insert(column.clone(), id_value(record_id));
        let attached = self
            .store
            .update(
                table,
                &attach,
                &[Filter::is_in(
                    &relation.target_id_column,
                    ids.iter().map(|id| id_value(id)),
                )],
            )
            .await
            .map_err(|source| {
                error!(table = %table, column = %column, record_id, error = %source, "Foreign key assign failed");
                SyncError::Assign {
                    table: table.clone(),
                    column: column.clone(),
                    record_id: record_id.to_string(),
                    source,
                }
            })?;

        Ok(SyncReport {
            removed: detached.len() as u64,
            linked: attached.len(),
        })
    }

    /// Ids currently related to `record_id`, in stored order.
    pub async fn current_ids(
        &self,
        record_id: &str,
        relation: &Relation,
    ) -> Result<Vec<String>, StoreError> {
        let query = match relation {
            Relation::Junction(junction) => {
                let mut query = Select::from(&junction.junction_table)
                    .columns([junction.target_key.as_str()])
                    .filter(Filter::eq(&junction.source_key, id_value(record_id)));
                if let Some(order_column) = &junction.order_column {
                    query = query.order_by(order_column);
                }
                query.order_by("rowid")
            }
            Relation::DirectForeignKey(direct) => Select::from(&direct.target_table)
                .columns([direct.target_id_column.as_str()])
                .filter(Filter::eq(&direct.foreign_key, id_value(record_id)))
                .order_by(&direct.target_id_column),
        };
        let column = match relation {
            Relation::Junction(junction) => &junction.target_key,
            Relation::DirectForeignKey(direct) => &direct.target_id_column,
        };

        let rows = self.store.select(&query).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get(column.as_str()).and_then(id_string))
            .collect())
    }
}
