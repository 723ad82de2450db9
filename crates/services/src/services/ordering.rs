//! Persisting user-produced orderings (checklists, kanban columns, contract parts,
//! wireframe sections) as zero-based `order_index` values.

use std::{collections::HashSet, sync::Arc};

use db::store::{DataStore, Filter, Row, Select, StoreError, id_string, id_value};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info};
use ts_rs::TS;

use super::{
    collection::{Collection, JunctionRelation},
    normalize::dedup_ids,
};

#[derive(Debug, Error)]
pub enum ReorderError {
    #[error("failed to load {table} scope {scope}: {source}")]
    Load {
        table: String,
        scope: String,
        #[source]
        source: StoreError,
    },
    #[error("failed to persist order for {table}: {source}")]
    Persist {
        table: String,
        #[source]
        source: StoreError,
    },
    #[error("failed to move {item} to {table} scope {scope}: {source}")]
    Rescope {
        table: String,
        item: String,
        scope: String,
        #[source]
        source: StoreError,
    },
    #[error("{table} has no rows for ids {ids:?}")]
    UnknownItems { table: String, ids: Vec<String> },
    #[error("item {item} is not in {table} scope {scope}")]
    NotInScope {
        table: String,
        item: String,
        scope: String,
    },
    #[error("{0} is not ordered within a scope")]
    Unscoped(String),
    #[error("{collection} cannot be grouped by {column:?}")]
    InvalidScopeColumn { collection: String, column: String },
    #[error("ordering on {0} needs a scope")]
    MissingScope(String),
    #[error("items ordered through {0} cannot change scope")]
    UnsupportedMove(String),
}

/// Where the order of a list is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderTarget {
    /// Items carry their own order column; written with one upsert keyed by id.
    OwnTable {
        table: String,
        id_column: String,
        scope_column: Option<String>,
        order_column: String,
    },
    /// Order lives on the junction row linking the scope record to each item;
    /// written with one update per row.
    Junction {
        table: String,
        source_key: String,
        target_key: String,
        order_column: String,
    },
}

impl OrderTarget {
    /// Ordering of a collection's own rows, grouped by `scope_column` (defaults to
    /// the configured ordering scope). Each grouping writes its own order column.
    pub fn for_collection(
        collection: &Collection,
        scope_column: Option<&str>,
    ) -> Result<Self, ReorderError> {
        let (scope_column, order_column) = match scope_column {
            Some(column) => {
                let order_column = collection.order_column_for(column).ok_or_else(|| {
                    ReorderError::InvalidScopeColumn {
                        collection: collection.name.clone(),
                        column: column.to_string(),
                    }
                })?;
                (Some(column.to_string()), order_column.to_string())
            }
            None => {
                let ordering = collection
                    .ordering
                    .as_ref()
                    .ok_or_else(|| ReorderError::Unscoped(collection.name.clone()))?;
                (ordering.scope_column.clone(), ordering.order_column.clone())
            }
        };
        Ok(OrderTarget::OwnTable {
            table: collection.table().to_string(),
            id_column: collection.primary_key.clone(),
            scope_column,
            order_column,
        })
    }

    /// Ordering stored on junction rows; `None` when the relation is unordered.
    pub fn for_relation(relation: &JunctionRelation) -> Option<Self> {
        relation
            .order_column
            .as_ref()
            .map(|order_column| OrderTarget::Junction {
                table: relation.junction_table.clone(),
                source_key: relation.source_key.clone(),
                target_key: relation.target_key.clone(),
                order_column: order_column.clone(),
            })
    }

    pub fn table(&self) -> &str {
        match self {
            OrderTarget::OwnTable { table, .. } | OrderTarget::Junction { table, .. } => table,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct OrderedItem {
    pub id: String,
    pub order_index: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct MoveReport {
    pub source: Vec<OrderedItem>,
    pub destination: Vec<OrderedItem>,
}

/// Position of each id in `ids` as its order index.
pub fn assign_order(ids: &[String]) -> Vec<OrderedItem> {
    ids.iter()
        .enumerate()
        .map(|(position, id)| OrderedItem {
            id: id.clone(),
            order_index: position as i64,
        })
        .collect()
}

pub struct OrderReconciler {
    store: Arc<dyn DataStore>,
}

impl OrderReconciler {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self { store }
    }

    /// Persist `ids` (the final, user-produced order) as indices 0..n.
    ///
    /// Every id must already belong to `scope`; moving an item between scopes
    /// goes through [`OrderReconciler::move_item`]. Local state is not rolled
    /// back on failure; reload the scope to recover.
    pub async fn reorder(
        &self,
        target: &OrderTarget,
        scope: Option<&str>,
        ids: &[String],
    ) -> Result<Vec<OrderedItem>, ReorderError> {
        let order = assign_order(&dedup_ids(ids));
        if order.is_empty() {
            return Ok(order);
        }

        match target {
            OrderTarget::OwnTable {
                table,
                id_column,
                scope_column,
                order_column,
            } => {
                self.ensure_rows_exist(table, id_column, &order).await?;
                if scope_column.is_some() {
                    let scope = scope.ok_or_else(|| ReorderError::MissingScope(table.clone()))?;
                    let members: HashSet<String> =
                        self.load_scope(target, scope).await?.into_iter().collect();
                    if let Some(stray) = order.iter().find(|item| !members.contains(&item.id)) {
                        return Err(ReorderError::NotInScope {
                            table: table.clone(),
                            item: stray.id.clone(),
                            scope: scope.to_string(),
                        });
                    }
                }

                let rows: Vec<Row> = order
                    .iter()
                    .map(|item| {
                        let mut row = Row::new();
                        row.insert(id_column.clone(), id_value(&item.id));
                        row.insert(order_column.clone(), Value::from(item.order_index));
                        row
                    })
                    .collect();

                self.store
                    .upsert(table, &rows, &[id_column.as_str()])
                    .await
                    .map_err(|source| persist_error(table, source))?;
            }
            OrderTarget::Junction {
                table,
                source_key,
                target_key,
                order_column,
            } => {
                let scope = scope.ok_or_else(|| ReorderError::MissingScope(table.clone()))?;
                let linked: HashSet<String> = self.load_scope(target, scope).await?.into_iter().collect();
                let unknown: Vec<String> = order
                    .iter()
                    .filter(|item| !linked.contains(&item.id))
                    .map(|item| item.id.clone())
                    .collect();
                if !unknown.is_empty() {
                    return Err(ReorderError::UnknownItems {
                        table: table.clone(),
                        ids: unknown,
                    });
                }

                for item in &order {
                    let mut patch = Row::new();
                    patch.insert(order_column.clone(), Value::from(item.order_index));
                    self.store
                        .update(
                            table,
                            &patch,
                            &[
                                Filter::eq(source_key, id_value(scope)),
                                Filter::eq(target_key, id_value(&item.id)),
                            ],
                        )
                        .await
                        .map_err(|source| persist_error(table, source))?;
                }
            }
        }

        info!(table = target.table(), scope = ?scope, items = order.len(), "Order persisted");
        Ok(order)
    }

    /// Ids in `scope`, in their stored order.
    pub async fn load_scope(
        &self,
        target: &OrderTarget,
        scope: &str,
    ) -> Result<Vec<String>, ReorderError> {
        let (query, id_column) = match target {
            OrderTarget::OwnTable {
                table,
                id_column,
                scope_column,
                order_column,
            } => {
                let scope_column = scope_column
                    .as_ref()
                    .ok_or_else(|| ReorderError::Unscoped(table.clone()))?;
                let query = Select::from(table)
                    .columns([id_column.as_str()])
                    .filter(Filter::eq(scope_column, id_value(scope)))
                    .order_by(order_column)
                    .order_by(id_column);
                (query, id_column)
            }
            OrderTarget::Junction {
                table,
                source_key,
                target_key,
                order_column,
            } => {
                let query = Select::from(table)
                    .columns([target_key.as_str()])
                    .filter(Filter::eq(source_key, id_value(scope)))
                    .order_by(order_column)
                    .order_by("rowid");
                (query, target_key)
            }
        };

        let rows = self.store.select(&query).await.map_err(|source| ReorderError::Load {
            table: target.table().to_string(),
            scope: scope.to_string(),
            source,
        })?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get(id_column.as_str()).and_then(id_string))
            .collect())
    }

    /// Move `item` from `from_scope` to `to_scope` at `position` (clamped to the end).
    ///
    /// The item's scope column is updated first, then the source scope is
    /// re-indexed to close the gap and the destination scope re-indexed with the
    /// item inserted. A move within one scope re-indexes it once.
    pub async fn move_item(
        &self,
        target: &OrderTarget,
        item: &str,
        from_scope: &str,
        to_scope: &str,
        position: usize,
    ) -> Result<MoveReport, ReorderError> {
        let OrderTarget::OwnTable {
            table,
            id_column,
            scope_column,
            ..
        } = target
        else {
            return Err(ReorderError::UnsupportedMove(target.table().to_string()));
        };
        let scope_column = scope_column
            .as_ref()
            .ok_or_else(|| ReorderError::Unscoped(table.clone()))?;

        let mut source = self.load_scope(target, from_scope).await?;
        let Some(current) = source.iter().position(|id| id == item) else {
            return Err(ReorderError::NotInScope {
                table: table.clone(),
                item: item.to_string(),
                scope: from_scope.to_string(),
            });
        };
        source.remove(current);

        if from_scope == to_scope {
            source.insert(position.min(source.len()), item.to_string());
            let order = self.reorder(target, Some(to_scope), &source).await?;
            return Ok(MoveReport {
                source: order.clone(),
                destination: order,
            });
        }

        let mut destination = self.load_scope(target, to_scope).await?;
        destination.retain(|id| id != item);

        let mut patch = Row::new();
        patch.insert(scope_column.clone(), id_value(to_scope));
        self.store
            .update(table, &patch, &[Filter::eq(id_column, id_value(item))])
            .await
            .map_err(|source| {
                error!(table = %table, item, to_scope, error = %source, "Scope change failed");
                ReorderError::Rescope {
                    table: table.clone(),
                    item: item.to_string(),
                    scope: to_scope.to_string(),
                    source,
                }
            })?;

        destination.insert(position.min(destination.len()), item.to_string());
        let source_order = self.reorder(target, Some(from_scope), &source).await?;
        let destination_order = self.reorder(target, Some(to_scope), &destination).await?;

        info!(
            table = %table,
            item,
            from_scope,
            to_scope,
            position,
            "Item moved between scopes"
        );
        Ok(MoveReport {
            source: source_order,
            destination: destination_order,
        })
    }

    async fn ensure_rows_exist(
        &self,
        table: &str,
        id_column: &str,
        order: &[OrderedItem],
    ) -> Result<(), ReorderError> {
        let existing = self
            .store
            .select(
                &Select::from(table)
                    .columns([id_column])
                    .filter(Filter::is_in(id_column, order.iter().map(|item| id_value(&item.id)))),
            )
            .await
            .map_err(|source| persist_error(table, source))?;
        let existing: HashSet<String> = existing
            .iter()
            .filter_map(|row| row.get(id_column).and_then(id_string))
            .collect();

        let unknown: Vec<String> = order
            .iter()
            .filter(|item| !existing.contains(&item.id))
            .map(|item| item.id.clone())
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(ReorderError::UnknownItems {
                table: table.to_string(),
                ids: unknown,
            })
        }
    }
}

fn persist_error(table: &str, source: StoreError) -> ReorderError {
    error!(table, error = %source, "Order persist failed");
    ReorderError::Persist {
        table: table.to_string(),
        source,
    }
}
