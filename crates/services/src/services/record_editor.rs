//! Editing one record: a local working copy compared against the last saved
//! snapshot, and an ordered save (scalar columns, then relationships, then the
//! collection's side effect).

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use dashmap::DashMap;
use db::store::{DataStore, Filter, Row, Select, StoreError, id_string, id_value};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard, watch};
use tracing::{debug, error, info, warn};
use ts_rs::TS;

use super::{
    collection::{Collection, CollectionError, FieldKind},
    normalize::{ids_to_value, normalize_ids},
    relationship_sync::{RelationshipSync, SyncError, SyncReport},
    side_effects::SideEffectRegistry,
};

#[derive(Debug, Error)]
pub enum EditorError {
    #[error(transparent)]
    Collection(#[from] CollectionError),
    #[error("missing required fields: {}", .0.join(", "))]
    Validation(Vec<String>),
    #[error("{table} record {id} not found")]
    NotFound { table: String, id: String },
    #[error("failed to load {table} record {id}: {source}")]
    Load {
        table: String,
        id: String,
        #[source]
        source: StoreError,
    },
    #[error("failed to create {table} record: {source}")]
    Create {
        table: String,
        #[source]
        source: StoreError,
    },
    #[error("inserted {0} row has no primary key")]
    MissingId(String),
    #[error("failed to update {table} record {id}: {source}")]
    Scalar {
        table: String,
        id: String,
        #[source]
        source: StoreError,
    },
    #[error(transparent)]
    Sync(#[from] SyncError),
}

type LockKey = (String, String);

/// Per-record async mutex table serialising writes to the same record.
#[derive(Default)]
pub struct SaveLocks {
    locks: Arc<DashMap<LockKey, Arc<Mutex<()>>>>,
}

impl SaveLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other write to `table`/`id` is in flight.
    pub async fn acquire(&self, table: &str, id: &str) -> SaveGuard {
        let key = (table.to_string(), id.to_string());
        let lock = self.locks.entry(key.clone()).or_default().clone();
        SaveGuard {
            guard: Some(lock.lock_owned().await),
            key,
            locks: self.locks.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Held record lock. Dropping the last holder removes the record's entry.
pub struct SaveGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: LockKey,
    locks: Arc<DashMap<LockKey, Arc<Mutex<()>>>>,
}

impl Drop for SaveGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold their own clone of the mutex, so the entry survives them.
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Shared handles every editor works through.
#[derive(Clone)]
pub struct EditorContext {
    pub store: Arc<dyn DataStore>,
    pub sync: Arc<RelationshipSync>,
    pub locks: Arc<SaveLocks>,
    pub side_effects: Arc<SideEffectRegistry>,
}

impl EditorContext {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self {
            sync: Arc::new(RelationshipSync::with_default_hooks(store.clone())),
            store,
            locks: Arc::new(SaveLocks::new()),
            side_effects: Arc::new(SideEffectRegistry::new()),
        }
    }

    pub fn with_side_effects(mut self, side_effects: SideEffectRegistry) -> Self {
        self.side_effects = Arc::new(side_effects);
        self
    }

    /// Replace one relationship field of a stored record, serialised with saves
    /// of the same record.
    pub async fn sync_relation(
        &self,
        collection: &Collection,
        record_id: &str,
        field: &str,
        ids: &[String],
    ) -> Result<SyncReport, EditorError> {
        let relation = collection.relation(field)?;
        let _guard = self.locks.acquire(collection.table(), record_id).await;
        Ok(self
            .sync
            .sync(collection.table(), field, record_id, relation, ids)
            .await?)
    }
}

/// A save sub-step currently running.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[serde(tag = "step", content = "name", rename_all = "snake_case")]
pub enum SaveStep {
    Scalar,
    Relationship(String),
    SideEffect(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
pub enum RecordState {
    Clean,
    Dirty,
    /// Save steps are in flight. `save_record` holds the editor mutably, so this
    /// is seen by tasks reading the editor's activity channel, not by its caller.
    Saving,
}

/// Outcome of the most recent save, one slot per sub-step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct OperationStatus {
    pub scalar_error: Option<String>,
    pub relationship_errors: BTreeMap<String, String>,
    pub side_effect_error: Option<String>,
}

impl OperationStatus {
    pub fn is_ok(&self) -> bool {
        self.scalar_error.is_none()
            && self.relationship_errors.is_empty()
            && self.side_effect_error.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct SaveReport {
    #[ts(type = "Record<string, unknown>")]
    pub record: Row,
    pub relationships: BTreeMap<String, SyncReport>,
    pub relationship_errors: BTreeMap<String, String>,
    pub side_effect_error: Option<String>,
}

impl SaveReport {
    /// True when every relationship and the side effect went through.
    pub fn is_complete(&self) -> bool {
        self.relationship_errors.is_empty() && self.side_effect_error.is_none()
    }
}

pub struct RecordEditor {
    ctx: EditorContext,
    collection: Arc<Collection>,
    record_id: String,
    snapshot: Row,
    working: Row,
    status: OperationStatus,
    activity: watch::Sender<BTreeSet<SaveStep>>,
    held: Option<SaveGuard>,
}

impl RecordEditor {
    fn new(ctx: EditorContext, collection: Arc<Collection>, record_id: String, snapshot: Row) -> Self {
        let (activity, _) = watch::channel(BTreeSet::new());
        Self {
            ctx,
            collection,
            record_id,
            working: snapshot.clone(),
            snapshot,
            status: OperationStatus::default(),
            activity,
            held: None,
        }
    }

    /// Open an existing record with its relationship fields resolved to id lists.
    pub async fn load(
        ctx: EditorContext,
        collection: Arc<Collection>,
        record_id: &str,
    ) -> Result<Self, EditorError> {
        let snapshot = fetch(&ctx, &collection, record_id).await?;
        Ok(Self::new(ctx, collection, record_id.to_string(), snapshot))
    }

    /// [`RecordEditor::load`] under the record's lock, held until the editor is
    /// dropped. No other locked write to the record lands between the read and
    /// the save, so the save cannot revert it.
    pub async fn load_exclusive(
        ctx: EditorContext,
        collection: Arc<Collection>,
        record_id: &str,
    ) -> Result<Self, EditorError> {
        let guard = ctx.locks.acquire(collection.table(), record_id).await;
        let mut editor = Self::load(ctx, collection, record_id).await?;
        editor.held = Some(guard);
        Ok(editor)
    }

    /// Insert an empty row (column defaults) and open it.
    pub async fn create_draft(
        ctx: EditorContext,
        collection: Arc<Collection>,
    ) -> Result<Self, EditorError> {
        let row = insert_row(&ctx, &collection, Row::new()).await?;
        let (record_id, snapshot) = draft_snapshot(&collection, row)?;
        info!(collection = %collection.name, record_id = %record_id, "Draft record created");
        Ok(Self::new(ctx, collection, record_id, snapshot))
    }

    /// Validate `values`, insert the scalar columns and save the relationship
    /// fields. Missing required fields fail before anything is written.
    pub async fn create(
        ctx: EditorContext,
        collection: Arc<Collection>,
        values: Row,
    ) -> Result<(Self, SaveReport), EditorError> {
        let mut canonical = Row::new();
        for (name, value) in values {
            let field = collection.field(&name)?;
            canonical.insert(name, canonicalize(&field.kind, value));
        }

        let missing = collection.missing_required(&canonical);
        if !missing.is_empty() {
            debug!(collection = %collection.name, ?missing, "Create rejected");
            return Err(EditorError::Validation(missing));
        }

        let scalars: Row = collection
            .scalar_fields()
            .filter_map(|f| canonical.get(&f.name).map(|v| (f.name.clone(), v.clone())))
            .collect();
        let row = insert_row(&ctx, &collection, scalars).await?;
        let (record_id, snapshot) = draft_snapshot(&collection, row)?;
        info!(collection = %collection.name, record_id = %record_id, "Record created");

        let mut editor = Self::new(ctx, collection, record_id, snapshot);
        for (name, value) in canonical {
            editor.working.insert(name, value);
        }
        let report = editor.save_record().await?;
        Ok((editor, report))
    }

    pub fn record_id(&self) -> &str {
        &self.record_id
    }

    pub fn collection(&self) -> &Arc<Collection> {
        &self.collection
    }

    pub fn working(&self) -> &Row {
        &self.working
    }

    pub fn snapshot(&self) -> &Row {
        &self.snapshot
    }

    pub fn value(&self, field: &str) -> Option<&Value> {
        self.working.get(field)
    }

    pub fn is_dirty(&self) -> bool {
        self.working != self.snapshot
    }

    /// Clean or dirty for the editor's owner; see [`RecordState::Saving`].
    pub fn state(&self) -> RecordState {
        if !self.activity.borrow().is_empty() {
            RecordState::Saving
        } else if self.is_dirty() {
            RecordState::Dirty
        } else {
            RecordState::Clean
        }
    }

    pub fn operation_status(&self) -> &OperationStatus {
        &self.status
    }

    /// Save steps in flight, updated as `save_record` progresses.
    pub fn subscribe_activity(&self) -> watch::Receiver<BTreeSet<SaveStep>> {
        self.activity.subscribe()
    }

    /// Whether a save step touching `field` is running.
    pub fn is_field_loading(&self, field: &str) -> bool {
        let Ok(def) = self.collection.field(field) else {
            return false;
        };
        self.activity.borrow().iter().any(|step| match step {
            SaveStep::Scalar => def.kind.is_scalar(),
            SaveStep::Relationship(name) => name == field,
            SaveStep::SideEffect(_) => false,
        })
    }

    /// Set `field` in the working copy. Returns whether the record is now dirty.
    pub fn update_local_value(&mut self, field: &str, value: Value) -> Result<bool, EditorError> {
        let def = self.collection.field(field)?;
        let value = canonicalize(&def.kind, value);
        self.working.insert(field.to_string(), value);
        Ok(self.is_dirty())
    }

    /// Discard local edits and re-read the record.
    pub async fn reload(&mut self) -> Result<(), EditorError> {
        self.snapshot = fetch(&self.ctx, &self.collection, &self.record_id).await?;
        self.working = self.snapshot.clone();
        self.status = OperationStatus::default();
        Ok(())
    }

    /// Persist the working copy.
    ///
    /// A failed scalar update aborts the save and keeps the record dirty.
    /// Relationship and side-effect failures are reported in the returned
    /// [`SaveReport`] and [`OperationStatus`], and the record still becomes clean.
    pub async fn save_record(&mut self) -> Result<SaveReport, EditorError> {
        let _guard = match self.held {
            Some(_) => None,
            None => Some(
                self.ctx
                    .locks
                    .acquire(self.collection.table(), &self.record_id)
                    .await,
            ),
        };
        let collection = self.collection.clone();
        let table = collection.table();
        self.status = OperationStatus::default();

        let patch: Row = collection
            .scalar_fields()
            .filter_map(|f| {
                let value = self.working.get(&f.name)?;
                (self.snapshot.get(&f.name) != Some(value)).then(|| (f.name.clone(), value.clone()))
            })
            .collect();

        if !patch.is_empty() {
            self.begin(SaveStep::Scalar);
            let result = self
                .ctx
                .store
                .update(
                    table,
                    &patch,
                    &[Filter::eq(&collection.primary_key, id_value(&self.record_id))],
                )
                .await;
            self.finish(&SaveStep::Scalar);

            match result {
                Ok(rows) => match rows.into_iter().next() {
                    Some(stored) => {
                        for (column, value) in stored {
                            self.working.insert(column, value);
                        }
                    }
                    None => {
                        self.status.scalar_error = Some("record no longer exists".to_string());
                        return Err(EditorError::NotFound {
                            table: table.to_string(),
                            id: self.record_id.clone(),
                        });
                    }
                },
                Err(source) => {
                    error!(table, record_id = %self.record_id, error = %source, "Scalar update failed");
                    self.status.scalar_error = Some(source.to_string());
                    return Err(EditorError::Scalar {
                        table: table.to_string(),
                        id: self.record_id.clone(),
                        source,
                    });
                }
            }
        }

        let mut relationships = BTreeMap::new();
        let mut relationship_errors = BTreeMap::new();
        for (field, relation) in collection.relation_fields() {
            let Some(value) = self.working.get(&field.name) else {
                continue;
            };
            let ids = normalize_ids(value);
            let step = SaveStep::Relationship(field.name.clone());
            self.begin(step.clone());
            let result = self
                .ctx
                .sync
                .sync(table, &field.name, &self.record_id, relation, &ids)
                .await;
            self.finish(&step);

            match result {
                Ok(report) => {
                    relationships.insert(field.name.clone(), report);
                }
                Err(err) => {
                    warn!(table, field = %field.name, record_id = %self.record_id, error = %err, "Relationship sync failed");
                    relationship_errors.insert(field.name.clone(), err.to_string());
                }
            }
        }

        let side_effect_error = match &collection.side_effect {
            Some(name) => match self.run_side_effect(&collection, name).await {
                Ok(written) => {
                    self.working.extend(written);
                    None
                }
                Err(err) => Some(err),
            },
            None => None,
        };

        self.snapshot = self.working.clone();
        self.status.relationship_errors = relationship_errors.clone();
        self.status.side_effect_error = side_effect_error.clone();

        if self.status.is_ok() {
            info!(table, record_id = %self.record_id, "Record saved");
        } else {
            warn!(
                table,
                record_id = %self.record_id,
                failed_relationships = relationship_errors.len(),
                side_effect_failed = side_effect_error.is_some(),
                "Record saved with failures"
            );
        }

        Ok(SaveReport {
            record: self.working.clone(),
            relationships,
            relationship_errors,
            side_effect_error,
        })
    }

    /// Columns the hook wrote, or its error message.
    async fn run_side_effect(&self, collection: &Collection, name: &str) -> Result<Row, String> {
        let Some(hook) = self.ctx.side_effects.get(name) else {
            warn!(collection = %collection.name, hook = name, "No side-effect hook registered");
            return Err(format!("no side-effect hook registered as {name:?}"));
        };

        let step = SaveStep::SideEffect(name.to_string());
        self.begin(step.clone());
        let result = hook
            .run(self.ctx.store.as_ref(), collection, &self.record_id, &self.working)
            .await;
        self.finish(&step);

        result.map_err(|err| {
            error!(collection = %collection.name, record_id = %self.record_id, hook = name, error = %err, "Side effect failed");
            format!("{err:#}")
        })
    }

    fn begin(&self, step: SaveStep) {
        self.activity.send_modify(|active| {
            active.insert(step);
        });
    }

    fn finish(&self, step: &SaveStep) {
        self.activity.send_modify(|active| {
            active.remove(step);
        });
    }
}

/// Type-aware normal form of a field value, so equal selections compare equal.
fn canonicalize(kind: &FieldKind, value: Value) -> Value {
    match kind {
        FieldKind::MultiRelationship { .. } => ids_to_value(normalize_ids(&value)),
        FieldKind::Select { .. } => match value {
            Value::Object(mut option) => option.remove("value").unwrap_or(Value::Null),
            other => other,
        },
        FieldKind::Media => match value {
            Value::Object(mut media) => media
                .remove("id")
                .or_else(|| media.remove("url"))
                .unwrap_or(Value::Null),
            other => other,
        },
        FieldKind::Relationship { .. } => {
            let id = match &value {
                Value::Object(target) => target.get("id").and_then(id_string),
                other => id_string(other),
            };
            id.map(|id| id_value(&id)).unwrap_or(Value::Null)
        }
        _ => value,
    }
}

async fn fetch(ctx: &EditorContext, collection: &Collection, record_id: &str) -> Result<Row, EditorError> {
    let load_error = |source: StoreError| EditorError::Load {
        table: collection.table().to_string(),
        id: record_id.to_string(),
        source,
    };

    let mut row = ctx
        .store
        .select(
            &Select::from(collection.table())
                .filter(Filter::eq(&collection.primary_key, id_value(record_id))),
        )
        .await
        .map_err(load_error)?
        .into_iter()
        .next()
        .ok_or_else(|| EditorError::NotFound {
            table: collection.table().to_string(),
            id: record_id.to_string(),
        })?;

    for (field, relation) in collection.relation_fields() {
        let ids = ctx
            .sync
            .current_ids(record_id, relation)
            .await
            .map_err(load_error)?;
        row.insert(field.name.clone(), ids_to_value(ids));
    }
    Ok(row)
}

async fn insert_row(ctx: &EditorContext, collection: &Collection, row: Row) -> Result<Row, EditorError> {
    let table = collection.table();
    ctx.store
        .insert(table, &[row])
        .await
        .map_err(|source| {
            error!(table, error = %source, "Insert failed");
            EditorError::Create {
                table: table.to_string(),
                source,
            }
        })?
        .into_iter()
        .next()
        .ok_or_else(|| EditorError::MissingId(table.to_string()))
}

/// Id and starting snapshot of a freshly inserted row; relationship fields start empty.
fn draft_snapshot(collection: &Collection, mut row: Row) -> Result<(String, Row), EditorError> {
    let record_id = row
        .get(&collection.primary_key)
        .and_then(id_string)
        .ok_or_else(|| EditorError::MissingId(collection.table().to_string()))?;
    for (field, _) in collection.relation_fields() {
        row.insert(field.name.clone(), Value::Array(Vec::new()));
    }
    Ok((record_id, row))
}

#[cfg(test)]
mod tests {
    use std::{sync::Mutex as StdMutex, time::Duration};

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::services::{
        side_effects::SideEffectHook,
        test_support::{FlakyStore, Op, pairs, registry, row, sqlite_store},
    };

    async fn seed(store: &dyn DataStore, table: &str, value: Value) -> String {
        let rows = store.insert(table, &[row(value)]).await.unwrap();
        id_string(&rows[0]["id"]).unwrap()
    }

    async fn task_editor(store: Arc<dyn DataStore>) -> (RecordEditor, String) {
        let id = seed(store.as_ref(), "tasks", json!({"title": "Draft brief", "status": "todo"})).await;
        let editor = RecordEditor::load(EditorContext::new(store), registry().get("tasks").unwrap(), &id)
            .await
            .unwrap();
        (editor, id)
    }

    #[tokio::test]
    async fn test_dirty_flag_transitions() {
        let store = sqlite_store().await;
        let (mut editor, id) = task_editor(store.clone()).await;
        assert_eq!(editor.state(), RecordState::Clean);

        assert!(!editor.update_local_value("title", json!("Draft brief")).unwrap());
        assert_eq!(editor.state(), RecordState::Clean);

        assert!(editor.update_local_value("title", json!("Final brief")).unwrap());
        assert_eq!(editor.state(), RecordState::Dirty);

        let report = editor.save_record().await.unwrap();
        assert!(report.is_complete());
        assert_eq!(editor.state(), RecordState::Clean);

        let stored = store
            .select(&Select::from("tasks").filter(Filter::eq("id", id_value(&id))))
            .await
            .unwrap();
        assert_eq!(stored[0]["title"], json!("Final brief"));
    }

    #[tokio::test]
    async fn test_failed_scalar_update_stays_dirty() {
        let inner = sqlite_store().await;
        let flaky = Arc::new(FlakyStore::new(inner.clone()));
        let (mut editor, _) = task_editor(flaky.clone()).await;
        flaky.fail(Op::Update, "tasks");

        editor.update_local_value("title", json!("Renamed")).unwrap();
        let err = editor.save_record().await.unwrap_err();

        assert!(matches!(err, EditorError::Scalar { .. }));
        assert!(editor.is_dirty());
        assert!(editor.operation_status().scalar_error.is_some());

        flaky.heal();
        editor.save_record().await.unwrap();
        assert!(!editor.is_dirty());
        assert!(editor.operation_status().is_ok());
    }

    #[tokio::test]
    async fn test_relationship_failure_is_reported_separately() {
        let inner = sqlite_store().await;
        let ana = seed(inner.as_ref(), "users", json!({"name": "Ana"})).await;
        let ben = seed(inner.as_ref(), "users", json!({"name": "Ben"})).await;
        let flaky = Arc::new(FlakyStore::new(inner.clone()));
        let (mut editor, id) = task_editor(flaky.clone()).await;
        flaky.fail(Op::Insert, "task_assignees");

        editor.update_local_value("title", json!("Shoot plan")).unwrap();
        editor
            .update_local_value("assignees", json!([ana, ben]))
            .unwrap();
        let report = editor.save_record().await.unwrap();

        // Scalar change went through.
        let stored = inner
            .select(&Select::from("tasks").filter(Filter::eq("id", id_value(&id))))
            .await
            .unwrap();
        assert_eq!(stored[0]["title"], json!("Shoot plan"));
        // Relationship failure is visible on its own.
        assert!(report.relationship_errors.contains_key("assignees"));
        assert!(report.relationships.contains_key("media"));
        assert!(!report.is_complete());
        let status = editor.operation_status();
        assert!(status.scalar_error.is_none());
        assert!(status.relationship_errors.contains_key("assignees"));
        assert_eq!(editor.state(), RecordState::Clean);
        assert!(pairs(inner.as_ref(), "task_assignees", "task_id", "user_id").await.is_empty());
    }

    #[tokio::test]
    async fn test_select_and_relation_values_compare_by_content() {
        let store = sqlite_store().await;
        let user = seed(store.as_ref(), "users", json!({"name": "Ana"})).await;
        let other = seed(store.as_ref(), "users", json!({"name": "Ben"})).await;
        let (mut editor, _) = task_editor(store.clone()).await;

        assert!(!editor
            .update_local_value("status", json!({"value": "todo", "label": "To do"}))
            .unwrap());
        assert!(editor
            .update_local_value("status", json!({"value": "done", "label": "Done"}))
            .unwrap());
        assert_eq!(editor.value("status"), Some(&json!("done")));
        editor.update_local_value("status", json!("todo")).unwrap();

        editor
            .update_local_value("assignees", json!([user.parse::<i64>().unwrap(), other]))
            .unwrap();
        editor.save_record().await.unwrap();
        assert!(!editor.is_dirty());

        let same = json!({"ids": [user.clone(), other.clone()], "details": [{"id": user}]});
        assert!(!editor.update_local_value("assignees", same).unwrap());
        assert!(editor
            .update_local_value("assignees", json!([other, user]))
            .unwrap());
    }

    #[tokio::test]
    async fn test_media_and_single_relation_canonical_forms() {
        let store = sqlite_store().await;
        let project = seed(store.as_ref(), "projects", json!({"name": "Rebrand"})).await;
        let (mut editor, _) = task_editor(store.clone()).await;

        editor
            .update_local_value("cover_media", json!({"url": "https://cdn.example/hero.png"}))
            .unwrap();
        assert_eq!(editor.value("cover_media"), Some(&json!("https://cdn.example/hero.png")));

        editor
            .update_local_value("project_id", json!({"id": project, "name": "Rebrand"}))
            .unwrap();
        assert_eq!(editor.value("project_id"), Some(&id_value(&project)));
        editor.save_record().await.unwrap();

        assert!(!editor.update_local_value("project_id", json!(project)).unwrap());
        assert!(editor.update_local_value("project_id", Value::Null).unwrap());
    }

    #[tokio::test]
    async fn test_unknown_field_is_rejected() {
        let store = sqlite_store().await;
        let (mut editor, _) = task_editor(store).await;
        let err = editor.update_local_value("budget", json!(10)).unwrap_err();
        assert!(matches!(err, EditorError::Collection(CollectionError::UnknownField { .. })));
        assert!(!editor.is_dirty());
    }

    #[tokio::test]
    async fn test_load_reads_relations_and_reports_missing_records() {
        let store = sqlite_store().await;
        let ctx = EditorContext::new(store.clone());
        let contracts = registry().get("contracts").unwrap();
        let contract = seed(store.as_ref(), "contracts", json!({"title": "MSA"})).await;
        let part_a = seed(store.as_ref(), "contract_parts", json!({"title": "Scope"})).await;
        let part_b = seed(store.as_ref(), "contract_parts", json!({"title": "Fees"})).await;
        store
            .insert(
                "contract_part_links",
                &[
                    row(json!({"contract_id": contract.parse::<i64>().unwrap(), "contract_part_id": part_b.parse::<i64>().unwrap(), "order_index": 0})),
                    row(json!({"contract_id": contract.parse::<i64>().unwrap(), "contract_part_id": part_a.parse::<i64>().unwrap(), "order_index": 1})),
                ],
            )
            .await
            .unwrap();

        let editor = RecordEditor::load(ctx.clone(), contracts.clone(), &contract)
            .await
            .unwrap();
        assert_eq!(editor.value("parts"), Some(&json!([part_b, part_a])));

        let err = RecordEditor::load(ctx, contracts, "9999").await.err().unwrap();
        assert!(matches!(err, EditorError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_reload_discards_local_edits() {
        let store = sqlite_store().await;
        let (mut editor, _) = task_editor(store).await;
        editor.update_local_value("title", json!("Scratch")).unwrap();
        editor.reload().await.unwrap();
        assert!(!editor.is_dirty());
        assert_eq!(editor.value("title"), Some(&json!("Draft brief")));
    }

    #[tokio::test]
    async fn test_create_validates_before_writing() {
        let store = sqlite_store().await;
        let ctx = EditorContext::new(store.clone());

        let err = RecordEditor::create(ctx, registry().get("tasks").unwrap(), row(json!({"title": "  ", "status": "todo"})))
            .await
            .err()
            .unwrap();

        assert!(matches!(err, EditorError::Validation(ref missing) if missing == &vec!["title".to_string()]));
        assert!(store.select(&Select::from("tasks")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_saves_relationships_and_hooks() {
        let store = sqlite_store().await;
        let company = seed(store.as_ref(), "companies", json!({"name": "Acme"})).await;
        let brand_a = seed(store.as_ref(), "brands", json!({"name": "Acme Kids"})).await;
        let brand_b = seed(store.as_ref(), "brands", json!({"name": "Acme Pro"})).await;
        let root = tempfile::tempdir().unwrap();
        let ctx = EditorContext::new(store.clone())
            .with_side_effects(SideEffectRegistry::with_local_folders(root.path()));

        let (editor, report) = RecordEditor::create(
            ctx,
            registry().get("projects").unwrap(),
            row(json!({
                "name": "Spring Launch",
                "status": {"value": "active", "label": "Active"},
                "company_id": {"id": company},
                "brands": [brand_b, brand_a],
            })),
        )
        .await
        .unwrap();

        assert!(report.is_complete(), "{report:?}");
        assert_eq!(report.relationships["brands"].linked, 2);
        assert!(!editor.is_dirty());
        assert_eq!(editor.value("status"), Some(&json!("active")));

        let project: i64 = editor.record_id().parse().unwrap();
        assert_eq!(
            pairs(store.as_ref(), "project_brands", "project_id", "brand_id").await,
            vec![
                (project, brand_a.parse().unwrap()),
                (project, brand_b.parse().unwrap())
            ]
        );
        let companies = store
            .select(&Select::from("companies").filter(Filter::eq("id", id_value(&company))))
            .await
            .unwrap();
        assert_eq!(companies[0]["primary_brand_id"], id_value(&brand_b));
        assert!(
            root.path()
                .join("projects")
                .join(format!("{project}-spring-launch"))
                .is_dir()
        );
    }

    #[tokio::test]
    async fn test_create_draft_starts_clean() {
        let store = sqlite_store().await;
        let ctx = EditorContext::new(store.clone());

        let editor = RecordEditor::create_draft(ctx, registry().get("tasks").unwrap())
            .await
            .unwrap();

        assert!(!editor.is_dirty());
        assert_eq!(editor.value("assignees"), Some(&json!([])));
        assert_eq!(editor.value("status"), Some(&json!("todo")));
        let rows = store.select(&Select::from("tasks")).await.unwrap();
        assert_eq!(id_string(&rows[0]["id"]).as_deref(), Some(editor.record_id()));
    }

    struct ObservingHook {
        activity: StdMutex<Option<watch::Receiver<BTreeSet<SaveStep>>>>,
        seen: StdMutex<Vec<BTreeSet<SaveStep>>>,
        fail: bool,
    }

    #[async_trait]
    impl SideEffectHook for ObservingHook {
        async fn run(
            &self,
            _store: &dyn DataStore,
            _collection: &Collection,
            _record_id: &str,
            _record: &Row,
        ) -> anyhow::Result<Row> {
            if let Some(rx) = self.activity.lock().unwrap().as_ref() {
                self.seen.lock().unwrap().push(rx.borrow().clone());
            }
            if self.fail {
                anyhow::bail!("drive unavailable");
            }
            Ok(Row::new())
        }
    }

    #[tokio::test]
    async fn test_side_effect_runs_last_and_failure_is_reported() {
        for fail in [false, true] {
            let store = sqlite_store().await;
            let company = seed(store.as_ref(), "companies", json!({"name": "Acme"})).await;
            let hook = Arc::new(ObservingHook {
                activity: StdMutex::new(None),
                seen: StdMutex::new(Vec::new()),
                fail,
            });
            let mut side_effects = SideEffectRegistry::new();
            side_effects.register("local_folder", hook.clone());
            let ctx = EditorContext::new(store.clone()).with_side_effects(side_effects);

            let mut editor = RecordEditor::load(ctx, registry().get("companies").unwrap(), &company)
                .await
                .unwrap();
            let rx = editor.subscribe_activity();
            *hook.activity.lock().unwrap() = Some(rx.clone());

            editor.update_local_value("name", json!("Acme Studio")).unwrap();
            let report = editor.save_record().await.unwrap();

            let seen = hook.seen.lock().unwrap().clone();
            assert_eq!(
                seen,
                vec![BTreeSet::from([SaveStep::SideEffect("local_folder".to_string())])]
            );
            assert!(rx.borrow().is_empty());
            assert!(!editor.is_field_loading("name"));
            assert_eq!(report.side_effect_error.is_some(), fail);
            assert_eq!(editor.operation_status().side_effect_error.is_some(), fail);
            assert_eq!(editor.state(), RecordState::Clean);
        }
    }

    #[tokio::test]
    async fn test_unregistered_side_effect_is_reported() {
        let store = sqlite_store().await;
        let company = seed(store.as_ref(), "companies", json!({"name": "Acme"})).await;
        let mut editor = RecordEditor::load(
            EditorContext::new(store),
            registry().get("companies").unwrap(),
            &company,
        )
        .await
        .unwrap();

        let report = editor.save_record().await.unwrap();
        assert!(report.side_effect_error.unwrap().contains("local_folder"));
    }

    #[tokio::test]
    async fn test_save_locks_serialise_same_record() {
        let locks = SaveLocks::new();
        let guard = locks.acquire("tasks", "1").await;

        let blocked = tokio::time::timeout(Duration::from_millis(50), locks.acquire("tasks", "1")).await;
        assert!(blocked.is_err());
        let other = tokio::time::timeout(Duration::from_millis(50), locks.acquire("tasks", "2")).await;
        assert!(other.is_ok());
        drop(other);
        assert_eq!(locks.len(), 1);

        drop(guard);
        let reacquired = tokio::time::timeout(Duration::from_millis(50), locks.acquire("tasks", "1")).await;
        assert!(reacquired.is_ok());
        drop(reacquired);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_lock_entry_survives_while_a_writer_waits() {
        let locks = Arc::new(SaveLocks::new());
        let guard = locks.acquire("tasks", "1").await;
        let waiter = tokio::spawn({
            let locks = locks.clone();
            async move {
                let _guard = locks.acquire("tasks", "1").await;
            }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(guard);
        assert_eq!(locks.len(), 1);
        waiter.await.unwrap();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_saves_through_the_editor_leave_no_lock_entries() {
        let store = sqlite_store().await;
        let ctx = EditorContext::new(store.clone());
        let tasks = registry().get("tasks").unwrap();
        for title in ["Brief", "Shoot", "Edit"] {
            let id = seed(store.as_ref(), "tasks", json!({"title": title})).await;
            let mut editor = RecordEditor::load(ctx.clone(), tasks.clone(), &id).await.unwrap();
            editor.update_local_value("status", json!("done")).unwrap();
            editor.save_record().await.unwrap();
            let mut exclusive = RecordEditor::load_exclusive(ctx.clone(), tasks.clone(), &id)
                .await
                .unwrap();
            exclusive.update_local_value("status", json!("todo")).unwrap();
            exclusive.save_record().await.unwrap();
        }
        assert!(ctx.locks.is_empty());
    }

    #[tokio::test]
    async fn test_relation_sync_waits_for_an_open_exclusive_edit() {
        let store = sqlite_store().await;
        let user = seed(store.as_ref(), "users", json!({"name": "Ana"})).await;
        let ctx = EditorContext::new(store.clone());
        let tasks = registry().get("tasks").unwrap();
        let id = seed(store.as_ref(), "tasks", json!({"title": "Draft brief"})).await;

        let mut editor = RecordEditor::load_exclusive(ctx.clone(), tasks.clone(), &id)
            .await
            .unwrap();
        let sync = tokio::spawn({
            let (ctx, tasks, id, user) = (ctx.clone(), tasks.clone(), id.clone(), user.clone());
            async move { ctx.sync_relation(&tasks, &id, "assignees", &[user]).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!sync.is_finished());

        editor.update_local_value("title", json!("Final brief")).unwrap();
        editor.save_record().await.unwrap();
        drop(editor);

        let report = sync.await.unwrap().unwrap();
        assert_eq!(report.linked, 1);
        let task: i64 = id.parse().unwrap();
        assert_eq!(
            pairs(store.as_ref(), "task_assignees", "task_id", "user_id").await,
            vec![(task, user.parse().unwrap())]
        );
        let reloaded = RecordEditor::load(ctx, tasks, &id).await.unwrap();
        assert_eq!(reloaded.value("title"), Some(&json!("Final brief")));
        assert_eq!(reloaded.value("assignees"), Some(&json!([user])));
    }

    #[tokio::test]
    async fn test_side_effect_columns_merge_into_the_working_copy() {
        let store = sqlite_store().await;
        let company = seed(store.as_ref(), "companies", json!({"name": "Acme"})).await;
        let root = tempfile::tempdir().unwrap();
        let ctx = EditorContext::new(store.clone())
            .with_side_effects(SideEffectRegistry::with_local_folders(root.path()));
        let mut editor = RecordEditor::load(ctx, registry().get("companies").unwrap(), &company)
            .await
            .unwrap();

        editor.save_record().await.unwrap();
        let folder = root.path().join("companies").join(format!("{company}-acme"));
        assert_eq!(editor.value("folder_path"), Some(&json!(folder.to_string_lossy())));
        assert!(!editor.is_dirty());

        editor.update_local_value("name", json!("Acme Studio")).unwrap();
        editor.save_record().await.unwrap();
        editor.save_record().await.unwrap();

        let folders: Vec<_> = std::fs::read_dir(root.path().join("companies"))
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(folders, vec![folder]);
    }

    #[test]
    fn test_save_step_wire_form() {
        assert_eq!(serde_json::to_value(SaveStep::Scalar).unwrap(), json!({"step": "scalar"}));
        assert_eq!(
            serde_json::to_value(SaveStep::Relationship("assignees".into())).unwrap(),
            json!({"step": "relationship", "name": "assignees"})
        );
    }
}
