//! Integration hooks run at the end of a record save, selected by a collection's
//! `sideEffect` name.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use async_trait::async_trait;
use db::store::{DataStore, Filter, Row, id_value};
use serde_json::Value;
use tracing::{debug, info};
use utils::text::slugify;

use super::collection::{Collection, FieldKind};

#[async_trait]
pub trait SideEffectHook: Send + Sync {
    /// Runs after scalar and relationship writes for `record`. Returns the
    /// record columns it wrote so the caller's copy stays current.
    async fn run(
        &self,
        store: &dyn DataStore,
        collection: &Collection,
        record_id: &str,
        record: &Row,
    ) -> anyhow::Result<Row>;
}

#[derive(Default, Clone)]
pub struct SideEffectRegistry {
    hooks: HashMap<String, Arc<dyn SideEffectHook>>,
}

impl SideEffectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the folder provisioner under `local_folder`.
    pub fn with_local_folders(root: impl Into<PathBuf>) -> Self {
        let mut registry = Self::new();
        registry.register(
            LocalFolderProvisioner::NAME,
            Arc::new(LocalFolderProvisioner::new(root)),
        );
        registry
    }

    pub fn register(&mut self, name: &str, hook: Arc<dyn SideEffectHook>) {
        self.hooks.insert(name.to_string(), hook);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SideEffectHook>> {
        self.hooks.get(name).cloned()
    }
}

/// Creates `<root>/<collection>/<id>-<slug>` for each saved record and stores the
/// path in the record's `folder_path` column. Records that already have a
/// folder are left alone.
pub struct LocalFolderProvisioner {
    root: PathBuf,
}

impl LocalFolderProvisioner {
    pub const NAME: &'static str = "local_folder";
    const PATH_COLUMN: &'static str = "folder_path";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn folder_for(&self, collection: &Collection, record_id: &str, record: &Row) -> PathBuf {
        let title = collection
            .fields
            .iter()
            .filter(|f| matches!(f.kind, FieldKind::Text))
            .find_map(|f| record.get(&f.name).and_then(Value::as_str))
            .map(slugify)
            .filter(|slug| !slug.is_empty());
        let name = match title {
            Some(slug) => format!("{record_id}-{slug}"),
            None => record_id.to_string(),
        };
        self.root.join(&collection.name).join(name)
    }
}

#[async_trait]
impl SideEffectHook for LocalFolderProvisioner {
    async fn run(
        &self,
        store: &dyn DataStore,
        collection: &Collection,
        record_id: &str,
        record: &Row,
    ) -> anyhow::Result<Row> {
        if let Some(Value::String(existing)) = record.get(Self::PATH_COLUMN)
            && !existing.is_empty()
        {
            debug!(collection = %collection.name, record_id, folder = %existing, "Folder already provisioned");
            return Ok(Row::new());
        }

        let folder = self.folder_for(collection, record_id, record);
        tokio::fs::create_dir_all(&folder)
            .await
            .with_context(|| format!("creating {}", folder.display()))?;

        let mut patch = Row::new();
        patch.insert(
            Self::PATH_COLUMN.to_string(),
            Value::String(folder.to_string_lossy().into_owned()),
        );
        store
            .update(
                collection.table(),
                &patch,
                &[Filter::eq(&collection.primary_key, id_value(record_id))],
            )
            .await
            .with_context(|| format!("recording folder for {}/{record_id}", collection.name))?;

        info!(collection = %collection.name, record_id, folder = %folder.display(), "Provisioned record folder");
        Ok(patch)
    }
}
