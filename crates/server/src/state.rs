use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use db::{
    DBService,
    store::{DataStore, SqliteStore},
};
use services::services::{
    collection::CollectionRegistry,
    config::Config,
    integrity::IntegrityChecker,
    ordering::OrderReconciler,
    record_editor::EditorContext,
    side_effects::SideEffectRegistry,
};

/// Handles shared by every request.
#[derive(Clone)]
pub struct AppState {
    db: DBService,
    registry: Arc<CollectionRegistry>,
    editor: EditorContext,
    reconciler: Arc<OrderReconciler>,
}

impl AppState {
    pub fn new(db: DBService, registry: CollectionRegistry, folder_root: impl Into<PathBuf>) -> Self {
        let store: Arc<dyn DataStore> = Arc::new(SqliteStore::new(db.pool.clone()));
        let editor = EditorContext::new(store.clone())
            .with_side_effects(SideEffectRegistry::with_local_folders(folder_root));
        Self {
            db,
            registry: Arc::new(registry),
            editor,
            reconciler: Arc::new(OrderReconciler::new(store)),
        }
    }

    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let db = if config.database_url.contains(":memory:") {
            DBService::new_in_memory().await
        } else {
            DBService::new(&config.database_url).await
        }
        .with_context(|| format!("opening {}", config.database_url))?;
        let registry = CollectionRegistry::load(&config.collections_path)
            .await
            .with_context(|| format!("loading {}", config.collections_path.display()))?;
        Ok(Self::new(db, registry, config.folder_root.clone()))
    }

    pub fn db(&self) -> &DBService {
        &self.db
    }

    pub fn registry(&self) -> &CollectionRegistry {
        &self.registry
    }

    pub fn editor(&self) -> &EditorContext {
        &self.editor
    }

    pub fn reconciler(&self) -> &OrderReconciler {
        &self.reconciler
    }

    pub fn integrity(&self) -> IntegrityChecker {
        IntegrityChecker::new(self.db.pool.clone(), self.editor.store.clone())
    }
}
