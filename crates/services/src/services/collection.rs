//! Declarative collection schemas: which table backs an entity, how each field is
//! stored, and how multi-relationship fields map onto junction tables or foreign keys.

use std::{collections::BTreeMap, path::Path, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("failed to read collection config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid collection config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("duplicate collection {0:?}")]
    Duplicate(String),
    #[error("unknown collection {0:?}")]
    UnknownCollection(String),
    #[error("collection {collection:?} has no field {field:?}")]
    UnknownField { collection: String, field: String },
    #[error("field {collection}.{field} is not a multi-relationship")]
    NotARelation { collection: String, field: String },
    #[error("collection {collection:?} orders {first} and {second} through conflicting columns")]
    OrderingConflict {
        collection: String,
        first: String,
        second: String,
    },
}

fn default_primary_key() -> String {
    "id".to_string()
}

fn default_order_column() -> String {
    "order_index".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    pub name: String,
    /// Backing table; defaults to the collection name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    table: Option<String>,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub filters: Vec<FilterDef>,
    #[serde(default)]
    pub views: Vec<View>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ordering: Option<Ordering>,
    /// Name of a registered side-effect hook run after every save.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side_effect: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(flatten)]
    pub kind: FieldKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FieldKind {
    Text,
    RichText,
    Number,
    Boolean,
    Date,
    Select {
        #[serde(default)]
        options: Vec<SelectOption>,
    },
    /// Column holding a media id or URL.
    Media,
    /// Single foreign-key column on the collection's own table.
    Relationship { relation: SingleRelation },
    MultiRelationship { relation: Relation },
}

impl FieldKind {
    /// Whether the value lives in a column of the collection's own table.
    pub fn is_scalar(&self) -> bool {
        !matches!(self, FieldKind::MultiRelationship { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectOption {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleRelation {
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_field: Option<String>,
}

/// A many-to-many (or one-to-many) relation, resolved once when the config is parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawRelation", into = "RawRelation")]
pub enum Relation {
    Junction(JunctionRelation),
    DirectForeignKey(DirectForeignKeyRelation),
}

#[derive(Debug, Clone, PartialEq)]
pub struct JunctionRelation {
    pub target_table: String,
    pub target_id_column: String,
    pub junction_table: String,
    /// Junction column holding the owning record's id.
    pub source_key: String,
    /// Junction column holding the related record's id.
    pub target_key: String,
    /// When set, junction rows carry their position in the selected list.
    pub order_column: Option<String>,
    pub label_field: Option<String>,
}

/// Relation stored as a foreign key on the target table pointing back at the owner.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectForeignKeyRelation {
    pub target_table: String,
    pub target_id_column: String,
    pub foreign_key: String,
    pub label_field: Option<String>,
}

impl Relation {
    pub fn target_table(&self) -> &str {
        match self {
            Relation::Junction(r) => &r.target_table,
            Relation::DirectForeignKey(r) => &r.target_table,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRelation {
    table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target_id_column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    junction_table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    order_column: Option<String>,
}

impl TryFrom<RawRelation> for Relation {
    type Error = String;

    fn try_from(raw: RawRelation) -> Result<Self, Self::Error> {
        let target_id_column = raw.target_id_column.unwrap_or_else(default_primary_key);
        match (raw.junction_table, raw.source_key, raw.target_key) {
            (Some(junction_table), Some(source_key), Some(target_key)) => {
                Ok(Relation::Junction(JunctionRelation {
                    target_table: raw.table,
                    target_id_column,
                    junction_table,
                    source_key,
                    target_key,
                    order_column: raw.order_column,
                    label_field: raw.label_field,
                }))
            }
            // Without a complete junction description the source key names the
            // foreign-key column on the target table.
            (_, Some(foreign_key), _) => Ok(Relation::DirectForeignKey(DirectForeignKeyRelation {
                target_table: raw.table,
                target_id_column,
                foreign_key,
                label_field: raw.label_field,
            })),
            (_, None, _) => Err(format!(
                "relation to {:?} needs either junctionTable/sourceKey/targetKey or a sourceKey foreign key",
                raw.table
            )),
        }
    }
}

impl From<Relation> for RawRelation {
    fn from(relation: Relation) -> Self {
        match relation {
            Relation::Junction(r) => RawRelation {
                table: r.target_table,
                target_id_column: Some(r.target_id_column),
                junction_table: Some(r.junction_table),
                source_key: Some(r.source_key),
                target_key: Some(r.target_key),
                label_field: r.label_field,
                order_column: r.order_column,
            },
            Relation::DirectForeignKey(r) => RawRelation {
                table: r.target_table,
                target_id_column: Some(r.target_id_column),
                junction_table: None,
                source_key: Some(r.foreign_key),
                target_key: None,
                label_field: r.label_field,
                order_column: None,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterDef {
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum View {
    Table {
        #[serde(default)]
        columns: Vec<String>,
    },
    /// Cards are reorderable within a column only when `order_column` is set.
    Kanban {
        column_field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        order_column: Option<String>,
    },
    Calendar {
        date_field: String,
    },
    Checklist {
        scope_field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        order_column: Option<String>,
    },
}

/// How rows of a collection are positioned relative to their siblings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ordering {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_column: Option<String>,
    #[serde(default = "default_order_column")]
    pub order_column: String,
}

impl Collection {
    pub fn table(&self) -> &str {
        self.table.as_deref().unwrap_or(&self.name)
    }

    pub fn field(&self, name: &str) -> Result<&FieldDef, CollectionError> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| CollectionError::UnknownField {
                collection: self.name.clone(),
                field: name.to_string(),
            })
    }

    pub fn relation(&self, field: &str) -> Result<&Relation, CollectionError> {
        match &self.field(field)?.kind {
            FieldKind::MultiRelationship { relation } => Ok(relation),
            _ => Err(CollectionError::NotARelation {
                collection: self.name.clone(),
                field: field.to_string(),
            }),
        }
    }

    pub fn scalar_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.kind.is_scalar())
    }

    pub fn relation_fields(&self) -> impl Iterator<Item = (&FieldDef, &Relation)> {
        self.fields.iter().filter_map(|f| match &f.kind {
            FieldKind::MultiRelationship { relation } => Some((f, relation)),
            _ => None,
        })
    }

    /// Reorderable groupings as `(scope column, order column)` pairs: the
    /// configured ordering first, then kanban and checklist views with their
    /// own order column. A view grouping by the ordering scope reuses its column.
    pub fn groupings(&self) -> Vec<(&str, &str)> {
        let mut groupings = Vec::new();
        for (scope, order_column) in self.declared_groupings() {
            if !groupings.iter().any(|(existing, _)| *existing == scope) {
                groupings.push((scope, order_column));
            }
        }
        groupings
    }

    /// Order column kept for rows grouped by `scope_column`.
    pub fn order_column_for(&self, scope_column: &str) -> Option<&str> {
        self.groupings()
            .into_iter()
            .find(|(scope, _)| *scope == scope_column)
            .map(|(_, order_column)| order_column)
    }

    fn declared_groupings(&self) -> Vec<(&str, &str)> {
        let ordering = self.ordering.as_ref();
        let mut declared = Vec::new();
        if let Some(ordering) = ordering
            && let Some(scope) = ordering.scope_column.as_deref()
        {
            declared.push((scope, ordering.order_column.as_str()));
        }
        for view in &self.views {
            let (scope, order_column) = match view {
                View::Kanban {
                    column_field,
                    order_column,
                } => (column_field.as_str(), order_column.as_deref()),
                View::Checklist {
                    scope_field,
                    order_column,
                } => (scope_field.as_str(), order_column.as_deref()),
                View::Table { .. } | View::Calendar { .. } => continue,
            };
            let inherited = ordering
                .filter(|o| o.scope_column.as_deref() == Some(scope))
                .map(|o| o.order_column.as_str());
            if let Some(order_column) = order_column.or(inherited) {
                declared.push((scope, order_column));
            }
        }
        declared
    }

    /// Each order column belongs to one grouping, and each grouping to one
    /// order column.
    fn check_groupings(&self) -> Result<(), CollectionError> {
        let declared = self.declared_groupings();
        for (i, (scope, order_column)) in declared.iter().enumerate() {
            for (other_scope, other_order) in &declared[i + 1..] {
                if (scope == other_scope) != (order_column == other_order) {
                    return Err(CollectionError::OrderingConflict {
                        collection: self.name.clone(),
                        first: format!("{scope}/{order_column}"),
                        second: format!("{other_scope}/{other_order}"),
                    });
                }
            }
        }
        Ok(())
    }

    /// Names of required fields missing or blank in `values`.
    pub fn missing_required(&self, values: &serde_json::Map<String, serde_json::Value>) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| f.required)
            .filter(|f| match values.get(&f.name) {
                None | Some(serde_json::Value::Null) => true,
                Some(serde_json::Value::String(s)) => s.trim().is_empty(),
                Some(serde_json::Value::Array(items)) => items.is_empty(),
                Some(_) => false,
            })
            .map(|f| f.name.clone())
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct CollectionsFile {
    collections: Vec<Collection>,
}

/// Read-only set of collections, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct CollectionRegistry {
    collections: BTreeMap<String, Arc<Collection>>,
}

impl CollectionRegistry {
    pub fn from_json_str(json: &str) -> Result<Self, CollectionError> {
        let file: CollectionsFile = serde_json::from_str(json)?;
        Self::from_collections(file.collections)
    }

    pub fn from_collections(collections: Vec<Collection>) -> Result<Self, CollectionError> {
        let mut registry = Self::default();
        for collection in collections {
            if registry.collections.contains_key(&collection.name) {
                return Err(CollectionError::Duplicate(collection.name));
            }
            collection.check_groupings()?;
            registry
                .collections
                .insert(collection.name.clone(), Arc::new(collection));
        }
        Ok(registry)
    }

    pub async fn load(path: &Path) -> Result<Self, CollectionError> {
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| CollectionError::Io {
                path: path.display().to_string(),
                source,
            })?;
        let registry = Self::from_json_str(&json)?;
        info!(
            path = %path.display(),
            collections = registry.collections.len(),
            "Loaded collection config"
        );
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Result<Arc<Collection>, CollectionError> {
        self.collections
            .get(name)
            .cloned()
            .ok_or_else(|| CollectionError::UnknownCollection(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Collection>> {
        self.collections.values()
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }
}
