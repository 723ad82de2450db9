//! Routes for loading, creating and saving records of any configured collection.

use axum::{
    Json, Router,
    extract::{Path, State},
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::store::Row;
use services::services::record_editor::{RecordEditor, SaveReport};
use utils::response::ApiResponse;

use crate::{AppState, error::ApiError};

/// GET /api/collections/{collection}/records/{id}
pub async fn get_record(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
) -> Result<ResponseJson<ApiResponse<Row>>, ApiError> {
    let collection = state.registry().get(&collection)?;
    let editor = RecordEditor::load(state.editor().clone(), collection, &id).await?;
    Ok(ResponseJson(ApiResponse::success(editor.working().clone())))
}

/// POST /api/collections/{collection}/records
/// An empty body creates a draft from column defaults.
pub async fn create_record(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Json(values): Json<Row>,
) -> Result<ResponseJson<ApiResponse<SaveReport>>, ApiError> {
    let collection = state.registry().get(&collection)?;
    let report = if values.is_empty() {
        let editor = RecordEditor::create_draft(state.editor().clone(), collection).await?;
        SaveReport {
            record: editor.working().clone(),
            relationships: Default::default(),
            relationship_errors: Default::default(),
            side_effect_error: None,
        }
    } else {
        let (_, report) = RecordEditor::create(state.editor().clone(), collection, values).await?;
        report
    };
    Ok(ResponseJson(ApiResponse::success(report)))
}

/// PATCH /api/collections/{collection}/records/{id}
/// Applies the given field values and saves under the record's lock.
/// Relationship and side-effect failures are returned in the report alongside
/// the saved record.
pub async fn save_record(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    Json(values): Json<Row>,
) -> Result<ResponseJson<ApiResponse<SaveReport>>, ApiError> {
    if values.is_empty() {
        return Err(ApiError::BadRequest("no field values to save".to_string()));
    }
    let collection = state.registry().get(&collection)?;
    let mut editor = RecordEditor::load_exclusive(state.editor().clone(), collection, &id).await?;
    for (field, value) in values {
        editor.update_local_value(&field, value)?;
    }
    let report = editor.save_record().await?;
    Ok(ResponseJson(ApiResponse::success(report)))
}

pub fn router(_state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/collections/{collection}/records", post(create_record))
        .route(
            "/collections/{collection}/records/{id}",
            get(get_record).patch(save_record),
        )
}
