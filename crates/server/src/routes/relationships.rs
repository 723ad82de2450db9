use axum::{
    Json, Router,
    extract::{Path, State},
    response::Json as ResponseJson,
    routing::put,
};
use serde::Deserialize;
use serde_json::Value;
use services::services::{normalize::normalize_ids, relationship_sync::SyncReport};
use ts_rs::TS;
use utils::response::ApiResponse;

use crate::{AppState, error::ApiError};

#[derive(Debug, Deserialize, TS)]
pub struct SyncRelationRequest {
    /// Any selection shape the normalizer accepts.
    #[ts(type = "unknown")]
    pub ids: Value,
}

/// PUT /api/collections/{collection}/records/{id}/relations/{field}
/// Replaces the related ids of one multi-relationship field, waiting for any
/// in-flight save of the record.
pub async fn sync_relation(
    State(state): State<AppState>,
    Path((collection, id, field)): Path<(String, String, String)>,
    Json(payload): Json<SyncRelationRequest>,
) -> Result<ResponseJson<ApiResponse<SyncReport>>, ApiError> {
    let collection = state.registry().get(&collection)?;
    // Path fields resolve here so an unknown one is a 404, not a body error.
    collection.relation(&field)?;
    let report = state
        .editor()
        .sync_relation(&collection, &id, &field, &normalize_ids(&payload.ids))
        .await?;
    Ok(ResponseJson(ApiResponse::success(report)))
}

pub fn router(_state: &AppState) -> Router<AppState> {
    Router::new().route(
        "/collections/{collection}/records/{id}/relations/{field}",
        put(sync_relation),
    )
}
