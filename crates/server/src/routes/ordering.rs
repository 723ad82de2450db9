//! Routes persisting drag-and-drop results.

use axum::{
    Json, Router,
    extract::{Path, State},
    response::Json as ResponseJson,
    routing::post,
};
use serde::Deserialize;
use services::services::{
    collection::Relation,
    ordering::{MoveReport, OrderTarget, OrderedItem, ReorderError},
};
use ts_rs::TS;
use utils::response::ApiResponse;

use crate::{AppState, error::ApiError};

#[derive(Debug, Deserialize, TS)]
pub struct ReorderRequest {
    /// Grouping column; defaults to the collection's ordering scope.
    pub scope_column: Option<String>,
    pub scope: Option<String>,
    pub ids: Vec<String>,
}

#[derive(Debug, Deserialize, TS)]
pub struct MoveRequest {
    pub scope_column: Option<String>,
    pub item: String,
    pub from: String,
    pub to: String,
    pub position: usize,
}

#[derive(Debug, Deserialize, TS)]
pub struct RelationOrderRequest {
    pub ids: Vec<String>,
}

/// POST /api/collections/{collection}/order
pub async fn reorder_collection(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Json(payload): Json<ReorderRequest>,
) -> Result<ResponseJson<ApiResponse<Vec<OrderedItem>>>, ApiError> {
    let collection = state.registry().get(&collection)?;
    let target = OrderTarget::for_collection(&collection, payload.scope_column.as_deref())?;
    let order = state
        .reconciler()
        .reorder(&target, payload.scope.as_deref(), &payload.ids)
        .await?;
    Ok(ResponseJson(ApiResponse::success(order)))
}

/// POST /api/collections/{collection}/move
pub async fn move_item(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Json(payload): Json<MoveRequest>,
) -> Result<ResponseJson<ApiResponse<MoveReport>>, ApiError> {
    let collection = state.registry().get(&collection)?;
    let target = OrderTarget::for_collection(&collection, payload.scope_column.as_deref())?;
    let _guard = state
        .editor()
        .locks
        .acquire(collection.table(), &payload.item)
        .await;
    let report = state
        .reconciler()
        .move_item(&target, &payload.item, &payload.from, &payload.to, payload.position)
        .await?;
    Ok(ResponseJson(ApiResponse::success(report)))
}

/// POST /api/collections/{collection}/records/{id}/relations/{field}/order
pub async fn reorder_relation(
    State(state): State<AppState>,
    Path((collection, id, field)): Path<(String, String, String)>,
    Json(payload): Json<RelationOrderRequest>,
) -> Result<ResponseJson<ApiResponse<Vec<OrderedItem>>>, ApiError> {
    let collection = state.registry().get(&collection)?;
    let target = match collection.relation(&field)? {
        Relation::Junction(junction) => OrderTarget::for_relation(junction),
        Relation::DirectForeignKey(_) => None,
    }
    .ok_or_else(|| ReorderError::Unscoped(format!("{}.{field}", collection.name)))?;
    // Junction order is rewritten by record saves too.
    let _guard = state.editor().locks.acquire(collection.table(), &id).await;
    let order = state
        .reconciler()
        .reorder(&target, Some(&id), &payload.ids)
        .await?;
    Ok(ResponseJson(ApiResponse::success(order)))
}

pub fn router(_state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/collections/{collection}/order", post(reorder_collection))
        .route("/collections/{collection}/move", post(move_item))
        .route(
            "/collections/{collection}/records/{id}/relations/{field}/order",
            post(reorder_relation),
        )
}
