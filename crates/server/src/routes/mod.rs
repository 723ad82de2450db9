use axum::{Router, extract::State, response::Json as ResponseJson, routing::get};
use services::services::collection::Collection;
use utils::response::ApiResponse;

use crate::AppState;

pub mod integrity;
pub mod ordering;
pub mod records;
pub mod relationships;
pub mod views;

/// GET /api/collections
pub async fn list_collections(
    State(state): State<AppState>,
) -> ResponseJson<ApiResponse<Vec<Collection>>> {
    let collections = state.registry().iter().map(|c| c.as_ref().clone()).collect();
    ResponseJson(ApiResponse::success(collections))
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/collections", get(list_collections))
        .merge(records::router(&state))
        .merge(relationships::router(&state))
        .merge(ordering::router(&state))
        .merge(views::router(&state))
        .merge(integrity::router(&state));

    Router::new().nest("/api", api).with_state(state)
}
