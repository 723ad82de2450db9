use axum::{Router, extract::State, response::Json as ResponseJson, routing::get};
use services::services::integrity::IntegrityReport;
use utils::response::ApiResponse;

use crate::{AppState, error::ApiError};

/// GET /api/integrity
/// Missing tables and relationship rows pointing at deleted records.
pub async fn get_integrity_report(
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<IntegrityReport>>, ApiError> {
    let report = state.integrity().report(state.registry()).await?;
    Ok(ResponseJson(ApiResponse::success(report)))
}

pub fn router(_state: &AppState) -> Router<AppState> {
    Router::new().route("/integrity", get(get_integrity_report))
}
