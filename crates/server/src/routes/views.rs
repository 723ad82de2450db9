//! Read-only project views: the kanban board, checklists, brands and contract
//! sections, each in its stored order.

use axum::{
    Router,
    extract::{Path, State},
    response::Json as ResponseJson,
    routing::get,
};
use db::models::{
    company::{Brand, Company},
    contract::{Contract, ContractPart},
    project::Project,
    task::{BoardColumn, Checklist, Task},
};
use serde::Serialize;
use ts_rs::TS;
use utils::response::ApiResponse;

use crate::{AppState, error::ApiError};

#[derive(Debug, Serialize, TS)]
pub struct ProjectBrands {
    pub company: Option<Company>,
    pub brands: Vec<Brand>,
}

async fn project(state: &AppState, project_id: i64) -> Result<Project, ApiError> {
    Project::find_by_id(&state.db().pool, project_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("project {project_id}")))
}

/// GET /api/projects/{project_id}/board
pub async fn get_board(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
) -> Result<ResponseJson<ApiResponse<Vec<BoardColumn>>>, ApiError> {
    let project = project(&state, project_id).await?;
    let board = Task::board_for_project(&state.db().pool, project.id).await?;
    Ok(ResponseJson(ApiResponse::success(board)))
}

/// GET /api/projects/{project_id}/checklists
pub async fn get_checklists(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
) -> Result<ResponseJson<ApiResponse<Vec<Checklist>>>, ApiError> {
    let project = project(&state, project_id).await?;
    let checklists = Checklist::find_by_project_id(&state.db().pool, project.id).await?;
    Ok(ResponseJson(ApiResponse::success(checklists)))
}

/// GET /api/checklists/{checklist_id}/tasks
pub async fn get_checklist_tasks(
    State(state): State<AppState>,
    Path(checklist_id): Path<i64>,
) -> Result<ResponseJson<ApiResponse<Vec<Task>>>, ApiError> {
    let tasks = Task::find_by_checklist_id(&state.db().pool, checklist_id).await?;
    Ok(ResponseJson(ApiResponse::success(tasks)))
}

/// GET /api/projects/{project_id}/brands
/// Linked brands plus the owning company, whose primary brand follows the
/// first linked one.
pub async fn get_project_brands(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
) -> Result<ResponseJson<ApiResponse<ProjectBrands>>, ApiError> {
    let project = project(&state, project_id).await?;
    let pool = &state.db().pool;
    let brands = Brand::find_by_project_id(pool, project.id).await?;
    let company = project.parent_company(pool).await?;
    Ok(ResponseJson(ApiResponse::success(ProjectBrands { company, brands })))
}

/// GET /api/contracts/{contract_id}/parts
pub async fn get_contract_parts(
    State(state): State<AppState>,
    Path(contract_id): Path<i64>,
) -> Result<ResponseJson<ApiResponse<Vec<ContractPart>>>, ApiError> {
    let pool = &state.db().pool;
    let contract = Contract::find_by_id(pool, contract_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("contract {contract_id}")))?;
    let parts = ContractPart::find_for_contract(pool, contract.id).await?;
    Ok(ResponseJson(ApiResponse::success(parts)))
}

pub fn router(_state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/projects/{project_id}/board", get(get_board))
        .route("/projects/{project_id}/checklists", get(get_checklists))
        .route("/projects/{project_id}/brands", get(get_project_brands))
        .route("/checklists/{checklist_id}/tasks", get(get_checklist_tasks))
        .route("/contracts/{contract_id}/parts", get(get_contract_parts))
}
