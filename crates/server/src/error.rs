use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use services::services::{
    collection::CollectionError, integrity::IntegrityError, ordering::ReorderError,
    record_editor::EditorError,
};
use thiserror::Error;
use utils::response::ApiResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Collection(#[from] CollectionError),
    #[error(transparent)]
    Editor(#[from] EditorError),
    #[error(transparent)]
    Reorder(#[from] ReorderError),
    #[error(transparent)]
    Integrity(#[from] IntegrityError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
}

fn collection_status(err: &CollectionError) -> StatusCode {
    match err {
        CollectionError::UnknownCollection(_) | CollectionError::UnknownField { .. } => {
            StatusCode::NOT_FOUND
        }
        CollectionError::NotARelation { .. } => StatusCode::BAD_REQUEST,
        CollectionError::Io { .. }
        | CollectionError::Parse(_)
        | CollectionError::Duplicate(_)
        | CollectionError::OrderingConflict { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Collection(err) => collection_status(err),
            ApiError::Editor(err) => match err {
                // Fields named in a request body, not in the path.
                EditorError::Collection(CollectionError::UnknownField { .. }) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                EditorError::Collection(err) => collection_status(err),
                EditorError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                EditorError::NotFound { .. } => StatusCode::NOT_FOUND,
                EditorError::Load { .. }
                | EditorError::Create { .. }
                | EditorError::MissingId(_)
                | EditorError::Scalar { .. }
                | EditorError::Sync(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Reorder(err) => match err {
                ReorderError::UnknownItems { .. }
                | ReorderError::NotInScope { .. }
                | ReorderError::Unscoped(_)
                | ReorderError::InvalidScopeColumn { .. }
                | ReorderError::MissingScope(_)
                | ReorderError::UnsupportedMove(_) => StatusCode::BAD_REQUEST,
                ReorderError::Load { .. } | ReorderError::Persist { .. } | ReorderError::Rescope { .. } => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::Integrity(_) | ApiError::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = match &self {
            ApiError::Editor(EditorError::Validation(missing)) => {
                ApiResponse::<(), Vec<String>>::error_with_data(&self.to_string(), missing.clone())
            }
            _ => ApiResponse::<(), Vec<String>>::error(&self.to_string()),
        };
        (status, Json(body)).into_response()
    }
}
