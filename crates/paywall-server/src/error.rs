use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use grant_store::StoreError;
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("{0} header is required")]
    MissingHeader(&'static str),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Grant store error: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::MissingHeader(_) => StatusCode::BAD_REQUEST,
            ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Store(StoreError::InvalidKind(_)) => StatusCode::BAD_REQUEST,
            ServerError::Store(StoreError::KeyExists(_)) => StatusCode::CONFLICT,
            // TTLs and policies come from config, not from the caller
            ServerError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "success": false,
            "error": self.to_string(),
        }));

        (status, body).into_response()
    }
}
