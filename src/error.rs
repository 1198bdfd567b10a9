use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

/// Failures of the authentication and identity core.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Wrong secret or unknown identifier. Deliberately indistinguishable.
    #[error("invalid credentials")]
    Credential,
    #[error("account disabled")]
    AccountDisabled,
    #[error("token expired")]
    TokenExpired,
    #[error("token invalid")]
    TokenInvalid,
    #[error("token missing")]
    TokenMissing,
    #[error("storage error: {0:#}")]
    Storage(#[source] anyhow::Error),
}

impl AuthError {
    pub fn storage(e: anyhow::Error) -> Self {
        AuthError::Storage(e)
    }
}

/// Error returned by HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("not found")]
    NotFound,
    #[error("forbidden")]
    Forbidden,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Auth(AuthError::AccountDisabled) => {
                (StatusCode::FORBIDDEN, "account disabled".to_string())
            }
            ApiError::Auth(AuthError::Storage(e)) => {
                error!(error = %e, "storage failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
            // identifier vs. secret vs. token failures are not told apart
            ApiError::Auth(_) => (StatusCode::UNAUTHORIZED, "authentication failed".to_string()),
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "not found".to_string()),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "forbidden".to_string()),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
