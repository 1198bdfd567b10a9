use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tracing::{info, instrument};

use crate::{
    auth::jwt::AuthUser,
    error::{ApiError, AuthError},
    levels::{repo_types::LevelInfo, services},
    state::AppState,
    users::{repo_types::Role, services::require_role},
};

pub fn level_routes() -> Router<AppState> {
    Router::new()
        .route("/users/me/level", get(my_level))
        .route("/admin/users/:uid/exp", post(grant_exp))
}

#[derive(Debug, Deserialize)]
pub struct GrantExpRequest {
    pub delta: u64,
}

#[instrument(skip(state, claims), fields(uid = %claims.sub))]
pub async fn my_level(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<Json<LevelInfo>, ApiError> {
    Ok(Json(services::level_info(&state, &claims.sub).await?))
}

#[instrument(skip(state, claims, payload), fields(admin = %claims.sub))]
pub async fn grant_exp(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Path(uid): Path<String>,
    Json(payload): Json<GrantExpRequest>,
) -> Result<Json<LevelInfo>, ApiError> {
    require_role(&state, &claims, &[Role::Admin, Role::Super]).await?;
    if payload.delta == 0 {
        return Err(ApiError::Validation("delta must be positive".into()));
    }
    if state.users.find_by_uid(&uid).await.map_err(AuthError::storage)?.is_none() {
        return Err(ApiError::NotFound);
    }

    let info = services::grant_experience(&state, &uid, payload.delta).await?;
    info!(target_uid = %uid, delta = payload.delta, level = info.level, "experience granted");
    Ok(Json(info))
}
