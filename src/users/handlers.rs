use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::jwt::{AuthUser, MaybeAuthUser},
    error::ApiError,
    state::AppState,
    users::{
        dto::{
            ChangePasswordRequest, IdentityView, PrivateIdentity, SetRoleRequest, SetStatusRequest,
            UpdateProfileRequest,
        },
        repo_types::Role,
        services,
    },
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users/me", get(get_me).patch(update_me))
        .route("/users/me/password", post(change_password))
        .route("/users/:uid", get(get_user))
}

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/users/:uid/status", put(set_status))
        .route("/admin/users/:uid/role", put(set_role))
}

#[instrument(skip(state, claims), fields(uid = %claims.sub))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<Json<IdentityView>, ApiError> {
    let view = services::get_identity(&state, &claims.sub, Some(&claims.sub)).await?;
    Ok(Json(view))
}

#[instrument(skip(state, viewer))]
pub async fn get_user(
    State(state): State<AppState>,
    MaybeAuthUser(viewer): MaybeAuthUser,
    Path(uid): Path<String>,
) -> Result<Json<IdentityView>, ApiError> {
    let viewer = viewer.map(|c| c.sub);
    let view = services::get_identity(&state, &uid, viewer.as_deref()).await?;
    Ok(Json(view))
}

#[instrument(skip(state, claims, payload), fields(uid = %claims.sub))]
pub async fn update_me(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<Json<PrivateIdentity>, ApiError> {
    Ok(Json(services::update_profile(&state, &claims.sub, payload).await?))
}

#[instrument(skip(state, claims, payload), fields(uid = %claims.sub))]
pub async fn change_password(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<StatusCode, ApiError> {
    services::change_password(
        &state,
        &claims.sub,
        &payload.current_password,
        &payload.new_password,
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, claims, payload), fields(admin = %claims.sub))]
pub async fn set_status(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Path(uid): Path<String>,
    Json(payload): Json<SetStatusRequest>,
) -> Result<StatusCode, ApiError> {
    services::require_role(&state, &claims, &[Role::Admin, Role::Super]).await?;
    services::set_status(&state, &uid, payload.status).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, claims, payload), fields(admin = %claims.sub))]
pub async fn set_role(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Path(uid): Path<String>,
    Json(payload): Json<SetRoleRequest>,
) -> Result<StatusCode, ApiError> {
    services::require_role(&state, &claims, &[Role::Super]).await?;
    services::set_role(&state, &uid, payload.role).await?;
    Ok(StatusCode::NO_CONTENT)
}
