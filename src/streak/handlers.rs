use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use time::{Date, OffsetDateTime};
use tracing::{info, instrument};

use crate::{
    auth::jwt::AuthUser,
    error::{ApiError, AuthError},
    state::AppState,
    streak::services::{self, StreakInfo},
    users::repo_types::Status,
};

pub fn streak_routes() -> Router<AppState> {
    Router::new()
        .route("/users/me/streak", get(my_streak))
        .route("/users/me/logins", get(my_logins))
        .route("/users/me/checkin", post(checkin))
}

#[derive(Debug, Serialize)]
pub struct LoginHistoryResponse {
    pub dates: Vec<Date>,
}

#[instrument(skip(state, claims), fields(uid = %claims.sub))]
pub async fn my_streak(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<Json<StreakInfo>, ApiError> {
    Ok(Json(services::current_streak(&state, &claims.sub).await?))
}

#[instrument(skip(state, claims), fields(uid = %claims.sub))]
pub async fn my_logins(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<Json<LoginHistoryResponse>, ApiError> {
    let dates = services::login_history(&state, &claims.sub).await?;
    Ok(Json(LoginHistoryResponse { dates }))
}

/// Records today's engagement for an already authenticated session.
#[instrument(skip(state, claims), fields(uid = %claims.sub))]
pub async fn checkin(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<Json<StreakInfo>, ApiError> {
    let user = state
        .users
        .find_by_uid(&claims.sub)
        .await
        .map_err(AuthError::storage)?
        .ok_or(AuthError::TokenInvalid)?;
    if user.status == Status::Disabled {
        return Err(AuthError::AccountDisabled.into());
    }

    let info =
        services::record_engagement_at(&state, user.id, &user.uid, OffsetDateTime::now_utc()).await?;
    info!(continuous_days = info.continuous_days, new_day = info.new_day, "checkin");
    Ok(Json(info))
}
