use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use time::OffsetDateTime;
use tracing::instrument;

use crate::{
    auth::{
        dto::{AuthRequest, AuthResponse},
        jwt::AuthUser,
        services,
    },
    error::ApiError,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
}

#[instrument(skip(state, payload), fields(channel = %payload.channel))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<AuthRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let session =
        services::register(&state, &payload.identifier, &payload.password, payload.channel).await?;
    Ok((StatusCode::CREATED, Json(session.into())))
}

#[instrument(skip(state, payload), fields(channel = %payload.channel))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<AuthRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let identifier = services::normalize_identifier(&payload.identifier, payload.channel);
    if identifier.is_empty() || payload.password.is_empty() {
        return Err(ApiError::Validation("identifier and password are required".into()));
    }
    // malformed identifiers fail like unknown ones
    let session =
        services::authenticate(&state, &identifier, &payload.password, payload.channel).await?;
    Ok(Json(session.into()))
}

#[instrument(skip(state, claims), fields(uid = %claims.sub))]
pub async fn logout(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<StatusCode, ApiError> {
    services::logout_at(&state, &claims.sub, OffsetDateTime::now_utc()).await?;
    Ok(StatusCode::NO_CONTENT)
}
