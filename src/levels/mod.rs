use crate::state::AppState;
use axum::Router;

pub mod curve;
pub mod handlers;
pub mod repo;
pub mod repo_types;
pub mod services;

pub fn router() -> Router<AppState> {
    handlers::level_routes()
}
