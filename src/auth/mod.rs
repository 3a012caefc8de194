use crate::state::AppState;
use axum::Router;

pub mod claims;
mod dto;
pub mod email;
pub mod extractors;
pub mod handlers;
pub mod jwt;
pub mod password;
pub mod rate_limit;
pub mod repo;
pub mod repo_types;
pub mod reset_code;
pub mod services;

pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .merge(handlers::auth_routes(state))
        .merge(handlers::admin_routes())
}
