use crate::state::AppState;
use axum::Router;

mod cookie;
pub mod dto;
pub mod extractors;
pub mod handlers;
pub mod jwt;
pub mod password;
pub mod repo;
pub mod repo_types;
pub mod services;
#[cfg(test)]
pub(crate) mod testing;

pub fn router() -> Router<AppState> {
    Router::new().merge(handlers::auth_routes())
}
