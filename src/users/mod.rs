use crate::state::AppState;
use axum::Router;

pub mod avatar;
pub mod handlers;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::read_router())
        .merge(handlers::write_router())
}
