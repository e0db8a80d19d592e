//! Version 1 API routes.

mod deployments;

use axum::Router;

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().nest("/deployments", deployments::routes())
}
