pub mod run;
pub mod system;

use crate::state::AppState;
use axum::Router;
use std::sync::Arc;

pub fn system_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", axum::routing::get(system::root))
        .route("/health", axum::routing::get(system::health))
}

pub fn run_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/status", axum::routing::get(run::status))
        .route("/workers/{rank}", axum::routing::get(run::worker))
        .route("/summary", axum::routing::get(run::summary))
}
