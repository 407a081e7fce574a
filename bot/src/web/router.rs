use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};

use crate::ledger::store::LedgerStore;

use super::app_state::AppState;
use super::status_api;

/// Build the axum router for the health endpoints.
pub fn build_router<S: LedgerStore + 'static>(state: Arc<AppState<S>>) -> Router {
    // Read-only endpoints, so any origin may poll them
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(status_api::alive))
        .route("/api/status", get(status_api::status::<S>))
        .layer(cors)
        .with_state(state)
}
