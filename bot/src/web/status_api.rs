use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::Utc;
use serde::Serialize;
use tracing::error;

use crate::ledger::Ledger;
use crate::ledger::store::LedgerStore;

use super::app_state::AppState;

pub const ALIVE_TEXT: &str = "✅ Babel Bot is alive and responding!";

/// GET /: plain liveness line for uptime pingers.
pub async fn alive() -> &'static str {
    ALIVE_TEXT
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub uptime_secs: i64,
    pub irc_connected: bool,
    pub channels: Vec<String>,
    pub pending_gifts: usize,
    pub ledger: Ledger,
}

/// GET /api/status: connection state, pending gifts and every community's
/// progress.
pub async fn status<S: LedgerStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> impl IntoResponse {
    let ledger = match state.tracker.ledger_snapshot().await {
        Ok(ledger) => ledger,
        Err(e) => {
            error!(error = %e, "status: failed to read ledger");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Ledger unavailable").into_response();
        }
    };

    Json(StatusResponse {
        uptime_secs: (Utc::now() - state.started_at).num_seconds().max(0),
        irc_connected: state.network.is_connected(),
        channels: state.network.joined_channels(),
        pending_gifts: state.tracker.pending_count().await,
        ledger,
    })
    .into_response()
}
