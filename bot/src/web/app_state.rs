use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::engine::tracker::DonationTracker;
use crate::irc::roster::NetworkState;

/// Shared state for all HTTP handlers.
pub struct AppState<S> {
    pub tracker: Arc<DonationTracker<S>>,
    pub network: Arc<NetworkState>,
    pub started_at: DateTime<Utc>,
}
