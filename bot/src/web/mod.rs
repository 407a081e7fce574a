pub mod app_state;
pub mod router;
pub mod status_api;
