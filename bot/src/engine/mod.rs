pub mod admin;
pub mod classifier;
pub mod events;
pub mod gift;
pub mod pending;
pub mod tracker;
