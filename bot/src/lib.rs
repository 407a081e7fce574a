pub mod config;
pub mod engine;
pub mod irc;
pub mod ledger;
pub mod tasks;
pub mod web;
