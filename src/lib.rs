pub mod admin;
pub mod alert;
pub mod config;
pub mod identity;
pub mod metrics;
pub mod monitor;
pub mod retry;
pub mod schedule;
pub mod scorer;
pub mod store;
pub mod watcher;
