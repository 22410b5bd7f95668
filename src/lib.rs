pub mod app;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod error;
pub mod output;
pub mod planner;
pub mod pool;
pub mod progress;
pub mod scan_cache;
pub mod sources;
pub mod store;
pub mod transfer;
pub mod variant;
