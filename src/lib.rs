pub mod analytics;
pub mod config;
pub mod dead_letter;
pub mod ingest;
pub mod models;
pub mod monitor;
pub mod payload;
pub mod processor;
pub mod publish;
pub mod reconcile;
pub mod store;
