//! HTTP endpoint handlers for the exporter.
//!
//! - `/`: landing page
//! - `/metrics`: Prometheus metrics endpoint
//! - `/tables`: decoded kernel table dump for debugging
//! - `/health`: health check endpoint

pub mod health;
pub mod metrics;
pub mod root;
pub mod tables;

pub use health::health_handler;
pub use metrics::metrics_handler;
pub use root::root_handler;
pub use tables::tables_handler;
