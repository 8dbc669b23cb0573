//! Concrete adapter implementations for ports.

pub mod csv_adapter;
pub mod csv_score_adapter;
pub mod csv_snapshot_store;
pub mod file_cache;
pub mod file_config_adapter;
pub mod file_report_adapter;
#[cfg(feature = "sqlite")]
pub mod sqlite_adapter;
