//! Port traits at the boundary between the pure core and its collaborators.

pub mod config_port;
pub mod data_port;
pub mod report_port;
pub mod scoring_port;
pub mod snapshot_port;
