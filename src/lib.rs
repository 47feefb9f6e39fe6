//! Label-driven restic backups for docker compose deployments

pub mod core;
pub mod utils;
