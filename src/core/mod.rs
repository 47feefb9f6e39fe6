pub mod alerts;
pub mod config;
pub mod container;
pub mod cron;
pub mod docker;
pub mod error;
pub mod labels;
pub mod orchestrator;
pub mod pipeline;
pub mod rcon;
pub mod restic;
pub mod retention;
pub mod runtime;
pub mod targets;
pub mod topology;

#[cfg(test)]
pub mod fixtures;

pub use alerts::{AlertDispatcher, AlertSeverity};
pub use config::Config;
pub use docker::DockerManager;
pub use error::BackupError;
pub use orchestrator::{Orchestrator, RunReport, RunState};
pub use rcon::RconCli;
pub use restic::Restic;
