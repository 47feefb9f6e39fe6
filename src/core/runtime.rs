//! Container runtime abstraction
//!
//! The backup logic only needs a handful of runtime operations. Keeping them
//! behind a trait lets the orchestrator run against Docker in production and
//! against a mock in tests.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use crate::core::container::{Container, VolumeBinding};

/// Everything needed to start the backup process container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupProcessSpec {
    pub image: String,
    pub command: Vec<String>,
    /// Mount identity (volume name or host path) -> binding
    pub volumes: BTreeMap<String, VolumeBinding>,
    pub environment: Vec<String>,
    pub labels: HashMap<String, String>,
    /// Container whose network namespace is shared
    pub network_container: String,
}

impl BackupProcessSpec {
    /// Docker `Binds` entries for all volumes
    pub fn binds(&self) -> Vec<String> {
        self.volumes
            .iter()
            .map(|(source, binding)| binding.to_bind_spec(source))
            .collect()
    }
}

/// Result of a command executed inside a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub output: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// All containers, running or not
    async fn list_containers(&self) -> Result<Vec<Container>>;

    async fn remove_container(&self, id: &str) -> Result<()>;

    /// Run a command inside a running container and wait for its exit code
    async fn exec(&self, container_id: &str, command: Vec<String>, env: Vec<String>) -> Result<ExecOutput>;

    /// Start the backup process container, copy its output into `log_file`,
    /// wait for it, remove it and return its exit code
    async fn run_backup_process(&self, spec: &BackupProcessSpec, log_file: &Path) -> Result<i64>;
}
