/// Topology resolution
///
/// Splits every container the runtime reports into: the container we run in,
/// the containers of our deployment that are candidates for backup, a
/// backup process container that may currently be running, and stale
/// backup process containers left behind by earlier runs.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::core::config::Config;
use crate::core::container::{BindMode, Container, VolumeBinding};
use crate::core::error::{BackupError, Result};
use crate::core::labels::is_true;
use crate::core::targets::{mount_prefix, BackupTarget, VolumeTarget};

#[derive(Debug)]
pub struct RunningTopology {
    this: Container,
    in_scope: Vec<Container>,
    active_backup_process: Option<Container>,
    stale_backup_processes: Vec<Container>,
}

impl RunningTopology {
    /// Resolve the topology from a runtime listing.
    ///
    /// `hostname` identifies our own container: its id starts with it.
    pub fn resolve(containers: Vec<Container>, hostname: Option<&str>, config: &Config) -> Result<Self> {
        let hostname = hostname
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| BackupError::Discovery("HOSTNAME is not set".into()))?;

        let (mut own, others): (Vec<Container>, Vec<Container>) = containers
            .into_iter()
            .partition(|c| c.id().starts_with(hostname));

        if own.is_empty() {
            return Err(BackupError::Discovery(format!(
                "Cannot find the container this process runs in (hostname {})",
                hostname
            )));
        }
        let this = own.swap_remove(0);

        let label = this.backup_process_label();
        let project = this.project_name().to_string();

        let mut in_scope = Vec::new();
        let mut active_backup_process: Option<Container> = None;
        let mut stale_backup_processes = Vec::new();

        for container in others {
            let is_backup_process = is_true(container.get_label(&label));

            if !container.is_running() {
                if is_backup_process && container.image() == this.image() {
                    debug!("Stale backup process container: {}", container.name());
                    stale_backup_processes.push(container);
                }
                continue;
            }

            if is_backup_process {
                match &active_backup_process {
                    None => active_backup_process = Some(container),
                    Some(first) => warn!(
                        "More than one backup process container running: {} and {}",
                        first.name(),
                        container.name()
                    ),
                }
                continue;
            }

            if container.is_oneoff() {
                continue;
            }

            if config.swarm_mode || container.project_name() == project {
                in_scope.push(container);
            }
        }

        Ok(Self {
            this,
            in_scope,
            active_backup_process,
            stale_backup_processes,
        })
    }

    /// The container this process runs in
    pub fn this(&self) -> &Container {
        &self.this
    }

    pub fn project_name(&self) -> &str {
        self.this.project_name()
    }

    pub fn backup_process_label(&self) -> String {
        self.this.backup_process_label()
    }

    pub fn in_scope(&self) -> &[Container] {
        &self.in_scope
    }

    pub fn backup_process_running(&self) -> bool {
        self.active_backup_process.is_some()
    }

    pub fn active_backup_process(&self) -> Option<&Container> {
        self.active_backup_process.as_ref()
    }

    pub fn stale_backup_processes(&self) -> &[Container] {
        &self.stale_backup_processes
    }

    /// In scope containers with any kind of backup enabled
    pub fn containers_for_backup(&self) -> Vec<&Container> {
        self.in_scope.iter().filter(|c| c.backup_enabled()).collect()
    }

    pub fn volume_targets(&self) -> Vec<VolumeTarget> {
        self.in_scope.iter().filter_map(VolumeTarget::classify).collect()
    }

    pub fn backup_targets(&self) -> Vec<BackupTarget> {
        self.in_scope.iter().filter_map(BackupTarget::classify).collect()
    }

    /// Read-only volume map for the backup process container.
    ///
    /// Mounts of console managed containers go under the console prefix so
    /// they are only copied while the server is quiesced.
    pub fn backup_mounts(&self, config: &Config) -> BTreeMap<String, VolumeBinding> {
        let mut mounts = BTreeMap::new();
        for container in self.containers_for_backup() {
            if container.volume_backup_enabled() {
                mounts.extend(container.volumes_for_backup(
                    mount_prefix(container, config),
                    BindMode::ReadOnly,
                    config,
                ));
            }
        }
        mounts
    }
}
