//! Backup orchestration
//!
//! A run is split over two processes. The parent (`backup`) checks that no
//! other run is active, bootstraps the repository and spawns the backup
//! process container with every selected volume mounted read-only. The child
//! (`start_backup_process`) runs inside that container and walks the phases:
//!
//! ```text
//! PreflightCheck -> VolumeBackup -> DatabaseBackup -> ConsoleManagedBackup
//!     -> RetentionCleanup -> IntegrityCheck -> Done
//! ```
//!
//! A failing target never stops the remaining targets. Its failure is
//! recorded in the `RunReport`; retention and the integrity check only run
//! when every target succeeded.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Result;
use tracing::{debug, error, info, warn};

use crate::core::alerts::{AlertDispatcher, AlertSeverity};
use crate::core::config::Config;
use crate::core::error::BackupError;
use crate::core::rcon::RemoteConsole;
use crate::core::restic::BackupTool;
use crate::core::runtime::{BackupProcessSpec, ContainerRuntime};
use crate::core::targets::{mount_prefix, BackupContext, BackupTarget};
use crate::core::topology::RunningTopology;
use crate::utils::{
    format_duration, BACKUP_PROCESS_COMMAND, ENV_BACKUP_PROCESS, EXCLUDE_FILE_NAME, LABEL_COMPOSE_PROJECT,
    LABEL_NAMESPACE,
};

/// Outcome name of the spawned container in the parent's report
const BACKUP_PROCESS_TARGET: &str = "backup process container";

const PREFLIGHT_MESSAGE: &str = "Cannot run backup process in this container. Use backup command instead. \
                                 This will spawn a new container with the necessary mounts.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    RepoBootstrap,
    Spawning,
    PreflightCheck,
    VolumeBackup,
    DatabaseBackup,
    ConsoleManagedBackup,
    RetentionCleanup,
    IntegrityCheck,
    Done,
    Failed,
}

/// Result of one backup step
#[derive(Debug)]
pub struct TargetOutcome {
    pub target: String,
    pub error: Option<BackupError>,
}

impl TargetOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-target outcomes of a run and the state it ended in
#[derive(Debug)]
pub struct RunReport {
    state: RunState,
    outcomes: Vec<TargetOutcome>,
}

impl Default for RunReport {
    fn default() -> Self {
        Self {
            state: RunState::Idle,
            outcomes: Vec::new(),
        }
    }
}

impl RunReport {
    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn outcomes(&self) -> &[TargetOutcome] {
        &self.outcomes
    }

    pub fn failures(&self) -> impl Iterator<Item = &TargetOutcome> {
        self.outcomes.iter().filter(|o| !o.succeeded())
    }

    pub fn has_errors(&self) -> bool {
        self.failures().next().is_some()
    }

    pub fn succeeded(&self) -> bool {
        self.state == RunState::Done && !self.has_errors()
    }

    pub fn exit_code(&self) -> i32 {
        if self.succeeded() {
            0
        } else {
            1
        }
    }

    fn advance(&mut self, state: RunState) {
        debug!("{:?} -> {:?}", self.state, state);
        self.state = state;
    }

    /// Fold the result of one backup step into the report
    fn record(&mut self, target: impl Into<String>, result: Result<i32>) {
        let target = target.into();
        let error = match result {
            Ok(0) => None,
            Ok(code) => {
                error!("Backup of {} exited with non-zero code: {}", target, code);
                Some(BackupError::target(&target, format!("exit code {}", code)))
            }
            Err(e) => {
                error!("Backup of {} failed: {:#}", target, e);
                Some(BackupError::target(&target, format!("{:#}", e)))
            }
        };
        self.outcomes.push(TargetOutcome { target, error });
    }

    fn record_error(&mut self, target: impl Into<String>, error: BackupError) {
        error!("{}", error);
        self.outcomes.push(TargetOutcome {
            target: target.into(),
            error: Some(error),
        });
    }
}

/// What `status` found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    pub service: String,
    /// Mount sources selected for backup
    pub volumes: Vec<String>,
    /// Specialized target kind and whether it answered its ping
    pub target: Option<(String, bool)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub project: String,
    pub backup_process_running: bool,
    pub stale_removed: usize,
    pub services: Vec<ServiceStatus>,
}

pub struct Orchestrator<'a> {
    config: &'a Config,
    runtime: &'a dyn ContainerRuntime,
    restic: &'a dyn BackupTool,
    console: &'a dyn RemoteConsole,
    alerts: &'a AlertDispatcher,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: &'a Config,
        runtime: &'a dyn ContainerRuntime,
        restic: &'a dyn BackupTool,
        console: &'a dyn RemoteConsole,
        alerts: &'a AlertDispatcher,
    ) -> Self {
        Self {
            config,
            runtime,
            restic,
            console,
            alerts,
        }
    }

    fn context(&self) -> BackupContext<'_> {
        BackupContext {
            config: self.config,
            runtime: self.runtime,
            restic: self.restic,
            console: self.console,
        }
    }

    pub async fn resolve_topology(&self) -> Result<RunningTopology> {
        let containers = self.runtime.list_containers().await?;
        debug!("Found {} containers", containers.len());
        Ok(RunningTopology::resolve(
            containers,
            self.config.hostname.as_deref(),
            self.config,
        )?)
    }

    /// Initialize the repository unless a snapshot listing succeeds.
    /// Failures are only logged; the backup itself will report them.
    pub async fn ensure_repository(&self) {
        match self.restic.is_initialized().await {
            Ok(true) => {
                debug!("Repository already initialized");
                return;
            }
            Ok(false) => info!("Could not get repository info. Attempting to initialize it."),
            Err(e) => warn!("Could not probe repository: {:#}", e),
        }

        match self.restic.init().await {
            Ok(0) => info!("Successfully initialized repository: {}", self.config.repository),
            Ok(code) => error!("Failed to initialize repository (exit code {})", code),
            Err(e) => error!("Failed to initialize repository: {:#}", e),
        }
    }

    async fn remove_stale(&self, topology: &RunningTopology) -> usize {
        let mut removed = 0;
        for container in topology.stale_backup_processes() {
            info!("Removing stale backup process container {}", container.name());
            match self.runtime.remove_container(container.id()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("{:#}", e),
            }
        }
        removed
    }

    /// Report what would be backed up and whether every target answers
    pub async fn status(&self) -> Result<StatusReport> {
        let topology = self.resolve_topology().await?;

        info!("Status for compose project '{}'", topology.project_name());
        info!("Repository: '{}'", self.config.repository);
        info!("Backup currently running?: {}", topology.backup_process_running());
        info!("Include project name in backup path?: {}", self.config.include_project_name);
        info!("Exclude bind mounts from backups?: {}", self.config.exclude_bind_mounts);

        let stale_removed = self.remove_stale(&topology).await;
        self.ensure_repository().await;

        let ctx = self.context();
        let mut services = Vec::new();
        for container in topology.containers_for_backup() {
            info!("service: {}", container.service_name());
            if let Some(include) = container.include_patterns() {
                info!(" - include: {}", include.join(", "));
            } else if let Some(exclude) = container.exclude_patterns() {
                info!(" - exclude: {}", exclude.join(", "));
            }

            let prefix = mount_prefix(container, self.config);
            let mut volumes = Vec::new();
            for mount in container.filter_mounts(self.config) {
                info!(
                    " - volume: {} -> {}",
                    mount.source,
                    container.destination_path(mount, prefix, self.config)
                );
                volumes.push(mount.source.clone());
            }

            let target = match BackupTarget::classify(container) {
                Some(target) => {
                    let reachable = target.ping(&ctx).await;
                    info!(" - {} (is_ready={}) -> {}", target.kind(), reachable, target.destination_path(self.config));
                    if !reachable {
                        error!("{} is not reachable. Make sure the service is up and the credentials are correct.", target);
                    }
                    Some((target.kind().to_string(), reachable))
                }
                None => None,
            };

            services.push(ServiceStatus {
                service: container.service_name().to_string(),
                volumes,
                target,
            });
        }

        if services.is_empty() {
            info!("No containers in the project has '{}.*' label", LABEL_NAMESPACE);
        }

        Ok(StatusReport {
            project: topology.project_name().to_string(),
            backup_process_running: topology.backup_process_running(),
            stale_removed,
            services,
        })
    }

    /// Everything the backup process container is started with
    pub fn backup_process_spec(&self, topology: &RunningTopology) -> BackupProcessSpec {
        let this = topology.this();

        let mut volumes = this.volumes();
        volumes.extend(topology.backup_mounts(self.config));

        let mut child = this.clone();
        child.set_env(ENV_BACKUP_PROCESS, "true");

        let labels = [
            (topology.backup_process_label(), "True".to_string()),
            (LABEL_COMPOSE_PROJECT.to_string(), topology.project_name().to_string()),
        ]
        .into_iter()
        .collect();

        BackupProcessSpec {
            image: this.image().to_string(),
            command: BACKUP_PROCESS_COMMAND.iter().map(|s| s.to_string()).collect(),
            volumes,
            environment: child.environment().to_vec(),
            labels,
            network_container: this.id().to_string(),
        }
    }

    async fn read_log(&self) -> String {
        tokio::fs::read_to_string(&self.config.log_file)
            .await
            .unwrap_or_else(|e| format!("Unable to read {}: {}", self.config.log_file.display(), e))
    }

    /// Parent side of a run. The report holds one outcome for the backup
    /// process container; spawn failures are alerted and recorded as well.
    pub async fn backup(&self) -> Result<RunReport> {
        let mut report = RunReport::default();
        let topology = self.resolve_topology().await?;

        if let Some(active) = topology.active_backup_process() {
            self.alerts
                .send(
                    "Backup process container already running",
                    &format!(
                        "A backup process container is already running. \nId: {}\nName: {}\n",
                        active.id(),
                        active.name()
                    ),
                    AlertSeverity::Error,
                )
                .await;
            return Err(BackupError::Concurrency(active.name().to_string()).into());
        }

        report.advance(RunState::RepoBootstrap);
        self.ensure_repository().await;

        report.advance(RunState::Spawning);
        let spec = self.backup_process_spec(&topology);
        debug!("Starting backup container with image {}", spec.image);

        let started = Instant::now();
        let exit_code = match self
            .runtime
            .run_backup_process(&spec, &self.config.log_file)
            .await
        {
            Ok(code) => code,
            Err(e) => {
                let reason = format!("{:#}", e);
                report.record_error(BACKUP_PROCESS_TARGET, BackupError::target(BACKUP_PROCESS_TARGET, &reason));
                report.advance(RunState::Failed);
                self.alerts
                    .send("Exception during backup", &reason, AlertSeverity::Error)
                    .await;
                return Ok(report);
            }
        };

        info!(
            "Backup container exit code: {} (after {})",
            exit_code,
            format_duration(started.elapsed().as_secs())
        );
        report.record(BACKUP_PROCESS_TARGET, Ok(i32::try_from(exit_code).unwrap_or(1)));
        let log = self.read_log().await;

        if report.has_errors() {
            report.advance(RunState::Failed);
            self.alerts
                .send(
                    "Backup process exited with non-zero code",
                    &log,
                    AlertSeverity::Error,
                )
                .await;
        } else {
            report.advance(RunState::Done);
            self.alerts
                .send("Backup completed", &log, AlertSeverity::Info)
                .await;
        }

        Ok(report)
    }

    /// Child side of a run, inside the backup process container
    pub async fn start_backup_process(&self) -> Result<RunReport> {
        let mut report = RunReport::default();

        report.advance(RunState::PreflightCheck);
        if !self.config.backup_process {
            error!("{}", PREFLIGHT_MESSAGE);
            self.alerts
                .send(
                    "Cannot run backup process in this container",
                    PREFLIGHT_MESSAGE,
                    AlertSeverity::Error,
                )
                .await;
            report.advance(RunState::Failed);
            return Err(BackupError::Config(format!("{} is not set", ENV_BACKUP_PROCESS)).into());
        }

        let topology = self.resolve_topology().await?;
        for volumes in topology.volume_targets() {
            debug!("Volumes of service {} are mounted", volumes.container().service_name());
        }
        let targets = topology.backup_targets();
        for target in &targets {
            info!("Found {}", target);
        }

        let volumes = &self.config.paths.volumes;
        let has_volumes = has_entries(volumes).await;
        if !has_volumes {
            warn!("Found no volumes to back up");
        }

        if targets.is_empty() && !has_volumes {
            report.advance(RunState::Failed);
            return Err(BackupError::Discovery("No containers for backup found".into()).into());
        }

        report.advance(RunState::VolumeBackup);
        if has_volumes {
            info!("Backing up volumes");
            let exclude = exclude_file(volumes).await;
            let result = self.restic.backup_files(volumes.clone(), exclude).await;
            report.record("volumes", result);
        }

        let ctx = self.context();

        report.advance(RunState::DatabaseBackup);
        info!("Backing up databases");
        for target in targets.iter().filter(|t| t.is_database()) {
            info!("Backing up {}", target);
            let result = target.backup(&ctx).await;
            report.record(target.to_string(), result);
        }

        report.advance(RunState::ConsoleManagedBackup);
        for target in targets.iter().filter(|t| t.is_console_managed()) {
            info!("Backing up {}", target);
            let result = target.backup(&ctx).await;
            report.record(target.to_string(), result);
        }

        if report.has_errors() {
            error!("Backup failed, skipping cleanup");
            report.advance(RunState::Failed);
            return Ok(report);
        }

        report.advance(RunState::RetentionCleanup);
        if self.config.skip_cleanup {
            info!("Skipping cleanup");
        } else if let Err(e) = self.cleanup().await {
            report.record_error("retention", e);
            report.advance(RunState::Failed);
            return Ok(report);
        }

        report.advance(RunState::IntegrityCheck);
        info!("Checking the repository for errors");
        match self.restic.check().await {
            Ok(0) => {}
            Ok(code) => report.record_error("integrity", BackupError::Integrity(code)),
            Err(e) => {
                error!("{:#}", e);
                report.record_error("integrity", BackupError::Integrity(-1));
            }
        }

        if report.has_errors() {
            report.advance(RunState::Failed);
        } else {
            info!("Backup completed");
            report.advance(RunState::Done);
        }
        Ok(report)
    }

    /// Forget outdated snapshots, then prune unreferenced data
    pub async fn cleanup(&self) -> std::result::Result<(), BackupError> {
        if self.config.retention.has_rules() {
            info!("Forget outdated snapshots");
            let forget = self
                .restic
                .forget(&self.config.retention)
                .await
                .map_err(|e| {
                    error!("{:#}", e);
                    BackupError::Retention(-1)
                })?;
            if forget != 0 {
                return Err(BackupError::Retention(forget));
            }
        } else {
            warn!("No KEEP_* rules configured, not forgetting any snapshots");
        }

        info!("Prune stale data freeing storage space");
        let prune = self.restic.prune().await.map_err(|e| {
            error!("{:#}", e);
            BackupError::Retention(-1)
        })?;
        if prune != 0 {
            return Err(BackupError::Retention(prune));
        }

        Ok(())
    }

    pub async fn snapshots(&self) -> Result<String> {
        self.restic.snapshots().await
    }

    /// Send a test alert to every configured backend
    pub async fn test_alert(&self) -> Result<usize> {
        info!("Testing alerts");
        let topology = self.resolve_topology().await?;
        Ok(self
            .alerts
            .send(
                &format!("{}: Test Alert", topology.project_name()),
                "Test message",
                AlertSeverity::Info,
            )
            .await)
    }
}

/// Whether anything besides the exclude file is mounted under `path`
async fn has_entries(path: &Path) -> bool {
    let Ok(mut entries) = tokio::fs::read_dir(path).await else {
        return false;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_name() != EXCLUDE_FILE_NAME {
            return true;
        }
    }
    false
}

async fn exclude_file(volumes: &Path) -> Option<PathBuf> {
    let path = volumes.join(EXCLUDE_FILE_NAME);
    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => Some(path),
        _ => None,
    }
}
