/// Container and mount model
///
/// Wraps the inspect data of one container and derives everything the backup
/// logic needs from its labels: project/service identity, which capabilities
/// are enabled and which mounts should be backed up.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::core::config::Config;
use crate::core::labels::{is_true, parse_pattern_list};
use crate::utils::{
    strip_root, ContainerState, LABEL_BACKUP_PROCESS, LABEL_COMPOSE_ONEOFF, LABEL_COMPOSE_PROJECT,
    LABEL_COMPOSE_SERVICE, LABEL_MARIADB_ENABLED, LABEL_MINECRAFT_ENABLED, LABEL_MYSQL_ENABLED,
    LABEL_POSTGRES_ENABLED, LABEL_SWARM_SERVICE, LABEL_VOLUMES_ENABLED, LABEL_VOLUMES_EXCLUDE,
    LABEL_VOLUMES_INCLUDE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountKind {
    Volume,
    Bind,
    Other,
}

impl From<&str> for MountKind {
    fn from(kind: &str) -> Self {
        match kind {
            "volume" => MountKind::Volume,
            "bind" => MountKind::Bind,
            _ => MountKind::Other,
        }
    }
}

/// One filesystem mount of a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub kind: MountKind,
    /// Volume name (named volumes only)
    pub name: Option<String>,
    /// Host path of the mount
    pub source: String,
    /// Path inside the container
    pub destination: String,
}

impl Mount {
    /// Identity of the underlying volume: the name for named volumes,
    /// the host path for everything else.
    pub fn identity(&self) -> &str {
        match (self.kind, self.name.as_deref()) {
            (MountKind::Volume, Some(name)) if !name.is_empty() => name,
            _ => &self.source,
        }
    }

    pub fn is_bind(&self) -> bool {
        self.kind == MountKind::Bind
    }

    /// Named volumes and bind mounts with a host source. tmpfs and other
    /// mount types cannot be rebound into another container.
    pub fn is_bindable(&self) -> bool {
        matches!(self.kind, MountKind::Volume | MountKind::Bind) && !self.source.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindMode {
    ReadOnly,
    ReadWrite,
}

impl BindMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BindMode::ReadOnly => "ro",
            BindMode::ReadWrite => "rw",
        }
    }
}

/// Where a volume is mounted in a spawned container and how
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeBinding {
    pub bind: String,
    pub mode: BindMode,
}

impl VolumeBinding {
    /// Docker `Binds` entry: `source:destination:mode`
    pub fn to_bind_spec(&self, source: &str) -> String {
        format!("{}:{}:{}", source, self.bind, self.mode.as_str())
    }
}

/// Raw container data as reported by the runtime
#[derive(Debug, Clone, Default)]
pub struct ContainerSnapshot {
    pub id: String,
    pub name: String,
    pub image: String,
    pub running: bool,
    pub status: String,
    pub labels: HashMap<String, String>,
    pub env: Vec<String>,
    pub mounts: Vec<Mount>,
}

/// A container observed in the runtime
#[derive(Clone)]
pub struct Container {
    id: String,
    name: String,
    image: String,
    state: ContainerState,
    labels: HashMap<String, String>,
    env: Vec<String>,
    mounts: Vec<Mount>,
    include: Option<Vec<String>>,
    exclude: Option<Vec<String>>,
}

impl From<ContainerSnapshot> for Container {
    fn from(snapshot: ContainerSnapshot) -> Self {
        let state = if snapshot.running {
            ContainerState::Running
        } else {
            match ContainerState::from(snapshot.status.as_str()) {
                // A container the runtime reports as not running is never "running"
                ContainerState::Running => ContainerState::Unknown,
                other => other,
            }
        };

        let include = parse_pattern_list(snapshot.labels.get(LABEL_VOLUMES_INCLUDE).map(String::as_str));
        let exclude = parse_pattern_list(snapshot.labels.get(LABEL_VOLUMES_EXCLUDE).map(String::as_str));

        Self {
            id: snapshot.id,
            name: snapshot.name.trim_start_matches('/').to_string(),
            image: snapshot.image,
            state,
            labels: snapshot.labels,
            env: snapshot.env,
            mounts: snapshot.mounts,
            include,
            exclude,
        }
    }
}

impl Container {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// 12 character hostname based on the id
    pub fn hostname(&self) -> &str {
        self.id.get(..12).unwrap_or(&self.id)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn state(&self) -> ContainerState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    pub fn labels(&self) -> &HashMap<String, String> {
        &self.labels
    }

    pub fn get_label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }

    pub fn mounts(&self) -> &[Mount] {
        &self.mounts
    }

    pub fn environment(&self) -> &[String] {
        &self.env
    }

    /// Value of one `NAME=value` entry of the container's environment
    pub fn get_env(&self, name: &str) -> Option<&str> {
        self.env.iter().find_map(|entry| {
            entry
                .split_once('=')
                .filter(|(key, _)| *key == name)
                .map(|(_, value)| value)
        })
    }

    /// Set or override one environment variable
    pub fn set_env(&mut self, name: &str, value: &str) {
        let entry = format!("{}={}", name, value);
        match self
            .env
            .iter_mut()
            .find(|e| e.split_once('=').map(|(k, _)| k) == Some(name))
        {
            Some(existing) => *existing = entry,
            None => self.env.push(entry),
        }
    }

    /// Name of the compose project (empty when not started by compose)
    pub fn project_name(&self) -> &str {
        self.get_label(LABEL_COMPOSE_PROJECT).unwrap_or("")
    }

    pub fn service_name(&self) -> &str {
        self.get_label(LABEL_COMPOSE_SERVICE)
            .filter(|s| !s.is_empty())
            .or_else(|| self.get_label(LABEL_SWARM_SERVICE))
            .unwrap_or("")
    }

    /// Started with `docker compose run`?
    pub fn is_oneoff(&self) -> bool {
        is_true(self.get_label(LABEL_COMPOSE_ONEOFF))
    }

    /// The unique backup process label for this project
    pub fn backup_process_label(&self) -> String {
        format!("{}-{}", LABEL_BACKUP_PROCESS, self.project_name())
    }

    pub fn is_backup_process_container(&self) -> bool {
        is_true(self.get_label(&self.backup_process_label()))
    }

    pub fn volume_backup_enabled(&self) -> bool {
        is_true(self.get_label(LABEL_VOLUMES_ENABLED))
    }

    pub fn mysql_backup_enabled(&self) -> bool {
        is_true(self.get_label(LABEL_MYSQL_ENABLED))
    }

    pub fn mariadb_backup_enabled(&self) -> bool {
        is_true(self.get_label(LABEL_MARIADB_ENABLED))
    }

    pub fn postgres_backup_enabled(&self) -> bool {
        is_true(self.get_label(LABEL_POSTGRES_ENABLED))
    }

    pub fn database_backup_enabled(&self) -> bool {
        self.mysql_backup_enabled() || self.mariadb_backup_enabled() || self.postgres_backup_enabled()
    }

    pub fn console_backup_enabled(&self) -> bool {
        is_true(self.get_label(LABEL_MINECRAFT_ENABLED))
    }

    pub fn backup_enabled(&self) -> bool {
        self.volume_backup_enabled() || self.database_backup_enabled() || self.console_backup_enabled()
    }

    pub fn include_patterns(&self) -> Option<&[String]> {
        self.include.as_deref()
    }

    pub fn exclude_patterns(&self) -> Option<&[String]> {
        self.exclude.as_deref()
    }

    /// Mounts selected for backup by the include/exclude labels
    pub fn filter_mounts(&self, config: &Config) -> Vec<&Mount> {
        if !self.volume_backup_enabled() {
            return Vec::new();
        }

        let candidates = self
            .mounts
            .iter()
            .filter(|m| m.is_bindable())
            .filter(|m| !(config.exclude_bind_mounts && m.is_bind()));

        if let Some(include) = &self.include {
            candidates
                .filter(|m| include.iter().any(|p| m.source.contains(p.as_str())))
                .collect()
        } else if let Some(exclude) = &self.exclude {
            candidates
                .filter(|m| !exclude.iter().any(|p| m.source.contains(p.as_str())))
                .collect()
        } else {
            candidates.collect()
        }
    }

    /// `prefix[/project]/service`
    pub fn service_path(&self, prefix: &Path, config: &Config) -> PathBuf {
        let mut destination = prefix.to_path_buf();

        if config.include_project_name && !self.project_name().is_empty() {
            destination.push(self.project_name());
        }
        if !self.service_name().is_empty() {
            destination.push(self.service_name());
        }

        destination
    }

    /// Where a mount ends up inside the backup process container
    pub fn destination_path(&self, mount: &Mount, prefix: &Path, config: &Config) -> String {
        let mut destination = self.service_path(prefix, config);
        let relative = strip_root(&mount.destination);
        if !relative.is_empty() {
            destination.push(relative);
        }
        destination.to_string_lossy().into_owned()
    }

    /// Filtered mounts mapped to their backup destinations
    pub fn volumes_for_backup(
        &self,
        prefix: &Path,
        mode: BindMode,
        config: &Config,
    ) -> BTreeMap<String, VolumeBinding> {
        self.filter_mounts(config)
            .into_iter()
            .map(|mount| {
                (
                    mount.identity().to_string(),
                    VolumeBinding {
                        bind: self.destination_path(mount, prefix, config),
                        mode,
                    },
                )
            })
            .collect()
    }

    /// All of this container's own mounts, bound at their own destination
    pub fn volumes(&self) -> BTreeMap<String, VolumeBinding> {
        self.mounts
            .iter()
            .filter(|mount| mount.is_bindable())
            .map(|mount| {
                (
                    mount.identity().to_string(),
                    VolumeBinding {
                        bind: mount.destination.clone(),
                        mode: BindMode::ReadWrite,
                    },
                )
            })
            .collect()
    }
}

impl PartialEq for Container {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Container {}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.hostname())
            .field("name", &self.name)
            .field("image", &self.image)
            .field("state", &self.state)
            .finish()
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Container {}>", self.name)
    }
}
