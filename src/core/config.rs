/// Configuration management
///
/// The configuration is read once from a snapshot of the process environment
/// (optionally seeded from a `.env` file) and handed to every component by
/// reference.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use crate::core::error::{BackupError, Result};
use crate::core::labels::{is_true, parse_pattern_list};
use crate::core::retention::RetentionPolicy;
use crate::utils::{
    mask_sensitive, CONSOLES_PREFIX, DATABASES_PREFIX, DEFAULT_CRON_COMMAND, DEFAULT_KEEP_DAILY,
    DEFAULT_KEEP_MONTHLY, DEFAULT_KEEP_WEEKLY, DEFAULT_KEEP_YEARLY, DEFAULT_LOG_FILE,
    ENV_BACKUP_PROCESS, VOLUMES_PREFIX,
};

/// Mount prefixes used inside the backup process container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupPaths {
    pub volumes: PathBuf,
    pub consoles: PathBuf,
    pub databases: PathBuf,
}

impl Default for BackupPaths {
    fn default() -> Self {
        Self {
            volumes: PathBuf::from(VOLUMES_PREFIX),
            consoles: PathBuf::from(CONSOLES_PREFIX),
            databases: PathBuf::from(DATABASES_PREFIX),
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub repository: String,
    pub password: String,
    /// Docker endpoint; local defaults when unset
    pub docker_host: Option<String>,
    /// Our own container hostname (a prefix of our container id)
    pub hostname: Option<String>,
    pub log_level: Option<String>,
    pub swarm_mode: bool,
    pub include_project_name: bool,
    pub exclude_bind_mounts: bool,
    pub skip_cleanup: bool,
    /// Set only inside the spawned backup process container
    pub backup_process: bool,
    pub retention: RetentionPolicy,
    pub cron_schedule: Option<String>,
    pub cron_command: String,
    pub paths: BackupPaths,
    pub log_file: PathBuf,
}

impl Config {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Build configuration from an explicit variable map
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let get = |key: &str| {
            vars.get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(|v| v.to_string())
        };
        let flag = |key: &str| is_true(vars.get(key).map(String::as_str));

        let repository = get("RESTIC_REPOSITORY")
            .ok_or_else(|| BackupError::Config("RESTIC_REPOSITORY env var not set".into()))?;
        let password = get("RESTIC_PASSWORD")
            .ok_or_else(|| BackupError::Config("RESTIC_PASSWORD env var not set".into()))?;

        let retention = RetentionPolicy {
            keep_last: parse_count(vars, "KEEP_LAST", None)?,
            keep_hourly: parse_count(vars, "KEEP_HOURLY", None)?,
            keep_daily: parse_count(vars, "KEEP_DAILY", Some(DEFAULT_KEEP_DAILY))?,
            keep_weekly: parse_count(vars, "KEEP_WEEKLY", Some(DEFAULT_KEEP_WEEKLY))?,
            keep_monthly: parse_count(vars, "KEEP_MONTHLY", Some(DEFAULT_KEEP_MONTHLY))?,
            keep_yearly: parse_count(vars, "KEEP_YEARLY", Some(DEFAULT_KEEP_YEARLY))?,
            keep_tags: parse_pattern_list(vars.get("KEEP_TAGS").map(String::as_str))
                .unwrap_or_default(),
            filter_tags: parse_pattern_list(vars.get("FILTER_TAGS").map(String::as_str))
                .unwrap_or_default(),
        };

        Ok(Self {
            repository,
            password,
            docker_host: get("DOCKER_HOST").or_else(|| get("DOCKER_BASE_URL")),
            hostname: get("HOSTNAME"),
            log_level: get("LOG_LEVEL"),
            swarm_mode: flag("SWARM_MODE"),
            include_project_name: flag("INCLUDE_PROJECT_NAME"),
            exclude_bind_mounts: flag("EXCLUDE_BIND_MOUNTS"),
            skip_cleanup: flag("SKIP_CLEANUP"),
            backup_process: flag(ENV_BACKUP_PROCESS),
            retention,
            cron_schedule: get("CRON_SCHEDULE"),
            cron_command: get("CRON_COMMAND").unwrap_or_else(|| DEFAULT_CRON_COMMAND.to_string()),
            paths: BackupPaths::default(),
            log_file: get("BACKUP_LOG_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE)),
        })
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("repository", &self.repository)
            .field("password", &mask_sensitive(&self.password, 2))
            .field("docker_host", &self.docker_host)
            .field("hostname", &self.hostname)
            .field("swarm_mode", &self.swarm_mode)
            .field("include_project_name", &self.include_project_name)
            .field("exclude_bind_mounts", &self.exclude_bind_mounts)
            .field("skip_cleanup", &self.skip_cleanup)
            .field("backup_process", &self.backup_process)
            .field("retention", &self.retention)
            .field("paths", &self.paths)
            .field("log_file", &self.log_file)
            .finish()
    }
}

fn parse_count(
    vars: &HashMap<String, String>,
    key: &str,
    default: Option<u32>,
) -> Result<Option<u32>> {
    match vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(value) => value
            .parse::<u32>()
            .map(Some)
            .map_err(|_| BackupError::Config(format!("{} must be a number, got '{}'", key, value))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_required_values() {
        let err = Config::from_vars(&vars(&[("RESTIC_PASSWORD", "pw")])).unwrap_err();
        assert!(matches!(err, BackupError::Config(_)));
        assert!(err.to_string().contains("RESTIC_REPOSITORY"));

        let err = Config::from_vars(&vars(&[("RESTIC_REPOSITORY", "/restic_data")])).unwrap_err();
        assert!(err.to_string().contains("RESTIC_PASSWORD"));
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_vars(&vars(&[
            ("RESTIC_REPOSITORY", "/restic_data"),
            ("RESTIC_PASSWORD", "password"),
        ]))
        .unwrap();

        assert_eq!(config.retention.keep_daily, Some(7));
        assert_eq!(config.retention.keep_weekly, Some(4));
        assert_eq!(config.retention.keep_monthly, Some(12));
        assert_eq!(config.retention.keep_yearly, Some(3));
        assert_eq!(config.retention.keep_last, None);
        assert!(!config.swarm_mode);
        assert!(!config.backup_process);
        assert_eq!(config.paths.volumes, PathBuf::from("/volumes"));
        assert_eq!(config.log_file, PathBuf::from("backup.log"));
        assert_eq!(config.cron_command, DEFAULT_CRON_COMMAND);
    }

    #[test]
    fn test_switches_and_tags() {
        let config = Config::from_vars(&vars(&[
            ("RESTIC_REPOSITORY", "s3:bucket"),
            ("RESTIC_PASSWORD", "password"),
            ("HOSTNAME", "3c4a8bd1f0e2"),
            ("DOCKER_BASE_URL", "unix://tmp/docker.sock"),
            ("INCLUDE_PROJECT_NAME", "true"),
            ("EXCLUDE_BIND_MOUNTS", "1"),
            ("SWARM_MODE", "false"),
            ("BACKUP_PROCESS_CONTAINER", "true"),
            ("KEEP_LAST", "5"),
            ("KEEP_TAGS", "keep, release"),
        ]))
        .unwrap();

        assert!(config.include_project_name);
        assert!(config.exclude_bind_mounts);
        assert!(!config.swarm_mode);
        assert!(config.backup_process);
        assert_eq!(config.hostname.as_deref(), Some("3c4a8bd1f0e2"));
        assert_eq!(config.docker_host.as_deref(), Some("unix://tmp/docker.sock"));
        assert_eq!(config.retention.keep_last, Some(5));
        assert_eq!(config.retention.keep_tags, vec!["keep", "release"]);
        assert!(config.retention.filter_tags.is_empty());
    }

    #[test]
    fn test_invalid_count() {
        let err = Config::from_vars(&vars(&[
            ("RESTIC_REPOSITORY", "/restic_data"),
            ("RESTIC_PASSWORD", "password"),
            ("KEEP_DAILY", "seven"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("KEEP_DAILY"));
    }

    #[test]
    fn test_debug_masks_password() {
        let config = Config::from_vars(&vars(&[
            ("RESTIC_REPOSITORY", "/restic_data"),
            ("RESTIC_PASSWORD", "supersecretpassword"),
        ]))
        .unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("supersecretpassword"));
    }
}
