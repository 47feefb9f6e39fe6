//! Restic integration
//!
//! Every repository operation is a `restic` subprocess. The repository is
//! passed with `-r`, the password through `RESTIC_PASSWORD` in the child's
//! environment only.

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::core::config::Config;
use crate::core::pipeline;
use crate::core::retention::RetentionPolicy;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BackupTool: Send + Sync {
    /// Probe the repository with a snapshot listing
    async fn is_initialized(&self) -> Result<bool>;

    async fn init(&self) -> Result<i32>;

    /// `restic snapshots` output
    async fn snapshots(&self) -> Result<String>;

    /// Back up a directory tree
    async fn backup_files(&self, path: PathBuf, exclude_file: Option<PathBuf>) -> Result<i32>;

    /// Back up the stdout of `source` as a single file named `filename`
    async fn backup_from_stdin(&self, filename: String, source: Vec<String>) -> Result<i32>;

    async fn forget(&self, policy: &RetentionPolicy) -> Result<i32>;

    async fn prune(&self) -> Result<i32>;

    async fn check(&self) -> Result<i32>;
}

#[derive(Clone)]
pub struct Restic {
    binary: String,
    repository: String,
    password: String,
}

/// Captured result of one restic run
struct ResticOutput {
    exit_code: i32,
    stdout: String,
}

impl Restic {
    pub fn new(config: &Config) -> Self {
        Self {
            binary: "restic".to_string(),
            repository: config.repository.clone(),
            password: config.password.clone(),
        }
    }

    /// Use another restic executable
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut command = Command::new(&self.binary);
        command
            .arg("-r")
            .arg(&self.repository)
            .args(args)
            .env("RESTIC_PASSWORD", &self.password);
        command
    }

    async fn run(&self, args: Vec<String>) -> Result<ResticOutput> {
        debug!("restic {}", args.join(" "));

        let output = self
            .command(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Failed to run {} {}", self.binary, args.first().map(String::as_str).unwrap_or("")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        for line in stdout.lines() {
            debug!("{}", line);
        }
        for line in String::from_utf8_lossy(&output.stderr).lines() {
            error!("{}", line);
        }

        Ok(ResticOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout,
        })
    }
}

/// Arguments for a directory backup
fn backup_files_args(path: &str, exclude_file: Option<&str>) -> Vec<String> {
    let mut args = vec!["backup".to_string(), "--verbose".to_string()];
    if let Some(exclude) = exclude_file {
        args.push("--exclude-file".to_string());
        args.push(exclude.to_string());
    }
    args.push(path.to_string());
    args
}

/// Arguments for a backup reading stdin
fn backup_stdin_args(filename: &str) -> Vec<String> {
    vec![
        "backup".to_string(),
        "--stdin".to_string(),
        "--stdin-filename".to_string(),
        filename.to_string(),
    ]
}

#[async_trait]
impl BackupTool for Restic {
    async fn is_initialized(&self) -> Result<bool> {
        let output = self.run(vec!["snapshots".into(), "--latest".into(), "1".into()]).await?;
        Ok(output.exit_code == 0)
    }

    async fn init(&self) -> Result<i32> {
        info!("Initializing repository {}", self.repository);
        Ok(self.run(vec!["init".into()]).await?.exit_code)
    }

    async fn snapshots(&self) -> Result<String> {
        let output = self.run(vec!["snapshots".into()]).await?;
        if output.exit_code != 0 {
            anyhow::bail!("restic snapshots exited with code {}", output.exit_code);
        }
        Ok(output.stdout)
    }

    async fn backup_files(&self, path: PathBuf, exclude_file: Option<PathBuf>) -> Result<i32> {
        let path = path.to_string_lossy();
        let exclude = exclude_file.as_ref().map(|p| p.to_string_lossy());
        info!("Backing up {}", path);

        let output = self
            .run(backup_files_args(&path, exclude.as_deref()))
            .await?;
        Ok(output.exit_code)
    }

    async fn backup_from_stdin(&self, filename: String, source: Vec<String>) -> Result<i32> {
        let (program, args) = source
            .split_first()
            .context("Empty dump command")?;
        info!("Streaming {} into {}", program, filename);

        let mut dump = Command::new(program);
        dump.args(args);

        let status = pipeline::pipe(dump, self.command(backup_stdin_args(&filename)))
            .await
            .with_context(|| format!("Failed to pipe {} into restic", program))?;

        if !status.success() {
            error!(
                "Dump into {} failed (source exit {:?}, restic exit {:?})",
                filename, status.source, status.sink
            );
        }
        Ok(status.exit_code())
    }

    async fn forget(&self, policy: &RetentionPolicy) -> Result<i32> {
        Ok(self.run(policy.forget_args()).await?.exit_code)
    }

    async fn prune(&self) -> Result<i32> {
        Ok(self.run(vec!["prune".into()]).await?.exit_code)
    }

    async fn check(&self) -> Result<i32> {
        Ok(self
            .run(vec!["check".into(), "--no-lock".into()])
            .await?
            .exit_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixtures::test_config;
    use std::os::unix::fs::PermissionsExt;

    /// A fake restic that records its arguments and environment
    fn fake_restic(dir: &std::path::Path, exit_code: i32) -> PathBuf {
        let script = dir.join("restic");
        let body = format!(
            "#!/bin/sh\nprintf '%s\\n' \"$*\" > {args}\necho \"$RESTIC_PASSWORD\" > {pw}\ncat > {stdin}\necho snapshot saved\nexit {code}\n",
            args = dir.join("args").display(),
            pw = dir.join("password").display(),
            stdin = dir.join("stdin").display(),
            code = exit_code,
        );
        std::fs::write(&script, body).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    fn read(dir: &std::path::Path, name: &str) -> String {
        std::fs::read_to_string(dir.join(name)).unwrap().trim().to_string()
    }

    #[test]
    fn test_backup_args() {
        assert_eq!(
            backup_files_args("/volumes", Some("/volumes/.backup_exclude")),
            vec!["backup", "--verbose", "--exclude-file", "/volumes/.backup_exclude", "/volumes"]
        );
        assert_eq!(backup_files_args("/consoles/mc/data", None), vec!["backup", "--verbose", "/consoles/mc/data"]);
        assert_eq!(
            backup_stdin_args("/databases/db/all_databases.sql"),
            vec!["backup", "--stdin", "--stdin-filename", "/databases/db/all_databases.sql"]
        );
    }

    #[tokio::test]
    async fn test_repository_and_password_passed() {
        let dir = tempfile::tempdir().unwrap();
        let restic = Restic::new(&test_config()).with_binary(fake_restic(dir.path(), 0).to_string_lossy());

        let code = restic.prune().await.unwrap();
        assert_eq!(code, 0);
        assert_eq!(read(dir.path(), "args"), "-r /restic_data prune");
        assert_eq!(read(dir.path(), "password"), "password");
    }

    #[tokio::test]
    async fn test_exit_code_and_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let failing = Restic::new(&test_config()).with_binary(fake_restic(dir.path(), 3).to_string_lossy());

        assert_eq!(failing.check().await.unwrap(), 3);
        assert!(!failing.is_initialized().await.unwrap());
        assert!(failing.snapshots().await.is_err());

        let ok = Restic::new(&test_config()).with_binary(fake_restic(dir.path(), 0).to_string_lossy());
        assert_eq!(ok.snapshots().await.unwrap().trim(), "snapshot saved");
    }

    #[tokio::test]
    async fn test_forget_uses_policy() {
        let dir = tempfile::tempdir().unwrap();
        let restic = Restic::new(&test_config()).with_binary(fake_restic(dir.path(), 0).to_string_lossy());
        let policy = RetentionPolicy {
            keep_daily: Some(7),
            ..Default::default()
        };

        restic.forget(&policy).await.unwrap();
        assert_eq!(
            read(dir.path(), "args"),
            "-r /restic_data forget --group-by paths,tags --keep-daily 7"
        );
    }

    #[tokio::test]
    async fn test_backup_from_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let restic = Restic::new(&test_config()).with_binary(fake_restic(dir.path(), 0).to_string_lossy());

        let code = restic
            .backup_from_stdin(
                "/databases/db/all_databases.sql".into(),
                vec!["sh".into(), "-c".into(), "echo CREATE DATABASE shop".into()],
            )
            .await
            .unwrap();
        assert_eq!(code, 0);
        assert_eq!(read(dir.path(), "stdin"), "CREATE DATABASE shop");
        assert_eq!(
            read(dir.path(), "args"),
            "-r /restic_data backup --stdin --stdin-filename /databases/db/all_databases.sql"
        );

        let failed_dump = restic
            .backup_from_stdin(
                "/databases/db/all_databases.sql".into(),
                vec!["sh".into(), "-c".into(), "exit 2".into()],
            )
            .await
            .unwrap();
        assert_eq!(failed_dump, 1);

        assert!(restic.backup_from_stdin("x".into(), vec![]).await.is_err());
    }
}
