/// Docker integration
///
/// Lists and inspects containers, runs commands inside them and drives the
/// lifecycle of the backup process container.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, InspectContainerOptions,
    ListContainersOptions, LogOutput, LogsOptions, RemoveContainerOptions, StartContainerOptions,
    WaitContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::{ContainerInspectResponse, HostConfig};
use bollard::{Docker, API_DEFAULT_VERSION};
use futures::{Stream, StreamExt};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::core::config::Config;
use crate::core::container::{Container, ContainerSnapshot, Mount, MountKind};
use crate::core::error::BackupError;
use crate::core::runtime::{BackupProcessSpec, ContainerRuntime, ExecOutput};

/// Request timeout in seconds for the Docker API
const DOCKER_TIMEOUT: u64 = 120;

#[derive(Clone)]
pub struct DockerManager {
    docker: Docker,
}

impl DockerManager {
    /// Connect to the configured Docker endpoint (local defaults when unset)
    pub fn new(config: &Config) -> Result<Self> {
        let docker = match config.docker_host.as_deref() {
            Some(host) if host.starts_with("unix://") => {
                Docker::connect_with_unix(host, DOCKER_TIMEOUT, API_DEFAULT_VERSION)
            }
            Some(host) if host.starts_with("tcp://") || host.starts_with("http://") => {
                Docker::connect_with_http(host, DOCKER_TIMEOUT, API_DEFAULT_VERSION)
            }
            _ => Docker::connect_with_local_defaults(),
        }
        .context("Failed to connect to Docker daemon. Is Docker running?")?;

        Ok(Self { docker })
    }

    /// Check if Docker daemon is accessible
    pub async fn check_docker(&self) -> bool {
        self.docker.ping().await.is_ok()
    }

    /// Convert inspect data to our container model
    fn inspect_to_container(inspect: ContainerInspectResponse) -> Container {
        let config = inspect.config.unwrap_or_default();
        let state = inspect.state.unwrap_or_default();

        let mounts = inspect
            .mounts
            .unwrap_or_default()
            .into_iter()
            .map(|m| Mount {
                kind: m
                    .typ
                    .map(|t| MountKind::from(t.to_string().as_str()))
                    .unwrap_or(MountKind::Other),
                name: m.name.filter(|n| !n.is_empty()),
                source: m.source.unwrap_or_default(),
                destination: m.destination.unwrap_or_default(),
            })
            .collect();

        Container::from(ContainerSnapshot {
            id: inspect.id.unwrap_or_default(),
            name: inspect.name.unwrap_or_default(),
            image: config.image.unwrap_or_default(),
            running: state.running.unwrap_or(false),
            status: state.status.map(|s| s.to_string()).unwrap_or_default(),
            labels: config.labels.unwrap_or_default(),
            env: config.env.unwrap_or_default(),
            mounts,
        })
    }

    async fn start_and_follow(&self, id: &str, log_file: &Path) -> Result<i64> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(BackupError::from)
            .context("Failed to start backup process container")?;

        let mut file = tokio::fs::File::create(log_file)
            .await
            .map_err(BackupError::from)
            .with_context(|| format!("Failed to create log file {}", log_file.display()))?;

        let mut logs = self.docker.logs(
            id,
            Some(LogsOptions::<String> {
                follow: true,
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );

        let mut lines = LineBuffer::default();
        while let Some(chunk) = logs.next().await {
            match chunk {
                Ok(output) => {
                    for line in lines.push(&String::from_utf8_lossy(&output.into_bytes())) {
                        file.write_all(line.as_bytes()).await?;
                        file.write_all(b"\n").await?;
                        info!("{}", line);
                    }
                }
                Err(e) => {
                    warn!("Log stream of backup process container ended: {}", e);
                    break;
                }
            }
        }
        if let Some(line) = lines.finish() {
            file.write_all(line.as_bytes()).await?;
            file.write_all(b"\n").await?;
            info!("{}", line);
        }
        file.flush().await?;

        // A non-zero exit is reported as an error by the wait endpoint;
        // the exit code is read back from inspect below either way.
        let mut wait = self
            .docker
            .wait_container(id, None::<WaitContainerOptions<String>>);
        while let Some(result) = wait.next().await {
            if let Err(e) = result {
                debug!("Wait for backup process container: {}", e);
            }
        }

        let inspect = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .context("Failed to inspect backup process container")?;

        let exit_code = inspect
            .state
            .and_then(|s| s.exit_code)
            .ok_or_else(|| anyhow!("Backup process container reported no exit code"))?;
        debug!("Container ExitCode {}", exit_code);

        Ok(exit_code)
    }
}

#[async_trait]
impl ContainerRuntime for DockerManager {
    async fn list_containers(&self) -> Result<Vec<Container>> {
        let options = Some(ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        });

        let summaries = self
            .docker
            .list_containers(options)
            .await
            .map_err(BackupError::from)
            .context("Failed to list containers")?;

        let mut containers = Vec::with_capacity(summaries.len());
        for summary in summaries {
            let Some(id) = summary.id else { continue };
            match self
                .docker
                .inspect_container(&id, None::<InspectContainerOptions>)
                .await
            {
                Ok(inspect) => containers.push(Self::inspect_to_container(inspect)),
                // Removed between list and inspect
                Err(e) => warn!("Failed to inspect container {}: {}", id, e),
            }
        }

        Ok(containers)
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(BackupError::from)
            .with_context(|| format!("Failed to remove container {}", id))?;
        Ok(())
    }

    async fn exec(&self, container_id: &str, command: Vec<String>, env: Vec<String>) -> Result<ExecOutput> {
        let exec = self
            .docker
            .create_exec(
                container_id,
                CreateExecOptions {
                    cmd: Some(command),
                    env: Some(env),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .with_context(|| format!("Failed to create exec in {}", container_id))?;

        let output = match self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(BackupError::from)?
        {
            StartExecResults::Attached { output, .. } => collect_output(output)
                .await
                .map_err(BackupError::from)
                .with_context(|| format!("Failed to read exec output in {}", container_id))?,
            StartExecResults::Detached => String::new(),
        };

        let inspect = self.docker.inspect_exec(&exec.id).await?;

        Ok(ExecOutput {
            exit_code: inspect.exit_code.unwrap_or(-1),
            output,
        })
    }

    async fn run_backup_process(&self, spec: &BackupProcessSpec, log_file: &Path) -> Result<i64> {
        info!("Starting backup container");

        let config = ContainerConfig {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            env: Some(spec.environment.clone()),
            labels: Some(spec.labels.clone()),
            tty: Some(true),
            host_config: Some(HostConfig {
                binds: Some(spec.binds()),
                network_mode: Some(format!("container:{}", spec.network_container)),
                ..Default::default()
            }),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await
            .map_err(BackupError::from)
            .context("Failed to create backup process container")?;
        info!("Backup process container: {}", created.id);

        let result = self.start_and_follow(&created.id, log_file).await;

        if let Err(e) = self.remove_container(&created.id).await {
            warn!("{:#}", e);
        }

        result
    }
}

/// Concatenate an exec output stream; a stream error fails the exec
async fn collect_output<S>(mut stream: S) -> std::result::Result<String, bollard::errors::Error>
where
    S: Stream<Item = std::result::Result<LogOutput, bollard::errors::Error>> + Unpin,
{
    let mut output = String::new();
    while let Some(chunk) = stream.next().await {
        output.push_str(&chunk?.to_string());
    }
    Ok(output)
}

/// Splits a stream of text chunks into complete lines
#[derive(Debug, Default)]
struct LineBuffer {
    pending: String,
}

impl LineBuffer {
    fn push(&mut self, chunk: &str) -> Vec<String> {
        self.pending.push_str(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=pos).collect();
            lines.push(line.trim_end_matches(['\r', '\n']).to_string());
        }
        lines
    }

    fn finish(self) -> Option<String> {
        let rest = self.pending.trim_end_matches(['\r', '\n']);
        if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::models::{ContainerConfig as InspectConfig, ContainerState, MountPoint, MountPointTypeEnum};
    use std::collections::HashMap;

    #[test]
    fn test_line_buffer() {
        let mut buffer = LineBuffer::default();
        assert!(buffer.push("Backing up vol").is_empty());
        assert_eq!(buffer.push("umes\r\nDone\nrest"), vec!["Backing up volumes", "Done"]);
        assert_eq!(buffer.finish(), Some("rest".to_string()));

        let empty = LineBuffer::default();
        assert_eq!(empty.finish(), None);
    }

    #[tokio::test]
    async fn test_collect_output_fails_on_stream_error() {
        let ok = futures::stream::iter(vec![
            Ok(LogOutput::StdOut { message: "mysqld is ".into() }),
            Ok(LogOutput::StdErr { message: "alive\n".into() }),
        ]);
        assert_eq!(collect_output(ok).await.unwrap(), "mysqld is alive\n");

        let broken = futures::stream::iter(vec![
            Ok(LogOutput::StdOut { message: "partial".into() }),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 500,
                message: "connection reset".into(),
            }),
            Ok(LogOutput::StdOut { message: "never read".into() }),
        ]);
        assert!(collect_output(broken).await.is_err());
    }

    #[test]
    fn test_inspect_to_container() {
        let mut labels = HashMap::new();
        labels.insert("com.docker.compose.project".to_string(), "shop".to_string());
        labels.insert("com.docker.compose.service".to_string(), "web".to_string());
        labels.insert("restic-compose-backup.volumes".to_string(), "true".to_string());

        let inspect = ContainerInspectResponse {
            id: Some("0123456789abcdef".into()),
            name: Some("/shop_web_1".into()),
            config: Some(InspectConfig {
                image: Some("nginx:1.25".into()),
                labels: Some(labels),
                env: Some(vec!["TZ=UTC".into()]),
                ..Default::default()
            }),
            state: Some(ContainerState {
                running: Some(true),
                ..Default::default()
            }),
            mounts: Some(vec![
                MountPoint {
                    typ: Some(MountPointTypeEnum::VOLUME),
                    name: Some("shop_media".into()),
                    source: Some("/var/lib/docker/volumes/shop_media/_data".into()),
                    destination: Some("/media".into()),
                    ..Default::default()
                },
                MountPoint {
                    typ: Some(MountPointTypeEnum::BIND),
                    source: Some("/srv/static".into()),
                    destination: Some("/static".into()),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        };

        let container = DockerManager::inspect_to_container(inspect);
        assert_eq!(container.name(), "shop_web_1");
        assert_eq!(container.hostname(), "0123456789ab");
        assert_eq!(container.image(), "nginx:1.25");
        assert!(container.is_running());
        assert_eq!(container.project_name(), "shop");
        assert_eq!(container.get_env("TZ"), Some("UTC"));
        assert_eq!(container.mounts()[0].kind, MountKind::Volume);
        assert_eq!(container.mounts()[0].identity(), "shop_media");
        assert_eq!(container.mounts()[1].kind, MountKind::Bind);
        assert_eq!(container.mounts()[1].identity(), "/srv/static");
    }
}
