/// Backup targets
///
/// A backup enabled container is classified once into the strategy used to
/// back it up. Plain volume backup is a separate membership test: a database
/// container can have its volumes backed up as well.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, error, info, warn};

use crate::core::config::Config;
use crate::core::container::{Container, Mount};
use crate::core::rcon::{RconEndpoint, RemoteConsole, HELP, SAVE_ALL, SAVE_OFF, SAVE_ON, SYNC};
use crate::core::restic::BackupTool;
use crate::core::runtime::ContainerRuntime;
use crate::utils::{EnvGuard, DEFAULT_RCON_PORT};

/// Collaborators a target needs to probe and back itself up
#[derive(Clone, Copy)]
pub struct BackupContext<'a> {
    pub config: &'a Config,
    pub runtime: &'a dyn ContainerRuntime,
    pub restic: &'a dyn BackupTool,
    pub console: &'a dyn RemoteConsole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseEngine {
    Mariadb,
    Mysql,
    Postgres,
}

impl DatabaseEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseEngine::Mariadb => "mariadb",
            DatabaseEngine::Mysql => "mysql",
            DatabaseEngine::Postgres => "postgres",
        }
    }

    /// Variable the dump and ping tools read the password from
    pub fn password_env(&self) -> &'static str {
        match self {
            DatabaseEngine::Mariadb | DatabaseEngine::Mysql => "MYSQL_PWD",
            DatabaseEngine::Postgres => "PGPASSWORD",
        }
    }
}

impl fmt::Display for DatabaseEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Specialized capabilities in classification order; the first enabled one wins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Capability {
    Database(DatabaseEngine),
    Console,
}

const PRECEDENCE: [Capability; 4] = [
    Capability::Database(DatabaseEngine::Mariadb),
    Capability::Database(DatabaseEngine::Mysql),
    Capability::Database(DatabaseEngine::Postgres),
    Capability::Console,
];

impl Capability {
    fn enabled(&self, container: &Container) -> bool {
        match self {
            Capability::Database(DatabaseEngine::Mariadb) => container.mariadb_backup_enabled(),
            Capability::Database(DatabaseEngine::Mysql) => container.mysql_backup_enabled(),
            Capability::Database(DatabaseEngine::Postgres) => container.postgres_backup_enabled(),
            Capability::Console => container.console_backup_enabled(),
        }
    }
}

/// A container whose mounts are backed up as plain files
#[derive(Debug, Clone)]
pub struct VolumeTarget {
    container: Container,
}

impl VolumeTarget {
    pub fn classify(container: &Container) -> Option<Self> {
        container.volume_backup_enabled().then(|| Self {
            container: container.clone(),
        })
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    pub fn mounts<'a>(&'a self, config: &Config) -> Vec<&'a Mount> {
        self.container.filter_mounts(config)
    }
}

#[derive(Debug, Clone)]
pub enum BackupTarget {
    Database(DatabaseTarget),
    ConsoleManaged(ConsoleTarget),
}

impl BackupTarget {
    /// Resolve the specialized strategy for a container, if any
    pub fn classify(container: &Container) -> Option<Self> {
        PRECEDENCE
            .iter()
            .find(|capability| capability.enabled(container))
            .map(|capability| match capability {
                Capability::Database(engine) => BackupTarget::Database(DatabaseTarget {
                    container: container.clone(),
                    engine: *engine,
                }),
                Capability::Console => BackupTarget::ConsoleManaged(ConsoleTarget {
                    container: container.clone(),
                }),
            })
    }

    pub fn container(&self) -> &Container {
        match self {
            BackupTarget::Database(target) => &target.container,
            BackupTarget::ConsoleManaged(target) => &target.container,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BackupTarget::Database(target) => target.engine.as_str(),
            BackupTarget::ConsoleManaged(_) => "minecraft",
        }
    }

    pub fn is_database(&self) -> bool {
        matches!(self, BackupTarget::Database(_))
    }

    pub fn is_console_managed(&self) -> bool {
        matches!(self, BackupTarget::ConsoleManaged(_))
    }

    pub async fn ping(&self, ctx: &BackupContext<'_>) -> bool {
        match self {
            BackupTarget::Database(target) => target.ping(ctx).await,
            BackupTarget::ConsoleManaged(target) => target.ping(ctx).await,
        }
    }

    /// Back up the target; the returned code is 0 on success
    pub async fn backup(&self, ctx: &BackupContext<'_>) -> Result<i32> {
        match self {
            BackupTarget::Database(target) => target.backup(ctx).await,
            BackupTarget::ConsoleManaged(target) => target.backup(ctx).await,
        }
    }

    pub fn destination_path(&self, config: &Config) -> String {
        match self {
            BackupTarget::Database(target) => target.destination_path(config),
            BackupTarget::ConsoleManaged(target) => target.destination_path(config),
        }
    }
}

impl fmt::Display for BackupTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in service {}", self.kind(), self.container().service_name())
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseTarget {
    container: Container,
    engine: DatabaseEngine,
}

impl DatabaseTarget {
    pub fn engine(&self) -> DatabaseEngine {
        self.engine
    }

    pub fn username(&self) -> &str {
        match self.engine {
            DatabaseEngine::Mariadb | DatabaseEngine::Mysql => "root",
            DatabaseEngine::Postgres => self
                .container
                .get_env("POSTGRES_USER")
                .filter(|u| !u.is_empty())
                .unwrap_or("postgres"),
        }
    }

    /// Password from the database container's own environment
    pub fn password(&self) -> Option<&str> {
        let env = |name| self.container.get_env(name).filter(|v| !v.is_empty());
        match self.engine {
            DatabaseEngine::Mariadb => env("MARIADB_ROOT_PASSWORD").or_else(|| env("MYSQL_ROOT_PASSWORD")),
            DatabaseEngine::Mysql => env("MYSQL_ROOT_PASSWORD"),
            DatabaseEngine::Postgres => env("POSTGRES_PASSWORD"),
        }
    }

    pub fn ping_command(&self) -> Vec<String> {
        match self.engine {
            DatabaseEngine::Mariadb | DatabaseEngine::Mysql => vec![
                "mysqladmin".to_string(),
                "ping".to_string(),
                format!("--user={}", self.username()),
            ],
            DatabaseEngine::Postgres => vec![
                "pg_isready".to_string(),
                format!("--username={}", self.username()),
            ],
        }
    }

    /// Dump of all databases, run inside the database container
    pub fn dump_command(&self) -> Vec<String> {
        match self.engine {
            DatabaseEngine::Mariadb | DatabaseEngine::Mysql => vec![
                "mysqldump".to_string(),
                format!("--user={}", self.username()),
                "--all-databases".to_string(),
            ],
            DatabaseEngine::Postgres => vec![
                "pg_dumpall".to_string(),
                format!("--username={}", self.username()),
            ],
        }
    }

    /// `docker exec` invocation streaming the dump to stdout.
    ///
    /// The password variable is only named here; its value is taken from
    /// our own environment at spawn time.
    pub fn source_command(&self, config: &Config) -> Vec<String> {
        let mut command = vec!["docker".to_string()];
        if let Some(host) = &config.docker_host {
            command.push("--host".to_string());
            command.push(host.clone());
        }
        command.push("exec".to_string());
        command.push("-i".to_string());
        if self.password().is_some() {
            command.push("-e".to_string());
            command.push(self.engine.password_env().to_string());
        }
        command.push(self.container.id().to_string());
        command.extend(self.dump_command());
        command
    }

    /// `/databases[/project]/service/all_databases.sql`
    pub fn destination_path(&self, config: &Config) -> String {
        self.container
            .service_path(&config.paths.databases, config)
            .join("all_databases.sql")
            .to_string_lossy()
            .into_owned()
    }

    fn exec_env(&self) -> Vec<String> {
        self.password()
            .map(|pw| vec![format!("{}={}", self.engine.password_env(), pw)])
            .unwrap_or_default()
    }

    pub async fn ping(&self, ctx: &BackupContext<'_>) -> bool {
        debug!("Checking if {} in {} is up", self.engine, self.container.service_name());
        match ctx
            .runtime
            .exec(self.container.id(), self.ping_command(), self.exec_env())
            .await
        {
            Ok(output) if output.exit_code == 0 => true,
            Ok(output) => {
                debug!("{} ping exited with {}: {}", self.engine, output.exit_code, output.output.trim());
                false
            }
            Err(e) => {
                warn!("{} ping failed: {:#}", self.engine, e);
                false
            }
        }
    }

    pub async fn backup(&self, ctx: &BackupContext<'_>) -> Result<i32> {
        let _password = self
            .password()
            .map(|pw| EnvGuard::set(self.engine.password_env(), pw));

        ctx.restic
            .backup_from_stdin(self.destination_path(ctx.config), self.source_command(ctx.config))
            .await
    }
}

/// A game server that must be quiesced over its remote console before copying
#[derive(Debug, Clone)]
pub struct ConsoleTarget {
    container: Container,
}

impl ConsoleTarget {
    pub fn endpoint(&self) -> RconEndpoint {
        RconEndpoint {
            host: self.container.hostname().to_string(),
            port: self
                .container
                .get_env("RCON_PORT")
                .filter(|p| !p.is_empty())
                .unwrap_or(DEFAULT_RCON_PORT)
                .to_string(),
        }
    }

    fn password_guard(&self) -> Option<EnvGuard> {
        self.container
            .get_env("RCON_PASSWORD")
            .map(|pw| EnvGuard::set("RCON_PASSWORD", pw))
    }

    /// `/consoles[/project]/service`
    pub fn destination_path(&self, config: &Config) -> String {
        self.container
            .service_path(&config.paths.consoles, config)
            .to_string_lossy()
            .into_owned()
    }

    /// Paths of the selected mounts inside the backup process container
    pub fn backup_paths(&self, config: &Config) -> Vec<PathBuf> {
        self.container
            .filter_mounts(config)
            .into_iter()
            .map(|mount| {
                PathBuf::from(self.container.destination_path(mount, &config.paths.consoles, config))
            })
            .collect()
    }

    pub async fn ping(&self, ctx: &BackupContext<'_>) -> bool {
        let _password = self.password_guard();
        ctx.console.command(&self.endpoint(), HELP).await.is_ok()
    }

    /// Disable saving and flush everything to disk
    pub async fn prepare(&self, console: &dyn RemoteConsole, endpoint: &RconEndpoint) -> Result<()> {
        for command in [SAVE_OFF, SAVE_ALL, SYNC] {
            console.command(endpoint, command).await?;
        }
        Ok(())
    }

    pub async fn finalize(&self, console: &dyn RemoteConsole, endpoint: &RconEndpoint) -> Result<()> {
        console.command(endpoint, SAVE_ON).await
    }

    async fn copy(&self, ctx: &BackupContext<'_>) -> Result<i32> {
        let mut exit_code = 0;
        for path in self.backup_paths(ctx.config) {
            info!("Backing up {}", path.display());
            let code = ctx.restic.backup_files(path.clone(), None).await?;
            debug!("Console managed backup exit code: {}", code);
            if code != 0 {
                error!("Backup of {} exited with non-zero code: {}", path.display(), code);
                exit_code = code;
            }
        }
        Ok(exit_code)
    }

    pub async fn backup(&self, ctx: &BackupContext<'_>) -> Result<i32> {
        let _password = self.password_guard();
        let endpoint = self.endpoint();

        let copied = match self.prepare(ctx.console, &endpoint).await {
            Ok(()) => self.copy(ctx).await,
            Err(e) => Err(e),
        };

        // Saving is turned back on whatever happened above
        let finalized = self.finalize(ctx.console, &endpoint).await;

        match (copied, finalized) {
            (Err(e), Err(finalize_err)) => {
                error!("Failed to turn saving back on: {:#}", finalize_err);
                Err(e)
            }
            (Err(e), Ok(())) | (Ok(_), Err(e)) => Err(e),
            (Ok(code), Ok(())) => Ok(code),
        }
    }
}

/// Mount prefix a container's selected mounts are placed under
pub fn mount_prefix<'a>(container: &Container, config: &'a Config) -> &'a Path {
    match BackupTarget::classify(container) {
        Some(BackupTarget::ConsoleManaged(_)) => &config.paths.consoles,
        _ => &config.paths.volumes,
    }
}
