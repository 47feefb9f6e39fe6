/// Label names, environment keys and fixed paths
///
/// Based on the label schema services declare in their docker-compose.yml

/// Namespace shared by every label this tool reads
pub const LABEL_NAMESPACE: &str = "restic-compose-backup";

pub const LABEL_VOLUMES_ENABLED: &str = "restic-compose-backup.volumes";
pub const LABEL_VOLUMES_INCLUDE: &str = "restic-compose-backup.volumes.include";
pub const LABEL_VOLUMES_EXCLUDE: &str = "restic-compose-backup.volumes.exclude";
pub const LABEL_MYSQL_ENABLED: &str = "restic-compose-backup.mysql";
pub const LABEL_MARIADB_ENABLED: &str = "restic-compose-backup.mariadb";
pub const LABEL_POSTGRES_ENABLED: &str = "restic-compose-backup.postgres";
pub const LABEL_MINECRAFT_ENABLED: &str = "restic-compose-backup.minecraft";

/// Prefix of the per-project label marking the spawned backup process container
pub const LABEL_BACKUP_PROCESS: &str = "restic-compose-backup.backup_process";

/// Labels set by docker compose / swarm (read-only for us)
pub const LABEL_COMPOSE_PROJECT: &str = "com.docker.compose.project";
pub const LABEL_COMPOSE_SERVICE: &str = "com.docker.compose.service";
pub const LABEL_COMPOSE_ONEOFF: &str = "com.docker.compose.oneoff";
pub const LABEL_SWARM_SERVICE: &str = "com.docker.swarm.service.name";

/// Environment marker injected into the backup process container
pub const ENV_BACKUP_PROCESS: &str = "BACKUP_PROCESS_CONTAINER";

/// Command the backup process container is started with
pub const BACKUP_PROCESS_COMMAND: &[&str] = &["rcb", "start-backup-process"];

/// Mount prefixes inside the backup process container
pub const VOLUMES_PREFIX: &str = "/volumes";
pub const CONSOLES_PREFIX: &str = "/consoles";
pub const DATABASES_PREFIX: &str = "/databases";

/// Optional restic exclude file looked up inside the volumes prefix
pub const EXCLUDE_FILE_NAME: &str = ".backup_exclude";

/// Local log file receiving the backup process output
pub const DEFAULT_LOG_FILE: &str = "backup.log";

/// Default crontab entry
pub const DEFAULT_CRON_SCHEDULE: &str = "0 2 * * *";
pub const DEFAULT_CRON_COMMAND: &str = "source /env.sh && rcb backup > /proc/1/fd/1";

/// Default retention (restic forget) settings
pub const DEFAULT_KEEP_DAILY: u32 = 7;
pub const DEFAULT_KEEP_WEEKLY: u32 = 4;
pub const DEFAULT_KEEP_MONTHLY: u32 = 12;
pub const DEFAULT_KEEP_YEARLY: u32 = 3;

/// Default rcon port for console managed game servers
pub const DEFAULT_RCON_PORT: &str = "25575";
