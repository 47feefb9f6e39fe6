/// CLI argument parsing

use clap::{Parser, Subcommand};

// Build timestamp injected at compile time
pub const BUILD_TIMESTAMP: &str = env!("BUILD_TIMESTAMP");
pub const VERSION_WITH_BUILD: &str = concat!(env!("CARGO_PKG_VERSION"), " (built: ", env!("BUILD_TIMESTAMP"), ")");

#[derive(Parser)]
#[command(name = "rcb")]
#[command(author, version = VERSION_WITH_BUILD, about, long_about = None)]
pub struct Cli {
    /// Log level (error, warn, info, debug, trace); overrides LOG_LEVEL
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Show what would be backed up and check that every target answers
    Status,

    /// Run a backup in a new backup process container
    Backup,

    /// Run the backup inside the backup process container
    StartBackupProcess,

    /// Forget outdated snapshots and prune the repository
    Cleanup,

    /// List snapshots in the repository
    Snapshots,

    /// Send a test alert to every configured backend
    Alert,

    /// Print the crontab entry for the scheduled backup
    Crontab,

    /// Show version and build information
    Version,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        let cli = Cli::try_parse_from(["rcb", "start-backup-process"]).unwrap();
        assert_eq!(cli.command, Commands::StartBackupProcess);
        assert_eq!(cli.log_level, None);

        let cli = Cli::try_parse_from(["rcb", "status", "--log-level", "debug"]).unwrap();
        assert_eq!(cli.command, Commands::Status);
        assert_eq!(cli.log_level.as_deref(), Some("debug"));

        let cli = Cli::try_parse_from(["rcb", "-l", "warn", "backup"]).unwrap();
        assert_eq!(cli.command, Commands::Backup);
        assert_eq!(cli.log_level.as_deref(), Some("warn"));
    }

    #[test]
    fn test_command_required() {
        assert!(Cli::try_parse_from(["rcb"]).is_err());
        assert!(Cli::try_parse_from(["rcb", "restore"]).is_err());
    }
}
