mod cli;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, BUILD_TIMESTAMP};
use restic_compose_backup::core::cron::generate_crontab;
use restic_compose_backup::core::{AlertDispatcher, BackupError, Config, DockerManager, Orchestrator, RconCli, Restic, RunReport};

#[tokio::main]
async fn main() -> ExitCode {
    // Optional .env next to the binary, real environment wins
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let level = cli.log_level.clone().or_else(|| std::env::var("LOG_LEVEL").ok());
    init_logging(level.as_deref());

    if cli.command == Commands::Version {
        println!("rcb {}", env!("CARGO_PKG_VERSION"));
        println!("built: {}", BUILD_TIMESTAMP);
        return ExitCode::SUCCESS;
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(cli.command, &config).await {
        Ok(code) => code,
        Err(e) => {
            match e.downcast_ref::<BackupError>() {
                Some(backup_error) if backup_error.is_fatal() => error!("Aborted: {}", backup_error),
                _ => error!("{:#}", e),
            }
            ExitCode::FAILURE
        }
    }
}

fn init_logging(level: Option<&str>) {
    let filter = EnvFilter::try_new(level.unwrap_or("info")).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Adapters every orchestrated command needs
struct Services {
    docker: DockerManager,
    restic: Restic,
    console: RconCli,
    alerts: AlertDispatcher,
}

impl Services {
    fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            docker: DockerManager::new(config)?,
            restic: Restic::new(config),
            console: RconCli::default(),
            alerts: AlertDispatcher::from_env(),
        })
    }

    fn orchestrator<'a>(&'a self, config: &'a Config) -> Orchestrator<'a> {
        Orchestrator::new(config, &self.docker, &self.restic, &self.console, &self.alerts)
    }
}

async fn run(command: Commands, config: &Config) -> Result<ExitCode> {
    if command == Commands::Crontab {
        print!("{}", generate_crontab(config));
        return Ok(ExitCode::SUCCESS);
    }

    let services = Services::new(config)?;
    let orchestrator = services.orchestrator(config);

    match command {
        Commands::Status => handle_status(&services, &orchestrator).await,
        Commands::Backup => Ok(finish(&orchestrator.backup().await?)),
        Commands::StartBackupProcess => Ok(finish(&orchestrator.start_backup_process().await?)),
        Commands::Cleanup => {
            orchestrator.cleanup().await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Snapshots => {
            print!("{}", orchestrator.snapshots().await?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Alert => {
            let delivered = orchestrator.test_alert().await?;
            info!("Test alert delivered to {} backend(s)", delivered);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Crontab | Commands::Version => Ok(ExitCode::SUCCESS),
    }
}

async fn handle_status(services: &Services, orchestrator: &Orchestrator<'_>) -> Result<ExitCode> {
    if !services.docker.check_docker().await {
        error!("Docker daemon is not reachable");
        return Ok(ExitCode::FAILURE);
    }

    let report = orchestrator.status().await?;
    let unreachable = report
        .services
        .iter()
        .filter(|s| matches!(s.target, Some((_, false))))
        .count();
    if unreachable > 0 {
        info!("{} target(s) not reachable", unreachable);
    }

    Ok(ExitCode::SUCCESS)
}

fn finish(report: &RunReport) -> ExitCode {
    for failure in report.failures() {
        if let Some(e) = &failure.error {
            error!("{}", e);
        }
    }
    info!("Finished in state {:?}", report.state());

    if report.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
