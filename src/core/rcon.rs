//! Remote console (rcon) access for console managed game servers
//!
//! Commands go through the `rcon-cli` tool. The password is never put on the
//! command line; `rcon-cli` reads it from `RCON_PASSWORD`, which the caller
//! sets for the duration of the session.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::fmt;
use tokio::process::Command;
use tracing::{debug, error};

/// Turn off automatic saving
pub const SAVE_OFF: &str = "save-off";
/// Flush all worlds to disk
pub const SAVE_ALL: &str = "save-all";
pub const SYNC: &str = "sync";
pub const SAVE_ON: &str = "save-on";
/// Harmless command used as liveness probe
pub const HELP: &str = "help";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RconEndpoint {
    pub host: String,
    pub port: String,
}

impl fmt::Display for RconEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteConsole: Send + Sync {
    /// Run one console command; a non-zero exit is an error
    async fn command(&self, endpoint: &RconEndpoint, command: &str) -> Result<()>;
}

pub struct RconCli {
    binary: String,
}

impl Default for RconCli {
    fn default() -> Self {
        Self {
            binary: "rcon-cli".to_string(),
        }
    }
}

impl RconCli {
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl RemoteConsole for RconCli {
    async fn command(&self, endpoint: &RconEndpoint, command: &str) -> Result<()> {
        debug!("rcon-cli {} on {}", command, endpoint);

        let output = Command::new(&self.binary)
            .arg(format!("--host={}", endpoint.host))
            .arg(format!("--port={}", endpoint.port))
            .arg(command)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.binary))?;

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            debug!("{}", line);
        }
        for line in String::from_utf8_lossy(&output.stderr).lines() {
            error!("{}", line);
        }

        if !output.status.success() {
            bail!(
                "rcon-cli {} exited with a non-zero exit code: {}",
                command,
                output.status.code().unwrap_or(-1)
            );
        }
        Ok(())
    }
}
