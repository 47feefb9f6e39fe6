/// Error taxonomy for discovery and backup runs
///
/// Only `Config`, `Discovery` and `Concurrency` abort a command. Target,
/// retention and integrity failures are recorded and folded into the run's
/// outcome; alert delivery failures are only logged.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackupError {
    /// A required setting is absent or malformed
    #[error("Configuration error: {0}")]
    Config(String),

    /// The container this process runs in could not be identified
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Another backup process container is already running
    #[error("Backup process already running: {0}")]
    Concurrency(String),

    /// One backup target failed (ping, dump or copy)
    #[error("Backup of {target} failed: {reason}")]
    Target { target: String, reason: String },

    #[error("Retention cleanup failed with exit code {0}")]
    Retention(i32),

    #[error("Repository check failed with exit code {0}")]
    Integrity(i32),

    #[error("Alert backend '{backend}' failed: {reason}")]
    AlertDelivery { backend: String, reason: String },

    #[error("Container runtime error: {0}")]
    Runtime(#[from] bollard::errors::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackupError {
    pub fn target(target: impl Into<String>, reason: impl ToString) -> Self {
        Self::Target {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    pub fn alert(backend: impl Into<String>, reason: impl ToString) -> Self {
        Self::AlertDelivery {
            backend: backend.into(),
            reason: reason.to_string(),
        }
    }

    /// Errors that end the invocation immediately
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BackupError::Config(_) | BackupError::Discovery(_) | BackupError::Concurrency(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(BackupError::Config("RESTIC_REPOSITORY".into()).is_fatal());
        assert!(BackupError::Discovery("no self".into()).is_fatal());
        assert!(BackupError::Concurrency("abc".into()).is_fatal());
        assert!(!BackupError::target("db", "exit 1").is_fatal());
        assert!(!BackupError::Retention(1).is_fatal());
        assert!(!BackupError::alert("smtp", "refused").is_fatal());
    }

    #[test]
    fn test_wrapped_errors_are_not_fatal() {
        let io = BackupError::from(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "backup.log"));
        assert!(matches!(io, BackupError::Io(_)));
        assert!(!io.is_fatal());

        let runtime = BackupError::from(bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message: "No such container".into(),
        });
        assert!(matches!(runtime, BackupError::Runtime(_)));
        assert!(!runtime.is_fatal());
    }

    #[test]
    fn test_display() {
        let err = BackupError::target("mysql in service db", "exit code 2");
        assert_eq!(err.to_string(), "Backup of mysql in service db failed: exit code 2");
    }
}
