//! Alerts
//!
//! Every configured backend receives each alert. A failing backend is logged
//! and skipped; sending an alert never fails the caller.

pub mod smtp;
pub mod webhook;

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::core::error::BackupError;

pub use smtp::SmtpAlert;
pub use webhook::DiscordWebhookAlert;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    Info,
    Error,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "INFO",
            AlertSeverity::Error => "ERROR",
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AlertBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, subject: &str, body: &str) -> Result<(), BackupError>;
}

pub struct AlertDispatcher {
    backends: Vec<Box<dyn AlertBackend>>,
}

impl AlertDispatcher {
    pub fn new(backends: Vec<Box<dyn AlertBackend>>) -> Self {
        Self { backends }
    }

    /// Backends whose settings are complete in `vars`
    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        let mut backends: Vec<Box<dyn AlertBackend>> = Vec::new();

        match SmtpAlert::from_vars(vars) {
            Some(smtp) => backends.push(Box::new(smtp)),
            None => debug!("Alert backend 'smtp' not configured"),
        }
        match DiscordWebhookAlert::from_vars(vars) {
            Some(webhook) => backends.push(Box::new(webhook)),
            None => debug!("Alert backend 'discord_webhook' not configured"),
        }

        Self { backends }
    }

    pub fn from_env() -> Self {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn backend_names(&self) -> Vec<&'static str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// Send to all backends; returns how many accepted the alert
    pub async fn send(&self, subject: &str, body: &str, severity: AlertSeverity) -> usize {
        if self.backends.is_empty() {
            info!("No alerts configured");
            return 0;
        }

        let subject = format!("[{}] {}", severity, subject);
        let mut delivered = 0;

        for backend in &self.backends {
            info!("Configured: {}", backend.name());
            match backend.send(&subject, body).await {
                Ok(()) => delivered += 1,
                Err(e) => error!("{}", e),
            }
        }

        delivered
    }
}
