//! SMTP alerts over an implicit TLS connection

use std::collections::HashMap;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{info, warn};

use super::AlertBackend;
use crate::core::error::BackupError;

const NAME: &str = "smtp";

pub struct SmtpAlert {
    host: String,
    port: u16,
    user: String,
    password: String,
    to: Vec<String>,
}

impl SmtpAlert {
    /// Configured when host, port, user and at least one recipient are set
    pub fn from_vars(vars: &HashMap<String, String>) -> Option<Self> {
        let get = |key: &str| {
            vars.get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let host = get("EMAIL_HOST")?;
        let port = get("EMAIL_PORT")?;
        let user = get("EMAIL_HOST_USER")?;
        let to: Vec<String> = get("EMAIL_SEND_TO")?
            .split(',')
            .map(|addr| addr.trim().to_string())
            .filter(|addr| !addr.is_empty())
            .collect();
        if to.is_empty() {
            return None;
        }

        let port = match port.parse::<u16>() {
            Ok(port) => port,
            Err(_) => {
                warn!("EMAIL_PORT is not a valid port: {}", port);
                return None;
            }
        };

        Some(Self {
            host,
            port,
            user,
            password: get("EMAIL_HOST_PASSWORD").unwrap_or_default(),
            to,
        })
    }

    pub fn recipients(&self) -> &[String] {
        &self.to
    }

    pub fn build_message(&self, subject: &str, body: &str) -> Result<Message, BackupError> {
        let from: Mailbox = self
            .user
            .parse()
            .map_err(|e| BackupError::alert(NAME, format!("invalid sender {}: {}", self.user, e)))?;

        let mut builder = Message::builder()
            .from(from)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN);

        for addr in &self.to {
            let mailbox: Mailbox = addr
                .parse()
                .map_err(|e| BackupError::alert(NAME, format!("invalid recipient {}: {}", addr, e)))?;
            builder = builder.to(mailbox);
        }

        builder
            .body(body.to_string())
            .map_err(|e| BackupError::alert(NAME, e))
    }
}

#[async_trait]
impl AlertBackend for SmtpAlert {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn send(&self, subject: &str, body: &str) -> Result<(), BackupError> {
        let email = self.build_message(subject, body)?;

        info!("Connecting to {} port {}", self.host, self.port);
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&self.host)
            .map_err(|e| BackupError::alert(NAME, e))?
            .port(self.port)
            .credentials(Credentials::new(self.user.clone(), self.password.clone()))
            .build();

        mailer
            .send(email)
            .await
            .map_err(|e| BackupError::alert(NAME, e))?;

        info!("Email sent");
        Ok(())
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

    fn complete() -> Vec<(&'static str, &'static str)> {
        vec![
            ("EMAIL_HOST", "smtp.example.com"),
            ("EMAIL_PORT", "465"),
            ("EMAIL_HOST_USER", "backup@example.com"),
            ("EMAIL_HOST_PASSWORD", "secret"),
            ("EMAIL_SEND_TO", "ops@example.com, admin@example.com,"),
        ]
    }

    #[test]
    fn test_configuration() {
        let smtp = SmtpAlert::from_vars(&vars(&complete())).unwrap();
        assert_eq!(smtp.recipients(), &["ops@example.com", "admin@example.com"]);

        for missing in ["EMAIL_HOST", "EMAIL_PORT", "EMAIL_HOST_USER", "EMAIL_SEND_TO"] {
            let partial: Vec<_> = complete().into_iter().filter(|(k, _)| *k != missing).collect();
            assert!(SmtpAlert::from_vars(&vars(&partial)).is_none(), "{} missing", missing);
        }

        let mut bad_port = complete();
        bad_port[1] = ("EMAIL_PORT", "smtps");
        assert!(SmtpAlert::from_vars(&vars(&bad_port)).is_none());

        // Password is optional
        let no_password: Vec<_> = complete()
            .into_iter()
            .filter(|(k, _)| *k != "EMAIL_HOST_PASSWORD")
            .collect();
        assert!(SmtpAlert::from_vars(&vars(&no_password)).is_some());
    }

    #[test]
    fn test_build_message() {
        let smtp = SmtpAlert::from_vars(&vars(&complete())).unwrap();
        let message = smtp
            .build_message("[ERROR] Backup failed", "restic exited with code 1")
            .unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(raw.contains("Subject: [ERROR] Backup failed"));
        assert!(raw.contains("From: backup@example.com"));
        assert!(raw.contains("ops@example.com"));
        assert!(raw.contains("admin@example.com"));
        assert!(raw.contains("restic exited with code 1"));
    }

    #[test]
    fn test_invalid_sender() {
        let mut settings = complete();
        settings[2] = ("EMAIL_HOST_USER", "not an address");
        let smtp = SmtpAlert::from_vars(&vars(&settings)).unwrap();
        assert!(matches!(
            smtp.build_message("subject", "body"),
            Err(BackupError::AlertDelivery { .. })
        ));
    }
}
