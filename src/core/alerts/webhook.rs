//! Discord style webhook alerts

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::info;

use super::AlertBackend;
use crate::core::error::BackupError;
use crate::utils::tail_chars;

const NAME: &str = "discord_webhook";
const MAX_TITLE_CHARS: usize = 256;
const MAX_DESCRIPTION_CHARS: usize = 2048;

pub struct DiscordWebhookAlert {
    url: String,
    client: Client,
}

impl DiscordWebhookAlert {
    pub fn from_vars(vars: &HashMap<String, String>) -> Option<Self> {
        let url = vars.get("DISCORD_WEBHOOK")?.trim();
        if !url.starts_with("https://") {
            return None;
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .ok()?;

        Some(Self {
            url: url.to_string(),
            client,
        })
    }

    /// One embed; the newest part of long texts is kept
    pub fn payload(subject: &str, body: &str) -> Value {
        json!({
            "embeds": [
                {
                    "title": tail_chars(subject, MAX_TITLE_CHARS),
                    "description": tail_chars(body, MAX_DESCRIPTION_CHARS),
                }
            ]
        })
    }
}

#[async_trait]
impl AlertBackend for DiscordWebhookAlert {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn send(&self, subject: &str, body: &str) -> Result<(), BackupError> {
        info!("Triggering discord webhook");

        let response = self
            .client
            .post(&self.url)
            .query(&[("wait", "true")])
            .json(&Self::payload(subject, body))
            .send()
            .await
            .map_err(|e| BackupError::alert(NAME, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BackupError::alert(NAME, format!("{}: {}", status, text)));
        }

        info!("Discord webhook successful");
        Ok(())
    }
}
