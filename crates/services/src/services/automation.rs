//! Forwards completed focus sessions to the user's automation webhook.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use ts_rs::TS;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("automation webhook is not configured")]
    NotConfigured,
    #[error("webhook request failed: {0}")]
    Transport(String),
    #[error("webhook responded with status {0}")]
    Status(u16),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
pub struct TimerCompletion {
    pub task_name: String,
    pub duration_minutes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TimerCompletion {
    pub fn new(task_name: impl Into<String>, duration_minutes: u32) -> Self {
        Self {
            task_name: task_name.into(),
            duration_minutes,
            completed_at: Some(Utc::now()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AutomationWebhook {
    http: Client,
    url: Option<String>,
}

impl AutomationWebhook {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(url: Option<String>) -> Result<Self, WebhookError> {
        let http = Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .build()
            .map_err(|e| WebhookError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            url: url.filter(|u| !u.trim().is_empty()),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some()
    }

    /// POST the completion as JSON. Only a 2xx answer counts as delivered.
    pub async fn notify_completion(
        &self,
        completion: &TimerCompletion,
    ) -> Result<(), WebhookError> {
        let url = self.url.as_deref().ok_or(WebhookError::NotConfigured)?;
        let res = self
            .http
            .post(url)
            .json(completion)
            .send()
            .await
            .map_err(|e| WebhookError::Transport(e.to_string()))?;

        let status = res.status();
        if !status.is_success() {
            warn!(
                status = status.as_u16(),
                task = %completion.task_name,
                "automation webhook rejected completion"
            );
            return Err(WebhookError::Status(status.as_u16()));
        }
        info!(
            task = %completion.task_name,
            minutes = completion.duration_minutes,
            "focus completion delivered"
        );
        Ok(())
    }
}
