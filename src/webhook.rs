//! Webhook client for chat-session records.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{header, Client, Url};
use serde_json::Value;
use tracing::{debug, info};

use crate::record::{parse_payload, EventRecord};
use crate::window::Window;
use crate::{Error, Result};

pub const DEFAULT_LIMIT: u32 = 1000;

/// Anything that can produce event records for a window.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn fetch(&self, window: Window, now: DateTime<Utc>) -> Result<Vec<EventRecord>>;
}

/// Webhook client settings.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub url: String,
    pub limit: u32,
    pub timeout_secs: u64,
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            limit: DEFAULT_LIMIT,
            timeout_secs: 30,
        }
    }
}

/// Reject empty URLs and template placeholders such as `YOUR_WEBHOOK_URL`.
pub fn validate_endpoint(url: &str) -> Result<Url> {
    let trimmed = url.trim();
    if trimmed.is_empty() || trimmed.contains("YOUR_") {
        return Err(Error::EndpointNotConfigured(trimmed.to_string()));
    }
    Url::parse(trimmed)
        .map_err(|e| Error::InvalidArgument(format!("invalid webhook URL '{}': {}", trimmed, e)))
}

/// ISO-8601 with millisecond precision and a `Z` suffix.
pub fn iso_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub struct WebhookClient {
    config: WebhookConfig,
    http: Client,
}

impl WebhookClient {
    pub fn new(config: WebhookConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("chat_dashboard/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::InvalidArgument(format!("HTTP client error: {}", e)))?;

        Ok(Self { config, http })
    }

    /// Full request URL for `window` ending at `now`.
    pub fn request_url(&self, window: Window, now: DateTime<Utc>) -> Result<Url> {
        let mut url = validate_endpoint(&self.config.url)?;
        let start = now - window.duration();
        url.query_pairs_mut()
            .append_pair("startTime", &iso_timestamp(start))
            .append_pair("endTime", &iso_timestamp(now))
            .append_pair("limit", &self.config.limit.to_string())
            .append_pair("batch", "true");
        Ok(url)
    }
}

#[async_trait]
impl RecordSource for WebhookClient {
    async fn fetch(&self, window: Window, now: DateTime<Utc>) -> Result<Vec<EventRecord>> {
        let url = self.request_url(window, now)?;
        info!(window = %window, "Fetching dashboard data");
        debug!(url = %url, "Webhook request");

        let response = self
            .http
            .get(url)
            .header(header::ACCEPT, "application/json")
            .header(header::CONTENT_TYPE, "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpError(format!("webhook returned {}", status)));
        }

        let payload: Value = response.json().await?;
        let records = parse_payload(payload);
        info!(records = records.len(), window = %window, "Webhook data received");
        Ok(records)
    }
}
