//! Webhook Client
//!
//! Posts `{"to", "content"}` to a statically configured endpoint and parses
//! the JSON object it answers with. Every request is bounded by connect and
//! request timeouts.

use std::time::Duration;

use async_trait::async_trait;
use pb_common::{WebhookPayload, WebhookResponse};
use tracing::{debug, warn};

use crate::error::{DispatchError, Result};

#[async_trait]
pub trait WebhookClient: Send + Sync {
    async fn send(&self, payload: &WebhookPayload) -> Result<WebhookResponse>;
}

/// HTTP webhook client configuration
#[derive(Debug, Clone)]
pub struct HttpWebhookConfig {
    pub url: String,
    /// Optional Bearer token for authentication
    pub auth_token: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for HttpWebhookConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9000/webhook".to_string(),
            auth_token: None,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Webhook client backed by reqwest
pub struct HttpWebhookClient {
    config: HttpWebhookConfig,
    client: reqwest::Client,
}

impl HttpWebhookClient {
    pub fn new(config: HttpWebhookConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| DispatchError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }
}

#[async_trait]
impl WebhookClient for HttpWebhookClient {
    async fn send(&self, payload: &WebhookPayload) -> Result<WebhookResponse> {
        let mut request = self.client.post(&self.config.url).json(payload);

        if let Some(ref token) = self.config.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                DispatchError::Transport(format!("request timed out: {}", e))
            } else {
                DispatchError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| DispatchError::Transport(format!("failed to read response body: {}", e)))?;

        if !status.is_success() {
            let error_body = String::from_utf8_lossy(&body);
            warn!(%status, body = %error_body, "Webhook rejected delivery");
            return Err(DispatchError::Transport(format!("HTTP {}: {}", status, error_body)));
        }

        let parsed: WebhookResponse = serde_json::from_slice(&body)
            .map_err(|e| DispatchError::Decode(e.to_string()))?;

        debug!(%status, fields = parsed.fields.len(), "Webhook accepted delivery");
        Ok(parsed)
    }
}
