//! Remote ruleset sources.

use super::Ruleset;
use crate::error::SyncError;
use async_trait::async_trait;
use std::time::Duration;

/// Somewhere a fresh ruleset can be fetched from.
#[async_trait]
pub trait RulesetSource: Send + Sync {
    /// Fetch the latest ruleset.
    async fn fetch(&self) -> Result<Ruleset, SyncError>;
}

/// Fetches the ruleset from the patterns endpoint.
#[derive(Debug, Clone)]
pub struct HttpRulesetSource {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpRulesetSource {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("zentinel-agent-bot-telemetry/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self::with_client(client, endpoint, api_key))
    }

    /// Build a source that shares an existing HTTP client.
    pub fn with_client(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RulesetSource for HttpRulesetSource {
    async fn fetch(&self) -> Result<Ruleset, SyncError> {
        let response = self
            .client
            .get(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Status(status.as_u16()));
        }

        response
            .json::<Ruleset>()
            .await
            .map_err(|e| SyncError::Decode(e.to_string()))
    }
}
