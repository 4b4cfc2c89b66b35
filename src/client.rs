//! HTTP client for the knowledge-graph API.
//!
//! Every tool invocation turns into exactly one GET request. Whatever happens
//! on the wire is folded into a [`ToolResult`]; nothing escapes as an error
//! and nothing is retried.

use std::time::{Duration, Instant};

use serde_json::Value;

use crate::error::{AssistantError, Result};
use crate::message::ToolResult;

/// Configuration for the knowledge-graph API client
#[derive(Debug, Clone)]
pub struct RemoteApiConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for RemoteApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://neo4j-fastapi.vercel.app".to_string(),
            timeout_secs: 30,
            user_agent: format!("evokg-assistant/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl RemoteApiConfig {
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs.max(1);
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Clone)]
pub struct RemoteApiClient {
    http: reqwest::Client,
    config: RemoteApiConfig,
}

impl RemoteApiClient {
    pub fn new(config: RemoteApiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|err| AssistantError::Config(format!("http client error: {err}")))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &RemoteApiConfig {
        &self.config
    }

    pub fn url_for(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return endpoint.to_string();
        }
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    /// Run one GET against `endpoint` and normalize the outcome.
    pub async fn call(
        &self,
        endpoint: &str,
        params: &[(String, String)],
        timeout: Duration,
    ) -> ToolResult {
        let url = self.url_for(endpoint);
        let started = Instant::now();
        tracing::debug!(%url, ?params, "dispatching knowledge-graph request");

        match self.fetch(&url, params, timeout).await {
            Ok(payload) => {
                tracing::debug!(%url, elapsed = ?started.elapsed(), "knowledge-graph request succeeded");
                ToolResult::ok(payload)
            }
            Err(err) => {
                tracing::warn!(%url, elapsed = ?started.elapsed(), error = %err, "knowledge-graph request failed");
                ToolResult::from(err)
            }
        }
    }

    /// Fetch a JSON document such as the service's OpenAPI description.
    /// Unlike [`call`](Self::call), failures are returned as errors.
    pub async fn fetch_json(&self, endpoint: &str) -> Result<Value> {
        let url = self.url_for(endpoint);
        tracing::debug!(%url, "fetching JSON document");
        self.fetch(&url, &[], self.config.timeout()).await
    }

    async fn fetch(
        &self,
        url: &str,
        params: &[(String, String)],
        timeout: Duration,
    ) -> Result<Value> {
        let response = self
            .http
            .get(url)
            .query(params)
            .timeout(timeout)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    AssistantError::Transport(format!(
                        "request to {url} timed out after {}s",
                        timeout.as_secs_f32()
                    ))
                } else {
                    AssistantError::Transport(format!("request to {url} failed: {err}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AssistantError::Remote {
                status: status.as_u16(),
                body: truncate(&body, 512),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| AssistantError::Transport(format!("reading body from {url}: {err}")))?;
        serde_json::from_slice(&body).map_err(|err| AssistantError::Decode(err.to_string()))
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
