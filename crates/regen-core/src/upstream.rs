//! HTTP adapter for the upstream platform: agent outputs, tool snapshots,
//! tenant instructions, the regeneration endpoint, and health checks.
//!
//! Every request carries the configured per-request timeout and, when the
//! token variable is set, a bearer token.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::UpstreamConfig;
use crate::error::{RegenError, Result};
use crate::external::{
    FetchContext, HealthProbe, RegenerationParams, Regenerator, RunResult, TenantInstructions,
    TriggerMetadata, UpstreamProvider,
};

#[derive(Serialize)]
struct RunRequest<'a> {
    params: &'a RegenerationParams,
    trigger: &'a TriggerMetadata,
}

#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpUpstream {
    /// Build a client from config. The bearer token is read from the
    /// environment variable named by `token_env`.
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| RegenError::Upstream(format!("building http client: {e}")))?;
        let token = std::env::var(&config.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty());
        if token.is_none() {
            tracing::debug!(var = %config.token_env, "no upstream token set; sending unauthenticated requests");
        }
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send<T: DeserializeOwned>(&self, url: &str, req: reqwest::RequestBuilder) -> Result<T> {
        let resp = self
            .authorize(req)
            .send()
            .await
            .map_err(|e| transport_error(url, e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(RegenError::Upstream(format!("{url} returned {status}: {snippet}")));
        }
        resp.json::<T>()
            .await
            .map_err(|e| RegenError::Upstream(format!("{url}: invalid response body: {e}")))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = self.url(path);
        let req = self.client.get(&url).query(query);
        self.send(&url, req).await
    }
}

fn transport_error(url: &str, e: reqwest::Error) -> RegenError {
    if e.is_timeout() {
        RegenError::Timeout(url.to_string())
    } else {
        RegenError::Upstream(format!("{url}: {e}"))
    }
}

fn page_query(ctx: &FetchContext) -> Vec<(&'static str, String)> {
    vec![
        ("page_id", ctx.page_id.clone()),
        ("tier", u8::from(ctx.tier).to_string()),
        ("mode", ctx.mode.as_str().to_string()),
    ]
}

#[async_trait]
impl UpstreamProvider for HttpUpstream {
    async fn fetch_instructions(&self) -> Result<TenantInstructions> {
        self.get_json("/instructions", &[]).await
    }

    async fn fetch_agent_output(
        &self,
        agent_id: &str,
        ctx: &FetchContext,
    ) -> Result<serde_json::Value> {
        self.get_json(&format!("/agents/{agent_id}/output"), &page_query(ctx))
            .await
    }

    async fn fetch_tool_data(&self, tool_id: &str, ctx: &FetchContext) -> Result<serde_json::Value> {
        self.get_json(&format!("/tools/{tool_id}/data"), &page_query(ctx))
            .await
    }
}

#[async_trait]
impl Regenerator for HttpUpstream {
    async fn run_regeneration(
        &self,
        workflow_id: &str,
        params: &RegenerationParams,
        trigger: &TriggerMetadata,
    ) -> Result<RunResult> {
        let url = self.url(&format!("/workflows/{workflow_id}/runs"));
        let req = self.client.post(&url).json(&RunRequest { params, trigger });
        self.send(&url, req).await
    }
}

#[async_trait]
impl HealthProbe for HttpUpstream {
    /// Healthy when `/health/<check>` answers 2xx and does not report
    /// `"healthy": false`. Any transport error counts as unhealthy.
    async fn is_healthy(&self, check: &str) -> bool {
        match self
            .get_json::<serde_json::Value>(&format!("/health/{check}"), &[])
            .await
        {
            Ok(body) => body.get("healthy").and_then(|v| v.as_bool()) != Some(false),
            Err(e) => {
                tracing::debug!(check, error = %e, "health probe failed");
                false
            }
        }
    }
}
