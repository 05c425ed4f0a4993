//! REST client for the cloud memory service.
//!
//! Wraps a `reqwest::Client` with automatic retry + exponential back-off
//! on transient (5xx / timeout) failures. 4xx responses are permanent
//! and surface immediately.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;

use ami_domain::config::MemoryConfig;
use ami_domain::error::{Error, Result};

use crate::types::{MemoryAddRequest, MemoryPlanResponse, MemoryQueryResponse};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The read/write surface the engine sees. Implemented by the REST
/// client and by in-memory fakes in tests.
#[async_trait]
pub trait MemoryProvider: Send + Sync {
    /// Task-level query: cognitive phrase + supporting states.
    async fn query_task(&self, text: &str) -> Result<MemoryQueryResponse>;

    /// Stitch a navigation path between two known states.
    async fn query_navigation(
        &self,
        start_state: &str,
        end_state: &str,
    ) -> Result<MemoryQueryResponse>;

    /// Known intent sequences and outgoing actions at a state/URL.
    async fn query_actions(
        &self,
        current_state: &str,
        target: Option<&str>,
    ) -> Result<MemoryQueryResponse>;

    /// Higher-level "produce a plan with preferences/hints" call.
    async fn plan_task(&self, text: &str) -> Result<MemoryPlanResponse>;

    /// Online-learning write; fire on subtask completion only.
    async fn add_operations(&self, req: MemoryAddRequest) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// REST client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct RestMemoryClient {
    http: Client,
    /// Separate client for the slower plan endpoint.
    plan_http: Client,
    base_url: String,
    api_key: Option<String>,
    max_retries: u32,
}

impl RestMemoryClient {
    pub fn new(cfg: &MemoryConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        let plan_http = Client::builder()
            .timeout(Duration::from_secs(cfg.plan_timeout_secs))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            http,
            plan_http,
            base_url: cfg.base_url.trim_end_matches('/').to_owned(),
            api_key: cfg.api_key.clone(),
            max_retries: cfg.max_retries,
        })
    }

    fn decorate(&self, rb: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => rb.bearer_auth(key),
            None => rb,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// POST with retry + back-off; parse the JSON body on success.
    async fn post_json<T: DeserializeOwned>(
        &self,
        client: &Client,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        let url = self.url(path);
        let resp = self
            .execute_with_retry(path, || self.decorate(client.post(&url).json(&body)))
            .await?;

        let text = resp
            .text()
            .await
            .map_err(|e| Error::Memory(e.to_string()))?;
        serde_json::from_str(&text)
            .map_err(|e| Error::Memory(format!("failed to parse {path} response: {e}: {text}")))
    }

    async fn execute_with_retry(
        &self,
        endpoint: &str,
        build_request: impl Fn() -> RequestBuilder,
    ) -> Result<Response> {
        let mut last_err: Option<Error> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = Duration::from_millis(100 * 2u64.pow(attempt - 1));
                tokio::time::sleep(backoff).await;
            }

            match build_request().send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_server_error() {
                        let body = resp.text().await.unwrap_or_default();
                        last_err = Some(Error::Memory(format!(
                            "{endpoint} returned {}: {body}",
                            status.as_u16()
                        )));
                        continue;
                    }
                    if status.is_client_error() {
                        let body = resp.text().await.unwrap_or_default();
                        return Err(Error::Memory(format!(
                            "{endpoint} returned {}: {body}",
                            status.as_u16()
                        )));
                    }
                    return Ok(resp);
                }
                Err(e) => {
                    last_err = Some(if e.is_timeout() {
                        Error::Timeout(e.to_string())
                    } else {
                        Error::Http(e.to_string())
                    });
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Memory(format!("{endpoint}: all retries exhausted"))))
    }
}

#[async_trait]
impl MemoryProvider for RestMemoryClient {
    async fn query_task(&self, text: &str) -> Result<MemoryQueryResponse> {
        self.post_json(
            &self.http,
            "/api/v1/memory/query",
            serde_json::json!({ "target": text, "as_type": "task", "top_k": 5 }),
        )
        .await
    }

    async fn query_navigation(
        &self,
        start_state: &str,
        end_state: &str,
    ) -> Result<MemoryQueryResponse> {
        self.post_json(
            &self.http,
            "/api/v1/memory/query",
            serde_json::json!({
                "target": end_state,
                "as_type": "navigation",
                "start_state": start_state,
                "top_k": 5,
            }),
        )
        .await
    }

    async fn query_actions(
        &self,
        current_state: &str,
        target: Option<&str>,
    ) -> Result<MemoryQueryResponse> {
        let mut body = serde_json::json!({
            "target": current_state,
            "as_type": "action",
            "top_k": 5,
        });
        if let Some(t) = target {
            body["action_target"] = serde_json::json!(t);
        }
        self.post_json(&self.http, "/api/v1/memory/query", body).await
    }

    async fn plan_task(&self, text: &str) -> Result<MemoryPlanResponse> {
        self.post_json(
            &self.plan_http,
            "/api/v1/memory/plan",
            serde_json::json!({ "target": text }),
        )
        .await
    }

    async fn add_operations(&self, req: MemoryAddRequest) -> Result<()> {
        let url = self.url("/api/v1/memory/add");
        let body = serde_json::to_value(&req)?;
        self.execute_with_retry("/api/v1/memory/add", || {
            self.decorate(self.http.post(&url).json(&body))
        })
        .await?;
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Null provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Memory disabled: every query reports no match (L3) and writes are
/// dropped. Used when no memory backend is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMemory;

#[async_trait]
impl MemoryProvider for NullMemory {
    async fn query_task(&self, _text: &str) -> Result<MemoryQueryResponse> {
        Ok(MemoryQueryResponse::default())
    }
    async fn query_navigation(&self, _s: &str, _e: &str) -> Result<MemoryQueryResponse> {
        Ok(MemoryQueryResponse::default())
    }
    async fn query_actions(&self, _c: &str, _t: Option<&str>) -> Result<MemoryQueryResponse> {
        Ok(MemoryQueryResponse::default())
    }
    async fn plan_task(&self, _text: &str) -> Result<MemoryPlanResponse> {
        Ok(MemoryPlanResponse::default())
    }
    async fn add_operations(&self, _req: MemoryAddRequest) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ami_domain::subtask::MemoryLevel;

    #[tokio::test]
    async fn null_memory_reports_l3() {
        let resp = NullMemory.query_task("anything").await.unwrap();
        assert_eq!(resp.memory_level(), MemoryLevel::L3);
        assert!(resp.is_empty());
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let cfg = MemoryConfig {
            base_url: "https://api.example.dev/".into(),
            ..Default::default()
        };
        let client = RestMemoryClient::new(&cfg).unwrap();
        assert_eq!(client.url("/api/v1/memory/add"), "https://api.example.dev/api/v1/memory/add");
    }
}
