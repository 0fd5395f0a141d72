//! reqwest-backed [`AgentTransport`].

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{AgentResponse, AgentTransport};
use crate::error::CallError;

/// Default connect timeout for new connections.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP transport shared by every stage.
///
/// `reqwest::Client` pools connections internally and is cheap to clone,
/// so one instance serves all concurrent calls without extra locking.
#[derive(Debug, Clone)]
pub struct HttpAgentTransport {
    client: reqwest::Client,
}

impl HttpAgentTransport {
    /// Build a transport with the default client settings.
    pub fn new() -> Result<Self, CallError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("agentflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CallError::transport("<client>", e))?;
        Ok(Self { client })
    }

    /// Wrap an already configured client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn into_response(
        url: &str,
        resp: reqwest::Response,
    ) -> Result<AgentResponse, CallError> {
        let status = resp.status().as_u16();
        let text = resp
            .text()
            .await
            .map_err(|e| CallError::transport(url, e))?;
        Ok(AgentResponse::new(status, parse_body(&text)))
    }
}

#[async_trait]
impl AgentTransport for HttpAgentTransport {
    async fn get(&self, url: &str) -> Result<AgentResponse, CallError> {
        log::trace!("GET {}", url);
        let resp = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| CallError::transport(url, e))?;
        Self::into_response(url, resp).await
    }

    async fn post(&self, url: &str, body: &Value) -> Result<AgentResponse, CallError> {
        log::trace!("POST {}", url);
        let resp = self
            .client
            .post(url)
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| CallError::transport(url, e))?;
        Self::into_response(url, resp).await
    }
}

/// JSON when it parses, the raw text otherwise, `null` when empty.
fn parse_body(text: &str) -> Value {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}
