//! Agent transport.
//!
//! Every agent is an HTTP service exposing three operations:
//!
//! | Operation    | Method | Path            |
//! |--------------|--------|-----------------|
//! | capabilities | GET    | `/capabilities` |
//! | negotiate    | POST   | `/negotiate`    |
//! | execute      | POST   | `/execute`      |
//!
//! Stages talk to agents through [`AgentTransport`] so tests can swap the
//! network for an in-memory double. The transport reports what came back
//! (status + body) and leaves judging the shape to the stage; deadlines and
//! retries are applied on top by [`retry::RetryPolicy`].

pub mod http;
pub mod retry;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::CallError;

pub use http::HttpAgentTransport;
pub use retry::{Attempted, Backoff, RetryPolicy};

/// Path of the capability query.
pub const CAPABILITIES_PATH: &str = "capabilities";
/// Path of the negotiation handshake.
pub const NEGOTIATE_PATH: &str = "negotiate";
/// Path of the execution call.
pub const EXECUTE_PATH: &str = "execute";

/// Raw answer from an agent.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentResponse {
    /// HTTP status code.
    pub status: u16,
    /// Parsed JSON body. Non-JSON text arrives as a string value and an
    /// empty body as `null`.
    pub body: Value,
}

impl AgentResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    /// 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Network access to agents.
///
/// Implementations return `Err` only when no response was obtained at all;
/// any HTTP status, including 4xx/5xx, is an `Ok` response.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    /// Issue a read against `url`.
    async fn get(&self, url: &str) -> Result<AgentResponse, CallError>;

    /// Issue a write of `body` to `url`.
    async fn post(&self, url: &str, body: &Value) -> Result<AgentResponse, CallError>;
}
