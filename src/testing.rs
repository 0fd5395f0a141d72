//! In-memory [`AgentTransport`] double for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::CallError;
use crate::transport::{AgentResponse, AgentTransport};

/// Handler for one URL: `(call number starting at 1, request body)`.
type Handler = Arc<dyn Fn(u32, Option<&Value>) -> Result<AgentResponse, CallError> + Send + Sync>;

/// Routes calls by exact URL and records how often each URL was hit.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: HashMap<String, Handler>,
    delays: HashMap<String, Duration>,
    calls: Mutex<HashMap<String, u32>>,
    bodies: Mutex<HashMap<String, Vec<Value>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every call to `url` with `handler`.
    pub fn on<F>(mut self, url: &str, handler: F) -> Self
    where
        F: Fn(u32, Option<&Value>) -> Result<AgentResponse, CallError> + Send + Sync + 'static,
    {
        self.routes.insert(url.to_string(), Arc::new(handler));
        self
    }

    /// Answer every call to `url` with a fixed response.
    pub fn respond(self, url: &str, status: u16, body: Value) -> Self {
        self.on(url, move |_, _| Ok(AgentResponse::new(status, body.clone())))
    }

    /// Sleep before answering calls to `url`.
    pub fn with_delay(mut self, url: &str, delay: Duration) -> Self {
        self.delays.insert(url.to_string(), delay);
        self
    }

    /// Full agent: capabilities, accepting negotiate, and an execute that
    /// echoes its input as output.
    pub fn agent(self, address: &str, id: &str, capabilities: &[&str]) -> Self {
        let caps = json!({"id": id, "name": id, "capabilities": capabilities});
        self.respond(&format!("{}/capabilities", address), 200, caps)
            .respond(&format!("{}/negotiate", address), 200, json!({"status": "accept"}))
            .on(&format!("{}/execute", address), |_, body| {
                Ok(AgentResponse::new(
                    200,
                    json!({"status": "done", "output": body.cloned().unwrap_or(Value::Null)}),
                ))
            })
    }

    pub fn calls(&self, url: &str) -> u32 {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn bodies(&self, url: &str) -> Vec<Value> {
        self.bodies.lock().unwrap().get(url).cloned().unwrap_or_default()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn dispatch(&self, url: &str, body: Option<&Value>) -> Result<AgentResponse, CallError> {
        let call_no = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(url.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        if let Some(body) = body {
            self.bodies
                .lock()
                .unwrap()
                .entry(url.to_string())
                .or_default()
                .push(body.clone());
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);

        if let Some(delay) = self.delays.get(url) {
            tokio::time::sleep(*delay).await;
        }

        match self.routes.get(url) {
            Some(handler) => handler(call_no, body),
            None => Err(CallError::transport(url, "connection refused")),
        }
    }
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl AgentTransport for ScriptedTransport {
    async fn get(&self, url: &str) -> Result<AgentResponse, CallError> {
        self.dispatch(url, None).await
    }

    async fn post(&self, url: &str, body: &Value) -> Result<AgentResponse, CallError> {
        self.dispatch(url, Some(body)).await
    }
}
