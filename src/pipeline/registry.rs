//! Registry loader — the candidate agent population.
//!
//! A registry is a JSON (or YAML) document listing agents, either as a bare
//! array or under an `agents` key:
//!
//! ```json
//! [{"id": "a1", "name": "Scanner", "address": "http://10.0.0.4:8080", "capabilities": ["scan"]}]
//! ```
//!
//! Loading never fails: unreachable sources, bad payloads and empty lists
//! all produce an empty population, and [`RegistryLoader::load_or_default`]
//! substitutes the caller's default agents.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use super::types::AgentDescriptor;
use crate::error::OrchestratorError;
use crate::transport::AgentTransport;

/// Where the registry document lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrySource {
    Url(String),
    File(PathBuf),
}

impl RegistrySource {
    /// `http://` / `https://` prefixes select a URL, anything else a file.
    pub fn parse(source: &str) -> Self {
        let trimmed = source.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            Self::Url(trimmed.to_string())
        } else {
            Self::File(PathBuf::from(trimmed))
        }
    }
}

impl fmt::Display for RegistrySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(url) => f.write_str(url),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Fetches and parses registry documents.
pub struct RegistryLoader {
    transport: Arc<dyn AgentTransport>,
}

impl RegistryLoader {
    pub fn new(transport: Arc<dyn AgentTransport>) -> Self {
        Self { transport }
    }

    /// Load the population from `source`. Any failure yields an empty list.
    pub async fn load(&self, source: &RegistrySource, timeout: Duration) -> Vec<AgentDescriptor> {
        let document = match source {
            RegistrySource::Url(url) => self.fetch(url, timeout).await,
            RegistrySource::File(path) => read_file(path).await,
        };
        let Some(document) = document else {
            return Vec::new();
        };

        let agents = parse_registry(&document);
        log::info!("Registry {}: {} usable agent(s)", source, agents.len());
        agents
    }

    /// Load from `source` (when given), falling back to `defaults`.
    ///
    /// Errors only when both are empty, so the pipeline never proceeds with
    /// zero agents silently.
    pub async fn load_or_default(
        &self,
        source: Option<&RegistrySource>,
        timeout: Duration,
        defaults: &[AgentDescriptor],
    ) -> Result<Vec<AgentDescriptor>, OrchestratorError> {
        if let Some(source) = source {
            let agents = self.load(source, timeout).await;
            if !agents.is_empty() {
                return Ok(agents);
            }
            log::warn!(
                "Registry {} yielded no agents; using {} default agent(s)",
                source,
                defaults.len()
            );
        }
        if defaults.is_empty() {
            return Err(OrchestratorError::NoAgents);
        }
        Ok(defaults.to_vec())
    }

    async fn fetch(&self, url: &str, timeout: Duration) -> Option<Value> {
        match tokio::time::timeout(timeout, self.transport.get(url)).await {
            Ok(Ok(resp)) if resp.is_success() => Some(resp.body),
            Ok(Ok(resp)) => {
                log::warn!("Registry {} returned HTTP {}", url, resp.status);
                None
            }
            Ok(Err(e)) => {
                log::warn!("Registry {} unreachable: {}", url, e);
                None
            }
            Err(_) => {
                log::warn!("Registry {} timed out after {:?}", url, timeout);
                None
            }
        }
    }
}

async fn read_file(path: &Path) -> Option<Value> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) => {
            log::warn!("Registry file {} unreadable: {}", path.display(), e);
            return None;
        }
    };
    let is_yaml = path
        .extension()
        .map_or(false, |ext| ext == "yaml" || ext == "yml");
    let parsed = if is_yaml {
        serde_yaml::from_str::<Value>(&content).map_err(|e| e.to_string())
    } else {
        serde_json::from_str::<Value>(&content).map_err(|e| e.to_string())
    };
    match parsed {
        Ok(value) => Some(value),
        Err(e) => {
            log::warn!("Registry file {} malformed: {}", path.display(), e);
            None
        }
    }
}

/// Extract usable descriptors from a registry document.
///
/// Entries without a non-empty `id` and `address` are dropped. `url` is
/// accepted in place of `address`. Unknown fields land in metadata.
pub fn parse_registry(document: &Value) -> Vec<AgentDescriptor> {
    let entries = match document {
        Value::Array(entries) => entries.as_slice(),
        Value::Object(map) => match map.get("agents") {
            Some(Value::Array(entries)) => entries.as_slice(),
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    entries.iter().filter_map(parse_entry).collect()
}

fn parse_entry(entry: &Value) -> Option<AgentDescriptor> {
    let obj = entry.as_object()?;
    let id = non_empty_str(obj.get("id"));
    let address = non_empty_str(obj.get("address")).or_else(|| non_empty_str(obj.get("url")));
    let (Some(id), Some(address)) = (id, address) else {
        log::debug!("Dropping registry entry without id/address: {}", entry);
        return None;
    };

    let capabilities = obj
        .get("capabilities")
        .and_then(Value::as_array)
        .map(|caps| {
            caps.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let mut metadata: HashMap<String, Value> = obj
        .get("metadata")
        .and_then(Value::as_object)
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();
    for (key, value) in obj {
        if !matches!(
            key.as_str(),
            "id" | "name" | "address" | "url" | "capabilities" | "metadata"
        ) {
            metadata.insert(key.clone(), value.clone());
        }
    }

    Some(AgentDescriptor {
        id,
        name: non_empty_str(obj.get("name")),
        address,
        capabilities,
        metadata,
    })
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
