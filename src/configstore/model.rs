//! Remote configuration document shapes.
//!
//! The configuration repository is a static JSON file tree; each scope level
//! carries the same shape — ordered pre-filters, ordered post-filters — with
//! route documents additionally naming one terminal function.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{Error, Result};

/// Identifies a loadable unit and how its loaded instance is cached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactSpec {
    pub name: String,
    pub version: String,
    /// Bypass the artifact cache and fetch/instantiate fresh on every use.
    #[serde(default)]
    pub reload: bool,
    /// Opaque JSON configuration handed to the loaded unit.
    #[serde(default)]
    pub config: Value,
}

impl ArtifactSpec {
    /// Display form used in logs: `name-version`.
    pub fn coordinate(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }
}

/// Settings section of the global document. Loaded once at startup and
/// immutable for process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalSettings {
    #[serde(default = "default_hostname")]
    pub hostname: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub code_repository_url: String,
    #[serde(default = "default_storage_url")]
    pub storage_url: String,
}

fn default_hostname() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_backlog() -> u32 {
    1024
}

fn default_request_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_storage_url() -> String {
    "memory://".to_string()
}

impl GlobalSettings {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }

    pub fn request_timeout_ms(&self) -> u64 {
        self.request_timeout_seconds * 1000
    }

    /// Reject malformed repository/storage URLs before anything dials them.
    pub fn validate(&self) -> Result<()> {
        for (label, value) in [
            ("code repository URL", &self.code_repository_url),
            ("storage URL", &self.storage_url),
        ] {
            url::Url::parse(value).map_err(|e| {
                Error::configuration(format!("Invalid {} '{}': {}", label, value, e))
            })?;
        }
        Ok(())
    }
}

/// Global scope document: `{repo}/imperative-shell/global/config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalDocument {
    #[serde(default)]
    pub pre: Vec<ArtifactSpec>,
    #[serde(default)]
    pub post: Vec<ArtifactSpec>,
    pub config: GlobalSettings,
}

/// Environment scope document:
/// `{repo}/imperative-shell/environments/{env}/config.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentDocument {
    #[serde(default)]
    pub pre: Vec<ArtifactSpec>,
    #[serde(default)]
    pub post: Vec<ArtifactSpec>,
}

/// Tenant scope document, including its route table:
/// `{repo}/imperative-shell/environments/{env}/tenants/{tenant}/config.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantDocument {
    #[serde(default)]
    pub pre: Vec<ArtifactSpec>,
    #[serde(default)]
    pub post: Vec<ArtifactSpec>,
    #[serde(default)]
    pub routes: HashMap<String, RouteDocument>,
}

/// Route scope: filters plus the optional terminal function.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteDocument {
    #[serde(default)]
    pub pre: Vec<ArtifactSpec>,
    #[serde(default)]
    pub post: Vec<ArtifactSpec>,
    #[serde(default)]
    pub function: Option<ArtifactSpec>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_artifact_spec_defaults() {
        let spec: ArtifactSpec =
            serde_json::from_value(json!({"name": "echo", "version": "1.0.0"})).unwrap();
        assert!(!spec.reload);
        assert!(spec.config.is_null());
        assert_eq!(spec.coordinate(), "echo-1.0.0");
    }

    #[test]
    fn test_global_document_minimal() {
        let doc: GlobalDocument = serde_json::from_value(json!({
            "config": {"code_repository_url": "http://code.repo"}
        }))
        .unwrap();
        assert!(doc.pre.is_empty());
        assert_eq!(doc.config.port, 8080);
        assert_eq!(doc.config.request_timeout_seconds, 30);
        assert_eq!(doc.config.storage_url, "memory://");
        assert_eq!(doc.config.bind_address(), "0.0.0.0:8080");
    }

    #[test]
    fn test_global_settings_url_validation() {
        let doc: GlobalDocument = serde_json::from_value(json!({
            "config": {"code_repository_url": "http://code.repo"}
        }))
        .unwrap();
        assert!(doc.config.validate().is_ok());

        let doc: GlobalDocument = serde_json::from_value(json!({
            "config": {"code_repository_url": "not a url"}
        }))
        .unwrap();
        assert!(doc.config.validate().is_err());
    }

    #[test]
    fn test_tenant_document_routes() {
        let doc: TenantDocument = serde_json::from_value(json!({
            "pre": [{"name": "auth", "version": "2.1", "reload": true}],
            "routes": {
                "orders": {
                    "function": {"name": "orders-fn", "version": "0.4", "config": {"limit": 10}}
                }
            }
        }))
        .unwrap();
        assert!(doc.pre[0].reload);
        let route = doc.routes.get("orders").unwrap();
        let function = route.function.as_ref().unwrap();
        assert_eq!(function.config["limit"], 10);
    }
}
