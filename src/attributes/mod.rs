//! # Request Attributes
//!
//! The mutable, request-scoped attribute bag carried through the pipeline.
//! Filters read and write it to steer downstream resolution — it is the only
//! channel by which an upstream filter influences which environment, tenant,
//! or route handles the rest of the request.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Resolved environment name, set by filters.
pub const REQUEST_ENVIRONMENT: &str = "REQUEST_ENVIRONMENT";
/// Resolved tenant id, set by filters.
pub const REQUEST_TENANT_ID: &str = "REQUEST_TENANT_ID";
/// Resolved route id, set by filters.
pub const REQUEST_ROUTE_ID: &str = "REQUEST_ROUTE_ID";
/// Effective log level for the rest of the request.
pub const REQUEST_LOG_LEVEL: &str = "REQUEST_LOG_LEVEL";
/// Optional remote log sink URL; when set, context loggers forward lines to it.
pub const REQUEST_LOG_SINK: &str = "REQUEST_LOG_SINK";
/// Status override consulted when the pipeline builds an error response.
pub const RESPONSE_HTTP_STATUS: &str = "RESPONSE_HTTP_STATUS";
/// Body override consulted when the pipeline builds an error response.
pub const RESPONSE_MESSAGE: &str = "RESPONSE_MESSAGE";
/// Per-request correlation id assigned at the HTTP boundary.
pub const REQUEST_ID: &str = "REQUEST_ID";

/// Placeholder environment used in logs and tenant keys before resolution.
pub const ENVIRONMENT_NOT_SET: &str = "unset";
/// Placeholder tenant id used in logs and tenant keys before resolution.
pub const TENANT_NOT_SET: &str = "unset";

/// Sentinel environment used when no filter resolved one.
pub const DEFAULT_ENVIRONMENT: &str = "default";
/// Sentinel tenant id used when no filter resolved one.
pub const DEFAULT_TENANT_ID: &str = "default";
/// Tenant-level catch-all route id, also the route sentinel.
pub const CATCH_ALL_ROUTE: &str = "catch-all";

/// Scope-qualified key identifying a tenant context bundle and a cached
/// configuration subtree node: `{environment}|{tenantId}`.
pub fn tenant_key(environment: &str, tenant_id: &str) -> String {
    format!("{}|{}", environment, tenant_id)
}

/// String-keyed JSON-value attribute map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(HashMap<String, Value>);

impl Attributes {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn set<V: Into<Value>>(&mut self, key: &str, value: V) {
        self.0.insert(key.to_string(), value.into());
    }

    /// Set only when absent. Used for seeding defaults without clobbering
    /// what an earlier filter resolved.
    pub fn set_if_unset<V: Into<Value>>(&mut self, key: &str, value: V) {
        self.0.entry(key.to_string()).or_insert_with(|| value.into());
    }

    /// String view of an attribute; non-string values render via JSON.
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.0.get(key).map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// String view with a fallback sentinel.
    pub fn str_or(&self, key: &str, default: &str) -> String {
        self.get_str(key).unwrap_or_else(|| default.to_string())
    }

    /// Merge another map into this one, overwriting existing keys.
    pub fn merge(&mut self, other: HashMap<String, Value>) {
        self.0.extend(other);
    }

    /// The `RESPONSE_HTTP_STATUS` override, when set to a valid status code.
    pub fn response_status_override(&self) -> Option<u16> {
        let value = self.0.get(RESPONSE_HTTP_STATUS)?;
        let status = match value {
            Value::Number(n) => n.as_u64()?,
            Value::String(s) => s.parse().ok()?,
            _ => return None,
        };
        u16::try_from(status).ok().filter(|s| (100..=599).contains(s))
    }

    pub fn as_map(&self) -> &HashMap<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> HashMap<String, Value> {
        self.0
    }
}

impl From<HashMap<String, Value>> for Attributes {
    fn from(map: HashMap<String, Value>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_if_unset_preserves_existing() {
        let mut attrs = Attributes::new();
        attrs.set(REQUEST_TENANT_ID, "t1");
        attrs.set_if_unset(REQUEST_TENANT_ID, DEFAULT_TENANT_ID);
        assert_eq!(attrs.get_str(REQUEST_TENANT_ID).as_deref(), Some("t1"));
    }

    #[test]
    fn test_str_or_sentinel() {
        let attrs = Attributes::new();
        assert_eq!(attrs.str_or(REQUEST_ENVIRONMENT, DEFAULT_ENVIRONMENT), "default");
    }

    #[test]
    fn test_non_string_values_render() {
        let mut attrs = Attributes::new();
        attrs.set("count", 3);
        assert_eq!(attrs.get_str("count").as_deref(), Some("3"));
    }

    #[test]
    fn test_response_status_override() {
        let mut attrs = Attributes::new();
        assert_eq!(attrs.response_status_override(), None);

        attrs.set(RESPONSE_HTTP_STATUS, 400);
        assert_eq!(attrs.response_status_override(), Some(400));

        attrs.set(RESPONSE_HTTP_STATUS, "422");
        assert_eq!(attrs.response_status_override(), Some(422));

        attrs.set(RESPONSE_HTTP_STATUS, 9999);
        assert_eq!(attrs.response_status_override(), None);
    }

    #[test]
    fn test_merge_overwrites() {
        let mut attrs = Attributes::new();
        attrs.set(REQUEST_ENVIRONMENT, "prod");
        let mut delta = HashMap::new();
        delta.insert(REQUEST_ENVIRONMENT.to_string(), json!("staging"));
        delta.insert(REQUEST_TENANT_ID.to_string(), json!("t2"));
        attrs.merge(delta);
        assert_eq!(attrs.get_str(REQUEST_ENVIRONMENT).as_deref(), Some("staging"));
        assert_eq!(attrs.get_str(REQUEST_TENANT_ID).as_deref(), Some("t2"));
    }

    #[test]
    fn test_tenant_key_shape() {
        assert_eq!(tenant_key("prod", "t1"), "prod|t1");
    }
}
