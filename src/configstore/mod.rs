//! # Configuration Store
//!
//! In-memory, lazily-populated tree of environment and tenant configuration.
//! Each scope node is fetched over HTTP from the configuration repository on
//! first access and cached for process lifetime — there is no invalidation
//! path; stale reads are an accepted tradeoff.
//!
//! Concurrent first access to the same node performs exactly one fetch: the
//! tree is a `DashMap` of `OnceCell` slots, so later callers await the
//! winning fetch instead of issuing their own.

mod model;

use std::sync::Arc;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::attributes::CATCH_ALL_ROUTE;
use crate::errors::{Error, Result};

pub use model::{
    ArtifactSpec, EnvironmentDocument, GlobalDocument, GlobalSettings, RouteDocument,
    TenantDocument,
};

type Slot<T> = Arc<OnceCell<Option<Arc<T>>>>;

/// A resolved environment node and its lazily-filled tenant children.
#[derive(Debug)]
pub struct EnvironmentNode {
    pub doc: EnvironmentDocument,
    tenants: DashMap<String, Slot<TenantNode>>,
}

/// A resolved tenant node; routes are part of the document itself, so route
/// lookup never performs network I/O.
#[derive(Debug)]
pub struct TenantNode {
    pub doc: TenantDocument,
}

impl TenantNode {
    /// Route lookup with catch-all fallback.
    pub fn route(&self, route_id: &str) -> Option<&RouteDocument> {
        self.doc.routes.get(route_id).or_else(|| self.doc.routes.get(CATCH_ALL_ROUTE))
    }

    /// The function dispatched for a route id: the route's own function if it
    /// declares one, else the catch-all route's function.
    pub fn function_for(&self, route_id: &str) -> Option<&ArtifactSpec> {
        if let Some(function) =
            self.doc.routes.get(route_id).and_then(|r| r.function.as_ref())
        {
            return Some(function);
        }
        self.doc.routes.get(CATCH_ALL_ROUTE).and_then(|r| r.function.as_ref())
    }
}

/// Lazily-populated configuration tree, rooted at the configuration
/// repository URL.
pub struct ConfigStore {
    http: reqwest::Client,
    repository_url: String,
    environments: DashMap<String, Slot<EnvironmentNode>>,
}

impl ConfigStore {
    pub fn new(http: reqwest::Client, repository_url: impl Into<String>) -> Self {
        Self {
            http,
            repository_url: normalize_base(repository_url.into()),
            environments: DashMap::new(),
        }
    }

    /// Resolve an environment, fetching its document on first access.
    ///
    /// `Ok(None)` means the repository has no such environment — callers
    /// treat that as "no scoped filters", not as a request failure.
    pub async fn resolve_environment(&self, name: &str) -> Result<Option<Arc<EnvironmentNode>>> {
        let slot = self
            .environments
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();
        slot.get_or_try_init(|| async {
            let url = format!(
                "{}/imperative-shell/environments/{}/config.json",
                self.repository_url, name
            );
            debug!(environment = name, url = %url, "Fetching environment configuration");
            let doc: Option<EnvironmentDocument> = self.fetch_json(&url).await?;
            Ok(doc.map(|doc| Arc::new(EnvironmentNode { doc, tenants: DashMap::new() })))
        })
        .await
        .map(|node| node.clone())
    }

    /// Resolve a tenant beneath an environment, fetching its document on
    /// first access. Resolving a tenant of an unknown environment is `None`.
    pub async fn resolve_tenant(
        &self,
        environment: &str,
        tenant_id: &str,
    ) -> Result<Option<Arc<TenantNode>>> {
        let env = match self.resolve_environment(environment).await? {
            Some(env) => env,
            None => return Ok(None),
        };
        let slot = env
            .tenants
            .entry(tenant_id.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();
        slot.get_or_try_init(|| async {
            let url = format!(
                "{}/imperative-shell/environments/{}/tenants/{}/config.json",
                self.repository_url, environment, tenant_id
            );
            debug!(environment, tenant = tenant_id, url = %url, "Fetching tenant configuration");
            let doc: Option<TenantDocument> = self.fetch_json(&url).await?;
            Ok(doc.map(|doc| Arc::new(TenantNode { doc })))
        })
        .await
        .map(|node| node.clone())
    }

    async fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>> {
        fetch_optional_json(&self.http, url).await
    }
}

/// GET + deserialize one configuration document. A 404 means the document is
/// absent; any other non-2xx status or transport failure is a configuration
/// error.
pub(crate) async fn fetch_optional_json<T: DeserializeOwned>(
    http: &reqwest::Client,
    url: &str,
) -> Result<Option<T>> {
    let response = http.get(url).send().await.map_err(|e| {
        Error::configuration_with_source(
            format!("Error while fetching configuration from '{}'", url),
            Box::new(e),
        )
    })?;
    let status = response.status();
    if status.as_u16() == 404 {
        return Ok(None);
    }
    if !status.is_success() {
        return Err(Error::configuration(format!(
            "Configuration fetch from '{}' returned status {}",
            url, status
        )));
    }
    let body = response.bytes().await.map_err(|e| {
        Error::configuration_with_source(
            format!("Error while reading configuration body from '{}'", url),
            Box::new(e),
        )
    })?;
    let doc = serde_json::from_slice(&body).map_err(|e| {
        Error::configuration_with_source(
            format!("Invalid configuration document at '{}'", url),
            Box::new(e),
        )
    })?;
    Ok(Some(doc))
}

/// Fetch the global document; its absence is fatal to startup, not to any
/// request, so a 404 is an error here.
pub async fn fetch_global_document(
    http: &reqwest::Client,
    repository_url: &str,
) -> Result<Arc<GlobalDocument>> {
    let base = normalize_base(repository_url.to_string());
    let url = format!("{}/imperative-shell/global/config.json", base);
    let response = http.get(&url).send().await.map_err(|e| {
        Error::configuration_with_source(
            format!("Error while fetching global configuration from '{}'", url),
            Box::new(e),
        )
    })?;
    if !response.status().is_success() {
        return Err(Error::configuration(format!(
            "Global configuration fetch from '{}' returned status {}",
            url,
            response.status()
        )));
    }
    let doc: GlobalDocument = response.json().await.map_err(|e| {
        Error::configuration_with_source(
            format!("Invalid global configuration document at '{}'", url),
            Box::new(e),
        )
    })?;
    doc.config.validate()?;
    Ok(Arc::new(doc))
}

fn normalize_base(mut base: String) -> String {
    while base.ends_with('/') {
        base.pop();
    }
    base
}
