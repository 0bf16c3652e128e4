//! # Artifact Loader
//!
//! Resolves `(name, version)` descriptors into loaded, sandbox-checked WASM
//! units fetched from the code repository. Loaded units are cached by bare
//! artifact URL with single-flight population: N concurrent first-time loads
//! of the same artifact perform exactly one fetch and one compile, and every
//! caller observes the same unit. Reloading descriptors bypass the cache
//! entirely and are fetched and prepared fresh on every use.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::configstore::ArtifactSpec;
use crate::engine::{GuestCall, WasmEngine};
use crate::errors::{Error, Result};
use crate::sandbox::SandboxPolicy;

/// File extension served by the code repository.
const ARTIFACT_EXT: &str = "wasm";

/// Fixed fallback entry export tried when a role's conventional export is
/// absent.
const FALLBACK_ENTRY: &str = "process";

/// The role an artifact is being loaded for; determines the entry export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactRole {
    PreFilter,
    PostFilter,
    Function,
    Init,
    StreamConsumer,
}

impl ArtifactRole {
    pub fn entry_export(&self) -> &'static str {
        match self {
            ArtifactRole::PreFilter => "pre_filter",
            ArtifactRole::PostFilter => "post_filter",
            ArtifactRole::Function => "handle",
            ArtifactRole::Init => "init",
            ArtifactRole::StreamConsumer => "consume",
        }
    }
}

/// A fetched, compiled, sandbox-checked unit plus its configuration.
#[derive(Debug)]
pub struct LoadedArtifact {
    pub artifact_url: String,
    /// Routing/audit hint only — never part of the cache key.
    pub scope_hint: String,
    pub module: wasmtime::Module,
    pub has_configure: bool,
    /// Configuration bytes handed to `configure`, when accepted.
    pub config: Option<Vec<u8>>,
    /// Artifact coordinate (`name-version`) for diagnostics.
    pub coordinate: String,
}

impl LoadedArtifact {
    /// Resolve the entry export for a role: the conventional name, else the
    /// fixed fallback.
    pub fn entry_for(&self, role: ArtifactRole) -> Result<String> {
        for candidate in [role.entry_export(), FALLBACK_ENTRY] {
            if self.module.get_export(candidate).is_some() {
                return Ok(candidate.to_string());
            }
        }
        Err(Error::resource_load(
            &self.artifact_url,
            format!(
                "artifact exports neither '{}' nor '{}'",
                role.entry_export(),
                FALLBACK_ENTRY
            ),
        ))
    }

    /// Prepare a guest call for a role.
    pub fn call_for(&self, role: ArtifactRole) -> Result<GuestCall> {
        Ok(GuestCall {
            module: self.module.clone(),
            entry: self.entry_for(role)?,
            config: self.config.clone(),
            unit: self.coordinate.clone(),
        })
    }
}

/// Fetches, compiles, checks, and caches artifacts.
pub struct ArtifactLoader {
    engine: Arc<WasmEngine>,
    policy: Arc<SandboxPolicy>,
    http: reqwest::Client,
    code_repository_url: String,
    cache: DashMap<String, Arc<OnceCell<Arc<LoadedArtifact>>>>,
}

impl ArtifactLoader {
    pub fn new(
        engine: Arc<WasmEngine>,
        policy: Arc<SandboxPolicy>,
        http: reqwest::Client,
        code_repository_url: impl Into<String>,
    ) -> Self {
        let mut base = code_repository_url.into();
        while base.ends_with('/') {
            base.pop();
        }
        Self { engine, policy, http, code_repository_url: base, cache: DashMap::new() }
    }

    /// The bare artifact URL for a descriptor — also the cache key.
    pub fn artifact_url(&self, spec: &ArtifactSpec) -> String {
        format!(
            "{}/{}-{}.{}",
            self.code_repository_url, spec.name, spec.version, ARTIFACT_EXT
        )
    }

    /// Load a unit for a role. `scope_hint` annotates diagnostics (e.g.
    /// `environment=prod&tenant=t1`); it never affects caching.
    pub async fn load(
        &self,
        spec: &ArtifactSpec,
        role: ArtifactRole,
        scope_hint: &str,
    ) -> Result<Arc<LoadedArtifact>> {
        let url = self.artifact_url(spec);
        if spec.reload {
            debug!(artifact = %url, scope = scope_hint, "Reloading artifact, cache bypassed");
            return Ok(Arc::new(self.fetch_and_prepare(&url, spec, role, scope_hint).await?));
        }
        let slot = self
            .cache
            .entry(url.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();
        slot.get_or_try_init(|| async {
            let artifact = self.fetch_and_prepare(&url, spec, role, scope_hint).await?;
            Ok(Arc::new(artifact))
        })
        .await
        .map(|artifact| artifact.clone())
    }

    async fn fetch_and_prepare(
        &self,
        url: &str,
        spec: &ArtifactSpec,
        role: ArtifactRole,
        scope_hint: &str,
    ) -> Result<LoadedArtifact> {
        debug!(artifact = %url, scope = scope_hint, "Fetching artifact");
        let response = self.http.get(url).send().await.map_err(|e| {
            Error::resource_load_with_source(url, "artifact fetch failed", Box::new(e))
        })?;
        if !response.status().is_success() {
            return Err(Error::resource_load(
                url,
                format!("artifact fetch returned status {}", response.status()),
            ));
        }
        let bytes = response.bytes().await.map_err(|e| {
            Error::resource_load_with_source(url, "artifact body read failed", Box::new(e))
        })?;

        if bytes.len() < 8 || &bytes[0..4] != b"\0asm" {
            return Err(Error::resource_load(url, "artifact is not a WASM module"));
        }

        let module = self
            .engine
            .compile(&bytes)
            .map_err(|e| Error::resource_load(url, format!("module compilation failed: {e}")))?;

        // Sandbox check before anything can be instantiated. A violation is
        // reported as itself, not wrapped as a load failure.
        self.policy.inspect_module(&module)?;

        for required in ["memory", "alloc"] {
            if module.get_export(required).is_none() {
                return Err(Error::resource_load(
                    url,
                    format!("artifact is missing required export '{}'", required),
                ));
            }
        }

        let has_configure = module.get_export("configure").is_some();
        let config = if has_configure { Some(config_bytes(url, spec)?) } else { None };

        let artifact = LoadedArtifact {
            artifact_url: url.to_string(),
            scope_hint: scope_hint.to_string(),
            module,
            has_configure,
            config,
            coordinate: spec.coordinate(),
        };
        // Entry resolution failure surfaces at load time, not mid-request.
        artifact.entry_for(role)?;
        Ok(artifact)
    }
}

/// The opaque configuration as a string-keyed JSON object. Null becomes the
/// empty object; anything else non-object is a descriptor error.
fn config_bytes(url: &str, spec: &ArtifactSpec) -> Result<Vec<u8>> {
    let value = match &spec.config {
        serde_json::Value::Null => serde_json::json!({}),
        serde_json::Value::Object(map) => serde_json::Value::Object(map.clone()),
        _ => {
            return Err(Error::resource_load(
                url,
                "artifact configuration must be a JSON object",
            ))
        }
    };
    serde_json::to_vec(&value).map_err(Error::from)
}
