//! # Bootstrap
//!
//! Startup-time function loading: init functions run once with a tenant
//! context, and stream-consumer functions get a polling task per
//! registration. An individual failing registration is logged and skipped —
//! it never aborts the startup sequence.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info};

use crate::attributes::{tenant_key, Attributes, REQUEST_ENVIRONMENT, REQUEST_TENANT_ID};
use crate::backends::StreamStore;
use crate::configstore::{fetch_optional_json, ArtifactSpec};
use crate::context::ContextBuilder;
use crate::engine::{StreamRecordEnvelope, WasmEngine};
use crate::loader::{ArtifactLoader, ArtifactRole};

const STREAM_CONSUMER_NAME: &str = "portico-0";
const STREAM_READ_BATCH: usize = 16;
const STREAM_IDLE_WAIT: Duration = Duration::from_millis(500);
const STREAM_ERROR_WAIT: Duration = Duration::from_secs(1);

/// `{repo}/functional-core/init/config.json`
#[derive(Debug, Default, Deserialize)]
pub struct InitDocument {
    #[serde(default)]
    pub environments: HashMap<String, InitEnvironment>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InitEnvironment {
    #[serde(default)]
    pub tenants: HashMap<String, InitTenant>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InitTenant {
    #[serde(default)]
    pub functions: Vec<ArtifactSpec>,
}

/// `{repo}/functional-core/stream/config.json`
#[derive(Debug, Default, Deserialize)]
pub struct StreamDocument {
    #[serde(default)]
    pub environments: HashMap<String, StreamEnvironment>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamEnvironment {
    #[serde(default)]
    pub tenants: HashMap<String, StreamTenant>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamTenant {
    #[serde(default)]
    pub consumers: Vec<StreamConsumerSpec>,
}

#[derive(Debug, Deserialize)]
pub struct StreamConsumerSpec {
    pub topic: String,
    pub artifact: ArtifactSpec,
}

/// Startup-time loader for functional-core registrations.
pub struct Bootstrap {
    http: reqwest::Client,
    repository_url: String,
    loader: Arc<ArtifactLoader>,
    contexts: Arc<ContextBuilder>,
    engine: Arc<WasmEngine>,
    stream_store: Arc<dyn StreamStore>,
    timeout_ms: u64,
}

impl Bootstrap {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        http: reqwest::Client,
        repository_url: impl Into<String>,
        loader: Arc<ArtifactLoader>,
        contexts: Arc<ContextBuilder>,
        engine: Arc<WasmEngine>,
        stream_store: Arc<dyn StreamStore>,
        timeout_ms: u64,
    ) -> Self {
        let mut base = repository_url.into();
        while base.ends_with('/') {
            base.pop();
        }
        Self { http, repository_url: base, loader, contexts, engine, stream_store, timeout_ms }
    }

    fn scoped_attributes(environment: &str, tenant_id: &str) -> Attributes {
        let mut attributes = Attributes::new();
        attributes.set(REQUEST_ENVIRONMENT, environment);
        attributes.set(REQUEST_TENANT_ID, tenant_id);
        attributes
    }

    /// Execute every init function once. Absent document means nothing to do.
    pub async fn run_init_functions(&self) {
        let url = format!("{}/functional-core/init/config.json", self.repository_url);
        let document: InitDocument = match fetch_optional_json(&self.http, &url).await {
            Ok(Some(document)) => document,
            Ok(None) => {
                info!("No init function configuration present");
                return;
            }
            Err(e) => {
                error!(error = %e, "Failed to load init function configuration");
                return;
            }
        };

        for (environment, env_config) in &document.environments {
            for (tenant_id, tenant_config) in &env_config.tenants {
                let scope = format!("environment={}&tenant={}", environment, tenant_id);
                let context =
                    self.contexts.build(&Self::scoped_attributes(environment, tenant_id));
                for spec in &tenant_config.functions {
                    let artifact =
                        match self.loader.load(spec, ArtifactRole::Init, &scope).await {
                            Ok(artifact) => artifact,
                            Err(e) => {
                                error!(
                                    function = %spec.coordinate(),
                                    scope = %scope,
                                    error = %e,
                                    "Skipping init function that failed to load"
                                );
                                continue;
                            }
                        };
                    let call = match artifact.call_for(ArtifactRole::Init) {
                        Ok(call) => call,
                        Err(e) => {
                            error!(function = %spec.coordinate(), error = %e, "Skipping init function");
                            continue;
                        }
                    };
                    info!(function = %spec.coordinate(), scope = %scope, "Running init function");
                    let engine = self.engine.clone();
                    let context = context.clone();
                    let timeout_ms = self.timeout_ms;
                    let coordinate = spec.coordinate();
                    tokio::spawn(async move {
                        if let Err(e) =
                            engine.invoke(call, context, b"{}".to_vec(), timeout_ms).await
                        {
                            error!(function = %coordinate, error = %e, "Init function failed");
                        }
                    });
                }
            }
        }
    }

    /// Ensure consumer groups exist and spawn one polling task per
    /// registered stream-consumer function.
    pub async fn register_stream_consumers(&self) {
        let url = format!("{}/functional-core/stream/config.json", self.repository_url);
        let document: StreamDocument = match fetch_optional_json(&self.http, &url).await {
            Ok(Some(document)) => document,
            Ok(None) => {
                info!("No stream function configuration present");
                return;
            }
            Err(e) => {
                error!(error = %e, "Failed to load stream function configuration");
                return;
            }
        };

        for (environment, env_config) in &document.environments {
            for (tenant_id, tenant_config) in &env_config.tenants {
                for consumer in &tenant_config.consumers {
                    self.register_one_consumer(environment, tenant_id, consumer).await;
                }
            }
        }
    }

    async fn register_one_consumer(
        &self,
        environment: &str,
        tenant_id: &str,
        consumer: &StreamConsumerSpec,
    ) {
        let scope = format!("environment={}&tenant={}", environment, tenant_id);
        let stream_key = format!("{}-{}", tenant_key(environment, tenant_id), consumer.topic);

        if let Err(e) = self.stream_store.create_group(&stream_key, &stream_key).await {
            error!(stream = %stream_key, error = %e, "Skipping consumer, group creation failed");
            return;
        }
        let artifact = match self
            .loader
            .load(&consumer.artifact, ArtifactRole::StreamConsumer, &scope)
            .await
        {
            Ok(artifact) => artifact,
            Err(e) => {
                error!(
                    consumer = %consumer.artifact.coordinate(),
                    stream = %stream_key,
                    error = %e,
                    "Skipping stream consumer that failed to load"
                );
                return;
            }
        };
        let call = match artifact.call_for(ArtifactRole::StreamConsumer) {
            Ok(call) => call,
            Err(e) => {
                error!(consumer = %consumer.artifact.coordinate(), error = %e, "Skipping stream consumer");
                return;
            }
        };

        let context = self.contexts.build(&Self::scoped_attributes(environment, tenant_id));
        let engine = self.engine.clone();
        let store = self.stream_store.clone();
        let timeout_ms = self.timeout_ms;
        let coordinate = consumer.artifact.coordinate();
        info!(consumer = %coordinate, stream = %stream_key, "Registered stream consumer");

        tokio::spawn(async move {
            loop {
                let records = match store
                    .read_group(&stream_key, &stream_key, STREAM_CONSUMER_NAME, STREAM_READ_BATCH)
                    .await
                {
                    Ok(records) => records,
                    Err(e) => {
                        error!(stream = %stream_key, error = %e, "Stream read failed");
                        tokio::time::sleep(STREAM_ERROR_WAIT).await;
                        continue;
                    }
                };
                if records.is_empty() {
                    tokio::time::sleep(STREAM_IDLE_WAIT).await;
                    continue;
                }
                for record in records {
                    let envelope =
                        StreamRecordEnvelope { id: record.id.clone(), entries: record.entries };
                    let input = match serde_json::to_vec(&envelope) {
                        Ok(input) => input,
                        Err(e) => {
                            error!(stream = %stream_key, error = %e, "Record encoding failed");
                            continue;
                        }
                    };
                    match engine.invoke(call.clone(), context.clone(), input, timeout_ms).await {
                        Ok(_) => {
                            if let Err(e) =
                                store.acknowledge(&stream_key, &stream_key, &record.id).await
                            {
                                error!(stream = %stream_key, error = %e, "Acknowledge failed");
                            }
                        }
                        Err(e) => {
                            error!(
                                consumer = %coordinate,
                                stream = %stream_key,
                                record = %record.id,
                                error = %e,
                                "Stream consumer invocation failed"
                            );
                        }
                    }
                }
            }
        });
    }
}
