//! # Request Pipeline
//!
//! Per-request orchestrator. Pre-filters nest outer→inner (global,
//! environment, tenant, route), the route's function produces the response,
//! and post-filters unwind inner→outer (route, tenant, environment, global).
//! Any failure aborts the remaining steps and becomes a diagnostic error
//! response: status from the `RESPONSE_HTTP_STATUS` attribute if a filter set
//! one (else 500, or 504 for watchdog expiry), the kind and message cause
//! chains as headers, and an ERROR log line.
//!
//! The tenant context is rebuilt after every executed pre-filter — a filter
//! may have just resolved the environment or tenant attributes the next
//! capability bundle depends on.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, error};

use crate::attributes::{
    Attributes, CATCH_ALL_ROUTE, DEFAULT_ENVIRONMENT, DEFAULT_TENANT_ID, REQUEST_ENVIRONMENT,
    REQUEST_LOG_LEVEL, REQUEST_ROUTE_ID, REQUEST_TENANT_ID, RESPONSE_MESSAGE,
};
use crate::configstore::{ArtifactSpec, ConfigStore, GlobalDocument};
use crate::context::{ContextBuilder, TenantContext};
use crate::engine::{
    EnvelopeCodec, PostFilterInput, PostFilterOutput, PreFilterOutput, RequestEnvelope,
    ResponseEnvelope, WasmEngine,
};
use crate::errors::{Error, ErrorDetail, Result};
use crate::loader::{ArtifactLoader, ArtifactRole};

/// Diagnostic header carrying the error kind chain.
pub const ERROR_TYPE_HEADER: &str = "x-gateway-error-type";
/// Diagnostic header carrying the error message chain.
pub const ERROR_MESSAGE_HEADER: &str = "x-gateway-error-message";
/// Diagnostic header naming the unresolved environment/tenant/route.
pub const NOT_FOUND_HEADER: &str = "x-gateway-not-found";

/// The request as seen by the pipeline, decoupled from the HTTP boundary.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
    pub attributes: Attributes,
}

impl GatewayRequest {
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        query: Option<String>,
        headers: HashMap<String, String>,
        body: Bytes,
    ) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            query,
            headers,
            body,
            attributes: Attributes::new(),
        }
    }
}

/// The response handed back to the HTTP boundary.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl GatewayResponse {
    fn with_status(status: u16) -> Self {
        Self { status, headers: HashMap::new(), body: Bytes::new() }
    }
}

/// One pipeline instance serves the whole process; per-request state lives in
/// the `GatewayRequest` it is handed.
pub struct RequestPipeline {
    global: Arc<GlobalDocument>,
    store: Arc<ConfigStore>,
    loader: Arc<ArtifactLoader>,
    contexts: Arc<ContextBuilder>,
    engine: Arc<WasmEngine>,
    timeout_ms: u64,
}

impl RequestPipeline {
    pub fn new(
        global: Arc<GlobalDocument>,
        store: Arc<ConfigStore>,
        loader: Arc<ArtifactLoader>,
        contexts: Arc<ContextBuilder>,
        engine: Arc<WasmEngine>,
    ) -> Self {
        let timeout_ms = global.config.request_timeout_ms();
        Self { global, store, loader, contexts, engine, timeout_ms }
    }

    /// Run a request to completion. Never returns an error: every failure is
    /// converted into the diagnostic error response.
    pub async fn handle(&self, mut request: GatewayRequest) -> GatewayResponse {
        match self.run(&mut request).await {
            Ok(response) => response,
            Err(err) => self.error_response(&err, &request.attributes),
        }
    }

    async fn run(&self, request: &mut GatewayRequest) -> Result<GatewayResponse> {
        request
            .attributes
            .set_if_unset(REQUEST_LOG_LEVEL, self.global.config.log_level.clone());
        let mut context = self.contexts.build(&request.attributes);

        for spec in &self.global.pre {
            context = self.run_pre_filter(spec, "global", request, context).await?;
        }

        let environment = request.attributes.str_or(REQUEST_ENVIRONMENT, DEFAULT_ENVIRONMENT);
        let env_node = self.store.resolve_environment(&environment).await?;
        if let Some(env) = &env_node {
            let scope = format!("environment={}", environment);
            for spec in &env.doc.pre {
                context = self.run_pre_filter(spec, &scope, request, context).await?;
            }
        }

        // Defaults apply only when unset: a tenant-resolving pre-filter at
        // any earlier scope must stay effective.
        let tenant_id = request.attributes.str_or(REQUEST_TENANT_ID, DEFAULT_TENANT_ID);
        let tenant_node = match &env_node {
            Some(_) => self.store.resolve_tenant(&environment, &tenant_id).await?,
            None => None,
        };
        let tenant_scope = format!("environment={}&tenant={}", environment, tenant_id);
        if let Some(tenant) = &tenant_node {
            for spec in &tenant.doc.pre {
                context = self.run_pre_filter(spec, &tenant_scope, request, context).await?;
            }
        }

        let route_id = resolve_route_id(request);
        if let Some(route) = tenant_node.as_ref().and_then(|t| t.route(&route_id)) {
            for spec in &route.pre {
                context = self.run_pre_filter(spec, &tenant_scope, request, context).await?;
            }
        }

        let mut response =
            match tenant_node.as_ref().and_then(|t| t.function_for(&route_id)) {
                Some(function) => {
                    self.run_function(function, &tenant_scope, request, context.clone()).await?
                }
                None => not_found_response(&environment, &tenant_id, &route_id),
            };

        if let Some(tenant) = &tenant_node {
            if let Some(route) = tenant.route(&route_id) {
                for spec in &route.post {
                    response = self
                        .run_post_filter(spec, "route", request, response, context.clone())
                        .await?;
                }
            }
            for spec in &tenant.doc.post {
                response = self
                    .run_post_filter(spec, "tenant", request, response, context.clone())
                    .await?;
            }
        }
        if let Some(env) = &env_node {
            for spec in &env.doc.post {
                response = self
                    .run_post_filter(spec, "environment", request, response, context.clone())
                    .await?;
            }
        }
        for spec in &self.global.post {
            response =
                self.run_post_filter(spec, "global", request, response, context.clone()).await?;
        }

        Ok(response)
    }

    async fn run_pre_filter(
        &self,
        spec: &ArtifactSpec,
        scope: &str,
        request: &mut GatewayRequest,
        context: Arc<TenantContext>,
    ) -> Result<Arc<TenantContext>> {
        debug!(scope, filter = %spec.coordinate(), "Running pre-filter");
        let artifact = self.loader.load(spec, ArtifactRole::PreFilter, scope).await?;
        let call = artifact.call_for(ArtifactRole::PreFilter)?;
        let input = context.codec.to_bytes(&request_envelope(request, &context.codec))?;
        let output = self.engine.invoke(call, context.clone(), input, self.timeout_ms).await?;
        if !output.is_empty() {
            let delta: PreFilterOutput = context.codec.from_slice(&output)?;
            apply_pre_output(request, delta, &context.codec)?;
        }
        Ok(self.contexts.build(&request.attributes))
    }

    async fn run_function(
        &self,
        spec: &ArtifactSpec,
        scope: &str,
        request: &GatewayRequest,
        context: Arc<TenantContext>,
    ) -> Result<GatewayResponse> {
        debug!(scope, function = %spec.coordinate(), "Dispatching function");
        let artifact = self.loader.load(spec, ArtifactRole::Function, scope).await?;
        let call = artifact.call_for(ArtifactRole::Function)?;
        let input = context.codec.to_bytes(&request_envelope(request, &context.codec))?;
        let output = self.engine.invoke(call, context.clone(), input, self.timeout_ms).await?;
        if output.is_empty() {
            return Err(Error::execution(spec.coordinate(), "function produced no response"));
        }
        let envelope: ResponseEnvelope = context.codec.from_slice(&output)?;
        response_from_envelope(envelope, &context.codec)
    }

    async fn run_post_filter(
        &self,
        spec: &ArtifactSpec,
        scope: &str,
        request: &mut GatewayRequest,
        response: GatewayResponse,
        context: Arc<TenantContext>,
    ) -> Result<GatewayResponse> {
        debug!(scope, filter = %spec.coordinate(), "Running post-filter");
        let artifact = self.loader.load(spec, ArtifactRole::PostFilter, scope).await?;
        let call = artifact.call_for(ArtifactRole::PostFilter)?;
        let input = context.codec.to_bytes(&PostFilterInput {
            request: request_envelope(request, &context.codec),
            response: response_envelope(&response, &context.codec),
        })?;
        let output = self.engine.invoke(call, context.clone(), input, self.timeout_ms).await?;
        if output.is_empty() {
            return Ok(response);
        }
        let delta: PostFilterOutput = context.codec.from_slice(&output)?;
        if let Some(attributes) = delta.attributes {
            request.attributes.merge(attributes);
        }
        match delta.response {
            Some(envelope) => response_from_envelope(envelope, &context.codec),
            None => Ok(response),
        }
    }

    fn error_response(&self, err: &Error, attributes: &Attributes) -> GatewayResponse {
        let status = attributes.response_status_override().unwrap_or_else(|| err.status_code());
        let detail = ErrorDetail::from_error(err);
        error!(
            status,
            kinds = %detail.joined_kinds(),
            "Request pipeline failed: {}",
            detail.joined_messages()
        );
        let mut response = GatewayResponse::with_status(status);
        response.headers.insert(ERROR_TYPE_HEADER.to_string(), detail.joined_kinds());
        response.headers.insert(ERROR_MESSAGE_HEADER.to_string(), detail.joined_messages());
        if let Some(message) = attributes.get_str(RESPONSE_MESSAGE) {
            response.body = Bytes::from(message);
        }
        response
    }
}

/// Route resolution: the attribute a filter set, else the first path segment,
/// else the catch-all sentinel.
fn resolve_route_id(request: &GatewayRequest) -> String {
    if let Some(id) = request.attributes.get_str(REQUEST_ROUTE_ID) {
        return id;
    }
    request
        .path
        .trim_matches('/')
        .split('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .map(String::from)
        .unwrap_or_else(|| CATCH_ALL_ROUTE.to_string())
}

fn not_found_response(environment: &str, tenant_id: &str, route_id: &str) -> GatewayResponse {
    let mut response = GatewayResponse::with_status(404);
    response.headers.insert(
        NOT_FOUND_HEADER.to_string(),
        format!("{}/{}/{}", environment, tenant_id, route_id),
    );
    response
}

fn request_envelope(request: &GatewayRequest, codec: &EnvelopeCodec) -> RequestEnvelope {
    RequestEnvelope {
        method: request.method.clone(),
        path: request.path.clone(),
        query: request.query.clone(),
        headers: request.headers.clone(),
        body: codec.encode_body(&request.body),
        attributes: request.attributes.as_map().clone(),
    }
}

fn response_envelope(response: &GatewayResponse, codec: &EnvelopeCodec) -> ResponseEnvelope {
    ResponseEnvelope {
        status: response.status,
        headers: response.headers.clone(),
        body: codec.encode_body(&response.body),
    }
}

fn apply_pre_output(
    request: &mut GatewayRequest,
    delta: PreFilterOutput,
    codec: &EnvelopeCodec,
) -> Result<()> {
    if let Some(attributes) = delta.attributes {
        request.attributes.merge(attributes);
    }
    if let Some(envelope) = delta.request {
        request.method = envelope.method;
        request.path = envelope.path;
        request.query = envelope.query;
        request.headers = envelope.headers;
        request.body = Bytes::from(codec.decode_body(&envelope.body)?);
        request.attributes.merge(envelope.attributes);
    }
    Ok(())
}

fn response_from_envelope(
    envelope: ResponseEnvelope,
    codec: &EnvelopeCodec,
) -> Result<GatewayResponse> {
    Ok(GatewayResponse {
        status: envelope.status,
        headers: envelope.headers,
        body: Bytes::from(codec.decode_body(&envelope.body)?),
    })
}
