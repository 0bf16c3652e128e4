//! # HTTP Boundary
//!
//! The single listening socket in the process. Every inbound request — any
//! method, any path — feeds the request pipeline; a per-request watchdog
//! bounds latency regardless of tenant code behavior and emits the
//! gateway-timeout response when it fires.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::response::Response;
use axum::Router;
use bytes::Bytes;
use tokio::net::{TcpListener, TcpSocket};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::attributes::REQUEST_ID;
use crate::configstore::GlobalSettings;
use crate::errors::{Error, Result};
use crate::pipeline::{GatewayRequest, GatewayResponse, RequestPipeline};

/// Header attached to watchdog-expiry responses.
pub const TIMEOUT_HEADER: &str = "x-gateway-timeout";

const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

struct ServerState {
    pipeline: Arc<RequestPipeline>,
    request_timeout: Duration,
}

/// Bind and serve until shutdown. The backlog comes from the global
/// configuration; everything else about socket handling stays with tokio.
pub async fn start_server(
    settings: &GlobalSettings,
    pipeline: Arc<RequestPipeline>,
) -> Result<()> {
    let addr: SocketAddr = settings
        .bind_address()
        .parse()
        .map_err(|e| Error::configuration(format!("Invalid bind address: {}", e)))?;

    let listener = bind_with_backlog(addr, settings.backlog)?;
    let router = build_router(settings, pipeline);

    info!(address = %addr, backlog = settings.backlog, "HTTP gateway listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Shutdown listener failed");
            }
        })
        .await
        .map_err(|e| Error::transport(format!("Gateway server error: {}", e)))
}

fn bind_with_backlog(addr: SocketAddr, backlog: u32) -> Result<TcpListener> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4(),
        SocketAddr::V6(_) => TcpSocket::new_v6(),
    }
    .map_err(|e| Error::transport(format!("Failed to create listener socket: {}", e)))?;
    socket
        .set_reuseaddr(true)
        .map_err(|e| Error::transport(format!("Failed to configure listener: {}", e)))?;
    socket
        .bind(addr)
        .map_err(|e| Error::transport(format!("Failed to bind {}: {}", addr, e)))?;
    socket
        .listen(backlog)
        .map_err(|e| Error::transport(format!("Failed to listen on {}: {}", addr, e)))
}

/// Every method and path funnels into the pipeline through the fallback.
pub fn build_router(settings: &GlobalSettings, pipeline: Arc<RequestPipeline>) -> Router {
    let state = Arc::new(ServerState {
        pipeline,
        request_timeout: Duration::from_secs(settings.request_timeout_seconds),
    });
    Router::new()
        .fallback(dispatch)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn dispatch(State(state): State<Arc<ServerState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => return plain_response(413, "request body too large"),
    };

    let headers = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value.to_str().ok().map(|v| (name.to_string(), v.to_string()))
        })
        .collect::<HashMap<_, _>>();

    let mut gateway_request = GatewayRequest::new(
        parts.method.as_str(),
        parts.uri.path(),
        parts.uri.query().map(String::from),
        headers,
        body,
    );
    let request_id = uuid::Uuid::new_v4().to_string();
    gateway_request.attributes.set(REQUEST_ID, request_id.as_str());
    tracing::debug!(request_id = %request_id, method = %parts.method, path = %parts.uri.path(), "Accepted request");

    // The watchdog: armed at request entry, cancelled (dropped) on
    // completion. On expiry the in-flight guest invocation keeps burning its
    // own fuel budget on the blocking pool while the worker answers 504.
    let timeout = state.request_timeout;
    match tokio::time::timeout(timeout, state.pipeline.handle(gateway_request)).await {
        Ok(response) => into_axum_response(response),
        Err(_) => {
            warn!(timeout_secs = timeout.as_secs(), "Request watchdog expired");
            let mut response = plain_response(504, "");
            if let Ok(value) = timeout.as_secs().to_string().parse() {
                response.headers_mut().insert(TIMEOUT_HEADER, value);
            }
            response
        }
    }
}

fn into_axum_response(response: GatewayResponse) -> Response {
    let mut builder = Response::builder().status(response.status);
    for (name, value) in &response.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
        .body(Body::from(response.body))
        .unwrap_or_else(|_| plain_response(500, "invalid response headers"))
}

fn plain_response(status: u16, body: &str) -> Response {
    Response::builder()
        .status(status)
        .body(Body::from(Bytes::from(body.to_string())))
        .expect("static response must build")
}
