//! Per-request context logger.
//!
//! Rebuilt from the current attributes on every context build — never cached,
//! since filters may adjust the `REQUEST_LOG_LEVEL` attribute mid-pipeline.
//! Lines are emitted as `tracing` events tagged with environment/tenant, and
//! optionally forwarded to a remote HTTP sink named by the `REQUEST_LOG_SINK`
//! attribute through a background forwarder task.

use tokio::sync::mpsc;
use tracing::warn;

use crate::attributes::{
    Attributes, ENVIRONMENT_NOT_SET, REQUEST_ENVIRONMENT, REQUEST_LOG_LEVEL, REQUEST_LOG_SINK,
    REQUEST_TENANT_ID, TENANT_NOT_SET,
};

/// Severity levels understood by context loggers and guest `log` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }

    /// Level encoding used across the guest ABI.
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => LogLevel::Trace,
            1 => LogLevel::Debug,
            3 => LogLevel::Warn,
            4 => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// One line queued for remote delivery.
#[derive(Debug, Clone)]
pub struct RemoteLogLine {
    pub url: String,
    pub level: LogLevel,
    pub environment: String,
    pub tenant_id: String,
    pub line: String,
}

/// Cloneable handle feeding the remote log forwarder.
#[derive(Debug, Clone)]
pub struct LogForwarderHandle {
    tx: mpsc::UnboundedSender<RemoteLogLine>,
}

impl LogForwarderHandle {
    /// A handle that drops every line; used when no forwarder is running.
    pub fn disabled() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx }
    }

    fn send(&self, line: RemoteLogLine) {
        let _ = self.tx.send(line);
    }
}

/// Spawn the background task delivering remote log lines. Delivery failures
/// degrade to a local warning; they never affect the request that logged.
pub fn spawn_log_forwarder(client: reqwest::Client) -> LogForwarderHandle {
    let (tx, mut rx) = mpsc::unbounded_channel::<RemoteLogLine>();
    tokio::spawn(async move {
        while let Some(entry) = rx.recv().await {
            let result = client
                .post(&entry.url)
                .header("x-portico-log-level", entry.level.as_str())
                .header("x-portico-environment", &entry.environment)
                .header("x-portico-tenant-id", &entry.tenant_id)
                .body(entry.line.clone())
                .send()
                .await;
            match result {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => {
                    warn!(
                        url = %entry.url,
                        status = %response.status(),
                        "Remote log sink rejected line"
                    );
                }
                Err(error) => {
                    warn!(url = %entry.url, error = %error, "Remote log sink unreachable");
                }
            }
        }
    });
    LogForwarderHandle { tx }
}

/// Logger bound to one context build's attribute snapshot.
pub struct ContextLogger {
    level: LogLevel,
    environment: String,
    tenant_id: String,
    sink_url: Option<String>,
    forwarder: LogForwarderHandle,
}

impl ContextLogger {
    pub fn from_attributes(
        attributes: &Attributes,
        default_level: LogLevel,
        forwarder: LogForwarderHandle,
    ) -> Self {
        let level = attributes
            .get_str(REQUEST_LOG_LEVEL)
            .map(|v| LogLevel::parse(&v))
            .unwrap_or(default_level);
        Self {
            level,
            environment: attributes.str_or(REQUEST_ENVIRONMENT, ENVIRONMENT_NOT_SET),
            tenant_id: attributes.str_or(REQUEST_TENANT_ID, TENANT_NOT_SET),
            sink_url: attributes.get_str(REQUEST_LOG_SINK),
            forwarder,
        }
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        if level < self.level {
            return;
        }
        let environment = self.environment.as_str();
        let tenant = self.tenant_id.as_str();
        match level {
            LogLevel::Trace => tracing::trace!(environment, tenant, "{message}"),
            LogLevel::Debug => tracing::debug!(environment, tenant, "{message}"),
            LogLevel::Info => tracing::info!(environment, tenant, "{message}"),
            LogLevel::Warn => tracing::warn!(environment, tenant, "{message}"),
            LogLevel::Error => tracing::error!(environment, tenant, "{message}"),
        }
        if let Some(url) = &self.sink_url {
            let stamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f");
            self.forwarder.send(RemoteLogLine {
                url: url.clone(),
                level,
                environment: self.environment.clone(),
                tenant_id: self.tenant_id.clone(),
                line: format!(
                    "{} {:5} [{}][{}] {}",
                    stamp,
                    level.as_str(),
                    self.environment,
                    self.tenant_id,
                    message
                ),
            });
        }
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }
}
