//! # Error Types
//!
//! Error taxonomy for the Portico gateway using `thiserror`. Every failure on
//! the request path converts into a diagnostic error response; nothing here is
//! fatal to the process.

use std::fmt;

/// Custom result type for Portico operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the Portico gateway
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Configuration document fetch/parse failures
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Artifact fetch/compile/entry-resolution failures
    #[error("Failed to load artifact {artifact_url}: {message}")]
    ResourceLoad {
        artifact_url: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Sandbox denial — always attributable to loaded tenant code
    #[error("Security violation: {capability} denied for import {import}")]
    SecurityViolation {
        capability: DeniedCapability,
        import: String,
    },

    /// Watchdog or guest fuel budget expiry
    #[error("Operation timed out: {operation} after {duration_ms}ms")]
    Timeout {
        operation: String,
        duration_ms: u64,
    },

    /// Tenant-code failure during guest execution, propagated as-is
    #[error("Guest execution failed in {unit}: {message}")]
    Execution {
        unit: String,
        message: String,
    },

    /// Network transport errors (server bind, outbound HTTP)
    #[error("Transport error: {message}")]
    Transport {
        message: String,
    },

    /// Envelope / document (de)serialization errors
    #[error("Serialization error: {context}")]
    Serialization {
        #[source]
        source: serde_json::Error,
        context: String,
    },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal invariant violations
    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

/// Operation categories the capability sandbox refuses to loaded code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeniedCapability {
    SocketCreation,
    ThreadCreation,
    ReflectiveAccess,
    ClassSpaceCreation,
    NativeLinking,
    RuntimePermission,
    FileMutation,
}

impl fmt::Display for DeniedCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeniedCapability::SocketCreation => write!(f, "socket_creation"),
            DeniedCapability::ThreadCreation => write!(f, "thread_creation"),
            DeniedCapability::ReflectiveAccess => write!(f, "reflective_access"),
            DeniedCapability::ClassSpaceCreation => write!(f, "class_space_creation"),
            DeniedCapability::NativeLinking => write!(f, "native_linking"),
            DeniedCapability::RuntimePermission => write!(f, "runtime_permission"),
            DeniedCapability::FileMutation => write!(f, "file_mutation"),
        }
    }
}

impl Error {
    /// Create a new configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration { message: message.into(), source: None }
    }

    /// Create a configuration error with source
    pub fn configuration_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Configuration { message: message.into(), source: Some(source) }
    }

    /// Create a resource load error
    pub fn resource_load<U: Into<String>, M: Into<String>>(artifact_url: U, message: M) -> Self {
        Self::ResourceLoad {
            artifact_url: artifact_url.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a resource load error with source
    pub fn resource_load_with_source<U: Into<String>, M: Into<String>>(
        artifact_url: U,
        message: M,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::ResourceLoad {
            artifact_url: artifact_url.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a security violation
    pub fn security_violation<I: Into<String>>(capability: DeniedCapability, import: I) -> Self {
        Self::SecurityViolation { capability, import: import.into() }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S, duration_ms: u64) -> Self {
        Self::Timeout { operation: operation.into(), duration_ms }
    }

    /// Create a guest execution error
    pub fn execution<U: Into<String>, M: Into<String>>(unit: U, message: M) -> Self {
        Self::Execution { unit: unit.into(), message: message.into() }
    }

    /// Create a transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport { message: message.into() }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Short kind label used in diagnostic headers and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Configuration { .. } => "Configuration",
            Error::ResourceLoad { .. } => "ResourceLoad",
            Error::SecurityViolation { .. } => "SecurityViolation",
            Error::Timeout { .. } => "Timeout",
            Error::Execution { .. } => "Execution",
            Error::Transport { .. } => "Transport",
            Error::Serialization { .. } => "Serialization",
            Error::Io(_) => "Io",
            Error::Internal { .. } => "Internal",
        }
    }

    /// HTTP status produced for this error when no filter overrode it
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Timeout { .. } => 504,
            _ => 500,
        }
    }
}

/// Ordered kind/message chains extracted from an error and its causes,
/// attached to error responses as diagnostic headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDetail {
    pub kinds: Vec<String>,
    pub messages: Vec<String>,
}

impl ErrorDetail {
    /// Walk the cause chain, outermost first.
    pub fn from_error(error: &Error) -> Self {
        let mut kinds = vec![error.kind().to_string()];
        let mut messages = vec![error.to_string()];
        let mut cause = std::error::Error::source(error);
        while let Some(current) = cause {
            match current.downcast_ref::<Error>() {
                Some(inner) => kinds.push(inner.kind().to_string()),
                None => kinds.push("cause".to_string()),
            }
            messages.push(current.to_string());
            cause = current.source();
        }
        Self { kinds, messages }
    }

    /// Comma-joined kind chain for the error-type header.
    pub fn joined_kinds(&self) -> String {
        self.kinds.join(",")
    }

    /// Comma-joined message chain for the error-message header.
    pub fn joined_messages(&self) -> String {
        self.messages.join(",")
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization { source: error, context: "JSON serialization failed".to_string() }
    }
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        Self::Transport { message: error.to_string() }
    }
}
