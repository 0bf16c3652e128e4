//! # Capability Sandbox
//!
//! Process-wide policy gating what loaded tenant code may do. A loaded module
//! has no ambient authority: the only imports it may declare are the
//! platform's own capability functions (the `portico` host namespace). Every
//! other import — WASI sockets, filesystem, threads, process control, dynamic
//! linking, runtime introspection — is classified into a denial category and
//! rejected with a `SecurityViolation` before the module is ever
//! instantiated.
//!
//! The policy is stateless beyond its allow-list, built once at process start
//! and consulted on every artifact load; inspection is a single pass over a
//! module's declared imports.

use wasmtime::Module;

use crate::errors::{DeniedCapability, Error, Result};

/// Import namespace reserved for platform capability functions.
pub const HOST_NAMESPACE: &str = "portico";

/// Capability functions the platform links into every guest. Anything a
/// tenant unit needs — network, storage, messaging, logging, serialization —
/// goes through one of these, never through ambient system imports.
pub const HOST_IMPORTS: &[&str] = &[
    "log",
    "cache_get",
    "cache_set",
    "cache_del",
    "cache_exists",
    "cache_keys",
    "cache_values",
    "cache_len",
    "stream_append",
    "publish",
    "http_call",
];

/// Stateless allow/deny policy over guest imports.
#[derive(Debug, Default)]
pub struct SandboxPolicy;

impl SandboxPolicy {
    pub fn new() -> Self {
        Self
    }

    /// Whether a single import is permitted.
    pub fn is_allowed(&self, namespace: &str, name: &str) -> bool {
        namespace == HOST_NAMESPACE && HOST_IMPORTS.contains(&name)
    }

    /// Check every import a compiled module declares. The first disallowed
    /// import fails the whole module.
    pub fn inspect_module(&self, module: &Module) -> Result<()> {
        for import in module.imports() {
            let namespace = import.module();
            let name = import.name();
            if self.is_allowed(namespace, name) {
                continue;
            }
            return Err(Error::security_violation(
                classify(namespace, name),
                format!("{}::{}", namespace, name),
            ));
        }
        Ok(())
    }
}

/// Map a denied import onto the operation category it represents.
fn classify(namespace: &str, name: &str) -> DeniedCapability {
    if name.starts_with("sock_") || namespace.contains("sockets") || namespace.contains("tcp") {
        return DeniedCapability::SocketCreation;
    }
    if name.contains("thread") || namespace.contains("thread") {
        return DeniedCapability::ThreadCreation;
    }
    if name.starts_with("path_")
        || name.starts_with("fd_")
        || namespace.contains("filesystem")
    {
        return DeniedCapability::FileMutation;
    }
    if name.starts_with("dl") || name.contains("link") {
        return DeniedCapability::NativeLinking;
    }
    if name.contains("instantiate") || name.contains("module") || name.contains("compile") {
        return DeniedCapability::ClassSpaceCreation;
    }
    if name.contains("reflect") || name.contains("introspect") {
        return DeniedCapability::ReflectiveAccess;
    }
    // Everything else an unknown namespace could grant falls under
    // restricted runtime permissions.
    DeniedCapability::RuntimePermission
}
