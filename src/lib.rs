//! # Portico
//!
//! Portico is a multi-tenant edge-function gateway: one process accepts HTTP
//! requests, resolves which tenant-owned, dynamically-loaded WASM units
//! (filters and a terminal function) handle each request, executes them in an
//! onion-shaped pipeline, and enforces a capability sandbox so hot-loaded
//! code cannot reach sockets, threads, or the filesystem — only the
//! capability bundle the platform hands it.
//!
//! ## Architecture
//!
//! ```text
//! HTTP Boundary → Request Pipeline → Artifact Loader → WASM Engine
//!       ↓               ↓                  ↓               ↓
//!   Watchdog    Configuration Store   Capability      Tenant Context
//!                                      Sandbox        (cache/stream/
//!                                                      publish/log/http)
//! ```
//!
//! Configuration resolves hierarchically (global → environment → tenant →
//! route), fetched lazily from a remote JSON repository and cached for
//! process lifetime. Artifacts resolve from `(name, version)` descriptors to
//! compiled, import-checked WASM modules with single-flight caching by
//! artifact URL.

pub mod attributes;
pub mod backends;
pub mod bootstrap;
pub mod config;
pub mod configstore;
pub mod context;
pub mod engine;
pub mod errors;
pub mod loader;
pub mod observability;
pub mod pipeline;
pub mod sandbox;
pub mod server;

// Re-export commonly used types
pub use config::AppConfig;
pub use errors::{Error, Result};
pub use observability::init_tracing;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_available() {
        assert!(!VERSION.is_empty());
        assert_eq!(APP_NAME, "portico");
    }
}
