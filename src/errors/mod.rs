//! # Error Handling
//!
//! Error types for the Portico gateway. The taxonomy mirrors the request-path
//! failure classes: configuration, resource load, security violation, timeout,
//! and guest execution — plus ambient transport/serialization/I/O variants.

mod types;

pub use types::{DeniedCapability, Error, ErrorDetail, Result};
