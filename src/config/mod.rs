//! # Configuration Management
//!
//! Environment-sourced process settings. The hierarchical gateway
//! configuration (global/environment/tenant/route) is remote and handled by
//! the `configstore` module.

mod settings;

pub use settings::AppConfig;
