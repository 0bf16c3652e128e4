//! # Backend Collaborator Interfaces
//!
//! Abstract interfaces over the key/value store, stream transport, and
//! publish/subscribe transport the capability facades delegate to. Backends
//! are assumed pooled/multiplexed by the implementation; the gateway core
//! never opens its own connections per tenant.

mod memory;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::errors::{Error, Result};

pub use memory::{MemoryKeyValueStore, MemoryPubSub, MemoryStreamStore};

/// Hash-shaped key/value store scoped by a tenant key.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str, field: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, field: &str, value: &str) -> Result<bool>;
    async fn delete(&self, key: &str, fields: &[String]) -> Result<u64>;
    async fn exists(&self, key: &str, field: &str) -> Result<bool>;
    async fn keys(&self, key: &str) -> Result<Vec<String>>;
    async fn values(&self, key: &str) -> Result<Vec<String>>;
    async fn length(&self, key: &str) -> Result<u64>;
}

/// A single appended stream record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamRecord {
    pub id: String,
    pub entries: HashMap<String, String>,
}

/// Append-only stream transport with consumer groups.
#[async_trait]
pub trait StreamStore: Send + Sync {
    /// Append a record, returning its assigned record id.
    async fn append(&self, stream: &str, entries: &HashMap<String, String>) -> Result<String>;
    /// Create a consumer group if it does not already exist.
    async fn create_group(&self, stream: &str, group: &str) -> Result<()>;
    /// Read up to `max` undelivered records for a consumer in a group.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        max: usize,
    ) -> Result<Vec<StreamRecord>>;
    /// Acknowledge a delivered record.
    async fn acknowledge(&self, stream: &str, group: &str, id: &str) -> Result<()>;
}

/// Publish/subscribe transport.
#[async_trait]
pub trait PubSubTransport: Send + Sync {
    /// Publish a message, returning the number of receivers it reached.
    async fn publish(&self, channel: &str, message: &str) -> Result<u64>;
    /// Subscribe to a channel.
    async fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<String>>;
}

/// The bundle of backend handles the context builder scopes per tenant.
#[derive(Clone)]
pub struct Backends {
    pub kv: Arc<dyn KeyValueStore>,
    pub stream: Arc<dyn StreamStore>,
    pub pubsub: Arc<dyn PubSubTransport>,
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends").finish_non_exhaustive()
    }
}

impl Backends {
    /// Construct backends from the global configuration's storage URL.
    ///
    /// Only the in-process `memory://` scheme ships with the gateway; any
    /// other scheme names an external backend this build was not linked
    /// against and is rejected at bootstrap.
    pub fn from_storage_url(storage_url: &str) -> Result<Self> {
        match storage_url.split("://").next() {
            Some("memory") => Ok(Self {
                kv: Arc::new(MemoryKeyValueStore::new()),
                stream: Arc::new(MemoryStreamStore::new()),
                pubsub: Arc::new(MemoryPubSub::new()),
            }),
            Some(scheme) => Err(Error::configuration(format!(
                "Unsupported storage scheme '{}' in storage URL",
                scheme
            ))),
            None => Err(Error::configuration("Storage URL has no scheme")),
        }
    }
}
