//! Tenant-scoped publisher facade.

use std::sync::Arc;

use crate::backends::PubSubTransport;
use crate::errors::Result;

/// Scopes publishes to `channel|{tenant_key}|{channel}` channel keys.
pub struct TenantPublisher {
    tenant_key: String,
    transport: Arc<dyn PubSubTransport>,
}

impl TenantPublisher {
    pub fn new(tenant_key: String, transport: Arc<dyn PubSubTransport>) -> Self {
        Self { tenant_key, transport }
    }

    /// Publish a message, returning the number of receivers reached.
    pub async fn publish(&self, channel: &str, message: &str) -> Result<u64> {
        let channel_key = format!("channel|{}|{}", self.tenant_key, channel);
        self.transport.publish(&channel_key, message).await
    }
}
