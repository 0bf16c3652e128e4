//! Tenant-scoped stream facade.

use std::collections::HashMap;
use std::sync::Arc;

use crate::backends::StreamStore;
use crate::errors::Result;

/// Scopes stream appends to `{tenant_key}-{topic}` stream keys.
pub struct TenantStream {
    tenant_key: String,
    store: Arc<dyn StreamStore>,
}

impl TenantStream {
    pub fn new(tenant_key: String, store: Arc<dyn StreamStore>) -> Self {
        Self { tenant_key, store }
    }

    /// Append a record to a tenant topic, returning the record id.
    pub async fn send(&self, topic: &str, entries: &HashMap<String, String>) -> Result<String> {
        let stream_key = format!("{}-{}", self.tenant_key, topic);
        self.store.append(&stream_key, entries).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{MemoryStreamStore, StreamStore as _};

    #[test]
    fn test_send_prefixes_stream_key() {
        tokio_test::block_on(async {
            let store = Arc::new(MemoryStreamStore::new());
            let stream = TenantStream::new("prod|t1".to_string(), store.clone());

            let mut entries = HashMap::new();
            entries.insert("title".to_string(), "event".to_string());
            let id = stream.send("orders", &entries).await.unwrap();
            assert!(!id.is_empty());

            store.create_group("prod|t1-orders", "g").await.unwrap();
            let records = store.read_group("prod|t1-orders", "g", "c0", 10).await.unwrap();
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].entries["title"], "event");
        });
    }
}
