//! Tenant-scoped cache facade.

use std::sync::Arc;

use crate::backends::KeyValueStore;
use crate::errors::Result;

/// Thin facade scoping every key/value operation to one tenant's hash key.
/// Loaded code only ever sees this facade, never the underlying store handle.
pub struct TenantCache {
    tenant_key: String,
    store: Arc<dyn KeyValueStore>,
}

impl TenantCache {
    pub fn new(tenant_key: String, store: Arc<dyn KeyValueStore>) -> Self {
        Self { tenant_key, store }
    }

    pub async fn get(&self, field: &str) -> Result<Option<String>> {
        self.store.get(&self.tenant_key, field).await
    }

    pub async fn set(&self, field: &str, value: &str) -> Result<bool> {
        self.store.set(&self.tenant_key, field, value).await
    }

    pub async fn del(&self, fields: &[String]) -> Result<u64> {
        self.store.delete(&self.tenant_key, fields).await
    }

    pub async fn exists(&self, field: &str) -> Result<bool> {
        self.store.exists(&self.tenant_key, field).await
    }

    pub async fn keys(&self) -> Result<Vec<String>> {
        self.store.keys(&self.tenant_key).await
    }

    pub async fn values(&self) -> Result<Vec<String>> {
        self.store.values(&self.tenant_key).await
    }

    pub async fn len(&self) -> Result<u64> {
        self.store.length(&self.tenant_key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryKeyValueStore;

    #[tokio::test]
    async fn test_operations_are_scoped_to_tenant_key() {
        let store = Arc::new(MemoryKeyValueStore::new());
        let t1 = TenantCache::new("prod|t1".to_string(), store.clone());
        let t2 = TenantCache::new("prod|t2".to_string(), store.clone());

        t1.set("k", "one").await.unwrap();
        t2.set("k", "two").await.unwrap();

        assert_eq!(t1.get("k").await.unwrap().as_deref(), Some("one"));
        assert_eq!(t2.get("k").await.unwrap().as_deref(), Some("two"));
        assert_eq!(t1.len().await.unwrap(), 1);

        t1.del(&["k".to_string()]).await.unwrap();
        assert!(!t1.exists("k").await.unwrap());
        assert!(t2.exists("k").await.unwrap());
    }
}
