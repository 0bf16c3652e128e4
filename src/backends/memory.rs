//! In-process backend implementations backing the default `memory://`
//! storage URL and the test suites.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;

use super::{KeyValueStore, PubSubTransport, StreamRecord, StreamStore};
use crate::errors::Result;

/// Hash-per-key in-memory store.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    hashes: DashMap<String, HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str, field: &str) -> Result<Option<String>> {
        Ok(self.hashes.get(key).and_then(|h| h.get(field).cloned()))
    }

    async fn set(&self, key: &str, field: &str, value: &str) -> Result<bool> {
        let mut hash = self.hashes.entry(key.to_string()).or_default();
        Ok(hash.insert(field.to_string(), value.to_string()).is_none())
    }

    async fn delete(&self, key: &str, fields: &[String]) -> Result<u64> {
        let mut removed = 0;
        if let Some(mut hash) = self.hashes.get_mut(key) {
            for field in fields {
                if hash.remove(field).is_some() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn exists(&self, key: &str, field: &str) -> Result<bool> {
        Ok(self.hashes.get(key).map(|h| h.contains_key(field)).unwrap_or(false))
    }

    async fn keys(&self, key: &str) -> Result<Vec<String>> {
        Ok(self.hashes.get(key).map(|h| h.keys().cloned().collect()).unwrap_or_default())
    }

    async fn values(&self, key: &str) -> Result<Vec<String>> {
        Ok(self.hashes.get(key).map(|h| h.values().cloned().collect()).unwrap_or_default())
    }

    async fn length(&self, key: &str) -> Result<u64> {
        Ok(self.hashes.get(key).map(|h| h.len() as u64).unwrap_or(0))
    }
}

#[derive(Debug, Default)]
struct StreamState {
    records: Vec<StreamRecord>,
    /// Per-group delivery cursor into `records`.
    cursors: HashMap<String, usize>,
    /// Delivered-but-unacknowledged record ids per group.
    pending: HashMap<String, Vec<String>>,
}

/// Append-only in-memory stream with consumer-group delivery cursors.
#[derive(Debug, Default)]
pub struct MemoryStreamStore {
    streams: DashMap<String, StreamState>,
    sequence: AtomicU64,
}

impl MemoryStreamStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StreamStore for MemoryStreamStore {
    async fn append(&self, stream: &str, entries: &HashMap<String, String>) -> Result<String> {
        let id = format!("{}-0", self.sequence.fetch_add(1, Ordering::Relaxed) + 1);
        let mut state = self.streams.entry(stream.to_string()).or_default();
        state.records.push(StreamRecord { id: id.clone(), entries: entries.clone() });
        Ok(id)
    }

    async fn create_group(&self, stream: &str, group: &str) -> Result<()> {
        let mut state = self.streams.entry(stream.to_string()).or_default();
        state.cursors.entry(group.to_string()).or_insert(0);
        state.pending.entry(group.to_string()).or_default();
        Ok(())
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        _consumer: &str,
        max: usize,
    ) -> Result<Vec<StreamRecord>> {
        let mut state = match self.streams.get_mut(stream) {
            Some(state) => state,
            None => return Ok(Vec::new()),
        };
        let cursor = *state.cursors.entry(group.to_string()).or_insert(0);
        let delivered: Vec<StreamRecord> =
            state.records.iter().skip(cursor).take(max).cloned().collect();
        let advanced = cursor + delivered.len();
        state.cursors.insert(group.to_string(), advanced);
        let pending = state.pending.entry(group.to_string()).or_default();
        pending.extend(delivered.iter().map(|r| r.id.clone()));
        Ok(delivered)
    }

    async fn acknowledge(&self, stream: &str, group: &str, id: &str) -> Result<()> {
        if let Some(mut state) = self.streams.get_mut(stream) {
            if let Some(pending) = state.pending.get_mut(group) {
                pending.retain(|p| p != id);
            }
        }
        Ok(())
    }
}

const PUBSUB_CHANNEL_CAPACITY: usize = 256;

/// Broadcast-channel pub/sub fabric.
#[derive(Debug, Default)]
pub struct MemoryPubSub {
    channels: DashMap<String, broadcast::Sender<String>>,
}

impl MemoryPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(PUBSUB_CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl PubSubTransport for MemoryPubSub {
    async fn publish(&self, channel: &str, message: &str) -> Result<u64> {
        Ok(self.sender(channel).send(message.to_string()).unwrap_or(0) as u64)
    }

    async fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<String>> {
        Ok(self.sender(channel).subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_kv_set_get_roundtrip() {
        let store = MemoryKeyValueStore::new();
        assert!(store.set("prod|t1", "greeting", "hello").await.unwrap());
        assert_eq!(store.get("prod|t1", "greeting").await.unwrap().as_deref(), Some("hello"));
        // Overwrite reports the field already existed.
        assert!(!store.set("prod|t1", "greeting", "hi").await.unwrap());
        assert_eq!(store.length("prod|t1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_kv_tenant_isolation() {
        let store = MemoryKeyValueStore::new();
        store.set("prod|t1", "k", "v1").await.unwrap();
        store.set("prod|t2", "k", "v2").await.unwrap();
        assert_eq!(store.get("prod|t1", "k").await.unwrap().as_deref(), Some("v1"));
        assert_eq!(store.get("prod|t2", "k").await.unwrap().as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_kv_delete_and_exists() {
        let store = MemoryKeyValueStore::new();
        store.set("k", "a", "1").await.unwrap();
        store.set("k", "b", "2").await.unwrap();
        assert!(store.exists("k", "a").await.unwrap());
        let removed =
            store.delete("k", &["a".to_string(), "missing".to_string()]).await.unwrap();
        assert_eq!(removed, 1);
        assert!(!store.exists("k", "a").await.unwrap());
    }

    #[tokio::test]
    async fn test_stream_append_assigns_increasing_ids() {
        let store = MemoryStreamStore::new();
        let mut entries = HashMap::new();
        entries.insert("k".to_string(), "v".to_string());
        let first = store.append("s", &entries).await.unwrap();
        let second = store.append("s", &entries).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_stream_group_cursor_advances() {
        let store = MemoryStreamStore::new();
        let entries = HashMap::new();
        store.append("s", &entries).await.unwrap();
        store.append("s", &entries).await.unwrap();
        store.create_group("s", "g").await.unwrap();

        let batch = store.read_group("s", "g", "c0", 10).await.unwrap();
        assert_eq!(batch.len(), 2);
        let again = store.read_group("s", "g", "c0", 10).await.unwrap();
        assert!(again.is_empty());

        store.acknowledge("s", "g", &batch[0].id).await.unwrap();
    }

    #[tokio::test]
    async fn test_pubsub_delivery() {
        let pubsub = MemoryPubSub::new();
        let mut rx = pubsub.subscribe("alerts").await.unwrap();
        let receivers = pubsub.publish("alerts", "fire").await.unwrap();
        assert_eq!(receivers, 1);
        assert_eq!(rx.recv().await.unwrap(), "fire");
    }

    #[tokio::test]
    async fn test_pubsub_publish_without_subscribers() {
        let pubsub = MemoryPubSub::new();
        assert_eq!(pubsub.publish("empty", "msg").await.unwrap(), 0);
    }
}
