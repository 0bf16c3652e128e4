//! # Tenant Context
//!
//! The bounded capability bundle handed to every executed unit of loaded
//! code. Cache, stream, and publisher facades exist only once both the
//! environment and tenant attributes are known; each facade is cached by its
//! tenant key so repeated builds for the same tenant reuse the facade object
//! (never the underlying store connection, which is process-wide). The
//! logger is rebuilt on every build — filters may change the log level
//! mid-pipeline.

mod cache;
mod http;
mod logger;
mod publish;
mod stream;

use std::sync::Arc;

use dashmap::DashMap;

use crate::attributes::{tenant_key, Attributes, REQUEST_ENVIRONMENT, REQUEST_TENANT_ID};
use crate::backends::Backends;
use crate::engine::EnvelopeCodec;

pub use cache::TenantCache;
pub use http::{HttpCallRequest, HttpCallResponse, HttpCapability};
pub use logger::{spawn_log_forwarder, ContextLogger, LogForwarderHandle, LogLevel};
pub use publish::TenantPublisher;
pub use stream::TenantStream;

/// Capability bundle for one (environment, tenant) scope.
pub struct TenantContext {
    pub environment: String,
    pub tenant_id: String,
    pub cache: Option<Arc<TenantCache>>,
    pub stream: Option<Arc<TenantStream>>,
    pub publisher: Option<Arc<TenantPublisher>>,
    pub logger: Arc<ContextLogger>,
    pub http: Arc<HttpCapability>,
    pub codec: Arc<EnvelopeCodec>,
}

/// Builds and caches tenant contexts from request attributes.
pub struct ContextBuilder {
    backends: Backends,
    default_log_level: LogLevel,
    http: Arc<HttpCapability>,
    codec: Arc<EnvelopeCodec>,
    forwarder: LogForwarderHandle,
    caches: DashMap<String, Arc<TenantCache>>,
    streams: DashMap<String, Arc<TenantStream>>,
    publishers: DashMap<String, Arc<TenantPublisher>>,
}

impl ContextBuilder {
    pub fn new(
        backends: Backends,
        default_log_level: LogLevel,
        http: Arc<HttpCapability>,
        forwarder: LogForwarderHandle,
    ) -> Self {
        Self {
            backends,
            default_log_level,
            http,
            codec: Arc::new(EnvelopeCodec::new()),
            forwarder,
            caches: DashMap::new(),
            streams: DashMap::new(),
            publishers: DashMap::new(),
        }
    }

    /// Build a context from the current attribute snapshot. Called once at
    /// request entry and again after every executed filter.
    pub fn build(&self, attributes: &Attributes) -> Arc<TenantContext> {
        let scoped =
            attributes.contains(REQUEST_ENVIRONMENT) && attributes.contains(REQUEST_TENANT_ID);
        let environment =
            attributes.str_or(REQUEST_ENVIRONMENT, crate::attributes::ENVIRONMENT_NOT_SET);
        let tenant_id = attributes.str_or(REQUEST_TENANT_ID, crate::attributes::TENANT_NOT_SET);

        let (cache, stream, publisher) = if scoped {
            let key = tenant_key(&environment, &tenant_id);
            (Some(self.cache_for(&key)), Some(self.stream_for(&key)), Some(self.publisher_for(&key)))
        } else {
            (None, None, None)
        };

        let logger = Arc::new(ContextLogger::from_attributes(
            attributes,
            self.default_log_level,
            self.forwarder.clone(),
        ));

        Arc::new(TenantContext {
            environment,
            tenant_id,
            cache,
            stream,
            publisher,
            logger,
            http: self.http.clone(),
            codec: self.codec.clone(),
        })
    }

    fn cache_for(&self, key: &str) -> Arc<TenantCache> {
        self.caches
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(TenantCache::new(key.to_string(), self.backends.kv.clone()))
            })
            .clone()
    }

    fn stream_for(&self, key: &str) -> Arc<TenantStream> {
        self.streams
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(TenantStream::new(key.to_string(), self.backends.stream.clone()))
            })
            .clone()
    }

    fn publisher_for(&self, key: &str) -> Arc<TenantPublisher> {
        self.publishers
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(TenantPublisher::new(key.to_string(), self.backends.pubsub.clone()))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> ContextBuilder {
        ContextBuilder::new(
            Backends::from_storage_url("memory://").unwrap(),
            LogLevel::Info,
            Arc::new(HttpCapability::new(reqwest::Client::new())),
            LogForwarderHandle::disabled(),
        )
    }

    #[test]
    fn test_unscoped_context_has_no_facades() {
        let builder = builder();
        let context = builder.build(&Attributes::new());
        assert!(context.cache.is_none());
        assert!(context.stream.is_none());
        assert!(context.publisher.is_none());
    }

    #[test]
    fn test_scoped_context_reuses_facades() {
        let builder = builder();
        let mut attrs = Attributes::new();
        attrs.set(REQUEST_ENVIRONMENT, "prod");
        attrs.set(REQUEST_TENANT_ID, "t1");

        let first = builder.build(&attrs);
        let second = builder.build(&attrs);
        assert!(Arc::ptr_eq(
            first.cache.as_ref().unwrap(),
            second.cache.as_ref().unwrap()
        ));
        assert!(Arc::ptr_eq(
            first.publisher.as_ref().unwrap(),
            second.publisher.as_ref().unwrap()
        ));
        // Loggers are rebuilt every time.
        assert!(!Arc::ptr_eq(&first.logger, &second.logger));
    }

    #[test]
    fn test_distinct_tenants_get_distinct_facades() {
        let builder = builder();
        let mut a = Attributes::new();
        a.set(REQUEST_ENVIRONMENT, "prod");
        a.set(REQUEST_TENANT_ID, "t1");
        let mut b = Attributes::new();
        b.set(REQUEST_ENVIRONMENT, "prod");
        b.set(REQUEST_TENANT_ID, "t2");

        let first = builder.build(&a);
        let second = builder.build(&b);
        assert!(!Arc::ptr_eq(
            first.cache.as_ref().unwrap(),
            second.cache.as_ref().unwrap()
        ));
    }

    #[test]
    fn test_partial_scope_is_unscoped() {
        let builder = builder();
        let mut attrs = Attributes::new();
        attrs.set(REQUEST_ENVIRONMENT, "prod");
        let context = builder.build(&attrs);
        assert!(context.cache.is_none(), "environment alone does not scope a tenant");
    }
}
