//! JSON envelopes exchanged with guest code.
//!
//! Guests receive and return JSON documents through linear memory: requests
//! and responses carry their bodies base64-encoded, and filter outputs are
//! deltas — an absent field means "unchanged". The codec is the data-mapper
//! capability of the tenant context: loaded code never links a JSON library
//! of its own choosing against platform memory.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{Error, Result};

/// Request surface handed to pre-filters and functions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub method: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Base64-encoded request body.
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
}

/// Response surface produced by functions and transformed by post-filters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub status: u16,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Base64-encoded response body.
    #[serde(default)]
    pub body: String,
}

/// Pre-filter output delta: replacement request and/or attribute updates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreFilterOutput {
    #[serde(default)]
    pub request: Option<RequestEnvelope>,
    #[serde(default)]
    pub attributes: Option<HashMap<String, Value>>,
}

/// Post-filter output delta: replacement response and/or attribute updates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostFilterOutput {
    #[serde(default)]
    pub response: Option<ResponseEnvelope>,
    #[serde(default)]
    pub attributes: Option<HashMap<String, Value>>,
}

/// Input handed to post-filters: the request plus the current response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostFilterInput {
    pub request: RequestEnvelope,
    pub response: ResponseEnvelope,
}

/// Input handed to stream-consumer functions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamRecordEnvelope {
    pub id: String,
    pub entries: HashMap<String, String>,
}

/// Serializer/deserializer for everything crossing the guest boundary.
#[derive(Debug, Default)]
pub struct EnvelopeCodec;

impl EnvelopeCodec {
    pub fn new() -> Self {
        Self
    }

    pub fn to_bytes<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| Error::Serialization {
            source: e,
            context: "Failed to encode guest envelope".to_string(),
        })
    }

    pub fn from_slice<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(|e| Error::Serialization {
            source: e,
            context: "Failed to decode guest envelope".to_string(),
        })
    }

    pub fn encode_body(&self, body: &[u8]) -> String {
        BASE64.encode(body)
    }

    pub fn decode_body(&self, body: &str) -> Result<Vec<u8>> {
        BASE64.decode(body).map_err(|e| {
            Error::internal(format!("Invalid base64 body in guest envelope: {}", e))
        })
    }
}
