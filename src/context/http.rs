//! Platform HTTP client capability.
//!
//! The only way loaded code reaches the network. Transport failures are
//! returned inside the response envelope (status 0 plus an error message) so
//! tenant code can implement its own retry policy; they never trap the guest.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Outbound request envelope produced by guests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpCallRequest {
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Base64-encoded request body.
    #[serde(default)]
    pub body: String,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Response envelope handed back to guests. `status` 0 signals a transport
/// failure described by `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpCallResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Base64-encoded response body.
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HttpCallResponse {
    fn transport_error(message: String) -> Self {
        Self { status: 0, headers: HashMap::new(), body: String::new(), error: Some(message) }
    }
}

/// Shared outbound HTTP client handed to every tenant context.
pub struct HttpCapability {
    client: reqwest::Client,
}

impl HttpCapability {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub async fn call(&self, request: HttpCallRequest) -> HttpCallResponse {
        use base64::engine::general_purpose::STANDARD as BASE64;
        use base64::Engine as _;

        let method = match request.method.parse::<reqwest::Method>() {
            Ok(method) => method,
            Err(_) => {
                return HttpCallResponse::transport_error(format!(
                    "Invalid HTTP method '{}'",
                    request.method
                ))
            }
        };
        let body = match BASE64.decode(&request.body) {
            Ok(body) => body,
            Err(e) => {
                return HttpCallResponse::transport_error(format!("Invalid base64 body: {}", e))
            }
        };

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if !body.is_empty() {
            builder = builder.body(body);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => return HttpCallResponse::transport_error(e.to_string()),
        };

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value.to_str().ok().map(|v| (name.to_string(), v.to_string()))
            })
            .collect();
        match response.bytes().await {
            Ok(bytes) => HttpCallResponse {
                status,
                headers,
                body: BASE64.encode(&bytes),
                error: None,
            },
            Err(e) => HttpCallResponse::transport_error(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_successful_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("x-token", "abc"))
            .respond_with(ResponseTemplate::new(201).set_body_string("created"))
            .mount(&server)
            .await;

        let capability = HttpCapability::new(reqwest::Client::new());
        let response = capability
            .call(HttpCallRequest {
                method: "POST".to_string(),
                url: format!("{}/hook", server.uri()),
                headers: HashMap::from([("x-token".to_string(), "abc".to_string())]),
                body: BASE64.encode(b"payload"),
            })
            .await;

        assert_eq!(response.status, 201);
        assert!(response.error.is_none());
        assert_eq!(BASE64.decode(&response.body).unwrap(), b"created");
    }

    #[tokio::test]
    async fn test_transport_failure_is_enveloped() {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(2))
            .build()
            .unwrap();
        let capability = HttpCapability::new(client);
        let response = capability
            .call(HttpCallRequest {
                method: "GET".to_string(),
                // Reserved TEST-NET address: connection refused or unroutable.
                url: "http://192.0.2.1:1/".to_string(),
                headers: HashMap::new(),
                body: String::new(),
            })
            .await;
        assert_eq!(response.status, 0);
        assert!(response.error.is_some());
    }

    #[tokio::test]
    async fn test_invalid_method_rejected() {
        let capability = HttpCapability::new(reqwest::Client::new());
        let response = capability
            .call(HttpCallRequest {
                method: "NOT A METHOD".to_string(),
                url: "http://example.com".to_string(),
                headers: HashMap::new(),
                body: String::new(),
            })
            .await;
        assert_eq!(response.status, 0);
        assert!(response.error.unwrap().contains("Invalid HTTP method"));
    }
}
