//! HTTP Transport
//!
//! HTTP client interface and implementations for BIG-IP requests.

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::core::locks::lock;
use crate::error::{BrokerError, BrokerResult, TransportError};
use crate::types::{TlsPolicy, DEFAULT_MAX_RESPONSE_SIZE, DEFAULT_REQUEST_TIMEOUT};

/// HTTP request definition.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: HttpMethod,
    /// Request URL.
    pub url: String,
    /// Request headers.
    pub headers: HashMap<String, String>,
    /// Request body.
    pub body: Option<String>,
    /// Request timeout.
    pub timeout: Option<Duration>,
}

/// HTTP method.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

/// HTTP response definition.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Status text.
    pub status_text: String,
    /// Response headers.
    pub headers: HashMap<String, String>,
    /// Response body.
    pub body: String,
}

impl HttpResponse {
    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP transport interface (for dependency injection).
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send an HTTP request.
    async fn send(&self, request: HttpRequest) -> BrokerResult<HttpResponse>;
}

/// Default reqwest-based HTTP transport.
pub struct ReqwestHttpTransport {
    client: reqwest::Client,
    default_timeout: Duration,
    max_response_size: usize,
}

impl ReqwestHttpTransport {
    /// Create a transport with default limits that verifies certificates.
    pub fn new() -> BrokerResult<Self> {
        Self::with_options(
            DEFAULT_REQUEST_TIMEOUT,
            TlsPolicy::Verify,
            DEFAULT_MAX_RESPONSE_SIZE,
        )
    }

    /// Create transport with custom options.
    pub fn with_options(
        timeout: Duration,
        tls_policy: TlsPolicy,
        max_response_size: usize,
    ) -> BrokerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(!tls_policy.verifies())
            .build()
            .map_err(|e| TransportError::TlsError {
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            default_timeout: timeout,
            max_response_size,
        })
    }
}

fn map_send_error(error: reqwest::Error, timeout: Duration) -> BrokerError {
    if error.is_timeout() {
        return TransportError::Timeout { timeout }.into();
    }

    let mut source: Option<&dyn std::error::Error> = Some(&error);
    while let Some(err) = source {
        let text = err.to_string().to_ascii_lowercase();
        if text.contains("certificate") || text.contains("tls") || text.contains("handshake") {
            return TransportError::TlsError {
                message: error.to_string(),
            }
            .into();
        }
        source = err.source();
    }

    TransportError::ConnectionFailed {
        message: error.to_string(),
    }
    .into()
}

#[async_trait]
impl HttpTransport for ReqwestHttpTransport {
    async fn send(&self, request: HttpRequest) -> BrokerResult<HttpResponse> {
        let timeout = request.timeout.unwrap_or(self.default_timeout);

        let mut req_builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
            HttpMethod::Patch => self.client.patch(&request.url),
            HttpMethod::Delete => self.client.delete(&request.url),
        };

        for (key, value) in &request.headers {
            req_builder = req_builder.header(key, value);
        }

        if let Some(body) = request.body {
            req_builder = req_builder.body(body);
        }

        req_builder = req_builder.timeout(timeout);

        let response = req_builder
            .send()
            .await
            .map_err(|e| map_send_error(e, timeout))?;

        let status = response.status().as_u16();
        let status_text = response
            .status()
            .canonical_reason()
            .unwrap_or("")
            .to_string();

        if (300..400).contains(&status) {
            let location = response
                .headers()
                .get("location")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            return Err(TransportError::UnexpectedRedirect { location }.into());
        }

        let mut headers = HashMap::new();
        for (key, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(key.to_string().to_lowercase(), v.to_string());
            }
        }

        if let Some(len) = response.content_length() {
            if len as usize > self.max_response_size {
                return Err(TransportError::ResponseTooLarge { size: len as usize }.into());
            }
        }

        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| map_send_error(e, timeout))?;
            let size = body.len() + chunk.len();
            if size > self.max_response_size {
                return Err(TransportError::ResponseTooLarge { size }.into());
            }
            body.extend_from_slice(&chunk);
        }
        let body = String::from_utf8_lossy(&body).into_owned();

        Ok(HttpResponse {
            status,
            status_text,
            headers,
            body,
        })
    }
}

enum MockReply {
    Response(HttpResponse),
    Timeout,
    ConnectionRefused,
}

/// Mock HTTP transport for testing.
///
/// Replies are served in the order they were queued.
#[derive(Default)]
pub struct MockHttpTransport {
    replies: std::sync::Mutex<VecDeque<MockReply>>,
    request_history: std::sync::Mutex<Vec<HttpRequest>>,
    default_response: std::sync::Mutex<Option<HttpResponse>>,
}

impl MockHttpTransport {
    /// Create new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response to return.
    pub fn queue_response(&self, response: HttpResponse) -> &Self {
        lock(&self.replies).push_back(MockReply::Response(response));
        self
    }

    /// Queue a JSON response.
    pub fn queue_json_response(&self, status: u16, body: &serde_json::Value) -> &Self {
        let response = HttpResponse {
            status,
            status_text: if status == 200 { "OK" } else { "Error" }.to_string(),
            headers: [("content-type".to_string(), "application/json".to_string())]
                .into_iter()
                .collect(),
            body: body.to_string(),
        };
        self.queue_response(response)
    }

    /// Queue an empty response with the given status.
    pub fn queue_status(&self, status: u16) -> &Self {
        self.queue_response(HttpResponse {
            status,
            status_text: String::new(),
            headers: HashMap::new(),
            body: String::new(),
        })
    }

    /// Queue a request timeout.
    pub fn queue_timeout(&self) -> &Self {
        lock(&self.replies).push_back(MockReply::Timeout);
        self
    }

    /// Queue a refused connection.
    pub fn queue_connection_refused(&self) -> &Self {
        lock(&self.replies).push_back(MockReply::ConnectionRefused);
        self
    }

    /// Set default response when queue is empty.
    pub fn set_default_response(&self, response: HttpResponse) -> &Self {
        *lock(&self.default_response) = Some(response);
        self
    }

    /// Get request history.
    pub fn get_requests(&self) -> Vec<HttpRequest> {
        lock(&self.request_history).clone()
    }

    /// Get requests sent with the given method.
    pub fn get_requests_by_method(&self, method: HttpMethod) -> Vec<HttpRequest> {
        lock(&self.request_history)
            .iter()
            .filter(|r| r.method == method)
            .cloned()
            .collect()
    }

    /// Get last request.
    pub fn get_last_request(&self) -> Option<HttpRequest> {
        lock(&self.request_history).last().cloned()
    }

    /// Clear request history.
    pub fn clear_history(&self) {
        lock(&self.request_history).clear();
    }
}

#[async_trait]
impl HttpTransport for MockHttpTransport {
    async fn send(&self, request: HttpRequest) -> BrokerResult<HttpResponse> {
        let timeout = request.timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        lock(&self.request_history).push(request);

        let reply = lock(&self.replies).pop_front();
        match reply {
            Some(MockReply::Response(response)) => Ok(response),
            Some(MockReply::Timeout) => Err(TransportError::Timeout { timeout }.into()),
            Some(MockReply::ConnectionRefused) => Err(TransportError::ConnectionFailed {
                message: "connection refused".to_string(),
            }
            .into()),
            None => lock(&self.default_response).clone().ok_or_else(|| {
                TransportError::ConnectionFailed {
                    message: "No mock response available".to_string(),
                }
                .into()
            }),
        }
    }
}

/// Create mock HTTP transport for testing.
pub fn create_mock_transport() -> MockHttpTransport {
    MockHttpTransport::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(url: &str) -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Get,
            url: url.to_string(),
            headers: HashMap::new(),
            body: None,
            timeout: None,
        }
    }

    #[tokio::test]
    async fn test_mock_transport_serves_in_order() {
        let transport = MockHttpTransport::new();
        transport.queue_json_response(200, &serde_json::json!({"key": "first"}));
        transport.queue_status(204);

        let first = transport.send(request("https://bigip/a")).await.unwrap();
        assert_eq!(first.status, 200);
        assert!(first.body.contains("first"));

        let second = transport.send(request("https://bigip/b")).await.unwrap();
        assert_eq!(second.status, 204);

        let history = transport.get_requests();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].url, "https://bigip/a");
    }

    #[tokio::test]
    async fn test_mock_transport_failures() {
        let transport = MockHttpTransport::new();
        transport.queue_timeout();

        let result = transport.send(request("https://bigip")).await;
        assert!(matches!(
            result,
            Err(BrokerError::Transport(TransportError::Timeout { .. }))
        ));

        // Empty queue and no default
        let result = transport.send(request("https://bigip")).await;
        assert!(matches!(
            result,
            Err(BrokerError::Transport(TransportError::ConnectionFailed { .. }))
        ));
    }

    #[test]
    fn test_http_method_as_str() {
        assert_eq!(HttpMethod::Get.as_str(), "GET");
        assert_eq!(HttpMethod::Post.as_str(), "POST");
        assert_eq!(HttpMethod::Patch.as_str(), "PATCH");
        assert_eq!(HttpMethod::Delete.as_str(), "DELETE");
    }

    #[test]
    fn test_reqwest_transport_builds_for_both_policies() {
        assert!(ReqwestHttpTransport::new().is_ok());
        assert!(ReqwestHttpTransport::with_options(
            Duration::from_secs(5),
            TlsPolicy::SkipVerify,
            1024
        )
        .is_ok());
    }
}
