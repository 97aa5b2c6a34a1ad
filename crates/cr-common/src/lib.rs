use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod logging;

// ============================================================================
// Core Proxy Message Types
// ============================================================================

/// An outbound request to a remote proxy agent.
///
/// Uses camelCase field names to stay compatible with the broker-side wire
/// format consumed by the proxy agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyRequest {
    /// Caller-generated unique token linking this request to its response
    pub correlation_id: String,
    /// Operation identifier, e.g. "POST:/v1/certificates/issue"
    pub message_type: String,
    /// Target proxy agent id (routing key suffix)
    pub proxy_id: String,
    /// Opaque request payload, passed through to the proxy
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    /// Requested timeout override; falls back to the configured default
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl ProxyRequest {
    pub fn new(
        message_type: impl Into<String>,
        proxy_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            correlation_id: uuid::Uuid::new_v4().to_string(),
            message_type: message_type.into(),
            proxy_id: proxy_id.into(),
            payload,
            created_at: Utc::now(),
            timeout_seconds: None,
        }
    }

    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }
}

/// Category attached to a failed [`ProxyResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// No reply arrived within the requested timeout
    Timeout,
    /// Transport/connectivity failure, including local shutdown
    Connection,
    /// The proxy rejected the request as malformed
    Validation,
    /// The proxy failed while executing the operation
    Internal,
}

/// A response delivered for an earlier [`ProxyRequest`], or a fire-and-forget
/// notification originated by a proxy agent.
///
/// Either `status`/`body` are populated (success) or `error` plus
/// `error_category`/`retryable` are (failure) - never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyResponse {
    pub correlation_id: String,
    /// Echoed request type; also drives fire-and-forget handler routing
    pub message_type: String,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_category: Option<ErrorCategory>,
    #[serde(default)]
    pub retryable: bool,
    pub timestamp: DateTime<Utc>,
}

impl ProxyResponse {
    pub fn success(
        correlation_id: impl Into<String>,
        message_type: impl Into<String>,
        status: u16,
        body: serde_json::Value,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            message_type: message_type.into(),
            status: Some(status),
            body: Some(body),
            error: None,
            error_category: None,
            retryable: false,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(
        correlation_id: impl Into<String>,
        message_type: impl Into<String>,
        error: impl Into<String>,
        category: ErrorCategory,
        retryable: bool,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            message_type: message_type.into(),
            status: None,
            body: None,
            error: Some(error.into()),
            error_category: Some(category),
            retryable,
            timestamp: Utc::now(),
        }
    }

    /// Synthetic response produced locally when a pending request times out.
    /// Never crosses the wire.
    pub fn timed_out(correlation_id: impl Into<String>, message_type: impl Into<String>) -> Self {
        Self::failure(
            correlation_id,
            message_type,
            "No response received within the requested timeout",
            ErrorCategory::Timeout,
            true,
        )
    }

    /// Synthetic response produced locally when the correlator shuts down
    /// with the request still pending. Never crosses the wire.
    pub fn aborted(correlation_id: impl Into<String>, message_type: impl Into<String>) -> Self {
        Self::failure(
            correlation_id,
            message_type,
            "Instance shutting down before a response arrived",
            ErrorCategory::Connection,
            false,
        )
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_timeout_response() {
        let response = ProxyResponse::timed_out("corr-1", "POST:/v1/certificates/issue");
        assert!(!response.is_success());
        assert_eq!(response.error_category, Some(ErrorCategory::Timeout));
        assert!(response.retryable);
        assert!(response.status.is_none());
    }

    #[test]
    fn test_synthetic_aborted_response() {
        let response = ProxyResponse::aborted("corr-1", "health/ping");
        assert_eq!(response.error_category, Some(ErrorCategory::Connection));
        assert!(!response.retryable);
    }

    #[test]
    fn test_wire_format_is_camel_case() {
        let response = ProxyResponse::success("corr-9", "GET:/v1/info", 200, serde_json::json!({}));
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("correlationId").is_some());
        assert!(json.get("messageType").is_some());
    }

    #[test]
    fn test_error_category_serializes_lowercase() {
        let json = serde_json::to_string(&ErrorCategory::Timeout).unwrap();
        assert_eq!(json, "\"timeout\"");
        let json = serde_json::to_string(&ErrorCategory::Connection).unwrap();
        assert_eq!(json, "\"connection\"");
    }
}
