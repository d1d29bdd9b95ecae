/*!
# Plugin Wire Protocol

Request/response envelopes exchanged with plugin workers over HTTP.
Every worker exposes the same four routes: `/invoke`, `/health`,
`/info`, and `/shutdown`.
*/

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Method invocation route
pub const INVOKE_PATH: &str = "/invoke";
/// Health probe route
pub const HEALTH_PATH: &str = "/health";
/// Info probe route
pub const INFO_PATH: &str = "/info";
/// Graceful shutdown route
pub const SHUTDOWN_PATH: &str = "/shutdown";

/// Status string a healthy worker reports
pub const STATUS_HEALTHY: &str = "healthy";

/// Request body for `/invoke`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeRequest {
    /// Method name
    pub method: String,
    /// Method payload
    pub payload: Value,
}

/// Response body from `/invoke`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeResponse {
    /// Whether the call succeeded
    pub success: bool,

    /// Result data on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Error text on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response body from `/health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `"healthy"` when the worker is ready
    pub status: String,
    /// Worker's plugin id
    pub plugin_id: String,
    /// Probe time
    pub timestamp: DateTime<Utc>,
}

impl HealthResponse {
    pub fn is_healthy(&self) -> bool {
        self.status == STATUS_HEALTHY
    }
}

/// Response body from `/info`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(rename = "type")]
    pub plugin_type: String,
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_invoke_request_shape() {
        let req = InvokeRequest {
            method: "to_upper".to_string(),
            payload: json!({"input": "hello"}),
        };
        let wire = serde_json::to_value(&req).unwrap();
        assert_eq!(wire["method"], "to_upper");
        assert_eq!(wire["payload"]["input"], "hello");
    }

    #[test]
    fn test_success_response_omits_error() {
        let resp = InvokeResponse {
            success: true,
            data: Some(json!({"result": "HELLO"})),
            error: None,
        };
        let wire = serde_json::to_value(&resp).unwrap();
        assert!(wire.get("error").is_none());
        assert_eq!(wire["data"]["result"], "HELLO");
    }

    #[test]
    fn test_failure_response_parses() {
        let resp: InvokeResponse =
            serde_json::from_value(json!({"success": false, "error": "bad input"})).unwrap();
        assert!(!resp.success);
        assert_eq!(resp.error.as_deref(), Some("bad input"));
        assert!(resp.data.is_none());
    }

    #[test]
    fn test_health_response() {
        let resp: HealthResponse = serde_json::from_value(json!({
            "status": "healthy",
            "plugin_id": "textutil",
            "timestamp": "2025-01-01T00:00:00Z",
        }))
        .unwrap();
        assert!(resp.is_healthy());

        let sick: HealthResponse = serde_json::from_value(json!({
            "status": "degraded",
            "plugin_id": "textutil",
            "timestamp": "2025-01-01T00:00:00Z",
        }))
        .unwrap();
        assert!(!sick.is_healthy());
    }

    #[test]
    fn test_info_type_field_rename() {
        let info: PluginInfo = serde_json::from_value(json!({
            "id": "textutil",
            "name": "Text Utilities",
            "version": "1.0.0",
            "type": "transform",
            "status": "running",
        }))
        .unwrap();
        assert_eq!(info.plugin_type, "transform");
    }
}
