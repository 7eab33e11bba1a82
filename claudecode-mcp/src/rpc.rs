//! JSON-RPC 2.0 message types for the in-process server surface.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request parse failure (malformed message).
pub const PARSE_ERROR: i64 = -32700;
/// The requested method is not part of the served surface.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Parameters are missing or have the wrong shape.
pub const INVALID_PARAMS: i64 = -32602;
/// The handler failed while executing.
pub const INTERNAL_ERROR: i64 = -32603;

/// An incoming JSON-RPC request or notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version marker, `"2.0"`.
    pub jsonrpc: String,
    /// Request id. Absent for notifications, which expect no response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Method name (e.g. `tools/call`).
    pub method: String,
    /// Method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// An outgoing JSON-RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol version marker, `"2.0"`.
    pub jsonrpc: String,
    /// Id of the request being answered (`null` when the request id was
    /// unparseable).
    pub id: Value,
    /// Successful result payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Builds a success response for the given request id.
    #[must_use]
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Builds an error response for the given request id.
    #[must_use]
    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Standard JSON-RPC error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}
