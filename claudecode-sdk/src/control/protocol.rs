//! Wire shapes for the control exchange.

use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::SdkError;
use crate::options::PermissionMode;

/// A session-level request the SDK sends to the CLI.
#[derive(Debug, Clone)]
pub enum OutboundControlRequest {
    /// Abort the current turn.
    Interrupt,
    /// Switch the CLI's permission mode.
    SetPermissionMode(PermissionMode),
    /// Switch the model mid-session.
    SetModel(Option<String>),
}

impl OutboundControlRequest {
    /// The request subtype on the wire.
    #[must_use]
    pub const fn subtype(&self) -> &'static str {
        match self {
            Self::Interrupt => "interrupt",
            Self::SetPermissionMode(_) => "set_permission_mode",
            Self::SetModel(_) => "set_model",
        }
    }

    pub(crate) fn payload(&self) -> Value {
        match self {
            Self::Interrupt => json!({"subtype": "interrupt"}),
            Self::SetPermissionMode(mode) => {
                json!({"subtype": "set_permission_mode", "mode": mode.as_flag()})
            }
            Self::SetModel(model) => json!({"subtype": "set_model", "model": model}),
        }
    }
}

/// Allocates `req_<counter>_<random>` ids; the counter guarantees no
/// collision within a subprocess lifetime.
pub(crate) struct RequestIdGenerator {
    counter: AtomicU64,
}

impl RequestIdGenerator {
    pub(crate) const fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    pub(crate) fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let random = uuid::Uuid::new_v4().simple().to_string();
        format!("req_{n}_{}", &random[..8])
    }
}

/// A control request received from the CLI, parsed by subtype.
#[derive(Debug, Clone)]
pub(crate) enum InboundControlRequest {
    /// Permission query before a tool invocation.
    CanUseTool {
        tool_name: String,
        input: Value,
        permission_suggestions: Vec<Value>,
        signal: Option<Value>,
    },
    /// Invoke a registered hook by callback id.
    HookCallback {
        callback_id: String,
        input: Value,
        tool_use_id: Option<String>,
    },
    /// Route a JSON-RPC message to an in-process server.
    McpMessage { server_name: String, message: Value },
    /// Session handshake; the response returns the hook registration map.
    Initialize,
    /// The CLI changed the session's permission mode.
    SetPermissionMode { mode: String },
    /// Tool inventory update; acknowledged without a payload.
    McpToolUpdate,
    /// A subtype this SDK does not know.
    Unknown { subtype: String },
}

impl InboundControlRequest {
    /// Parses the `request` object of a `control_request` envelope.
    pub(crate) fn parse(request: &Value) -> Result<Self, SdkError> {
        let subtype = request
            .get("subtype")
            .and_then(Value::as_str)
            .ok_or_else(|| SdkError::Protocol("control_request without subtype".to_string()))?;

        let parsed = match subtype {
            "can_use_tool" => Self::CanUseTool {
                tool_name: required_str(request, "tool_name")?,
                input: request.get("input").cloned().unwrap_or_else(|| json!({})),
                permission_suggestions: request
                    .get("permission_suggestions")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default(),
                signal: request.get("signal").cloned(),
            },
            "hook_callback" => Self::HookCallback {
                callback_id: required_str(request, "callback_id")?,
                input: request.get("input").cloned().unwrap_or_else(|| json!({})),
                tool_use_id: request
                    .get("tool_use_id")
                    .and_then(Value::as_str)
                    .map(String::from),
            },
            "mcp_message" => Self::McpMessage {
                server_name: required_str(request, "server_name")?,
                message: request
                    .get("message")
                    .cloned()
                    .unwrap_or_else(|| json!({})),
            },
            "initialize" => Self::Initialize,
            "set_permission_mode" => Self::SetPermissionMode {
                mode: required_str(request, "mode")?,
            },
            "mcp_tool_update" => Self::McpToolUpdate,
            other => Self::Unknown {
                subtype: other.to_string(),
            },
        };
        Ok(parsed)
    }
}

fn required_str(request: &Value, key: &str) -> Result<String, SdkError> {
    request
        .get(key)
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| SdkError::Protocol(format!("control_request missing field '{key}'")))
}

/// One frame read off the CLI's stdout, routed by envelope type.
#[derive(Debug, Clone)]
pub(crate) enum InboundFrame {
    /// A conversation envelope for the host's event queue.
    Conversation(Value),
    /// Answer to one of our outbound requests.
    Response {
        request_id: String,
        result: Result<Value, String>,
    },
    /// A request the CLI expects us to answer.
    Request { request_id: String, request: Value },
    /// Cancels an in-flight inbound request.
    Cancel { request_id: String },
}

/// Classifies an inbound envelope. Control envelopes with missing required
/// fields are protocol errors; everything non-control is conversation
/// traffic.
pub(crate) fn classify_frame(value: Value) -> Result<InboundFrame, SdkError> {
    match value.get("type").and_then(Value::as_str) {
        Some("control_response") => {
            let response = value
                .get("response")
                .ok_or_else(|| SdkError::Protocol("control_response without body".to_string()))?;
            let request_id = response
                .get("request_id")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    SdkError::Protocol("control_response without request_id".to_string())
                })?
                .to_string();
            let result = match response.get("subtype").and_then(Value::as_str) {
                Some("error") => Err(response
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown control error")
                    .to_string()),
                _ => Ok(response.get("response").cloned().unwrap_or(Value::Null)),
            };
            Ok(InboundFrame::Response { request_id, result })
        }
        Some("control_request") => {
            let request_id = value
                .get("request_id")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    SdkError::Protocol("control_request without request_id".to_string())
                })?
                .to_string();
            let request = value
                .get("request")
                .cloned()
                .ok_or_else(|| SdkError::Protocol("control_request without body".to_string()))?;
            Ok(InboundFrame::Request {
                request_id,
                request,
            })
        }
        Some("control_cancel_request") => {
            let request_id = value
                .get("request_id")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    SdkError::Protocol("control_cancel_request without request_id".to_string())
                })?
                .to_string();
            Ok(InboundFrame::Cancel { request_id })
        }
        _ => Ok(InboundFrame::Conversation(value)),
    }
}

/// `control_request` envelope for an outbound request.
pub(crate) fn request_envelope(request_id: &str, payload: Value) -> Value {
    json!({
        "type": "control_request",
        "request_id": request_id,
        "request": payload,
    })
}

/// Success `control_response` envelope.
pub(crate) fn success_envelope(request_id: &str, response: Option<Value>) -> Value {
    json!({
        "type": "control_response",
        "response": {
            "subtype": "success",
            "request_id": request_id,
            "response": response,
        },
    })
}

/// Error `control_response` envelope.
pub(crate) fn error_envelope(request_id: &str, message: &str) -> Value {
    json!({
        "type": "control_response",
        "response": {
            "subtype": "error",
            "request_id": request_id,
            "error": message,
        },
    })
}

/// `control_cancel_request` envelope for an expired outbound request.
pub(crate) fn cancel_envelope(request_id: &str) -> Value {
    json!({
        "type": "control_cancel_request",
        "request_id": request_id,
    })
}
