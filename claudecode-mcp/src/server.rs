//! The in-process server: a named set of tools behind a JSON-RPC router.

use jsonschema::Validator;
use serde_json::{json, Value};

use crate::rpc::{
    JsonRpcRequest, JsonRpcResponse, INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND, PARSE_ERROR,
};
use crate::tools::{Tool, ToolContent, ToolError};

/// MCP protocol revision advertised by `initialize`.
const PROTOCOL_VERSION: &str = "2024-11-05";

/// A named, in-process MCP server.
///
/// The SDK serializes this server into `--mcp-config` as
/// `{"type": "sdk", "name": <name>}` and routes `mcp_message` control
/// requests for that name into [`Self::handle_message`]. Tools keep their
/// registration order in `tools/list`.
pub struct SdkMcpServer {
    name: String,
    version: String,
    tools: Vec<Tool>,
}

impl std::fmt::Debug for SdkMcpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SdkMcpServer")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("tools", &self.tools.len())
            .finish()
    }
}

impl SdkMcpServer {
    /// Returns a new builder.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> SdkMcpServerBuilder {
        SdkMcpServerBuilder {
            name: name.into(),
            version: "1.0.0".to_string(),
            tools: Vec::new(),
        }
    }

    /// The server name the CLI routes by.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registered tools, in registration order.
    #[must_use]
    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    /// Handles one JSON-RPC message and returns the reply, if any.
    ///
    /// Notifications (`notifications/*`, or any request without an id) are
    /// acknowledged with `None`. Every other outcome — including parse
    /// failures and handler errors — is a well-formed response; this method
    /// never fails the session.
    pub async fn handle_message(&self, message: Value) -> Option<Value> {
        let request: JsonRpcRequest = match serde_json::from_value(message) {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!(server = %self.name, error = %err, "unparseable JSON-RPC message");
                return Some(response_value(JsonRpcResponse::error(
                    Value::Null,
                    PARSE_ERROR,
                    err.to_string(),
                )));
            }
        };

        if request.method.starts_with("notifications/") {
            tracing::debug!(server = %self.name, method = %request.method, "notification");
            return None;
        }

        let Some(id) = request.id.clone() else {
            // Request-shaped but id-less: treat as a notification.
            return None;
        };

        let response = match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(id, self.initialize_result()),
            "tools/list" => JsonRpcResponse::success(id, self.list_tools_result()),
            "tools/call" => self.call_tool(id, request.params).await,
            other => JsonRpcResponse::error(
                id,
                METHOD_NOT_FOUND,
                format!("method not supported: {other}"),
            ),
        };

        Some(response_value(response))
    }

    fn initialize_result(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "serverInfo": { "name": self.name, "version": self.version },
        })
    }

    fn list_tools_result(&self) -> Value {
        let tools: Vec<Value> = self.tools.iter().map(Tool::definition).collect();
        json!({ "tools": tools })
    }

    async fn call_tool(&self, id: Value, params: Option<Value>) -> JsonRpcResponse {
        let params = params.unwrap_or_else(|| json!({}));
        let Some(tool_name) = params.get("name").and_then(Value::as_str) else {
            return JsonRpcResponse::error(id, INVALID_PARAMS, "missing tool name");
        };
        let Some(tool) = self.tools.iter().find(|t| t.name == tool_name) else {
            return JsonRpcResponse::error(
                id,
                INVALID_PARAMS,
                format!("unknown tool: {tool_name}"),
            );
        };
        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

        if let Err(message) = validate_arguments(&tool.input_schema, &arguments) {
            return JsonRpcResponse::error(id, INVALID_PARAMS, message);
        }

        tracing::debug!(server = %self.name, tool = %tool_name, "tools/call");
        match tool.call(arguments).await {
            Ok(output) => {
                let content: Vec<Value> = output
                    .content
                    .iter()
                    .map(|item| match item {
                        ToolContent::Text { text } => json!({"type": "text", "text": text}),
                    })
                    .collect();
                JsonRpcResponse::success(
                    id,
                    json!({ "content": content, "isError": output.is_error }),
                )
            }
            Err(ToolError::InvalidArguments(message)) => {
                JsonRpcResponse::error(id, INVALID_PARAMS, message)
            }
            Err(ToolError::Execution(message)) => {
                tracing::error!(server = %self.name, tool = %tool_name, error = %message, "tool failed");
                JsonRpcResponse::error(id, INTERNAL_ERROR, message)
            }
        }
    }
}

/// Checks the arguments object against the tool's input schema.
///
/// A schema that itself fails to compile never blocks the call; the handler
/// is the authority in that case.
fn validate_arguments(schema: &Value, arguments: &Value) -> Result<(), String> {
    let Ok(validator) = Validator::new(schema) else {
        return Ok(());
    };
    let errors: Vec<String> = validator
        .iter_errors(arguments)
        .map(|e| format!("at '{}': {e}", e.instance_path))
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}

fn response_value(response: JsonRpcResponse) -> Value {
    serde_json::to_value(&response).unwrap_or_else(|_| {
        json!({
            "jsonrpc": "2.0",
            "id": null,
            "error": { "code": INTERNAL_ERROR, "message": "response serialization failed" },
        })
    })
}

/// Builder for [`SdkMcpServer`].
pub struct SdkMcpServerBuilder {
    name: String,
    version: String,
    tools: Vec<Tool>,
}

impl SdkMcpServerBuilder {
    /// Overrides the advertised server version. Defaults to `1.0.0`.
    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Registers one tool.
    #[must_use]
    pub fn tool(mut self, tool: Tool) -> Self {
        self.tools.push(tool);
        self
    }

    /// Registers a batch of tools, preserving order.
    #[must_use]
    pub fn tools(mut self, tools: impl IntoIterator<Item = Tool>) -> Self {
        self.tools.extend(tools);
        self
    }

    /// Finishes the server.
    #[must_use]
    pub fn build(self) -> SdkMcpServer {
        SdkMcpServer {
            name: self.name,
            version: self.version,
            tools: self.tools,
        }
    }
}
