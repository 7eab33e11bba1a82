//! Routes inbound control requests to host-supplied extensions.

use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

use crate::control::protocol::InboundControlRequest;
use crate::error::SdkError;
use crate::hooks::HookRegistry;
use crate::options::AgentOptions;
use crate::permission::{PermissionContext, PermissionResult};

/// The extension dispatcher.
///
/// Every path through [`Self::handle`] produces a payload or an error that
/// the session converts into a well-formed control response; a failing
/// handler never terminates the session.
pub(crate) struct Dispatcher {
    options: Arc<AgentOptions>,
    hooks: HookRegistry,
    permission_mode: Mutex<Option<String>>,
}

impl Dispatcher {
    pub(crate) fn new(options: Arc<AgentOptions>) -> Self {
        let hooks = HookRegistry::new(&options.hooks);
        let permission_mode = Mutex::new(
            options
                .permission_mode
                .map(|mode| mode.as_flag().to_string()),
        );
        Self {
            options,
            hooks,
            permission_mode,
        }
    }

    /// The session's current permission mode, tracking CLI-initiated
    /// changes.
    pub(crate) fn current_permission_mode(&self) -> Option<String> {
        self.permission_mode
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn record_permission_mode(&self, mode: &str) {
        *self
            .permission_mode
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(mode.to_string());
    }

    /// Handles one inbound request; the result becomes the response payload.
    pub(crate) async fn handle(&self, request: InboundControlRequest) -> Result<Value, SdkError> {
        match request {
            InboundControlRequest::CanUseTool {
                tool_name,
                input,
                permission_suggestions,
                signal,
            } => self
                .can_use_tool(&tool_name, &input, permission_suggestions, signal)
                .await,
            InboundControlRequest::HookCallback {
                callback_id,
                input,
                tool_use_id,
            } => {
                self.hooks
                    .dispatch(&callback_id, &input, tool_use_id.as_deref())
                    .await
            }
            InboundControlRequest::McpMessage {
                server_name,
                message,
            } => self.mcp_message(&server_name, message).await,
            InboundControlRequest::Initialize => Ok(self.initialize_response()),
            InboundControlRequest::SetPermissionMode { mode } => {
                self.record_permission_mode(&mode);
                Ok(json!({}))
            }
            InboundControlRequest::McpToolUpdate => Ok(json!({})),
            InboundControlRequest::Unknown { subtype } => Err(SdkError::Handler(format!(
                "unsupported control request subtype: {subtype}"
            ))),
        }
    }

    async fn can_use_tool(
        &self,
        tool_name: &str,
        input: &Value,
        permission_suggestions: Vec<Value>,
        signal: Option<Value>,
    ) -> Result<Value, SdkError> {
        let Some(callback) = &self.options.can_use_tool else {
            // No callback registered: implicit allow. The CLI's own
            // permission rules still apply.
            return Ok(PermissionResult::allow().into_response_payload(input));
        };

        let context = PermissionContext {
            suggestions: permission_suggestions,
            signal,
        };
        let result = callback.can_use_tool(tool_name, input, &context).await?;
        if let PermissionResult::Deny { message, .. } = &result {
            tracing::debug!(tool = %tool_name, reason = %message, "permission denied");
        }
        Ok(result.into_response_payload(input))
    }

    async fn mcp_message(&self, server_name: &str, message: Value) -> Result<Value, SdkError> {
        let Some(server) = self.options.sdk_server(server_name) else {
            return Err(SdkError::Handler(format!(
                "no SDK MCP server named '{server_name}'"
            )));
        };
        let reply = server.handle_message(message).await;
        Ok(json!({ "mcp_response": reply }))
    }

    fn initialize_response(&self) -> Value {
        let hooks = if self.hooks.is_empty() {
            Value::Null
        } else {
            self.hooks.registration_document()
        };
        json!({
            "hooks": hooks,
            "capabilities": {
                "canUseTool": self.options.can_use_tool.is_some(),
            },
        })
    }
}
