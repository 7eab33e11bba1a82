//! Permission callback types for tool-use gating.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::SdkError;

/// Context handed to the permission callback alongside the tool invocation.
#[derive(Debug, Clone, Default)]
pub struct PermissionContext {
    /// Permission suggestions offered by the CLI, passed through untyped.
    pub suggestions: Vec<Value>,
    /// Signal hints (e.g. abort flags) from the CLI request.
    pub signal: Option<Value>,
}

/// Decision returned by a permission callback.
#[derive(Debug, Clone)]
pub enum PermissionResult {
    /// Let the tool run, optionally substituting its input.
    Allow {
        /// Replacement input object; `None` keeps the original.
        updated_input: Option<Value>,
        /// Permission rule updates the CLI should apply.
        updated_permissions: Option<Value>,
    },
    /// Refuse the tool invocation.
    Deny {
        /// Human-readable reason shown to the model.
        message: String,
        /// Ask the CLI to interrupt the whole turn.
        interrupt: bool,
    },
}

impl PermissionResult {
    /// Plain allow, keeping the original input.
    #[must_use]
    pub const fn allow() -> Self {
        Self::Allow {
            updated_input: None,
            updated_permissions: None,
        }
    }

    /// Deny with a reason.
    #[must_use]
    pub fn deny(message: impl Into<String>) -> Self {
        Self::Deny {
            message: message.into(),
            interrupt: false,
        }
    }

    /// The wire payload for a `can_use_tool` response.
    ///
    /// `original_input` fills `updatedInput` when the callback allowed
    /// without substituting, so the CLI always receives the input it should
    /// execute with.
    #[must_use]
    pub fn into_response_payload(self, original_input: &Value) -> Value {
        match self {
            Self::Allow {
                updated_input,
                updated_permissions,
            } => {
                let mut payload = json!({
                    "behavior": "allow",
                    "updatedInput": updated_input.unwrap_or_else(|| original_input.clone()),
                });
                if let Some(updated) = updated_permissions {
                    payload["updatedPermissions"] = updated;
                }
                payload
            }
            Self::Deny { message, interrupt } => {
                let mut payload = json!({
                    "behavior": "deny",
                    "message": message,
                });
                if interrupt {
                    payload["interrupt"] = json!(true);
                }
                payload
            }
        }
    }
}

/// Host-supplied callback consulted before each tool invocation.
///
/// Absence of a callback is an implicit allow; the CLI's own permission
/// rules still apply either way.
#[async_trait]
pub trait CanUseTool: Send + Sync {
    /// Decides whether `tool_name` may run with `input`.
    async fn can_use_tool(
        &self,
        tool_name: &str,
        input: &Value,
        context: &PermissionContext,
    ) -> Result<PermissionResult, SdkError>;
}
