//! Tool descriptors and handler plumbing for in-process servers.

use async_trait::async_trait;
use futures::future::BoxFuture;
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Error raised by a tool handler.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The arguments did not match the tool's input schema.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    /// The handler failed while executing.
    #[error("execution error: {0}")]
    Execution(String),
}

/// A single content item in a tool result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContent {
    /// Plain text output.
    Text {
        /// The text payload.
        text: String,
    },
}

/// What a tool handler returns: a content array and an error flag.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// Ordered content items.
    pub content: Vec<ToolContent>,
    /// Marks the result as a tool-level failure without failing the RPC.
    pub is_error: bool,
}

impl ToolOutput {
    /// Single text item, success.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// Single text item, flagged as an error result.
    #[must_use]
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: true,
        }
    }
}

/// Async entry point of a tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Invokes the tool with the caller-provided arguments object.
    async fn call(&self, args: Value) -> Result<ToolOutput, ToolError>;
}

type FnHandlerInner = dyn Fn(Value) -> BoxFuture<'static, Result<ToolOutput, ToolError>> + Send + Sync;

struct FnHandler {
    inner: Arc<FnHandlerInner>,
}

#[async_trait]
impl ToolHandler for FnHandler {
    async fn call(&self, args: Value) -> Result<ToolOutput, ToolError> {
        (self.inner)(args).await
    }
}

/// A tool descriptor: name, description, input schema, and handler.
///
/// Registration is explicit — construct descriptors and hand them to
/// [`crate::SdkMcpServer`]. [`Tool::from_fn`] covers the common closure case.
#[derive(Clone)]
pub struct Tool {
    /// Tool name as the CLI will invoke it (without the `mcp__` prefix).
    pub name: String,
    /// Human-readable description shown to the model.
    pub description: String,
    /// JSON schema describing the arguments object.
    pub input_schema: Value,
    handler: Arc<dyn ToolHandler>,
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl Tool {
    /// Creates a descriptor from a pre-built handler.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            handler,
        }
    }

    /// Creates a descriptor from an async closure.
    pub fn from_fn<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutput, ToolError>> + Send + 'static,
    {
        let inner: Arc<FnHandlerInner> = Arc::new(move |args| {
            Box::pin(handler(args)) as BoxFuture<'static, Result<ToolOutput, ToolError>>
        });
        Self::new(
            name,
            description,
            input_schema,
            Arc::new(FnHandler { inner }),
        )
    }

    /// Runs the tool's handler.
    pub async fn call(&self, args: Value) -> Result<ToolOutput, ToolError> {
        self.handler.call(args).await
    }

    /// The descriptor as advertised by `tools/list`.
    #[must_use]
    pub fn definition(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input_schema,
        })
    }
}

/// Derives an input schema from a Rust type.
#[must_use]
pub fn input_schema_for<T: JsonSchema>() -> Value {
    json!(schema_for!(T))
}
