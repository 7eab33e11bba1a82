//! In-process MCP tool servers for the Claude Code SDK.
//!
//! Servers built with this crate run inside the host process. The CLI never
//! talks to them over a socket or a pipe; instead the SDK intercepts
//! `mcp_message` control requests and feeds the inner JSON-RPC message to
//! [`SdkMcpServer::handle_message`]. The server answers the standard surface
//! (`initialize`, `tools/list`, `tools/call`, `notifications/*`) and the
//! reply travels back over the same control channel.

pub mod rpc;
pub mod server;
pub mod tools;

pub use rpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use server::{SdkMcpServer, SdkMcpServerBuilder};
pub use tools::{input_schema_for, Tool, ToolContent, ToolError, ToolHandler, ToolOutput};
