//! Rust SDK core for driving the Claude Code CLI as a subprocess.
//!
//! The crate covers the process-bridging runtime: locating and launching the
//! CLI, the framed newline-JSON channel over its pipes, typed message
//! parsing, the bidirectional control plane, and the dispatcher that exposes
//! three in-process extension points — tool servers (via
//! [`claudecode-mcp`](claudecode_mcp)), a permission callback, and event
//! hooks.
//!
//! ```no_run
//! use claudecode_sdk::{AgentOptions, Message, Prompt, Session};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), claudecode_sdk::SdkError> {
//! let options = AgentOptions {
//!     allowed_tools: vec!["Read".to_string()],
//!     ..AgentOptions::default()
//! };
//! let mut session =
//!     Session::connect(Prompt::OneShot("Summarize README.md".to_string()), options).await?;
//! while let Some(event) = session.next_event().await {
//!     if let Message::Result(result) = event? {
//!         println!("done in {} turn(s)", result.num_turns);
//!     }
//! }
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod cmd;
pub mod control;
pub mod discovery;
pub mod error;
pub mod hooks;
pub mod message;
pub mod options;
pub mod permission;
pub mod session;
mod transport;

pub use claudecode_mcp::{SdkMcpServer, Tool, ToolContent, ToolError, ToolHandler, ToolOutput};

pub use channel::FramedReader;
pub use cmd::{build_args, Prompt};
pub use control::OutboundControlRequest;
pub use discovery::{discover_cli, CLI_BIN_ENV_VAR};
pub use error::SdkError;
pub use hooks::{HookContext, HookEvent, HookHandler, HookMatcher, HookOutput};
pub use message::{
    AssistantMessage, ContentBlock, Message, ResultMessage, SystemMessage, UserContent,
    UserMessage,
};
pub use options::{
    AgentDefinition, AgentOptions, McpServerConfig, PermissionMode, SettingSource,
};
pub use permission::{CanUseTool, PermissionContext, PermissionResult};
pub use session::Session;
