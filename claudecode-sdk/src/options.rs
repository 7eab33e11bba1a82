//! Configuration record for a CLI session.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use claudecode_mcp::SdkMcpServer;

use crate::hooks::{HookEvent, HookMatcher};
use crate::permission::CanUseTool;

/// Permission mode passed to the CLI via `--permission-mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    /// The CLI's normal prompting behavior.
    Default,
    /// Auto-accept file edits.
    AcceptEdits,
    /// Plan mode; no mutations.
    Plan,
    /// Skip permission checks entirely.
    BypassPermissions,
}

impl PermissionMode {
    /// The flag value as the CLI expects it.
    #[must_use]
    pub const fn as_flag(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::AcceptEdits => "acceptEdits",
            Self::Plan => "plan",
            Self::BypassPermissions => "bypassPermissions",
        }
    }
}

/// Which settings files the CLI loads, via `--setting-sources`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingSource {
    /// `~/.claude/settings.json`.
    User,
    /// Project `.claude/settings.json`.
    Project,
    /// Project `.claude/settings.local.json`.
    Local,
}

impl SettingSource {
    /// The flag value as the CLI expects it.
    #[must_use]
    pub const fn as_flag(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Project => "project",
            Self::Local => "local",
        }
    }
}

/// A subagent definition forwarded to the CLI via `--agents`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    /// When the agent should be used.
    pub description: String,
    /// The agent's system prompt.
    pub prompt: String,
    /// Tools the agent may use; `None` inherits the session's tools.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
    /// Model override for the agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// One entry in the `--mcp-config` server map.
#[derive(Clone)]
pub enum McpServerConfig {
    /// A server hosted in this process and reached through control-request
    /// indirection. Serializes as `{"type": "sdk", "name": <name>}`.
    Sdk(Arc<SdkMcpServer>),
    /// An external server; its configuration JSON passes through untouched.
    External(Value),
}

impl std::fmt::Debug for McpServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sdk(server) => f.debug_tuple("Sdk").field(&server.name()).finish(),
            Self::External(value) => f.debug_tuple("External").field(value).finish(),
        }
    }
}

/// Frozen record of all CLI-shaping and extension-registering settings.
///
/// Built by the host before connecting; the session borrows it for the
/// process lifetime. Absent fields fall back to CLI defaults.
#[derive(Clone, Default)]
pub struct AgentOptions {
    /// Replaces the CLI's system prompt.
    pub system_prompt: Option<String>,
    /// Appended to the CLI's system prompt.
    pub append_system_prompt: Option<String>,
    /// Tools the model may use without prompting (comma-joined on the wire).
    pub allowed_tools: Vec<String>,
    /// Tools the model may never use.
    pub disallowed_tools: Vec<String>,
    /// Cap on request/response cycles per prompt.
    pub max_turns: Option<u32>,
    /// Model identifier override.
    pub model: Option<String>,
    /// MCP tool the CLI consults for permission prompts.
    pub permission_prompt_tool_name: Option<String>,
    /// Permission mode for the session.
    pub permission_mode: Option<PermissionMode>,
    /// Continue the most recent conversation.
    pub continue_conversation: bool,
    /// Resume the conversation with this session id.
    pub resume: Option<String>,
    /// Working directory for the subprocess.
    pub cwd: Option<PathBuf>,
    /// Extra environment variables for the subprocess.
    pub env: Vec<(String, String)>,
    /// Which settings files the CLI loads; `None` keeps CLI defaults.
    pub setting_sources: Option<Vec<SettingSource>>,
    /// Subagent definitions, keyed by agent name.
    pub agents: BTreeMap<String, AgentDefinition>,
    /// MCP servers, keyed by the name the CLI routes by.
    pub mcp_servers: BTreeMap<String, McpServerConfig>,
    /// Hook registrations, keyed by event.
    pub hooks: BTreeMap<HookEvent, Vec<HookMatcher>>,
    /// Permission callback; `None` is an implicit allow.
    pub can_use_tool: Option<Arc<dyn CanUseTool>>,
    /// Explicit CLI binary path, bypassing discovery.
    pub cli_path: Option<PathBuf>,
    /// Deadline for outbound control requests other than interrupt.
    pub control_request_timeout: Option<Duration>,
    /// Cap on the channel's carry buffer before a decode error is raised.
    pub max_buffer_size: Option<usize>,
}

impl std::fmt::Debug for AgentOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentOptions")
            .field("system_prompt", &self.system_prompt)
            .field("append_system_prompt", &self.append_system_prompt)
            .field("allowed_tools", &self.allowed_tools)
            .field("disallowed_tools", &self.disallowed_tools)
            .field("max_turns", &self.max_turns)
            .field("model", &self.model)
            .field("permission_mode", &self.permission_mode)
            .field("continue_conversation", &self.continue_conversation)
            .field("resume", &self.resume)
            .field("cwd", &self.cwd)
            .field("setting_sources", &self.setting_sources)
            .field("agents", &self.agents)
            .field("mcp_servers", &self.mcp_servers)
            .field("has_permission_callback", &self.can_use_tool.is_some())
            .field("hook_events", &self.hooks.len())
            .finish_non_exhaustive()
    }
}

impl AgentOptions {
    /// Default deadline for outbound control requests.
    #[must_use]
    pub fn control_timeout(&self) -> Duration {
        self.control_request_timeout
            .unwrap_or(Duration::from_secs(60))
    }

    /// The in-process server registered under `name`, if any.
    #[must_use]
    pub fn sdk_server(&self, name: &str) -> Option<&Arc<SdkMcpServer>> {
        match self.mcp_servers.get(name) {
            Some(McpServerConfig::Sdk(server)) => Some(server),
            _ => None,
        }
    }
}
