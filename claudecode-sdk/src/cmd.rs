//! Command-line argument builder for CLI invocations.

use serde_json::{json, Map, Value};
use std::ffi::OsString;

use crate::options::{AgentOptions, McpServerConfig};

/// How the prompt reaches the CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    /// One-shot: the prompt goes on argv (`--print`) and stdin closes after
    /// spawn.
    OneShot(String),
    /// Interactive: user envelopes stream over stdin
    /// (`--input-format stream-json`).
    Interactive,
}

/// Builds the argument list for a CLI invocation from the prompt mode and
/// options record.
#[must_use]
pub fn build_args(prompt: &Prompt, options: &AgentOptions) -> Vec<OsString> {
    let mut args = vec![
        OsString::from("--output-format"),
        OsString::from("stream-json"),
        OsString::from("--verbose"),
    ];

    if let Some(ref prompt_text) = options.system_prompt {
        args.push(OsString::from("--system-prompt"));
        args.push(OsString::from(prompt_text));
    }

    if let Some(ref prompt_text) = options.append_system_prompt {
        args.push(OsString::from("--append-system-prompt"));
        args.push(OsString::from(prompt_text));
    }

    if !options.allowed_tools.is_empty() {
        args.push(OsString::from("--allowedTools"));
        args.push(OsString::from(options.allowed_tools.join(",")));
    }

    if !options.disallowed_tools.is_empty() {
        args.push(OsString::from("--disallowedTools"));
        args.push(OsString::from(options.disallowed_tools.join(",")));
    }

    if let Some(max_turns) = options.max_turns {
        args.push(OsString::from("--max-turns"));
        args.push(OsString::from(max_turns.to_string()));
    }

    if let Some(ref model) = options.model {
        args.push(OsString::from("--model"));
        args.push(OsString::from(model));
    }

    if let Some(ref tool_name) = options.permission_prompt_tool_name {
        args.push(OsString::from("--permission-prompt-tool"));
        args.push(OsString::from(tool_name));
    }

    if let Some(mode) = options.permission_mode {
        args.push(OsString::from("--permission-mode"));
        args.push(OsString::from(mode.as_flag()));
    }

    if options.continue_conversation {
        args.push(OsString::from("--continue"));
    }

    if let Some(ref session_id) = options.resume {
        args.push(OsString::from("--resume"));
        args.push(OsString::from(session_id));
    }

    if let Some(ref sources) = options.setting_sources {
        let joined: Vec<&str> = sources.iter().map(|s| s.as_flag()).collect();
        args.push(OsString::from("--setting-sources"));
        args.push(OsString::from(joined.join(",")));
    }

    if !options.agents.is_empty() {
        let agents: Map<String, Value> = options
            .agents
            .iter()
            .filter_map(|(name, def)| {
                serde_json::to_value(def).ok().map(|v| (name.clone(), v))
            })
            .collect();
        args.push(OsString::from("--agents"));
        args.push(OsString::from(Value::Object(agents).to_string()));
    }

    if !options.mcp_servers.is_empty() {
        args.push(OsString::from("--mcp-config"));
        args.push(OsString::from(mcp_config_json(options).to_string()));
    }

    match prompt {
        Prompt::OneShot(text) => {
            args.push(OsString::from("--print"));
            args.push(OsString::from(text));
        }
        Prompt::Interactive => {
            args.push(OsString::from("--input-format"));
            args.push(OsString::from("stream-json"));
        }
    }

    args
}

/// The `--mcp-config` payload: `{"mcpServers": {...}}` where in-process
/// servers appear as `{"type": "sdk", "name": <name>}` so the CLI routes
/// their traffic back over the control channel instead of spawning anything.
fn mcp_config_json(options: &AgentOptions) -> Value {
    let mut servers = Map::new();
    for (name, config) in &options.mcp_servers {
        let entry = match config {
            McpServerConfig::Sdk(_) => json!({"type": "sdk", "name": name}),
            McpServerConfig::External(value) => value.clone(),
        };
        servers.insert(name.clone(), entry);
    }
    json!({ "mcpServers": servers })
}
