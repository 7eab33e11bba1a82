//! Typed conversation events parsed from inbound envelopes.
//!
//! Parsing is routing-oriented: block ordering and ids are preserved, block
//! payloads are typed, and anything unrecognized is carried through as a raw
//! value rather than dropped.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// A parsed conversation envelope.
#[derive(Debug, Clone)]
pub enum Message {
    /// A user turn (typically tool results echoed back by the CLI).
    User(UserMessage),
    /// An assistant turn.
    Assistant(AssistantMessage),
    /// CLI status information (init, notifications).
    System(SystemMessage),
    /// Turn completion with timing, cost, and session metadata.
    Result(ResultMessage),
    /// A raw streaming event, passed through untouched.
    StreamEvent(Value),
    /// An envelope with an unrecognized `type`, preserved for forward
    /// compatibility.
    Unknown(Value),
}

/// One block of message content.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// The text payload.
        text: String,
    },
    /// Extended thinking.
    Thinking {
        /// The reasoning content.
        thinking: String,
        /// Verification signature.
        signature: Option<String>,
    },
    /// A tool invocation request.
    ToolUse {
        /// Unique id used to correlate the result.
        id: String,
        /// Tool name.
        name: String,
        /// Arguments object.
        input: Value,
    },
    /// The result of a tool invocation.
    ToolResult {
        /// Id of the `ToolUse` this answers.
        tool_use_id: String,
        /// Result content (string or structured).
        content: Option<Value>,
        /// Whether the tool failed.
        is_error: bool,
    },
    /// A block type this SDK does not know, preserved whole.
    Unknown(Value),
}

impl ContentBlock {
    fn from_value(value: &Value) -> Self {
        match value.get("type").and_then(Value::as_str) {
            Some("text") => Self::Text {
                text: value
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
            Some("thinking") => Self::Thinking {
                thinking: value
                    .get("thinking")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                signature: value
                    .get("signature")
                    .and_then(Value::as_str)
                    .map(String::from),
            },
            Some("tool_use") => Self::ToolUse {
                id: value
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                name: value
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                input: value.get("input").cloned().unwrap_or_else(|| json!({})),
            },
            Some("tool_result") => Self::ToolResult {
                tool_use_id: value
                    .get("tool_use_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                content: value.get("content").cloned(),
                is_error: value
                    .get("is_error")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            },
            _ => Self::Unknown(value.clone()),
        }
    }

    /// Serializes the block back to its wire shape.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Text { text } => json!({"type": "text", "text": text}),
            Self::Thinking {
                thinking,
                signature,
            } => {
                let mut obj = json!({"type": "thinking", "thinking": thinking});
                if let Some(sig) = signature {
                    obj["signature"] = json!(sig);
                }
                obj
            }
            Self::ToolUse { id, name, input } => {
                json!({"type": "tool_use", "id": id, "name": name, "input": input})
            }
            Self::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                let mut obj = json!({"type": "tool_result", "tool_use_id": tool_use_id});
                if let Some(content) = content {
                    obj["content"] = content.clone();
                }
                if *is_error {
                    obj["is_error"] = json!(true);
                }
                obj
            }
            Self::Unknown(value) => value.clone(),
        }
    }
}

/// Content of a user envelope: a bare string or a block list.
#[derive(Debug, Clone)]
pub enum UserContent {
    /// Plain prompt text.
    Text(String),
    /// Structured blocks (tool results).
    Blocks(Vec<ContentBlock>),
}

/// A `user` envelope.
#[derive(Debug, Clone)]
pub struct UserMessage {
    /// The message content.
    pub content: UserContent,
    /// Tool-use id of the parent invocation, for subagent traffic.
    pub parent_tool_use_id: Option<String>,
    /// Session id stamped on the envelope.
    pub session_id: Option<String>,
}

/// An `assistant` envelope.
#[derive(Debug, Clone)]
pub struct AssistantMessage {
    /// Ordered content blocks.
    pub content: Vec<ContentBlock>,
    /// The model that produced this message.
    pub model: Option<String>,
    /// Tool-use id of the parent invocation, for subagent traffic.
    pub parent_tool_use_id: Option<String>,
    /// Session id stamped on the envelope.
    pub session_id: Option<String>,
}

/// A `system` envelope.
#[derive(Debug, Clone)]
pub struct SystemMessage {
    /// Event subtype (e.g. `init`).
    pub subtype: String,
    /// The whole envelope payload, untyped.
    pub data: Value,
}

/// A `result` envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultMessage {
    /// `success`, `error_during_execution`, or another CLI-defined subtype.
    pub subtype: String,
    /// Wall-clock duration of the turn in milliseconds.
    #[serde(default)]
    pub duration_ms: u64,
    /// API time in milliseconds.
    #[serde(default)]
    pub duration_api_ms: u64,
    /// Whether the turn ended in error.
    #[serde(default)]
    pub is_error: bool,
    /// Number of request/response cycles in the turn.
    #[serde(default)]
    pub num_turns: u32,
    /// Session id for resuming. The most recent value is authoritative.
    #[serde(default)]
    pub session_id: String,
    /// Cumulative cost in USD.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cost_usd: Option<f64>,
    /// Final result text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Token usage accounting, passed through untyped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
}

impl Message {
    /// Parses a conversation envelope. Control envelopes are routed before
    /// this point; everything unrecognized lands in [`Message::Unknown`].
    #[must_use]
    pub fn parse(value: Value) -> Self {
        match value.get("type").and_then(Value::as_str) {
            Some("user") => Self::User(parse_user(&value)),
            Some("assistant") => Self::Assistant(parse_assistant(&value)),
            Some("system") => Self::System(SystemMessage {
                subtype: value
                    .get("subtype")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                data: value,
            }),
            Some("result") => match serde_json::from_value::<ResultMessage>(value.clone()) {
                Ok(result) => Self::Result(result),
                Err(_) => Self::Unknown(value),
            },
            Some("stream_event") => Self::StreamEvent(value),
            _ => Self::Unknown(value),
        }
    }

    /// Serializes the message back to its wire shape.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::User(user) => {
                let content = match &user.content {
                    UserContent::Text(text) => json!(text),
                    UserContent::Blocks(blocks) => {
                        Value::Array(blocks.iter().map(ContentBlock::to_value).collect())
                    }
                };
                json!({
                    "type": "user",
                    "message": {"role": "user", "content": content},
                    "parent_tool_use_id": user.parent_tool_use_id,
                    "session_id": user.session_id,
                })
            }
            Self::Assistant(assistant) => {
                let content: Vec<Value> =
                    assistant.content.iter().map(ContentBlock::to_value).collect();
                let mut message = Map::new();
                message.insert("role".to_string(), json!("assistant"));
                message.insert("content".to_string(), Value::Array(content));
                if let Some(model) = &assistant.model {
                    message.insert("model".to_string(), json!(model));
                }
                json!({
                    "type": "assistant",
                    "message": Value::Object(message),
                    "parent_tool_use_id": assistant.parent_tool_use_id,
                    "session_id": assistant.session_id,
                })
            }
            Self::System(system) => system.data.clone(),
            Self::Result(result) => {
                let mut value = serde_json::to_value(result).unwrap_or_else(|_| json!({}));
                value["type"] = json!("result");
                value
            }
            Self::StreamEvent(value) | Self::Unknown(value) => value.clone(),
        }
    }
}

fn envelope_string(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(String::from)
}

fn parse_blocks(message: &Value) -> Vec<ContentBlock> {
    message
        .get("content")
        .and_then(Value::as_array)
        .map(|blocks| blocks.iter().map(ContentBlock::from_value).collect())
        .unwrap_or_default()
}

fn parse_user(value: &Value) -> UserMessage {
    let message = value.get("message").cloned().unwrap_or_else(|| json!({}));
    let content = match message.get("content") {
        Some(Value::String(text)) => UserContent::Text(text.clone()),
        _ => UserContent::Blocks(parse_blocks(&message)),
    };
    UserMessage {
        content,
        parent_tool_use_id: envelope_string(value, "parent_tool_use_id"),
        session_id: envelope_string(value, "session_id"),
    }
}

fn parse_assistant(value: &Value) -> AssistantMessage {
    let message = value.get("message").cloned().unwrap_or_else(|| json!({}));
    AssistantMessage {
        content: parse_blocks(&message),
        model: envelope_string(&message, "model"),
        parent_tool_use_id: envelope_string(value, "parent_tool_use_id"),
        session_id: envelope_string(value, "session_id"),
    }
}
