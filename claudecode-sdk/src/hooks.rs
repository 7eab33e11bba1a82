//! Event hooks: registration, callback ids, and dispatch.
//!
//! Hook registration is explicit: the host builds [`HookMatcher`] entries and
//! attaches them to the options record. Each matcher entry receives a stable
//! callback id when the registry is built; the `initialize` exchange hands
//! the resulting registration document to the CLI, which thereafter names a
//! specific callback id in every `hook_callback` request.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::SdkError;

/// Lifecycle events the CLI can invoke hooks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HookEvent {
    /// Before a tool runs; may block the invocation.
    PreToolUse,
    /// After a tool ran.
    PostToolUse,
    /// When the user submits a prompt.
    UserPromptSubmit,
    /// Before the turn stops.
    Stop,
    /// Before a subagent stops.
    SubagentStop,
    /// When a session starts.
    SessionStart,
    /// Before conversation compaction.
    PreCompact,
    /// When the CLI emits a notification.
    Notification,
}

impl HookEvent {
    /// The event name as it appears on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PreToolUse => "PreToolUse",
            Self::PostToolUse => "PostToolUse",
            Self::UserPromptSubmit => "UserPromptSubmit",
            Self::Stop => "Stop",
            Self::SubagentStop => "SubagentStop",
            Self::SessionStart => "SessionStart",
            Self::PreCompact => "PreCompact",
            Self::Notification => "Notification",
        }
    }
}

/// Context handed to hook handlers.
#[derive(Debug, Clone, Default)]
pub struct HookContext {
    /// Signal hints from the CLI request, passed through untyped.
    pub signal: Option<Value>,
}

/// What a hook handler returns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookOutput {
    /// `"block"` suppresses the event's default behavior and short-circuits
    /// any remaining handlers for the same matcher entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
    /// A message surfaced to the model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,
    /// Event-specific payload (e.g. `permissionDecision` for `PreToolUse`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hook_specific_output: Option<Value>,
}

impl HookOutput {
    /// Output with no effect; the CLI proceeds as usual.
    #[must_use]
    pub fn pass() -> Self {
        Self::default()
    }

    fn is_block(&self) -> bool {
        self.decision.as_deref() == Some("block")
    }
}

/// Async hook entry point.
#[async_trait]
pub trait HookHandler: Send + Sync {
    /// Invoked with the event's input data and, for tool events, the
    /// tool-use id.
    async fn call(
        &self,
        input: &Value,
        tool_use_id: Option<&str>,
        context: &HookContext,
    ) -> Result<HookOutput, SdkError>;
}

/// One registration entry: an optional tool-name pattern plus an ordered
/// handler list.
#[derive(Clone)]
pub struct HookMatcher {
    /// Literal tool name or regex; `None` matches any tool.
    pub matcher: Option<String>,
    /// Handlers run in registration order.
    pub handlers: Vec<Arc<dyn HookHandler>>,
}

impl std::fmt::Debug for HookMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookMatcher")
            .field("matcher", &self.matcher)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl HookMatcher {
    /// Entry matching any tool.
    #[must_use]
    pub fn any(handlers: Vec<Arc<dyn HookHandler>>) -> Self {
        Self {
            matcher: None,
            handlers,
        }
    }

    /// Entry whose pattern must match the tool name.
    #[must_use]
    pub fn named(pattern: impl Into<String>, handlers: Vec<Arc<dyn HookHandler>>) -> Self {
        Self {
            matcher: Some(pattern.into()),
            handlers,
        }
    }

    /// Whether this entry applies to `tool_name`. The pattern is tried as an
    /// anchored regex first and falls back to literal comparison.
    #[must_use]
    pub fn matches(&self, tool_name: &str) -> bool {
        match &self.matcher {
            None => true,
            Some(pattern) => regex::Regex::new(&format!("^(?:{pattern})$"))
                .map_or_else(|_| pattern == tool_name, |re| re.is_match(tool_name)),
        }
    }
}

struct RegisteredMatcher {
    event: HookEvent,
    callback_id: String,
    matcher: HookMatcher,
}

/// The dispatcher's hook table, built once per session from the options.
#[derive(Default)]
pub(crate) struct HookRegistry {
    entries: Vec<RegisteredMatcher>,
}

impl HookRegistry {
    /// Assigns stable callback ids in registration order.
    pub(crate) fn new(hooks: &BTreeMap<HookEvent, Vec<HookMatcher>>) -> Self {
        let mut entries = Vec::new();
        for (event, matchers) in hooks {
            for matcher in matchers {
                entries.push(RegisteredMatcher {
                    event: *event,
                    callback_id: format!("hook_{}", entries.len()),
                    matcher: matcher.clone(),
                });
            }
        }
        Self { entries }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The registration document returned from the `initialize` exchange:
    /// `{event: [{matcher, hookCallbackIds}]}`.
    pub(crate) fn registration_document(&self) -> Value {
        let mut events: Map<String, Value> = Map::new();
        for entry in &self.entries {
            let list = events
                .entry(entry.event.as_str().to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(list) = list {
                list.push(serde_json::json!({
                    "matcher": entry.matcher.matcher,
                    "hookCallbackIds": [entry.callback_id],
                }));
            }
        }
        Value::Object(events)
    }

    /// Runs the handlers behind `callback_id`, accumulating outputs in
    /// registration order. A `block` decision short-circuits the remaining
    /// handlers; `systemMessage`s concatenate; later `hookSpecificOutput`
    /// keys override earlier ones.
    pub(crate) async fn dispatch(
        &self,
        callback_id: &str,
        input: &Value,
        tool_use_id: Option<&str>,
    ) -> Result<Value, SdkError> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.callback_id == callback_id)
            .ok_or_else(|| {
                SdkError::Handler(format!("no hook registered for callback id {callback_id}"))
            })?;

        // The CLI applies matchers before calling back; re-check locally
        // when the input names a tool so a misrouted id stays inert.
        if let Some(tool_name) = input.get("tool_name").and_then(Value::as_str) {
            if !entry.matcher.matches(tool_name) {
                return Ok(serde_json::json!({}));
            }
        }

        let context = HookContext {
            signal: input.get("signal").cloned(),
        };

        let mut decision: Option<String> = None;
        let mut system_messages: Vec<String> = Vec::new();
        let mut specific = Map::new();

        for handler in &entry.matcher.handlers {
            let output = handler.call(input, tool_use_id, &context).await?;
            let blocked = output.is_block();
            if let Some(d) = output.decision {
                decision = Some(d);
            }
            if let Some(message) = output.system_message {
                system_messages.push(message);
            }
            if let Some(Value::Object(map)) = output.hook_specific_output {
                specific.extend(map);
            }
            if blocked {
                break;
            }
        }

        let mut merged = Map::new();
        if let Some(d) = decision {
            merged.insert("decision".to_string(), Value::String(d));
        }
        if !system_messages.is_empty() {
            merged.insert(
                "systemMessage".to_string(),
                Value::String(system_messages.join("\n")),
            );
        }
        if !specific.is_empty() {
            merged.insert("hookSpecificOutput".to_string(), Value::Object(specific));
        }
        Ok(Value::Object(merged))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Recorder {
        label: &'static str,
        order: Arc<std::sync::Mutex<Vec<&'static str>>>,
        output: HookOutput,
    }

    #[async_trait]
    impl HookHandler for Recorder {
        async fn call(
            &self,
            _input: &Value,
            _tool_use_id: Option<&str>,
            _context: &HookContext,
        ) -> Result<HookOutput, SdkError> {
            self.order.lock().unwrap().push(self.label);
            Ok(self.output.clone())
        }
    }

    fn registry_with(
        matcher: Option<&str>,
        handlers: Vec<Arc<dyn HookHandler>>,
    ) -> HookRegistry {
        let mut hooks = BTreeMap::new();
        hooks.insert(
            HookEvent::PreToolUse,
            vec![HookMatcher {
                matcher: matcher.map(String::from),
                handlers,
            }],
        );
        HookRegistry::new(&hooks)
    }

    #[test]
    fn registration_document_lists_callback_ids_per_event() {
        let mut hooks = BTreeMap::new();
        hooks.insert(
            HookEvent::PreToolUse,
            vec![
                HookMatcher::named("Bash", vec![]),
                HookMatcher::any(vec![]),
            ],
        );
        hooks.insert(HookEvent::Stop, vec![HookMatcher::any(vec![])]);

        let registry = HookRegistry::new(&hooks);
        let doc = registry.registration_document();

        let pre = doc["PreToolUse"].as_array().unwrap();
        assert_eq!(pre.len(), 2);
        assert_eq!(pre[0]["matcher"], "Bash");
        assert_eq!(pre[0]["hookCallbackIds"][0], "hook_0");
        assert_eq!(pre[1]["matcher"], Value::Null);
        assert_eq!(doc["Stop"][0]["hookCallbackIds"][0], "hook_2");
    }

    #[tokio::test]
    async fn handlers_run_in_registration_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let registry = registry_with(
            Some("Bash"),
            vec![
                Arc::new(Recorder {
                    label: "first",
                    order: order.clone(),
                    output: HookOutput::pass(),
                }),
                Arc::new(Recorder {
                    label: "second",
                    order: order.clone(),
                    output: HookOutput::pass(),
                }),
            ],
        );

        registry
            .dispatch("hook_0", &json!({"tool_name": "Bash"}), None)
            .await
            .unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn block_decision_short_circuits() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let registry = registry_with(
            None,
            vec![
                Arc::new(Recorder {
                    label: "blocker",
                    order: order.clone(),
                    output: HookOutput {
                        decision: Some("block".to_string()),
                        system_message: Some("stopped".to_string()),
                        hook_specific_output: None,
                    },
                }),
                Arc::new(Recorder {
                    label: "never",
                    order: order.clone(),
                    output: HookOutput::pass(),
                }),
            ],
        );

        let result = registry
            .dispatch("hook_0", &json!({"tool_name": "Bash"}), None)
            .await
            .unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["blocker"]);
        assert_eq!(result["decision"], "block");
        assert_eq!(result["systemMessage"], "stopped");
    }

    #[tokio::test]
    async fn later_specific_output_overrides_earlier() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);

        struct Specific(Value);

        #[async_trait]
        impl HookHandler for Specific {
            async fn call(
                &self,
                _input: &Value,
                _tool_use_id: Option<&str>,
                _context: &HookContext,
            ) -> Result<HookOutput, SdkError> {
                CALLS.fetch_add(1, Ordering::SeqCst);
                Ok(HookOutput {
                    decision: None,
                    system_message: None,
                    hook_specific_output: Some(self.0.clone()),
                })
            }
        }

        let registry = registry_with(
            None,
            vec![
                Arc::new(Specific(json!({"permissionDecision": "allow", "extra": 1}))),
                Arc::new(Specific(json!({"permissionDecision": "deny"}))),
            ],
        );

        let result = registry.dispatch("hook_0", &json!({}), None).await.unwrap();
        assert_eq!(CALLS.load(Ordering::SeqCst), 2);
        assert_eq!(result["hookSpecificOutput"]["permissionDecision"], "deny");
        assert_eq!(result["hookSpecificOutput"]["extra"], 1);
    }

    #[tokio::test]
    async fn unknown_callback_id_is_a_handler_error() {
        let registry = registry_with(None, vec![]);
        let err = registry
            .dispatch("hook_99", &json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SdkError::Handler(_)));
    }

    #[test]
    fn matcher_patterns_support_regex_and_literal() {
        let entry = HookMatcher::named("Bash|Write", vec![]);
        assert!(entry.matches("Bash"));
        assert!(entry.matches("Write"));
        assert!(!entry.matches("Read"));

        let literal = HookMatcher::named("Bash", vec![]);
        assert!(literal.matches("Bash"));
        assert!(!literal.matches("BashOther"));

        let any = HookMatcher::any(vec![]);
        assert!(any.matches("anything"));
    }
}
