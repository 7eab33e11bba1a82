//! Error types for the SDK core.

use std::time::Duration;
use thiserror::Error;

/// All errors that can occur while driving the CLI.
#[derive(Debug, Error)]
pub enum SdkError {
    /// Neither the CLI nor its Node.js runtime could be found.
    #[error("Claude Code requires Node.js, which is not installed.\n\nInstall Node.js from: https://nodejs.org/\n\nAfter installing Node.js, install Claude Code:\n  npm install -g @anthropic-ai/claude-code")]
    RuntimeMissing,

    /// The CLI binary could not be located.
    #[error("Claude Code not found{}. Install with:\n  npm install -g @anthropic-ai/claude-code\n\nIf already installed locally, try:\n  export PATH=\"$HOME/node_modules/.bin:$PATH\"\n\nOr set an explicit path in the options.", .detail.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
    CliNotFound {
        /// Extra context (e.g. the explicit path that did not exist).
        detail: Option<String>,
    },

    /// The subprocess could not be spawned or its streams opened.
    #[error("failed to start Claude Code at stage '{stage}': {source}")]
    Connection {
        /// Lifecycle stage where the I/O error occurred.
        stage: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Unparseable bytes arrived on the channel.
    #[error("failed to decode channel data: {source}\nOffending text: {line}")]
    Decode {
        /// The text that failed to parse.
        line: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The CLI exited non-zero with diagnostic stderr.
    #[error("CLI process failed with exit code {exit_code}\nstderr: {stderr}")]
    Process {
        /// The non-zero exit code (`-1` when killed by a signal).
        exit_code: i32,
        /// Captured standard error output.
        stderr: String,
    },

    /// A control message violated the protocol (unmatched response,
    /// missing required field).
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The CLI answered an outbound control request with an error.
    #[error("control request failed: {0}")]
    ControlRequestFailed(String),

    /// An outbound control request went unanswered within its deadline.
    #[error("control request '{subtype}' timed out after {elapsed:?}")]
    ControlTimeout {
        /// Request subtype that timed out.
        subtype: String,
        /// How long the SDK waited.
        elapsed: Duration,
    },

    /// The session shut down while a request was pending.
    #[error("disconnected while a control request was pending")]
    Disconnected,

    /// A host-supplied extension handler failed.
    #[error("extension handler failed: {0}")]
    Handler(String),

    /// An I/O error outside the spawn path.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A serialization error outside the channel decode path.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SdkError {
    pub(crate) fn connection(stage: impl Into<String>, source: std::io::Error) -> Self {
        Self::Connection {
            stage: stage.into(),
            source,
        }
    }
}
