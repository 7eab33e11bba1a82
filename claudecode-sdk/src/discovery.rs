//! Discovery and resolution of the Claude CLI executable path.

use crate::error::SdkError;
use std::path::PathBuf;
use which::which;

/// Environment variable that overrides the default CLI binary path.
pub const CLI_BIN_ENV_VAR: &str = "CLAUDE_SDK_CLI";

/// Locates the Claude CLI executable.
///
/// Resolution order:
/// 1. `explicit_path` if provided and the file exists.
/// 2. The path in the [`CLI_BIN_ENV_VAR`] environment variable.
/// 3. `claude` resolved via `$PATH`.
/// 4. A fixed list of well-known install locations.
///
/// On a total miss the error distinguishes a missing Node.js runtime from a
/// missing CLI, each with installation guidance.
pub fn discover_cli(explicit_path: Option<PathBuf>) -> Result<PathBuf, SdkError> {
    if let Some(path) = explicit_path {
        if path.is_file() {
            return Ok(path);
        }
        return Err(SdkError::CliNotFound {
            detail: Some(format!("explicit path does not exist: {}", path.display())),
        });
    }

    if let Ok(path_str) = std::env::var(CLI_BIN_ENV_VAR) {
        let path = PathBuf::from(path_str);
        if path.is_file() {
            return Ok(path);
        }
    }

    if let Ok(path) = which("claude") {
        return Ok(path);
    }

    for path in well_known_locations() {
        if path.is_file() {
            return Ok(path);
        }
    }

    if which("node").is_err() {
        return Err(SdkError::RuntimeMissing);
    }
    Err(SdkError::CliNotFound { detail: None })
}

/// Well-known install locations probed after `$PATH` misses.
fn well_known_locations() -> Vec<PathBuf> {
    let mut locations = Vec::new();
    if let Some(home) = dirs::home_dir() {
        locations.push(home.join(".npm-global/bin/claude"));
        locations.push(home.join(".local/bin/claude"));
        locations.push(home.join("node_modules/.bin/claude"));
        locations.push(home.join(".yarn/bin/claude"));
        locations.push(home.join(".claude/local/claude"));
    }
    locations.push(PathBuf::from("/usr/local/bin/claude"));
    locations.push(PathBuf::from("/opt/homebrew/bin/claude"));
    locations.push(PathBuf::from("node_modules/.bin/claude"));
    locations
}
