//! Subprocess lifecycle: spawn with piped streams, graceful termination.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::time::timeout;

use crate::cmd::Prompt;
use crate::error::SdkError;
use crate::options::AgentOptions;

/// Time to wait for a graceful exit before force-killing.
pub(crate) const GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Environment variable identifying this SDK to the CLI.
const ENTRYPOINT_ENV: (&str, &str) = ("CLAUDE_CODE_ENTRYPOINT", "sdk-rust");

/// A spawned CLI process with all three standard streams captured.
pub(crate) struct CliProcess {
    pub child: Child,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// Spawns the CLI. The subprocess is either fully connected (all three
/// streams open) or this returns an error; no partial state escapes.
pub(crate) fn spawn(
    cli_path: &Path,
    prompt: &Prompt,
    options: &AgentOptions,
) -> Result<CliProcess, SdkError> {
    let args = crate::cmd::build_args(prompt, options);

    let mut cmd = Command::new(cli_path);
    cmd.args(&args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .env(ENTRYPOINT_ENV.0, ENTRYPOINT_ENV.1)
        .kill_on_drop(true);

    if let Some(cwd) = &options.cwd {
        cmd.current_dir(cwd);
    }
    for (key, value) in &options.env {
        cmd.env(key, value);
    }

    tracing::debug!(cli = %cli_path.display(), args = args.len(), "spawning CLI");

    let mut child = cmd.spawn().map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            SdkError::CliNotFound {
                detail: Some(format!("spawn failed for {}", cli_path.display())),
            }
        } else {
            SdkError::connection("spawn", source)
        }
    })?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| SdkError::connection("stdin", stream_missing()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| SdkError::connection("stdout", stream_missing()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| SdkError::connection("stderr", stream_missing()))?;

    Ok(CliProcess {
        child,
        stdin,
        stdout,
        stderr,
    })
}

fn stream_missing() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe was not captured")
}

/// Sends SIGTERM, waits up to [`GRACE_PERIOD`], then force-kills.
#[cfg(unix)]
pub(crate) async fn graceful_shutdown(child: &mut Child) -> Result<std::process::ExitStatus, SdkError> {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    if let Ok(Some(status)) = child.try_wait() {
        return Ok(status);
    }

    if let Some(pid) = child.id() {
        let nix_pid = Pid::from_raw(pid.cast_signed());
        if let Err(errno) = signal::kill(nix_pid, Signal::SIGTERM) {
            tracing::debug!(pid, errno = %errno, "SIGTERM failed; process likely already gone");
        }
    }

    match timeout(GRACE_PERIOD, child.wait()).await {
        Ok(result) => result.map_err(|e| SdkError::connection("wait", e)),
        Err(_) => {
            child
                .kill()
                .await
                .map_err(|e| SdkError::connection("kill", e))?;
            child
                .wait()
                .await
                .map_err(|e| SdkError::connection("wait after kill", e))
        }
    }
}

/// Windows: no graceful signal for console processes; terminate immediately.
#[cfg(windows)]
pub(crate) async fn graceful_shutdown(child: &mut Child) -> Result<std::process::ExitStatus, SdkError> {
    if let Ok(Some(status)) = child.try_wait() {
        return Ok(status);
    }
    child
        .kill()
        .await
        .map_err(|e| SdkError::connection("kill", e))?;
    child
        .wait()
        .await
        .map_err(|e| SdkError::connection("wait after kill", e))
}
