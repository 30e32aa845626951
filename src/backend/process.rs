//! Subprocess backend.
//!
//! Spawns the LTP binary directly with a cleared environment. Standard
//! streams are inherited so test output lands next to the harness output.

use std::os::unix::process::ExitStatusExt;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use super::Launcher;
use crate::invocation::PreparedCommand;
use crate::outcome::ExecutionResult;

/// The child outlived its time budget and was killed.
#[derive(Debug, Error)]
#[error("test binary timed out after {0}s")]
pub struct Timeout(pub u64);

/// Backend that runs LTP binaries as child processes.
#[derive(Debug, Default, Clone)]
pub struct ProcessLauncher {
    timeout: Option<Duration>,
}

impl ProcessLauncher {
    /// Create a launcher that waits for the child indefinitely.
    #[must_use]
    pub const fn new() -> Self {
        Self { timeout: None }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    #[instrument(skip(self, cmd), fields(program = %cmd.program.display()))]
    async fn launch(&self, cmd: &PreparedCommand) -> Result<ExecutionResult> {
        debug!(args = ?cmd.args, cwd = %cmd.working_dir.display(), "Spawning test binary");

        let mut child = Command::new(&cmd.program)
            .args(&cmd.args)
            .env_clear()
            .envs(cmd.env.iter().map(|(k, v)| (k, v)))
            .current_dir(&cmd.working_dir)
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to execute {}", cmd.program.display()))?;

        let status = match self.timeout {
            None => child.wait().await.context("Failed to wait for test binary")?,
            Some(limit) => {
                if let Ok(status) = tokio::time::timeout(limit, child.wait()).await {
                    status.context("Failed to wait for test binary")?
                } else {
                    warn!(timeout = ?limit, "Test binary timed out, killing it");
                    let _ = child.kill().await;
                    return Err(Timeout(limit.as_secs()).into());
                }
            }
        };

        let result = ExecutionResult {
            exit_code: status.code(),
            signal: status.signal(),
        };
        debug!(exit_code = ?result.exit_code, signal = ?result.signal, "Test binary finished");

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};

    fn sh_command(script: &str, cwd: &Path) -> PreparedCommand {
        PreparedCommand {
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".to_string(), script.to_string()],
            env: vec![("TMPDIR".to_string(), cwd.display().to_string())],
            working_dir: cwd.to_path_buf(),
        }
    }

    #[tokio::test]
    async fn reports_exit_code() {
        if !Path::new("/bin/sh").exists() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let result = ProcessLauncher::new()
            .launch(&sh_command("exit 32", dir.path()))
            .await
            .unwrap();
        assert_eq!(result, ExecutionResult::exited(32));
    }

    #[tokio::test]
    async fn environment_is_replaced() {
        if !Path::new("/bin/sh").exists() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let script = r#"[ -z "$HOME" ] && [ "$TMPDIR" = "$(pwd)" ]"#;
        let result = ProcessLauncher::new()
            .launch(&sh_command(script, dir.path()))
            .await
            .unwrap();
        assert_eq!(result.exit_code, Some(0));
    }

    #[tokio::test]
    async fn reports_signal() {
        if !Path::new("/bin/sh").exists() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let result = ProcessLauncher::new()
            .launch(&sh_command("kill -9 $$", dir.path()))
            .await
            .unwrap();
        assert_eq!(result, ExecutionResult::signaled(9));
    }

    #[tokio::test]
    async fn missing_binary_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = PreparedCommand {
            program: dir.path().join("does-not-exist"),
            args: Vec::new(),
            env: Vec::new(),
            working_dir: dir.path().to_path_buf(),
        };
        assert!(ProcessLauncher::new().launch(&cmd).await.is_err());
    }

    #[tokio::test]
    async fn timeout_kills_child() {
        if !Path::new("/bin/sh").exists() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let launcher = ProcessLauncher::new().with_timeout(Some(Duration::from_millis(200)));
        let err = launcher
            .launch(&sh_command("while :; do :; done", dir.path()))
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<Timeout>().is_some());
    }
}
