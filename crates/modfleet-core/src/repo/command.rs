//! Subprocess execution scoped to a repository directory.

use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use super::RepoHandle;
use crate::domain::error::{FleetError, Result};

/// Captured result of a finished subprocess.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code; `None` when terminated by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Stderr, or stdout when the tool reported on stdout instead.
    fn diagnostics(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

impl RepoHandle {
    /// Run `args` in the repository, failing on a non-zero exit.
    pub async fn run(&self, args: &[&str]) -> Result<()> {
        self.capture(args).await.map(drop)
    }

    /// Run `args` and return trimmed stdout, failing on a non-zero exit.
    pub async fn capture(&self, args: &[&str]) -> Result<String> {
        let output = self.probe(args).await?;
        if output.success() {
            Ok(output.stdout.trim().to_string())
        } else {
            Err(FleetError::CommandFailed {
                repo: self.identity().to_string(),
                command: args.join(" "),
                status: output.status,
                stderr: output.diagnostics(),
            })
        }
    }

    /// Run `args` and hand back the exit status without judging it.
    ///
    /// Only spawn failures and timeouts are errors.
    pub async fn probe(&self, args: &[&str]) -> Result<CommandOutput> {
        let Some((program, rest)) = args.split_first() else {
            return Err(FleetError::invalid("command", ""));
        };
        let rendered = args.join(" ");
        debug!(repo = %self.identity(), command = %rendered, "exec");

        let mut cmd = Command::new(program);
        cmd.args(rest)
            .current_dir(&self.path)
            .stdin(Stdio::null())
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true);

        let spawned = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, cmd.output())
                .await
                .map_err(|_| FleetError::CommandTimedOut {
                    repo: self.identity().to_string(),
                    command: rendered.clone(),
                    secs: limit.as_secs(),
                })?,
            None => cmd.output().await,
        };
        let output = spawned.map_err(|e| FleetError::CommandFailed {
            repo: self.identity().to_string(),
            command: rendered.clone(),
            status: None,
            stderr: format!("failed to spawn: {e}"),
        })?;

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
