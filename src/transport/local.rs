//! Local execution transport.

use super::{ExecOutput, ProcessRunner};
use std::io::Write;
use std::process::{Command, Stdio};
use tracing::debug;

/// Runs scripts through a shell on this machine, script fed on stdin.
#[derive(Debug, Clone)]
pub struct LocalRunner {
    shell: String,
}

impl Default for LocalRunner {
    fn default() -> Self {
        Self::with_shell("bash")
    }
}

impl LocalRunner {
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl ProcessRunner for LocalRunner {
    fn exec(&self, script: &str) -> Result<ExecOutput, String> {
        debug!(shell = %self.shell, script, "exec");
        let mut child = Command::new(&self.shell)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| format!("failed to spawn {}: {}", self.shell, e))?;

        // Dropping stdin at the end of this block sends EOF
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(script.as_bytes())
                .map_err(|e| format!("stdin write error: {}", e))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| format!("wait error: {}", e))?;

        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
