//! SP-009: Transport abstraction over local processes and remote pty sessions.
//!
//! Remote hosts are driven through two interactive sessions per host: an
//! `ssh` shell (`TerminalSession`) and an `sftp` client
//! (`FileTransferSession`). Both run under a pseudo-terminal and turn its
//! text stream into classified events.

pub mod classify;
pub mod local;
pub mod pty;
pub mod sftp;
pub mod ssh;

use crate::core::error::SessionError;
use crate::core::types::HostSpec;
use async_trait::async_trait;
use classify::PathInfo;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Output from running a local script.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs shell scripts on the local machine.
pub trait ProcessRunner: Send + Sync {
    fn exec(&self, script: &str) -> Result<ExecOutput, String>;
}

/// Single-quote a word for a POSIX shell.
pub fn shell_quote(word: &str) -> String {
    if !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+,".contains(c))
    {
        return word.to_string();
    }
    format!("'{}'", word.replace('\'', r"'\''"))
}

// ============================================================================
// Session options
// ============================================================================

/// How to reach one host.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    pub host: String,
    pub user: Option<String>,
    pub port: Option<u16>,
    pub identity: Option<PathBuf>,
    /// Fail instead of asking for a password or code
    pub no_prompts: bool,
    pub timeout: Option<Duration>,
    /// Literal prompt text → credential, consulted before asking
    pub login_passwords: HashMap<String, String>,
}

impl ConnectOptions {
    pub fn for_host(spec: &HostSpec) -> Self {
        Self {
            host: spec.host.clone(),
            user: spec.user.clone(),
            port: spec.port,
            identity: spec.identity.clone(),
            ..Self::default()
        }
    }

    /// `user@host`, or just `host`.
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }

    /// Prompt text ssh shows when asking for this destination's password.
    pub fn login_prompt(&self) -> String {
        format!("{}'s password:", self.destination())
    }
}

/// Options for one remote command.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Directory to `cd` into first
    pub cwd: Option<String>,
    /// Prefix the command with `sudo -E`
    pub sudo: bool,
    /// Return non-zero exit codes instead of failing
    pub no_throw: bool,
    pub timeout: Option<Duration>,
}

/// Result of one remote command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    pub exit_code: i32,
    pub output: Vec<String>,
}

/// Receives streamed lines while a remote command runs, in stream order.
pub trait OutputSink: Send {
    fn start(&mut self, _line: &str) {}
    fn json(&mut self, _line: &str) {}
    fn error(&mut self, _line: &str) {}
}

/// Discards everything.
pub struct NoOutput;

impl OutputSink for NoOutput {}

// ============================================================================
// Session traits
// ============================================================================

/// An interactive remote shell.
#[async_trait]
pub trait TerminalSession: Send {
    async fn connect(&mut self, options: &ConnectOptions) -> Result<(), SessionError>;

    async fn run(
        &mut self,
        command: &str,
        options: &RunOptions,
        sink: &mut dyn OutputSink,
    ) -> Result<RunOutput, SessionError>;

    /// Idempotent.
    fn close(&mut self);
}

/// An interactive file-transfer client.
#[async_trait]
pub trait FileTransferSession: Send {
    async fn connect(&mut self, options: &ConnectOptions) -> Result<(), SessionError>;

    async fn get_info(
        &mut self,
        path: &str,
        timeout: Option<Duration>,
    ) -> Result<PathInfo, SessionError>;

    async fn put_file(
        &mut self,
        local: &Path,
        remote: &str,
        timeout: Option<Duration>,
    ) -> Result<(), SessionError>;

    async fn put_content(
        &mut self,
        remote: &str,
        contents: &[u8],
        timeout: Option<Duration>,
    ) -> Result<(), SessionError>;

    /// Idempotent.
    fn close(&mut self);
}

/// Race `fut` against an optional deadline. The timer is dropped on both paths.
pub async fn with_timeout<T, F>(
    limit: Option<Duration>,
    what: &str,
    fut: F,
) -> Result<T, SessionError>
where
    F: Future<Output = Result<T, SessionError>>,
{
    match limit {
        None => fut.await,
        Some(after) => tokio::time::timeout(after, fut)
            .await
            .map_err(|_| SessionError::Timeout {
                what: what.to_string(),
                after,
            })?,
    }
}
