//! SP-011: SSH terminal session.
//!
//! Uses the `ssh` binary under a pty, so password, passphrase and 2FA
//! prompts behave exactly as they would for an operator. Once the remote
//! shell produces output the prompt variables are replaced with private
//! sentinels; "ready" is only trusted after that.

use super::classify::{SshEvents, SshScanner, PS1_SENTINEL, PS2_SENTINEL};
use super::pty::{Pty, PtySpawner, SecretPrompt};
use super::{
    shell_quote, with_timeout, ConnectOptions, OutputSink, RunOptions, RunOutput, TerminalSession,
};
use crate::core::error::SessionError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lifecycle of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
    Failed(String),
}

pub struct SshSession {
    spawner: Arc<dyn PtySpawner>,
    prompt: Arc<dyn SecretPrompt>,
    pty: Option<Box<dyn Pty>>,
    scanner: SshScanner,
    state: ConnectionState,
    host: String,
    /// Literal prompt text → password, private to this connection
    login_passwords: HashMap<String, String>,
    sudo_password: Option<String>,
}

impl SshSession {
    pub fn new(spawner: Arc<dyn PtySpawner>, prompt: Arc<dyn SecretPrompt>) -> Self {
        Self {
            spawner,
            prompt,
            pty: None,
            scanner: SshScanner::new(),
            state: ConnectionState::Disconnected,
            host: String::new(),
            login_passwords: HashMap::new(),
            sudo_password: None,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    fn pty(&mut self) -> Result<&mut Box<dyn Pty>, SessionError> {
        self.pty.as_mut().ok_or(SessionError::NotConnected)
    }

    async fn next_events(&mut self) -> Result<SshEvents, SessionError> {
        let chunk = self.pty()?.read().await.ok_or(SessionError::Closed)?;
        Ok(self.scanner.scan(&chunk))
    }

    async fn handshake(&mut self, no_prompts: bool) -> Result<(), SessionError> {
        let mut prompt_changed = false;

        loop {
            let events = self.next_events().await?;

            if events.ready && prompt_changed {
                return Ok(());
            } else if events.permission_denied {
                return Err(SessionError::PermissionDenied {
                    host: self.host.clone(),
                });
            } else if events.connection_refused {
                return Err(SessionError::ConnectionRefused {
                    host: self.host.clone(),
                });
            } else if events.passphrase_required {
                return Err(SessionError::PassphraseRequired);
            } else if let Some(login) = events.login_prompt {
                if no_prompts {
                    return Err(SessionError::LoginPrompt);
                }
                let password = match self.login_passwords.get(&login) {
                    Some(cached) => cached.clone(),
                    None => {
                        let answer = self.prompt.ask(&login).await?;
                        self.login_passwords.insert(login, answer.clone());
                        answer
                    }
                };
                self.pty()?.write(&format!("{}\n", password))?;
            } else if let Some(verification) = events.verification_prompt {
                if no_prompts {
                    return Err(SessionError::VerificationPrompt);
                }
                let code = self.prompt.ask(&verification).await?;
                self.pty()?.write(&format!("{}\n", code))?;
            } else if !prompt_changed {
                self.pty()?.write(&format!(
                    "PROMPT_COMMAND=\nPS1='{}'\nPS2='{}'\nstty -echo\n",
                    PS1_SENTINEL, PS2_SENTINEL
                ))?;
                prompt_changed = true;
            }
        }
    }

    /// Read until the command's exit status has been seen and the shell is
    /// back at its prompt. Prompts left over from the session setup arrive
    /// before any status and are ignored.
    async fn collect(
        &mut self,
        sink: &mut dyn OutputSink,
    ) -> Result<(i32, Vec<String>), SessionError> {
        let mut exit_code = None;
        let mut output = Vec::new();

        loop {
            let events = self.next_events().await?;

            if events.exit_code.is_some() {
                exit_code = events.exit_code;
            }
            output.extend(events.output_lines);

            if let Some(sudo) = events.sudo_prompt {
                let password = match &self.sudo_password {
                    Some(cached) => cached.clone(),
                    None => {
                        let answer = self.prompt.ask(&sudo).await?;
                        self.sudo_password = Some(answer.clone());
                        answer
                    }
                };
                self.pty()?.write(&format!("{}\n", password))?;
            }

            if let Some(start) = &events.start_line {
                sink.start(start);
            }
            for line in &events.json_lines {
                sink.json(line);
            }
            for line in &events.error_lines {
                sink.error(line);
            }

            match (events.ready, exit_code) {
                (true, Some(code)) => return Ok((code, output)),
                (true, None) => debug!("prompt without exit status; still waiting"),
                _ => {}
            }
        }
    }
}

/// `ssh` argument vector for `options`.
pub fn ssh_args(options: &ConnectOptions) -> Vec<String> {
    let mut args = vec![options.destination()];
    if let Some(port) = options.port {
        args.extend(["-p".to_string(), port.to_string()]);
    }
    if let Some(identity) = &options.identity {
        args.extend(["-i".to_string(), expand_tilde(identity)]);
    }
    args.extend(["-o".to_string(), "NumberOfPasswordPrompts=1".to_string()]);
    args
}

/// Expand a leading `~/` to `$HOME`.
pub fn expand_tilde(path: &Path) -> String {
    let text = path.to_string_lossy();
    match (text.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => text.into_owned(),
    }
}

/// The single line sent for `run`.
pub fn command_line(command: &str, options: &RunOptions) -> String {
    let mut line = String::new();
    if let Some(cwd) = &options.cwd {
        line.push_str(&format!("cd {} 1> /dev/null 2> /dev/null;", shell_quote(cwd)));
    }
    if options.sudo {
        line.push_str("sudo -E ");
    }
    line.push_str(command);
    line.push_str("; echo $?\n");
    line
}

#[async_trait]
impl TerminalSession for SshSession {
    async fn connect(&mut self, options: &ConnectOptions) -> Result<(), SessionError> {
        if self.pty.is_some() {
            return Err(SessionError::AlreadyConnected);
        }
        if options.host.is_empty() {
            return Err(SessionError::MissingHost);
        }

        self.host = options.host.clone();
        self.login_passwords = options.login_passwords.clone();
        self.scanner = SshScanner::new();
        self.state = ConnectionState::Connecting;
        match self.spawner.spawn("ssh", &ssh_args(options)) {
            Ok(pty) => self.pty = Some(pty),
            Err(e) => {
                self.state = ConnectionState::Failed(e.to_string());
                return Err(e);
            }
        }

        let what = format!("connecting to {}", options.host);
        match with_timeout(options.timeout, &what, self.handshake(options.no_prompts)).await {
            Ok(()) => {
                info!(host = %options.host, "ssh session ready");
                self.state = ConnectionState::Ready;
                Ok(())
            }
            Err(e) => {
                warn!(host = %options.host, "ssh connect failed: {}", e);
                self.close();
                self.state = ConnectionState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    async fn run(
        &mut self,
        command: &str,
        options: &RunOptions,
        sink: &mut dyn OutputSink,
    ) -> Result<RunOutput, SessionError> {
        let line = command_line(command, options);
        debug!(command = %line.trim_end(), "ssh run");
        self.pty()?.write(&line)?;

        let what = format!("command '{}'", command);
        let (exit_code, output) = with_timeout(options.timeout, &what, self.collect(sink)).await?;

        if exit_code != 0 && !options.no_throw {
            return Err(SessionError::CommandFailed {
                command: command.to_string(),
                exit_code,
            });
        }
        Ok(RunOutput { exit_code, output })
    }

    fn close(&mut self) {
        if let Some(mut pty) = self.pty.take() {
            pty.close();
            debug!(host = %self.host, "ssh session closed");
        }
        if self.state == ConnectionState::Ready || self.state == ConnectionState::Connecting {
            self.state = ConnectionState::Disconnected;
        }
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        self.close();
    }
}
