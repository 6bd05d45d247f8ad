//! SP-012: SFTP file-transfer session.
//!
//! Drives the `sftp` client under a pty, using its own `sftp>` prompt as the
//! ready marker.

use super::classify::{parse_listing, scan_sftp, PathInfo, SftpEvents};
use super::pty::{Pty, PtySpawner, SecretPrompt};
use super::ssh::expand_tilde;
use super::{with_timeout, ConnectOptions, FileTransferSession};
use crate::core::error::SessionError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct SftpSession {
    spawner: Arc<dyn PtySpawner>,
    prompt: Arc<dyn SecretPrompt>,
    pty: Option<Box<dyn Pty>>,
    host: String,
    login_passwords: HashMap<String, String>,
}

impl SftpSession {
    pub fn new(spawner: Arc<dyn PtySpawner>, prompt: Arc<dyn SecretPrompt>) -> Self {
        Self {
            spawner,
            prompt,
            pty: None,
            host: String::new(),
            login_passwords: HashMap::new(),
        }
    }

    fn pty(&mut self) -> Result<&mut Box<dyn Pty>, SessionError> {
        self.pty.as_mut().ok_or(SessionError::NotConnected)
    }

    async fn next_events(&mut self) -> Result<SftpEvents, SessionError> {
        let chunk = self.pty()?.read().await.ok_or(SessionError::Closed)?;
        Ok(scan_sftp(&chunk))
    }

    async fn handshake(&mut self, no_prompts: bool) -> Result<(), SessionError> {
        loop {
            let events = self.next_events().await?;

            if events.ready {
                return Ok(());
            } else if events.permission_denied {
                return Err(SessionError::PermissionDenied {
                    host: self.host.clone(),
                });
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
            }
        }
    }

    async fn await_listing(&mut self, path: &str) -> Result<PathInfo, SessionError> {
        let mut info = None;
        loop {
            let events = self.next_events().await?;
            if events.not_found {
                return Err(SessionError::NotFound {
                    path: path.to_string(),
                });
            }
            if info.is_none() {
                info = events.info_lines.first().and_then(|l| parse_listing(l));
            }
            if events.ready {
                return info.ok_or(SessionError::UnexpectedOutput);
            }
        }
    }

    async fn await_upload(&mut self, remote: &str) -> Result<(), SessionError> {
        loop {
            let events = self.next_events().await?;
            if !events.error_lines.is_empty() {
                for line in &events.error_lines {
                    warn!(remote, "{}", line);
                }
                return Err(SessionError::Upload {
                    path: remote.to_string(),
                });
            }
            if events.ready {
                return Ok(());
            }
        }
    }
}

/// `sftp` argument vector. Note sftp takes the port as `-P`.
pub fn sftp_args(options: &ConnectOptions) -> Vec<String> {
    let mut args = vec![options.destination()];
    if let Some(port) = options.port {
        args.extend(["-P".to_string(), port.to_string()]);
    }
    if let Some(identity) = &options.identity {
        args.extend(["-i".to_string(), expand_tilde(identity)]);
    }
    args
}

/// Double-quote a path for the sftp command parser.
fn quote(path: &str) -> String {
    format!("\"{}\"", path.replace('\\', "\\\\").replace('"', "\\\""))
}

#[async_trait]
impl FileTransferSession for SftpSession {
    async fn connect(&mut self, options: &ConnectOptions) -> Result<(), SessionError> {
        if self.pty.is_some() {
            return Err(SessionError::AlreadyConnected);
        }
        if options.host.is_empty() {
            return Err(SessionError::MissingHost);
        }

        self.host = options.host.clone();
        self.login_passwords = options.login_passwords.clone();
        self.pty = Some(self.spawner.spawn("sftp", &sftp_args(options))?);

        let what = format!("connecting sftp to {}", options.host);
        match with_timeout(options.timeout, &what, self.handshake(options.no_prompts)).await {
            Ok(()) => {
                info!(host = %options.host, "sftp session ready");
                Ok(())
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    async fn get_info(
        &mut self,
        path: &str,
        timeout: Option<Duration>,
    ) -> Result<PathInfo, SessionError> {
        self.pty()?.write(&format!("ls -l {}\n", quote(path)))?;
        let what = format!("listing {}", path);
        with_timeout(timeout, &what, self.await_listing(path)).await
    }

    async fn put_file(
        &mut self,
        local: &Path,
        remote: &str,
        timeout: Option<Duration>,
    ) -> Result<(), SessionError> {
        debug!(local = %local.display(), remote, "sftp put");
        self.pty()?.write(&format!(
            "put {} {}\n",
            quote(&local.to_string_lossy()),
            quote(remote)
        ))?;
        let what = format!("uploading {}", remote);
        with_timeout(timeout, &what, self.await_upload(remote)).await
    }

    async fn put_content(
        &mut self,
        remote: &str,
        contents: &[u8],
        timeout: Option<Duration>,
    ) -> Result<(), SessionError> {
        // Removed when dropped, on every path
        let mut staged = tempfile::NamedTempFile::new().map_err(SessionError::Write)?;
        staged.write_all(contents).map_err(SessionError::Write)?;
        staged.flush().map_err(SessionError::Write)?;
        self.put_file(staged.path(), remote, timeout).await
    }

    fn close(&mut self) {
        if let Some(mut pty) = self.pty.take() {
            pty.close();
            debug!(host = %self.host, "sftp session closed");
        }
    }
}

impl Drop for SftpSession {
    fn drop(&mut self) {
        self.close();
    }
}
