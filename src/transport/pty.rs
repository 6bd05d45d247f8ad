//! Pseudo-terminal processes and interactive secret prompts.
//!
//! `NativePtySpawner` runs a program under a real pty (portable-pty). A
//! reader thread forwards output chunks over a channel so the session
//! protocols can await them.

use crate::core::error::SessionError;
use async_trait::async_trait;
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, PtySize};
use std::io::{Read, Write};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace};

/// One program running under a pseudo-terminal.
#[async_trait]
pub trait Pty: Send {
    fn write(&mut self, data: &str) -> Result<(), SessionError>;

    /// Next output chunk, or `None` once the program has exited.
    async fn read(&mut self) -> Option<String>;

    fn close(&mut self);
}

pub trait PtySpawner: Send + Sync {
    fn spawn(&self, program: &str, args: &[String]) -> Result<Box<dyn Pty>, SessionError>;
}

/// Spawns real pseudo-terminals, 80x30.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativePtySpawner;

impl PtySpawner for NativePtySpawner {
    fn spawn(&self, program: &str, args: &[String]) -> Result<Box<dyn Pty>, SessionError> {
        let spawn_err = |e: &dyn std::fmt::Display| SessionError::Spawn {
            program: program.to_string(),
            reason: e.to_string(),
        };

        let pair = native_pty_system()
            .openpty(PtySize {
                rows: 30,
                cols: 80,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| spawn_err(&e))?;

        let mut cmd = CommandBuilder::new(program);
        cmd.args(args);
        cmd.env("TERM", "xterm-color");
        if let Some(home) = std::env::var_os("HOME") {
            cmd.cwd(home);
        }

        let child = pair.slave.spawn_command(cmd).map_err(|e| spawn_err(&e))?;
        drop(pair.slave);

        let reader = pair.master.try_clone_reader().map_err(|e| spawn_err(&e))?;
        let writer = pair.master.take_writer().map_err(|e| spawn_err(&e))?;

        let (tx, rx) = unbounded_channel();
        std::thread::spawn(move || forward_output(reader, tx));
        debug!(program, ?args, "spawned pty");

        Ok(Box::new(NativePty {
            _master: pair.master,
            writer,
            child,
            rx,
        }))
    }
}

/// Pump pty output into the channel until EOF, keeping UTF-8 sequences whole.
fn forward_output(mut reader: Box<dyn Read + Send>, tx: UnboundedSender<String>) {
    let mut buf = [0u8; 4096];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        pending.extend_from_slice(&buf[..n]);

        let valid = match std::str::from_utf8(&pending) {
            Ok(_) => pending.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => pending.len(),
        };
        if valid == 0 {
            continue;
        }
        let chunk = String::from_utf8_lossy(&pending[..valid]).into_owned();
        pending.drain(..valid);
        if tx.send(chunk).is_err() {
            break;
        }
    }

    if !pending.is_empty() {
        let _ = tx.send(String::from_utf8_lossy(&pending).into_owned());
    }
}

struct NativePty {
    _master: Box<dyn portable_pty::MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn Child + Send + Sync>,
    rx: UnboundedReceiver<String>,
}

#[async_trait]
impl Pty for NativePty {
    fn write(&mut self, data: &str) -> Result<(), SessionError> {
        self.writer
            .write_all(data.as_bytes())
            .and_then(|_| self.writer.flush())
            .map_err(SessionError::Write)
    }

    async fn read(&mut self) -> Option<String> {
        let chunk = self.rx.recv().await;
        if let Some(text) = &chunk {
            trace!(chunk = %text.escape_debug(), "pty read");
        }
        chunk
    }

    fn close(&mut self) {
        if let Err(e) = self.child.kill() {
            debug!("pty child already gone: {}", e);
        }
        let _ = self.child.wait();
    }
}

impl Drop for NativePty {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            self.close();
        }
    }
}

// ============================================================================
// Secret prompts
// ============================================================================

/// Asks the operator for a password or code.
#[async_trait]
pub trait SecretPrompt: Send + Sync {
    async fn ask(&self, prompt: &str) -> Result<String, SessionError>;
}

/// Reads from the controlling terminal with echo disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompt;

#[async_trait]
impl SecretPrompt for TerminalPrompt {
    async fn ask(&self, prompt: &str) -> Result<String, SessionError> {
        let text = format!("{} ", prompt);
        tokio::task::spawn_blocking(move || rpassword::prompt_password(text))
            .await
            .map_err(|e| SessionError::Prompt(std::io::Error::other(e)))?
            .map_err(SessionError::Prompt)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sp009_native_pty_echo() {
        let mut pty = NativePtySpawner
            .spawn("sh", &["-c".to_string(), "echo spade-pty-ok".to_string()])
            .unwrap();
        let mut seen = String::new();
        while let Some(chunk) = pty.read().await {
            seen.push_str(&chunk);
        }
        assert!(seen.contains("spade-pty-ok"));
        pty.close();
    }

    #[test]
    fn test_sp009_forward_output_keeps_utf8_whole() {
        let bytes = "héllo".as_bytes().to_vec();
        // Split inside the two-byte é
        struct Halves(Vec<Vec<u8>>);
        impl Read for Halves {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                if self.0.is_empty() {
                    return Ok(0);
                }
                let part = self.0.remove(0);
                buf[..part.len()].copy_from_slice(&part);
                Ok(part.len())
            }
        }
        let reader = Halves(vec![bytes[..2].to_vec(), bytes[2..].to_vec()]);
        let (tx, mut rx) = unbounded_channel();
        forward_output(Box::new(reader), tx);

        let mut chunks = Vec::new();
        while let Ok(chunk) = rx.try_recv() {
            chunks.push(chunk);
        }
        assert_eq!(chunks, vec!["h".to_string(), "éllo".to_string()]);
    }
}
