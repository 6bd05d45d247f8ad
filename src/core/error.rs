//! SP-002: Error taxonomy.
//!
//! - `ScriptError`: authoring mistakes, always tied to a syntax node location
//! - `SessionError`: terminal / file-transfer session failures
//! - `Error`: everything a run can fail with, including statement failures
//!   and remote failures re-wrapped with their host

use super::types::{Location, SyntaxNode};
use std::time::Duration;
use thiserror::Error;

/// An authoring error at a precise source position.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} ({location})")]
pub struct ScriptError {
    pub message: String,
    pub location: Location,
}

impl ScriptError {
    pub fn new(message: impl Into<String>, node: &SyntaxNode) -> Self {
        Self {
            message: message.into(),
            location: node.location.clone(),
        }
    }

    pub fn at(message: impl Into<String>, location: Location) -> Self {
        Self {
            message: message.into(),
            location,
        }
    }
}

/// Failures of the SSH and SFTP session protocols.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("host must be specified")]
    MissingHost,

    #[error("already connected")]
    AlreadyConnected,

    #[error("no terminal is connected")]
    NotConnected,

    #[error("unable to connect to {host}; bad password or key")]
    PermissionDenied { host: String },

    #[error("connection was refused by {host}")]
    ConnectionRefused { host: String },

    #[error("use of SSH key requires a passphrase")]
    PassphraseRequired,

    #[error("remote displayed a login prompt and prompts are disabled")]
    LoginPrompt,

    #[error("remote asked for a verification code and prompts are disabled")]
    VerificationPrompt,

    #[error("{what} timed out after {after:?}")]
    Timeout { what: String, after: Duration },

    #[error("session closed unexpectedly")]
    Closed,

    #[error("unable to start {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("terminal write failed: {0}")]
    Write(#[source] std::io::Error),

    #[error("command '{command}' returned exit code {exit_code}")]
    CommandFailed { command: String, exit_code: i32 },

    #[error("file '{path}' not found on remote")]
    NotFound { path: String },

    #[error("unexpected remote output")]
    UnexpectedOutput,

    #[error("unable to upload {path}")]
    Upload { path: String },

    #[error("unable to read secret: {0}")]
    Prompt(#[source] std::io::Error),
}

/// Top-level error for a run.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Session(#[from] SessionError),

    /// Uncaught failure inside an asserter's assert or rectify.
    #[error("statement '{name}' failed: {message} ({location})")]
    Statement {
        name: String,
        location: Location,
        message: String,
    },

    #[error("{0}")]
    Privilege(String),

    #[error("host {host}: {source}")]
    Remote {
        host: String,
        #[source]
        source: Box<Error>,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// A run that cannot proceed: unreadable host list, platform mismatch,
    /// failed install or a remote run that exited non-zero.
    #[error("{0}")]
    Runtime(String),

    #[error("{failed} of {total} hosts failed")]
    Hosts { failed: usize, total: usize },
}

impl Error {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn remote(host: impl Into<String>, source: Error) -> Self {
        Self::Remote {
            host: host.into(),
            source: Box::new(source),
        }
    }

    /// Full diagnostic: the message followed by every source in the chain.
    pub fn detail(&self) -> String {
        let mut out = format!("{self}");
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            out.push_str(&format!("\n  caused by: {err}"));
            source = err.source();
        }
        out.push_str(&format!("\n  debug: {self:?}"));
        out
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
