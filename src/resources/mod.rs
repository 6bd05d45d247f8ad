//! SP-013: Asserters. Each checks (`assert`) and corrects (`rectify`) one resource.
//!
//! The engine looks each statement's `assert:` name up in a `Registry`,
//! builds a fresh asserter from a `StatementDeps`, and drives it:
//! 1. `assert(statement)` binds arguments and reports whether the state holds
//! 2. `rectify()` converges the resource, only after a `false` assert
//! 3. `result()` is the payload recorded in `results`

pub mod directory;
pub mod file;
pub mod is_true;
pub mod package;
pub mod service;

use crate::core::error::ScriptError;
use crate::core::host::{Clock, FileSystem};
use crate::core::interpolate::Interpolator;
use crate::core::privilege::Privileges;
use crate::core::types::SyntaxNode;
use crate::transport::{ExecOutput, ProcessRunner};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Why an asserter gave up.
#[derive(Debug, Error)]
pub enum AssertError {
    /// Bad arguments or an impossible request, tied to the script.
    #[error(transparent)]
    Script(#[from] ScriptError),

    /// The machine refused: I/O failure, failed command.
    #[error("{0}")]
    Failed(String),
}

/// One resource type's check-and-correct logic. Built fresh per statement.
#[async_trait]
pub trait Asserter: Send {
    async fn assert(&mut self, statement: &SyntaxNode) -> Result<bool, AssertError>;

    async fn rectify(&mut self) -> Result<(), AssertError>;

    fn result(&self) -> Value;
}

/// Collaborators handed to every asserter.
#[derive(Clone)]
pub struct StatementDeps {
    pub interpolator: Interpolator,
    pub fs: Arc<dyn FileSystem>,
    pub runner: Arc<dyn ProcessRunner>,
    pub privileges: Arc<dyn Privileges>,
    pub clock: Arc<dyn Clock>,
}

impl StatementDeps {
    /// Whether the statement currently runs with an effective uid of 0.
    pub fn is_root(&self) -> bool {
        self.privileges.effective().uid == 0
    }

    /// Run a shell command, mapping spawn failures to `AssertError::Failed`.
    pub fn exec(&self, script: &str) -> Result<ExecOutput, AssertError> {
        self.runner.exec(script).map_err(AssertError::Failed)
    }

    /// Run a shell command that must succeed.
    pub fn exec_ok(&self, script: &str) -> Result<ExecOutput, AssertError> {
        let out = self.exec(script)?;
        if !out.success() {
            return Err(AssertError::Failed(format!(
                "'{}' exited with {}: {}",
                script,
                out.exit_code,
                out.stderr.trim()
            )));
        }
        Ok(out)
    }
}

pub type Factory = Arc<dyn Fn(StatementDeps) -> Box<dyn Asserter> + Send + Sync>;

/// Asserter names to constructors, in registration order.
#[derive(Clone, Default)]
pub struct Registry {
    factories: IndexMap<String, Factory>,
}

impl Registry {
    /// A registry with no asserters.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every built-in asserter.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("IsTrue", |deps| Box::new(is_true::IsTrue::new(deps)));
        registry.register("FileExists", |deps| Box::new(file::FileExists::new(deps)));
        registry.register("FileDeleted", |deps| Box::new(file::FileDeleted::new(deps)));
        registry.register("FileContains", |deps| {
            Box::new(file::FileContains::new(deps))
        });
        registry.register("FileCopied", |deps| Box::new(file::FileCopied::new(deps)));
        registry.register("DirectoryExists", |deps| {
            Box::new(directory::DirectoryExists::new(deps))
        });
        registry.register("DirectoryDeleted", |deps| {
            Box::new(directory::DirectoryDeleted::new(deps))
        });
        registry.register("ServiceRunning", |deps| {
            Box::new(service::ServiceState::running(deps))
        });
        registry.register("ServiceStopped", |deps| {
            Box::new(service::ServiceState::stopped(deps))
        });
        registry.register("SystemPackageInstalled", |deps| {
            Box::new(package::SystemPackageInstalled::new(deps))
        });
        registry
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(StatementDeps) -> Box<dyn Asserter> + Send + Sync + 'static,
    ) {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// A new asserter for `name`, or `None` when nothing is registered under it.
    pub fn create(&self, name: &str, deps: StatementDeps) -> Option<Box<dyn Asserter>> {
        self.factories.get(name).map(|factory| factory(deps))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Map an I/O error on `path` to a statement failure.
pub(crate) fn io_failure(action: &str, path: &str, err: std::io::Error) -> AssertError {
    AssertError::Failed(format!("unable to {} '{}': {}", action, path, err))
}

/// A missing target is only fixable when its parent directory exists.
pub(crate) fn require_parent_dir(
    fs: &dyn FileSystem,
    path: &str,
    node: &SyntaxNode,
) -> Result<(), AssertError> {
    let parent = match Path::new(path).parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => return Ok(()),
    };
    match fs.try_stat(parent) {
        Ok(Some(info)) if info.kind == crate::core::host::FileKind::Directory => Ok(()),
        _ => Err(ScriptError::new(
            format!("Cannot write to directory '{}'", parent.display()),
            node,
        )
        .into()),
    }
}
