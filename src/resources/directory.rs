//! SP-014: Directory asserters.

use super::{io_failure, require_parent_dir, AssertError, Asserter, StatementDeps};
use crate::core::args::{bind_args, ArgSpec};
use crate::core::error::ScriptError;
use crate::core::host::FileKind;
use crate::core::types::{NodeType, SyntaxNode};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;

/// A directory exists, optionally with an exact mode.
pub struct DirectoryExists {
    deps: StatementDeps,
    directory: String,
    mode: Option<u32>,
}

impl DirectoryExists {
    pub fn new(deps: StatementDeps) -> Self {
        Self {
            deps,
            directory: String::new(),
            mode: None,
        }
    }
}

#[async_trait]
impl Asserter for DirectoryExists {
    async fn assert(&mut self, statement: &SyntaxNode) -> Result<bool, AssertError> {
        let args = bind_args(
            statement,
            &[
                ArgSpec::required("directory", NodeType::String),
                ArgSpec::optional("mode", NodeType::Number),
            ],
            &self.deps.interpolator,
        )?;
        self.directory = args.require_str("directory")?.to_string();
        self.mode = args.u32("mode")?;

        let fs = &self.deps.fs;
        match fs
            .try_stat(Path::new(&self.directory))
            .map_err(|e| io_failure("stat", &self.directory, e))?
        {
            None => {
                require_parent_dir(fs.as_ref(), &self.directory, args.blame("directory"))?;
                Ok(false)
            }
            Some(info) if info.kind != FileKind::Directory => Err(ScriptError::new(
                format!("A non-directory with the name '{}' exists", self.directory),
                args.blame("directory"),
            )
            .into()),
            Some(info) => Ok(self.mode.map_or(true, |m| m == info.mode)),
        }
    }

    async fn rectify(&mut self) -> Result<(), AssertError> {
        let path = Path::new(&self.directory);
        self.deps
            .fs
            .create_dir_all(path)
            .map_err(|e| io_failure("create", &self.directory, e))?;
        if let Some(mode) = self.mode {
            self.deps
                .fs
                .set_mode(path, mode)
                .map_err(|e| io_failure("chmod", &self.directory, e))?;
        }
        Ok(())
    }

    fn result(&self) -> Value {
        json!({ "directory": self.directory })
    }
}

/// Nothing exists at `directory`; removes the whole tree.
pub struct DirectoryDeleted {
    deps: StatementDeps,
    directory: String,
}

impl DirectoryDeleted {
    pub fn new(deps: StatementDeps) -> Self {
        Self {
            deps,
            directory: String::new(),
        }
    }
}

#[async_trait]
impl Asserter for DirectoryDeleted {
    async fn assert(&mut self, statement: &SyntaxNode) -> Result<bool, AssertError> {
        let args = bind_args(
            statement,
            &[ArgSpec::required("directory", NodeType::String)],
            &self.deps.interpolator,
        )?;
        self.directory = args.require_str("directory")?.to_string();

        match self
            .deps
            .fs
            .try_stat(Path::new(&self.directory))
            .map_err(|e| io_failure("stat", &self.directory, e))?
        {
            None => Ok(true),
            Some(info) if info.kind != FileKind::Directory => Err(ScriptError::new(
                format!("Not deleting non-directory '{}'", self.directory),
                args.blame("directory"),
            )
            .into()),
            Some(_) => Ok(false),
        }
    }

    async fn rectify(&mut self) -> Result<(), AssertError> {
        self.deps
            .fs
            .remove_dir_all(Path::new(&self.directory))
            .map_err(|e| io_failure("delete", &self.directory, e))
    }

    fn result(&self) -> Value {
        json!({ "directory": self.directory })
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{deps, statement};
    use super::*;
    use std::fs;

    fn node(path: &Path, extra: &str) -> SyntaxNode {
        statement(&format!("with:\n  directory: \"{}\"\n{}", path.display(), extra))
    }

    #[tokio::test]
    async fn test_sp014_directory_exists_converges() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("data");
        let stmt = node(&target, "  mode: 0o750\n");

        let mut first = DirectoryExists::new(deps());
        assert!(!first.assert(&stmt).await.unwrap());
        first.rectify().await.unwrap();
        assert!(target.is_dir());

        let mut second = DirectoryExists::new(deps());
        assert!(second.assert(&stmt).await.unwrap());
        assert_eq!(second.result(), json!({"directory": target.display().to_string()}));
    }

    #[tokio::test]
    async fn test_sp014_directory_exists_rejects_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        fs::write(&file, "").unwrap();
        let mut asserter = DirectoryExists::new(deps());
        let err = asserter.assert(&node(&file, "")).await.unwrap_err();
        assert!(err.to_string().contains("A non-directory"));
    }

    #[tokio::test]
    async fn test_sp014_directory_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("cache");
        fs::create_dir_all(target.join("nested")).unwrap();
        fs::write(target.join("nested/x"), "x").unwrap();

        let mut asserter = DirectoryDeleted::new(deps());
        assert!(!asserter.assert(&node(&target, "")).await.unwrap());
        asserter.rectify().await.unwrap();
        assert!(!target.exists());

        let mut again = DirectoryDeleted::new(deps());
        assert!(again.assert(&node(&target, "")).await.unwrap());
    }
}
