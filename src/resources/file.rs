//! SP-014: File asserters.
//!
//! `FileExists`, `FileDeleted`, `FileContains` and `FileCopied` work through
//! the injected `FileSystem`, so tests run them against a temp dir.

use super::{io_failure, require_parent_dir, AssertError, Asserter, StatementDeps};
use crate::core::args::{bind_args, ArgSpec};
use crate::core::error::ScriptError;
use crate::core::host::FileKind;
use crate::core::types::{NodeType, SyntaxNode};
use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde_json::{json, Value};
use std::path::Path;

// ============================================================================
// FileExists
// ============================================================================

/// A regular file exists, optionally with exact contents and mode.
pub struct FileExists {
    deps: StatementDeps,
    file: String,
    contents: Option<String>,
    mode: Option<u32>,
    needs_write: bool,
}

impl FileExists {
    pub fn new(deps: StatementDeps) -> Self {
        Self {
            deps,
            file: String::new(),
            contents: None,
            mode: None,
            needs_write: false,
        }
    }
}

#[async_trait]
impl Asserter for FileExists {
    async fn assert(&mut self, statement: &SyntaxNode) -> Result<bool, AssertError> {
        let args = bind_args(
            statement,
            &[
                ArgSpec::required("file", NodeType::String),
                ArgSpec::optional("contents", NodeType::String),
                ArgSpec::optional("mode", NodeType::Number),
            ],
            &self.deps.interpolator,
        )?;
        self.file = args.require_str("file")?.to_string();
        self.contents = args.str("contents").map(str::to_string);
        self.mode = args.u32("mode")?;

        let fs = &self.deps.fs;
        let path = Path::new(&self.file);
        let info = match fs.try_stat(path).map_err(|e| io_failure("stat", &self.file, e))? {
            Some(info) => info,
            None => {
                require_parent_dir(fs.as_ref(), &self.file, args.blame("file"))?;
                self.needs_write = true;
                return Ok(false);
            }
        };

        if info.kind != FileKind::File {
            return Err(ScriptError::new(
                format!("A non-file with the name '{}' exists", self.file),
                args.blame("file"),
            )
            .into());
        }

        if let Some(expected) = &self.contents {
            let actual = fs
                .read(path)
                .map_err(|e| io_failure("read", &self.file, e))?;
            self.needs_write = actual != expected.as_bytes();
        }

        let mode_ok = self.mode.map_or(true, |m| m == info.mode);
        Ok(!self.needs_write && mode_ok)
    }

    async fn rectify(&mut self) -> Result<(), AssertError> {
        let path = Path::new(&self.file);
        if self.needs_write {
            let contents = self.contents.as_deref().unwrap_or_default();
            self.deps
                .fs
                .write(path, contents.as_bytes())
                .map_err(|e| io_failure("write", &self.file, e))?;
        }
        if let Some(mode) = self.mode {
            self.deps
                .fs
                .set_mode(path, mode)
                .map_err(|e| io_failure("chmod", &self.file, e))?;
        }
        Ok(())
    }

    fn result(&self) -> Value {
        let mut out = json!({ "file": self.file });
        if let Some(contents) = &self.contents {
            out["contents"] = json!(contents);
        }
        if let Some(mode) = self.mode {
            out["mode"] = json!(mode);
        }
        out
    }
}

// ============================================================================
// FileDeleted
// ============================================================================

/// Nothing but a directory may stay at `file`.
pub struct FileDeleted {
    deps: StatementDeps,
    file: String,
}

impl FileDeleted {
    pub fn new(deps: StatementDeps) -> Self {
        Self {
            deps,
            file: String::new(),
        }
    }
}

#[async_trait]
impl Asserter for FileDeleted {
    async fn assert(&mut self, statement: &SyntaxNode) -> Result<bool, AssertError> {
        let args = bind_args(
            statement,
            &[ArgSpec::required("file", NodeType::String)],
            &self.deps.interpolator,
        )?;
        self.file = args.require_str("file")?.to_string();

        match self
            .deps
            .fs
            .try_stat(Path::new(&self.file))
            .map_err(|e| io_failure("stat", &self.file, e))?
        {
            None => Ok(true),
            Some(info) if info.kind == FileKind::Directory => Err(ScriptError::new(
                format!("Not deleting non-file '{}'", self.file),
                args.blame("file"),
            )
            .into()),
            Some(_) => Ok(false),
        }
    }

    async fn rectify(&mut self) -> Result<(), AssertError> {
        self.deps
            .fs
            .remove_file(Path::new(&self.file))
            .map_err(|e| io_failure("delete", &self.file, e))
    }

    fn result(&self) -> Value {
        json!({ "file": self.file })
    }
}

// ============================================================================
// FileContains
// ============================================================================

/// Where `contents` must appear in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// The whole file
    All,
    /// Immediately before the first regex match
    Before,
    /// Immediately after the first regex match
    After,
    /// Replacing the first regex match, or appended when nothing matches
    Over,
}

impl Position {
    fn parse(text: &str) -> Option<Self> {
        match text {
            "all" => Some(Self::All),
            "before" => Some(Self::Before),
            "after" => Some(Self::After),
            "over" => Some(Self::Over),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Before => "before",
            Self::After => "after",
            Self::Over => "over",
        }
    }
}

/// A text file contains `contents`, whole or anchored to a regex match.
pub struct FileContains {
    deps: StatementDeps,
    file: String,
    contents: String,
    position: Position,
    regex: Option<String>,
    current: String,
    /// Byte range of the anchoring match
    span: (usize, usize),
}

impl FileContains {
    pub fn new(deps: StatementDeps) -> Self {
        Self {
            deps,
            file: String::new(),
            contents: String::new(),
            position: Position::All,
            regex: None,
            current: String::new(),
            span: (0, 0),
        }
    }

    /// The file text after rectification.
    fn rewritten(&self) -> String {
        let (start, end) = self.span;
        let text = &self.current;
        match self.position {
            Position::All => self.contents.clone(),
            Position::Before => format!("{}{}{}", &text[..start], self.contents, &text[start..]),
            Position::After => format!("{}{}{}", &text[..end], self.contents, &text[end..]),
            Position::Over => format!("{}{}{}", &text[..start], self.contents, &text[end..]),
        }
    }
}

#[async_trait]
impl Asserter for FileContains {
    async fn assert(&mut self, statement: &SyntaxNode) -> Result<bool, AssertError> {
        let args = bind_args(
            statement,
            &[
                ArgSpec::required("file", NodeType::String),
                ArgSpec::required("contents", NodeType::String),
                ArgSpec::optional("position", NodeType::String),
                ArgSpec::optional("regex", NodeType::String),
            ],
            &self.deps.interpolator,
        )?;
        self.file = args.require_str("file")?.to_string();
        self.contents = args.require_str("contents")?.to_string();
        self.regex = args.str("regex").map(str::to_string);

        self.position = match args.str("position") {
            None => Position::All,
            Some(text) => Position::parse(text).ok_or_else(|| {
                ScriptError::new(
                    "'position' must be 'before', 'after', 'over' or 'all'",
                    args.blame("position"),
                )
            })?,
        };

        let regex: Option<Regex> = match &self.regex {
            None if self.position != Position::All => {
                return Err(ScriptError::new(
                    "A 'regex' must be provided with 'before', 'after' and 'over'",
                    args.blame("position"),
                )
                .into())
            }
            None => None,
            Some(pattern) => Some(
                RegexBuilder::new(pattern)
                    .multi_line(true)
                    .build()
                    .map_err(|e| {
                        ScriptError::new(
                            format!("Unable to parse regular expression. {}", e),
                            args.blame("regex"),
                        )
                    })?,
            ),
        };

        self.current = self
            .deps
            .fs
            .read_to_string(Path::new(&self.file))
            .map_err(|_| {
                ScriptError::new(
                    format!("{} does not exist or is not readable", self.file),
                    args.blame("file"),
                )
            })?;

        let found = regex.as_ref().and_then(|re| re.find(&self.current));
        let not_found = || {
            ScriptError::new(
                format!("Match not found for '{}'", self.regex.as_deref().unwrap_or_default()),
                args.blame("regex"),
            )
        };

        let holds = match self.position {
            Position::All => self.current == self.contents,
            Position::Before => {
                let m = found.ok_or_else(not_found)?;
                self.span = (m.start(), m.end());
                self.current[..m.start()].ends_with(&self.contents)
            }
            Position::After => {
                let m = found.ok_or_else(not_found)?;
                self.span = (m.start(), m.end());
                self.current[m.end()..].starts_with(&self.contents)
            }
            Position::Over => {
                self.span = found
                    .map(|m| (m.start(), m.end()))
                    .unwrap_or((self.current.len(), self.current.len()));
                self.current.contains(&self.contents)
            }
        };
        Ok(holds)
    }

    async fn rectify(&mut self) -> Result<(), AssertError> {
        self.deps
            .fs
            .write(Path::new(&self.file), self.rewritten().as_bytes())
            .map_err(|e| io_failure("write", &self.file, e))
    }

    fn result(&self) -> Value {
        json!({
            "file": self.file,
            "contents": self.contents,
            "position": self.position.as_str(),
            "regex": self.regex.as_deref().unwrap_or_default(),
        })
    }
}

// ============================================================================
// FileCopied
// ============================================================================

/// `toFile` is a byte-identical copy of `fromFile`, compared by BLAKE3 digest.
pub struct FileCopied {
    deps: StatementDeps,
    from_file: String,
    to_file: String,
}

impl FileCopied {
    pub fn new(deps: StatementDeps) -> Self {
        Self {
            deps,
            from_file: String::new(),
            to_file: String::new(),
        }
    }

    fn digest(&self, path: &str) -> Result<blake3::Hash, AssertError> {
        self.deps
            .fs
            .read(Path::new(path))
            .map(|bytes| blake3::hash(&bytes))
            .map_err(|e| io_failure("read", path, e))
    }
}

#[async_trait]
impl Asserter for FileCopied {
    async fn assert(&mut self, statement: &SyntaxNode) -> Result<bool, AssertError> {
        let args = bind_args(
            statement,
            &[
                ArgSpec::required("fromFile", NodeType::String),
                ArgSpec::required("toFile", NodeType::String),
            ],
            &self.deps.interpolator,
        )?;
        self.from_file = args.require_str("fromFile")?.to_string();
        self.to_file = args.require_str("toFile")?.to_string();

        let fs = &self.deps.fs;
        match fs.try_stat(Path::new(&self.from_file)) {
            Ok(Some(info)) if info.kind == FileKind::File => {}
            _ => {
                return Err(ScriptError::new(
                    format!("File '{}' does not exist", self.from_file),
                    args.blame("fromFile"),
                )
                .into())
            }
        }

        match fs
            .try_stat(Path::new(&self.to_file))
            .map_err(|e| io_failure("stat", &self.to_file, e))?
        {
            None => {
                require_parent_dir(fs.as_ref(), &self.to_file, args.blame("toFile"))?;
                Ok(false)
            }
            Some(info) if info.kind != FileKind::File => Err(ScriptError::new(
                format!("A non-file with the name '{}' exists", self.to_file),
                args.blame("toFile"),
            )
            .into()),
            Some(_) => Ok(self.digest(&self.from_file)? == self.digest(&self.to_file)?),
        }
    }

    async fn rectify(&mut self) -> Result<(), AssertError> {
        let bytes = self
            .deps
            .fs
            .read(Path::new(&self.from_file))
            .map_err(|e| io_failure("read", &self.from_file, e))?;
        self.deps
            .fs
            .write(Path::new(&self.to_file), &bytes)
            .map_err(|e| io_failure("write", &self.to_file, e))
    }

    fn result(&self) -> Value {
        json!({ "fromFile": self.from_file, "toFile": self.to_file })
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{deps, statement};
    use super::*;
    use std::fs;

    fn with_file(key: &str, path: &Path, extra: &str) -> SyntaxNode {
        statement(&format!(
            "with:\n  {}: \"{}\"\n{}",
            key,
            path.display(),
            extra
        ))
    }

    #[tokio::test]
    async fn test_sp014_file_exists_creates_then_holds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("motd");
        let node = with_file("file", &path, "  contents: hello\n  mode: 0o600\n");

        let mut first = FileExists::new(deps());
        assert!(!first.assert(&node).await.unwrap());
        first.rectify().await.unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello");

        let mut second = FileExists::new(deps());
        assert!(second.assert(&node).await.unwrap());
        assert_eq!(second.result()["mode"], json!(0o600));
    }

    #[tokio::test]
    async fn test_sp014_file_exists_mode_only_keeps_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keep");
        fs::write(&path, "original").unwrap();
        let node = with_file("file", &path, "  mode: 0o640\n");

        let mut asserter = FileExists::new(deps());
        if !asserter.assert(&node).await.unwrap() {
            asserter.rectify().await.unwrap();
        }
        assert_eq!(fs::read_to_string(&path).unwrap(), "original");
        let mut again = FileExists::new(deps());
        assert!(again.assert(&node).await.unwrap());
    }

    #[tokio::test]
    async fn test_sp014_file_exists_rejects_directory_and_missing_parent() {
        let dir = tempfile::tempdir().unwrap();
        let mut asserter = FileExists::new(deps());
        let err = asserter
            .assert(&with_file("file", dir.path(), ""))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("A non-file"));

        let orphan = dir.path().join("no/such/file");
        let mut asserter = FileExists::new(deps());
        let err = asserter
            .assert(&with_file("file", &orphan, ""))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Cannot write to directory"));
    }

    #[tokio::test]
    async fn test_sp014_file_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.log");
        fs::write(&path, "x").unwrap();
        let node = with_file("file", &path, "");

        let mut asserter = FileDeleted::new(deps());
        assert!(!asserter.assert(&node).await.unwrap());
        asserter.rectify().await.unwrap();
        assert!(!path.exists());

        let mut again = FileDeleted::new(deps());
        assert!(again.assert(&node).await.unwrap());

        let mut on_dir = FileDeleted::new(deps());
        assert!(on_dir
            .assert(&with_file("file", dir.path(), ""))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_sp014_file_contains_positions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts");

        let cases = [
            ("before", "^127", "# local\n", "# local\n127.0.0.1 localhost\n"),
            ("after", "localhost\\n", "::1 ip6\n", "127.0.0.1 localhost\n::1 ip6\n"),
            ("over", "^127.*$", "10.0.0.1 box", "10.0.0.1 box\n"),
        ];
        for (position, regex, contents, expected) in cases {
            fs::write(&path, "127.0.0.1 localhost\n").unwrap();
            let node = with_file(
                "file",
                &path,
                &format!(
                    "  position: {}\n  regex: '{}'\n  contents: {:?}\n",
                    position, regex, contents
                ),
            );
            let mut asserter = FileContains::new(deps());
            assert!(!asserter.assert(&node).await.unwrap(), "{position}");
            asserter.rectify().await.unwrap();
            assert_eq!(fs::read_to_string(&path).unwrap(), expected, "{position}");

            let mut again = FileContains::new(deps());
            assert!(again.assert(&node).await.unwrap(), "{position} converges");
        }
    }

    #[tokio::test]
    async fn test_sp014_file_contains_all_and_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf");
        fs::write(&path, "a=1\n").unwrap();

        let mut asserter = FileContains::new(deps());
        let node = with_file("file", &path, "  contents: \"a=2\\n\"\n");
        assert!(!asserter.assert(&node).await.unwrap());
        asserter.rectify().await.unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "a=2\n");
        assert_eq!(asserter.result()["position"], "all");

        let mut no_regex = FileContains::new(deps());
        let node = with_file("file", &path, "  contents: x\n  position: before\n");
        let err = no_regex.assert(&node).await.unwrap_err();
        assert!(err.to_string().contains("A 'regex' must be provided"));

        let mut bad_regex = FileContains::new(deps());
        let node = with_file("file", &path, "  contents: x\n  position: over\n  regex: '('\n");
        let err = bad_regex.assert(&node).await.unwrap_err();
        assert!(err.to_string().contains("Unable to parse regular expression"));

        let mut no_match = FileContains::new(deps());
        let node = with_file("file", &path, "  contents: x\n  position: after\n  regex: zzz\n");
        let err = no_match.assert(&node).await.unwrap_err();
        assert!(err.to_string().contains("Match not found for 'zzz'"));
    }

    #[tokio::test]
    async fn test_sp014_file_copied_by_digest() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("a.bin");
        let to = dir.path().join("b.bin");
        fs::write(&from, [1u8, 2, 3]).unwrap();
        let node = statement(&format!(
            "with:\n  fromFile: \"{}\"\n  toFile: \"{}\"\n",
            from.display(),
            to.display()
        ));

        let mut asserter = FileCopied::new(deps());
        assert!(!asserter.assert(&node).await.unwrap());
        asserter.rectify().await.unwrap();
        assert_eq!(fs::read(&to).unwrap(), vec![1u8, 2, 3]);

        let mut again = FileCopied::new(deps());
        assert!(again.assert(&node).await.unwrap());

        fs::write(&to, [9u8]).unwrap();
        let mut changed = FileCopied::new(deps());
        assert!(!changed.assert(&node).await.unwrap());
    }

    #[tokio::test]
    async fn test_sp014_file_copied_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let node = statement(&format!(
            "with:\n  fromFile: \"{}/nope\"\n  toFile: \"{}/b\"\n",
            dir.path().display(),
            dir.path().display()
        ));
        let mut asserter = FileCopied::new(deps());
        let err = asserter.assert(&node).await.unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
