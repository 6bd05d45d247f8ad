//! SP-004: Include resolution.
//!
//! Loads an entry script and its transitive includes depth-first. Each path
//! appears once in `script_paths`, in first-seen (pre-order) position. A
//! missing include, or an include that loops back onto the resolution stack,
//! is a ScriptError on the include node.

use super::error::{Error, Result, ScriptError};
use super::host::FileSystem;
use super::parser::parse_script;
use super::types::*;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Build the script context rooted at `entry`.
pub fn create_script_context(entry: &Path, fs: &dyn FileSystem) -> Result<ScriptContext> {
    let entry = if entry.is_absolute() {
        normalize(entry)
    } else {
        let cwd = std::env::current_dir()
            .map_err(|e| Error::io("unable to read current directory", e))?;
        normalize(&cwd.join(entry))
    };

    let text = fs
        .read_to_string(&entry)
        .map_err(|e| Error::io(format!("unable to read script {}", entry.display()), e))?;
    let doc = parse_script(&entry, &text)?;

    let mut resolver = Resolver {
        fs,
        context: ScriptContext {
            root_dir: entry.parent().map(Path::to_path_buf).unwrap_or_default(),
            script_paths: Vec::new(),
            script_nodes: HashMap::new(),
            any_script_has_becomes: false,
        },
        stack: Vec::new(),
    };
    resolver.visit(entry, doc)?;
    Ok(resolver.context)
}

struct Resolver<'a> {
    fs: &'a dyn FileSystem,
    context: ScriptContext,
    stack: Vec<PathBuf>,
}

impl Resolver<'_> {
    fn visit(&mut self, path: PathBuf, doc: ScriptDocument) -> Result<(), ScriptError> {
        self.context.script_paths.push(path.clone());
        self.stack.push(path.clone());

        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        for include in &doc.includes {
            let rel = include.as_str().unwrap_or_default();
            let target = normalize(&dir.join(rel));

            if self.stack.contains(&target) {
                return Err(ScriptError::new(
                    format!("Include '{}' creates a cycle", rel),
                    include,
                ));
            }
            if self.context.script_paths.contains(&target) {
                debug!(include = %target.display(), "include already loaded");
                continue;
            }

            let text = self.fs.read_to_string(&target).map_err(|e| {
                ScriptError::new(format!("Unable to read include '{}': {}", rel, e), include)
            })?;
            let child = parse_script(&target, &text)?;
            self.visit(target, child)?;
        }

        self.stack.pop();
        self.context.any_script_has_becomes |= doc.has_becomes();
        self.context.script_nodes.insert(path, doc);
        Ok(())
    }
}

/// Lexically resolve `.` and `..` without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
