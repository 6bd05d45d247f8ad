//! SP-001: Core data model.
//!
//! Syntax nodes carry their source location so every engine error can point
//! at `file:line:column`. Script documents, the resolved script context, the
//! per-run context and statement outcomes all live here.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Syntax nodes
// ============================================================================

/// Source position of a syntax node. Lines and columns are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    pub file: Arc<str>,
    pub line: usize,
    pub column: usize,
}

impl Location {
    pub fn new(file: impl Into<Arc<str>>, line: usize, column: usize) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// The six node types a script can express.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    String,
    Number,
    Boolean,
    Null,
    Array,
    Object,
}

impl NodeType {
    /// Runtime type of an evaluated value.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Boolean,
            Value::Number(_) => Self::Number,
            Value::String(_) => Self::String,
            Value::Array(_) => Self::Array,
            Value::Object(_) => Self::Object,
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Number => write!(f, "number"),
            Self::Boolean => write!(f, "boolean"),
            Self::Null => write!(f, "null"),
            Self::Array => write!(f, "array"),
            Self::Object => write!(f, "object"),
        }
    }
}

/// Payload of a syntax node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<SyntaxNode>),
    Object(IndexMap<String, SyntaxNode>),
}

/// One parsed value with its source location. Immutable after parse.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxNode {
    pub location: Location,
    pub value: NodeValue,
}

impl SyntaxNode {
    pub fn new(location: Location, value: NodeValue) -> Self {
        Self { location, value }
    }

    pub fn node_type(&self) -> NodeType {
        match self.value {
            NodeValue::Null => NodeType::Null,
            NodeValue::Bool(_) => NodeType::Boolean,
            NodeValue::Number(_) => NodeType::Number,
            NodeValue::String(_) => NodeType::String,
            NodeValue::Array(_) => NodeType::Array,
            NodeValue::Object(_) => NodeType::Object,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            NodeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.value {
            NodeValue::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[SyntaxNode]> {
        match &self.value {
            NodeValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&IndexMap<String, SyntaxNode>> {
        match &self.value {
            NodeValue::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Look up a key of an object node.
    pub fn get(&self, key: &str) -> Option<&SyntaxNode> {
        self.as_object().and_then(|map| map.get(key))
    }

    /// Convert to a plain value without interpolating anything.
    pub fn to_value(&self) -> Value {
        match &self.value {
            NodeValue::Null => Value::Null,
            NodeValue::Bool(b) => Value::Bool(*b),
            NodeValue::Number(n) => Value::Number(n.clone()),
            NodeValue::String(s) => Value::String(s.clone()),
            NodeValue::Array(items) => Value::Array(items.iter().map(Self::to_value).collect()),
            NodeValue::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_value()))
                    .collect(),
            ),
        }
    }

    /// Build a node tree from a plain value. Every node gets line 0, column 0.
    pub fn from_value(file: &str, value: &Value) -> Self {
        let file: Arc<str> = Arc::from(file);
        Self::from_value_at(&file, value)
    }

    fn from_value_at(file: &Arc<str>, value: &Value) -> Self {
        let node_value = match value {
            Value::Null => NodeValue::Null,
            Value::Bool(b) => NodeValue::Bool(*b),
            Value::Number(n) => NodeValue::Number(n.clone()),
            Value::String(s) => NodeValue::String(s.clone()),
            Value::Array(items) => NodeValue::Array(
                items
                    .iter()
                    .map(|item| Self::from_value_at(file, item))
                    .collect(),
            ),
            Value::Object(map) => NodeValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_value_at(file, v)))
                    .collect(),
            ),
        };
        Self::new(
            Location {
                file: Arc::clone(file),
                line: 0,
                column: 0,
            },
            node_value,
        )
    }
}

// ============================================================================
// Script documents
// ============================================================================

/// Identity a statement asks to run as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Become {
    Root,
    User(String),
}

/// Script-level `metadata` / `settings` block.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub description: Option<String>,
    pub when: Option<SyntaxNode>,
}

/// One declared assertion invocation.
#[derive(Debug, Clone)]
pub struct Statement {
    /// The whole statement object node
    pub node: SyntaxNode,

    /// Asserter name (`assert:`)
    pub name: String,

    pub description: Option<String>,

    /// The `with:` object node, when present
    pub with: Option<SyntaxNode>,

    /// Requested identity (`become:`)
    pub elevation: Option<Become>,

    /// Per-statement guard (`when:`)
    pub when: Option<SyntaxNode>,
}

/// One parsed and schema-checked script file.
#[derive(Debug, Clone)]
pub struct ScriptDocument {
    pub path: PathBuf,
    pub node: SyntaxNode,
    pub settings: Settings,
    /// Include path nodes, in document order
    pub includes: Vec<SyntaxNode>,
    pub vars: Option<SyntaxNode>,
    pub statements: Vec<Statement>,
}

impl ScriptDocument {
    pub fn has_becomes(&self) -> bool {
        self.statements.iter().any(|s| s.elevation.is_some())
    }
}

/// An entry script plus its transitive includes.
#[derive(Debug, Clone)]
pub struct ScriptContext {
    /// Directory of the entry script
    pub root_dir: PathBuf,

    /// Unique absolute paths, first-seen order. This alone decides execution order.
    pub script_paths: Vec<PathBuf>,

    pub script_nodes: HashMap<PathBuf, ScriptDocument>,

    pub any_script_has_becomes: bool,
}

impl ScriptContext {
    /// The entry script's path.
    pub fn entry_path(&self) -> Option<&Path> {
        self.script_paths.first().map(PathBuf::as_path)
    }

    /// Documents in execution order.
    pub fn documents(&self) -> impl Iterator<Item = &ScriptDocument> {
        self.script_paths
            .iter()
            .filter_map(|p| self.script_nodes.get(p))
    }

    /// Total number of statements across all scripts.
    pub fn statement_count(&self) -> usize {
        self.documents().map(|d| d.statements.len()).sum()
    }
}

// ============================================================================
// Run context and outcomes
// ============================================================================

/// Mutable state of one script execution.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    /// Host facts
    pub sys: Value,

    /// Merged variable scope
    pub vars: Map<String, Value>,

    /// Recorded statement results, in execution order
    pub results: Vec<Value>,

    pub env: BTreeMap<String, String>,
}

/// Whether a run may mutate the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunMode {
    #[default]
    Converge,
    AssertOnly,
}

/// What happened to one statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Outcome {
    Asserted,
    Rectified,
    WouldRectify,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Asserted => write!(f, "asserted"),
            Self::Rectified => write!(f, "rectified"),
            Self::WouldRectify => write!(f, "wouldRectify"),
        }
    }
}

/// Recorded outcome of one statement. Serialized as one JSON line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementResult {
    pub outcome: Outcome,

    /// Asserter name
    pub assert: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// `file:line:column` of the statement
    pub location: String,

    /// Asserter payload from `result()`
    #[serde(default)]
    pub result: Value,
}

/// Counts for one script run against one target.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub host: String,
    pub asserted: u32,
    pub rectified: u32,
    pub would_rectify: u32,
    pub skipped: u32,
    pub duration: Duration,
}

impl RunSummary {
    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Asserted => self.asserted += 1,
            Outcome::Rectified => self.rectified += 1,
            Outcome::WouldRectify => self.would_rectify += 1,
        }
    }
}

// ============================================================================
// Hosts
// ============================================================================

/// One remote target, from `--host` or a host file entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSpec {
    pub host: String,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub user: Option<String>,

    /// Path to an SSH private key
    #[serde(default)]
    pub identity: Option<PathBuf>,
}

impl fmt::Display for HostSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.user, self.port) {
            (Some(user), Some(port)) => write!(f, "{}@{}:{}", user, self.host, port),
            (Some(user), None) => write!(f, "{}@{}", user, self.host),
            (None, Some(port)) => write!(f, "{}:{}", self.host, port),
            (None, None) => write!(f, "{}", self.host),
        }
    }
}

// ============================================================================
// Value helpers
// ============================================================================

/// Render a value for string interpolation.
pub fn value_to_string(val: &Value) -> String {
    match val {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
