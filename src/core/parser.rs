//! SP-003: Script parsing and schema validation.
//!
//! Scripts are YAML. Text is turned into a `SyntaxNode` tree from the
//! position-marked event stream, then checked against the script schema:
//! - root must be an object
//! - `metadata`/`settings` object with optional `description` and `when`
//! - `includes` array of relative path strings
//! - `vars` object
//! - `statements`/`assertions` array of statement objects

use super::error::ScriptError;
use super::types::*;
use indexmap::IndexMap;
use std::path::Path;
use std::sync::Arc;
use yaml_rust2::parser::{Event, MarkedEventReceiver, Parser};
use yaml_rust2::scanner::{Marker, TScalarStyle};

const TOP_LEVEL_KEYS: &[&str] = &[
    "metadata",
    "settings",
    "includes",
    "vars",
    "statements",
    "assertions",
];

const STATEMENT_KEYS: &[&str] = &["assert", "description", "with", "become", "when"];

/// Parse and validate one script file's text.
pub fn parse_script(path: &Path, text: &str) -> Result<ScriptDocument, ScriptError> {
    let root = parse_nodes(&path.to_string_lossy(), text)?;
    load_script_document(path, root)
}

/// Parse YAML text into a syntax node tree. An empty document is a null node.
pub fn parse_nodes(file: &str, text: &str) -> Result<SyntaxNode, ScriptError> {
    let mut builder = NodeBuilder::new(file);
    let mut parser = Parser::new(text.chars());
    parser.load(&mut builder, false).map_err(|e| {
        let mark = e.marker();
        ScriptError::at(
            format!("YAML parse error: {}", e.info()),
            Location::new(file, mark.line(), mark.col() + 1),
        )
    })?;
    builder.finish()
}

// ============================================================================
// Event stream → nodes
// ============================================================================

enum Frame {
    Seq {
        location: Location,
        items: Vec<SyntaxNode>,
    },
    Map {
        location: Location,
        entries: IndexMap<String, SyntaxNode>,
        pending_key: Option<String>,
    },
}

struct NodeBuilder {
    file: Arc<str>,
    stack: Vec<Frame>,
    root: Option<SyntaxNode>,
    error: Option<ScriptError>,
}

impl NodeBuilder {
    fn new(file: &str) -> Self {
        Self {
            file: Arc::from(file),
            stack: Vec::new(),
            root: None,
            error: None,
        }
    }

    fn finish(self) -> Result<SyntaxNode, ScriptError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        Ok(self.root.unwrap_or_else(|| {
            SyntaxNode::new(Location::new(Arc::clone(&self.file), 1, 1), NodeValue::Null)
        }))
    }

    fn push(&mut self, node: SyntaxNode) {
        match self.stack.last_mut() {
            None => {
                if self.root.is_none() {
                    self.root = Some(node);
                }
            }
            Some(Frame::Seq { items, .. }) => items.push(node),
            Some(Frame::Map {
                entries,
                pending_key,
                ..
            }) => match pending_key.take() {
                Some(key) => {
                    if entries.contains_key(&key) {
                        self.error = Some(ScriptError::new(
                            format!("Duplicate key '{}'", key),
                            &node,
                        ));
                    } else {
                        entries.insert(key, node);
                    }
                }
                None => match &node.value {
                    NodeValue::Array(_) | NodeValue::Object(_) => {
                        self.error =
                            Some(ScriptError::new("Object keys must be scalars", &node));
                    }
                    _ => *pending_key = Some(value_to_string(&node.to_value())),
                },
            },
        }
    }
}

impl MarkedEventReceiver for NodeBuilder {
    fn on_event(&mut self, ev: Event, mark: Marker) {
        if self.error.is_some() {
            return;
        }
        let location = Location::new(Arc::clone(&self.file), mark.line(), mark.col() + 1);

        match ev {
            Event::Scalar(text, style, _, _) => {
                let value = resolve_scalar(&text, style);
                self.push(SyntaxNode::new(location, value));
            }
            Event::SequenceStart(..) => self.stack.push(Frame::Seq {
                location,
                items: Vec::new(),
            }),
            Event::MappingStart(..) => self.stack.push(Frame::Map {
                location,
                entries: IndexMap::new(),
                pending_key: None,
            }),
            Event::SequenceEnd | Event::MappingEnd => match self.stack.pop() {
                Some(Frame::Seq { location, items }) => {
                    self.push(SyntaxNode::new(location, NodeValue::Array(items)));
                }
                Some(Frame::Map {
                    location, entries, ..
                }) => {
                    self.push(SyntaxNode::new(location, NodeValue::Object(entries)));
                }
                None => {}
            },
            Event::Alias(_) => {
                self.error = Some(ScriptError::at(
                    "YAML anchors and aliases are not supported",
                    location,
                ));
            }
            _ => {}
        }
    }
}

/// Resolve a scalar per the YAML core schema. Quoted scalars are always strings.
fn resolve_scalar(text: &str, style: TScalarStyle) -> NodeValue {
    if style != TScalarStyle::Plain {
        return NodeValue::String(text.to_string());
    }

    match text {
        "" | "~" | "null" | "Null" | "NULL" => return NodeValue::Null,
        "true" | "True" | "TRUE" => return NodeValue::Bool(true),
        "false" | "False" | "FALSE" => return NodeValue::Bool(false),
        _ => {}
    }

    if let Some(n) = parse_number(text) {
        return NodeValue::Number(n);
    }

    NodeValue::String(text.to_string())
}

fn parse_number(text: &str) -> Option<serde_json::Number> {
    if let Some(octal) = text.strip_prefix("0o") {
        return i64::from_str_radix(octal, 8).ok().map(Into::into);
    }
    if let Some(hex) = text.strip_prefix("0x") {
        return i64::from_str_radix(hex, 16).ok().map(Into::into);
    }

    let first = text.chars().next()?;
    if !(first.is_ascii_digit() || matches!(first, '-' | '+' | '.')) {
        return None;
    }
    if !text.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    if let Ok(i) = text.parse::<i64>() {
        return Some(i.into());
    }
    text.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .and_then(serde_json::Number::from_f64)
}

// ============================================================================
// Schema validation
// ============================================================================

/// Check a parsed root node against the script schema.
pub fn load_script_document(path: &Path, root: SyntaxNode) -> Result<ScriptDocument, ScriptError> {
    let map = root
        .as_object()
        .ok_or_else(|| ScriptError::new("Script must be an object", &root))?;

    for (key, node) in map {
        if !TOP_LEVEL_KEYS.contains(&key.as_str()) {
            return Err(ScriptError::new(
                format!("Unknown script key '{}'", key),
                node,
            ));
        }
    }

    let settings_node = one_of(&root, "metadata", "settings")?;
    let settings = match settings_node {
        Some(node) => parse_settings(node)?,
        None => Settings::default(),
    };

    let mut includes = Vec::new();
    if let Some(node) = root.get("includes") {
        let items = node
            .as_array()
            .ok_or_else(|| ScriptError::new("'includes' must be an array", node))?;
        for item in items {
            let include = item
                .as_str()
                .ok_or_else(|| ScriptError::new("Include must be a string", item))?;
            if Path::new(include).is_absolute() {
                return Err(ScriptError::new(
                    format!("Include '{}' must be a relative path", include),
                    item,
                ));
            }
            includes.push(item.clone());
        }
    }

    let vars = match root.get("vars") {
        Some(node) if node.as_object().is_some() => Some(node.clone()),
        Some(node) => return Err(ScriptError::new("'vars' must be an object", node)),
        None => None,
    };

    let mut statements = Vec::new();
    if let Some(node) = one_of(&root, "statements", "assertions")? {
        let items = node
            .as_array()
            .ok_or_else(|| ScriptError::new("'statements' must be an array", node))?;
        for item in items {
            statements.push(parse_statement(item)?);
        }
    }

    Ok(ScriptDocument {
        path: path.to_path_buf(),
        node: root.clone(),
        settings,
        includes,
        vars,
        statements,
    })
}

/// Fetch a key that has an alternate spelling; both at once is an error.
fn one_of<'a>(
    root: &'a SyntaxNode,
    key: &str,
    alternate: &str,
) -> Result<Option<&'a SyntaxNode>, ScriptError> {
    match (root.get(key), root.get(alternate)) {
        (Some(_), Some(second)) => Err(ScriptError::new(
            format!("Only one of '{}' and '{}' may be given", key, alternate),
            second,
        )),
        (first, second) => Ok(first.or(second)),
    }
}

fn parse_settings(node: &SyntaxNode) -> Result<Settings, ScriptError> {
    if node.as_object().is_none() {
        return Err(ScriptError::new("'settings' must be an object", node));
    }
    Ok(Settings {
        description: optional_string(node, "description")?,
        when: optional_guard(node)?,
    })
}

fn parse_statement(node: &SyntaxNode) -> Result<Statement, ScriptError> {
    let map = node
        .as_object()
        .ok_or_else(|| ScriptError::new("Statement must be an object", node))?;

    for (key, value) in map {
        if !STATEMENT_KEYS.contains(&key.as_str()) {
            return Err(ScriptError::new(
                format!("Unknown statement key '{}'", key),
                value,
            ));
        }
    }

    let name_node = node
        .get("assert")
        .ok_or_else(|| ScriptError::new("Statement has no 'assert' name", node))?;
    let name = name_node
        .as_str()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ScriptError::new("'assert' must be a non-empty string", name_node))?
        .to_string();

    let with = match node.get("with") {
        Some(w) if w.as_object().is_some() => Some(w.clone()),
        Some(w) => return Err(ScriptError::new("'with' must be an object", w)),
        None => None,
    };

    let elevation = match node.get("become") {
        None => None,
        Some(b) => match &b.value {
            NodeValue::Bool(true) => Some(Become::Root),
            NodeValue::Bool(false) => None,
            NodeValue::String(s) if s == "root" => Some(Become::Root),
            NodeValue::String(s) if !s.is_empty() => Some(Become::User(s.clone())),
            _ => {
                return Err(ScriptError::new(
                    "'become' must be a boolean or a user name",
                    b,
                ))
            }
        },
    };

    Ok(Statement {
        node: node.clone(),
        name,
        description: optional_string(node, "description")?,
        with,
        elevation,
        when: optional_guard(node)?,
    })
}

fn optional_string(node: &SyntaxNode, key: &str) -> Result<Option<String>, ScriptError> {
    match node.get(key) {
        None => Ok(None),
        Some(v) => v
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| ScriptError::new(format!("'{}' must be a string", key), v)),
    }
}

fn optional_guard(node: &SyntaxNode) -> Result<Option<SyntaxNode>, ScriptError> {
    match node.get("when") {
        None => Ok(None),
        Some(w) => match w.node_type() {
            NodeType::Boolean | NodeType::String => Ok(Some(w.clone())),
            _ => Err(ScriptError::new(
                "'when' must be a boolean or a string",
                w,
            )),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(text: &str) -> Result<ScriptDocument, ScriptError> {
        parse_script(Path::new("/x/test.yaml"), text)
    }

    #[test]
    fn test_sp003_nodes_carry_positions() {
        let root = parse_nodes("a.yaml", "vars:\n  name: fred\n  count: 3\n").unwrap();
        let name = root.get("vars").unwrap().get("name").unwrap();
        assert_eq!(name.as_str(), Some("fred"));
        assert_eq!(name.location.line, 2);
        assert_eq!(name.location.column, 9);
        let count = root.get("vars").unwrap().get("count").unwrap();
        assert_eq!(count.node_type(), NodeType::Number);
        assert_eq!(count.location.line, 3);
    }

    #[test]
    fn test_sp003_scalar_resolution() {
        let root = parse_nodes(
            "a.yaml",
            "a: ~\nb: true\nc: 0o755\nd: 2.5\ne: '42'\nf: hello\ng: -7\n",
        )
        .unwrap();
        assert_eq!(
            root.to_value(),
            json!({"a": null, "b": true, "c": 493, "d": 2.5, "e": "42", "f": "hello", "g": -7})
        );
    }

    #[test]
    fn test_sp003_empty_document_is_null() {
        let root = parse_nodes("a.yaml", "").unwrap();
        assert_eq!(root.node_type(), NodeType::Null);
        assert!(parse("").is_err());
    }

    #[test]
    fn test_sp003_alias_rejected() {
        let err = parse_nodes("a.yaml", "a: &x 1\nb: *x\n").unwrap_err();
        assert!(err.message.contains("aliases"));
    }

    #[test]
    fn test_sp003_invalid_yaml() {
        let err = parse_nodes("a.yaml", "a: [1, 2\n").unwrap_err();
        assert!(err.message.starts_with("YAML parse error"));
    }

    #[test]
    fn test_sp003_clean_script() {
        let doc = parse(
            r#"
metadata:
  description: test
includes: [something.yaml]
vars: { a: 1, b: null, c: [1, 2, 3], d: { x: x } }
statements:
  - assert: Thing
    with: {}
  - assert: Other
    become: fred
    when: "{vars.a == 1}"
"#,
        )
        .unwrap();
        assert_eq!(doc.settings.description.as_deref(), Some("test"));
        assert_eq!(doc.includes.len(), 1);
        assert_eq!(doc.statements.len(), 2);
        assert_eq!(doc.statements[1].elevation, Some(Become::User("fred".into())));
        assert!(doc.statements[1].when.is_some());
        assert!(doc.has_becomes());
    }

    #[test]
    fn test_sp003_assertions_alias_and_settings_alias() {
        let doc = parse("settings: { when: false }\nassertions:\n  - assert: A\n").unwrap();
        assert_eq!(doc.statements[0].name, "A");
        assert_eq!(doc.settings.when.as_ref().unwrap().as_bool(), Some(false));
    }

    #[test]
    fn test_sp003_schema_errors() {
        let bad = [
            "[]",
            "metadata: []",
            "metadata: { description: 1 }",
            "includes: {}",
            "includes: [1]",
            "includes: [/absolute/path]",
            "vars: []",
            "statements: {}",
            "statements: [1]",
            "statements: [{}]",
            "statements: [{ assert: 1 }]",
            "statements: [{ assert: Thing, description: 1 }]",
            "statements: [{ assert: Thing, with: 1 }]",
            "statements: [{ assert: Thing, when: 1 }]",
            "statements: [{ assert: Thing, become: 1 }]",
            "statements: [{ assert: Thing, wiht: {} }]",
            "bogus: 1",
            "metadata: {}\nsettings: {}",
        ];
        for text in bad {
            assert!(parse(text).is_err(), "expected error for {:?}", text);
        }
    }

    #[test]
    fn test_sp003_absolute_include_points_at_node() {
        let err = parse("includes:\n  - ok.yaml\n  - /etc/bad.yaml\n").unwrap_err();
        assert_eq!(err.location.line, 3);
        assert!(err.message.contains("relative"));
    }

    #[test]
    fn test_sp003_become_forms() {
        let doc = parse(
            "statements:\n  - { assert: A, become: true }\n  - { assert: B, become: root }\n  - { assert: C, become: false }\n",
        )
        .unwrap();
        assert_eq!(doc.statements[0].elevation, Some(Become::Root));
        assert_eq!(doc.statements[1].elevation, Some(Become::Root));
        assert_eq!(doc.statements[2].elevation, None);
    }
}
