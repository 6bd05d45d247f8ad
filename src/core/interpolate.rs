//! SP-006: Interpolation of `{...}` spans in string leaves.
//!
//! A string that is exactly one span evaluates to the span's raw value
//! (number, object, ...). Mixed text concatenates rendered values. Spans are
//! quote- and nesting-aware so `{util.moustache('{{x}}')}` is one span.
//!
//! Namespaces: `vars`, `sys`, `env`, `results`, plus the functions
//! `fs.readFile`, `path.*`, `dateTime.*`, `util.moustache`, `results.last`.

use super::error::ScriptError;
use super::expr::{self, Scope};
use super::host::{Clock, FileSystem};
use super::resolver::normalize;
use super::types::*;
use chrono::{DateTime, FixedOffset, Local, Utc};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

const LOCAL_DATE_FORMAT: &str = "%a %b %d %Y %H:%M:%S GMT%z";

/// Evaluates interpolation spans against one run context snapshot.
#[derive(Clone)]
pub struct Interpolator {
    context: Arc<RunContext>,
    fs: Arc<dyn FileSystem>,
    clock: Arc<dyn Clock>,
}

impl Interpolator {
    pub fn new(context: Arc<RunContext>, fs: Arc<dyn FileSystem>, clock: Arc<dyn Clock>) -> Self {
        Self { context, fs, clock }
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    /// Interpolate a string node. Any other node type is an error.
    pub fn interpolate(&self, node: &SyntaxNode) -> Result<Value, ScriptError> {
        match &node.value {
            NodeValue::String(text) => self.interpolate_str(text, node),
            _ => Err(ScriptError::new(
                format!("Cannot interpolate a {} value", node.node_type()),
                node,
            )),
        }
    }

    /// Interpolate strings, pass other scalars and containers through unchanged.
    pub fn resolve(&self, node: &SyntaxNode) -> Result<Value, ScriptError> {
        match &node.value {
            NodeValue::String(text) => self.interpolate_str(text, node),
            _ => Ok(node.to_value()),
        }
    }

    /// Interpolate every string leaf of a tree.
    pub fn resolve_deep(&self, node: &SyntaxNode) -> Result<Value, ScriptError> {
        match &node.value {
            NodeValue::String(text) => self.interpolate_str(text, node),
            NodeValue::Array(items) => Ok(Value::Array(
                items
                    .iter()
                    .map(|item| self.resolve_deep(item))
                    .collect::<Result<_, _>>()?,
            )),
            NodeValue::Object(map) => {
                let mut out = serde_json::Map::new();
                for (key, value) in map {
                    out.insert(key.clone(), self.resolve_deep(value)?);
                }
                Ok(Value::Object(out))
            }
            _ => Ok(node.to_value()),
        }
    }

    /// Interpolate `text`, reporting errors against `node`.
    pub fn interpolate_str(&self, text: &str, node: &SyntaxNode) -> Result<Value, ScriptError> {
        let pieces = split_spans(text).map_err(|e| ScriptError::new(e, node))?;

        let evaluate = |src: &str| {
            expr::parse(src)
                .and_then(|e| expr::eval(&e, self))
                .map_err(|e| ScriptError::new(format!("Unable to interpolate '{{{}}}': {}", src, e), node))
        };

        match pieces.as_slice() {
            [] => Ok(Value::String(String::new())),
            [Piece::Expr(src)] => evaluate(*src),
            _ => {
                let mut out = String::new();
                for piece in &pieces {
                    match piece {
                        Piece::Text(t) => out.push_str(t),
                        Piece::Expr(src) => out.push_str(&value_to_string(&evaluate(*src)?)),
                    }
                }
                Ok(Value::String(out))
            }
        }
    }

    fn call_fs(&self, func: &str, args: &[Value]) -> Result<Value, String> {
        match func {
            "readFile" => {
                let path = string_arg(args, 0, "fs.readFile")?;
                self.fs
                    .read_to_string(Path::new(path))
                    .map(Value::String)
                    .map_err(|e| format!("unable to read {}: {}", path, e))
            }
            _ => Err(unknown_function("fs", func)),
        }
    }

    fn call_date_time(&self, func: &str, args: &[Value]) -> Result<Value, String> {
        let instant = match args.first() {
            None | Some(Value::Null) => self.clock.now(),
            Some(Value::String(s)) => parse_date(s)?,
            Some(other) => return Err(format!("expected a date string, got {}", other)),
        };
        match func {
            "asLocal" => Ok(Value::String(
                instant.with_timezone(&Local).format(LOCAL_DATE_FORMAT).to_string(),
            )),
            "asISO" => Ok(Value::String(
                instant.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
            )),
            _ => Err(unknown_function("dateTime", func)),
        }
    }

    /// Replace each `{{expr}}` in a template with its rendered value.
    fn moustache(&self, template: &str) -> Result<Value, String> {
        let mut out = String::new();
        let mut rest = template;
        while let Some(open) = rest.find("{{") {
            out.push_str(&rest[..open]);
            let after = &rest[open + 2..];
            let close = after
                .find("}}")
                .ok_or_else(|| "unterminated '{{' in template".to_string())?;
            let value = expr::eval(&expr::parse(&after[..close])?, self)?;
            out.push_str(&value_to_string(&value));
            rest = &after[close + 2..];
        }
        out.push_str(rest);
        Ok(Value::String(out))
    }
}

impl Scope for Interpolator {
    fn lookup(&self, name: &str) -> Result<Value, String> {
        match name {
            "vars" => Ok(Value::Object(self.context.vars.clone())),
            "sys" => Ok(self.context.sys.clone()),
            "env" => Ok(Value::Object(
                self.context
                    .env
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            )),
            "results" => Ok(Value::Array(self.context.results.clone())),
            _ => Err(format!("{} is not defined", name)),
        }
    }

    fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, String> {
        let (namespace, func) = name.split_once('.').unwrap_or(("", name));
        match namespace {
            "fs" => self.call_fs(func, &args),
            "path" => call_path(func, &args),
            "dateTime" => self.call_date_time(func, &args),
            "util" if func == "moustache" => self.moustache(string_arg(&args, 0, name)?),
            "results" if func == "last" => {
                Ok(self.context.results.last().cloned().unwrap_or(Value::Null))
            }
            _ => Err(format!("Unknown function '{}'", name)),
        }
    }
}

fn call_path(func: &str, args: &[Value]) -> Result<Value, String> {
    let name = format!("path.{}", func);
    let result = match func {
        "join" => {
            let parts = args
                .iter()
                .map(|a| {
                    a.as_str()
                        .ok_or_else(|| format!("{} expects string arguments", name))
                })
                .collect::<Result<Vec<_>, _>>()?;
            normalize(Path::new(&parts.join("/")))
                .to_string_lossy()
                .to_string()
        }
        "dirname" => {
            let path = Path::new(string_arg(args, 0, &name)?);
            match path.parent() {
                Some(p) if !p.as_os_str().is_empty() => p.to_string_lossy().to_string(),
                Some(_) => ".".to_string(),
                None => path.to_string_lossy().to_string(),
            }
        }
        "basename" => Path::new(string_arg(args, 0, &name)?)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        "extname" => Path::new(string_arg(args, 0, &name)?)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default(),
        _ => return Err(unknown_function("path", func)),
    };
    Ok(Value::String(result))
}

fn unknown_function(namespace: &str, func: &str) -> String {
    format!("Unknown function '{}.{}'", namespace, func)
}

fn string_arg<'a>(args: &'a [Value], index: usize, func: &str) -> Result<&'a str, String> {
    args.get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("{} expects a string argument", func))
}

/// Accepts RFC 3339, RFC 2822 and `Date.toString()`-style text.
fn parse_date(text: &str) -> Result<DateTime<Utc>, String> {
    let trimmed = match text.find(" (") {
        Some(i) => &text[..i],
        None => text,
    }
    .trim();

    DateTime::parse_from_rfc3339(trimmed)
        .or_else(|_| DateTime::parse_from_rfc2822(trimmed))
        .or_else(|_| DateTime::<FixedOffset>::parse_from_str(trimmed, LOCAL_DATE_FORMAT))
        .map(|d| d.with_timezone(&Utc))
        .map_err(|_| format!("'{}' is not a recognized date", text))
}

// ============================================================================
// Span scanning
// ============================================================================

#[derive(Debug, PartialEq)]
enum Piece<'a> {
    Text(&'a str),
    Expr(&'a str),
}

fn split_spans(text: &str) -> Result<Vec<Piece<'_>>, String> {
    let mut pieces = Vec::new();
    let mut text_start = 0;
    let mut chars = text.char_indices();

    while let Some((i, c)) = chars.next() {
        if c != '{' {
            continue;
        }
        if i > text_start {
            pieces.push(Piece::Text(&text[text_start..i]));
        }

        let mut depth = 1;
        let mut quote: Option<char> = None;
        let mut end = None;
        while let Some((j, d)) = chars.next() {
            match (quote, d) {
                (Some(_), '\\') => {
                    chars.next();
                }
                (Some(q), d) if d == q => quote = None,
                (Some(_), _) => {}
                (None, '\'' | '"') => quote = Some(d),
                (None, '{') => depth += 1,
                (None, '}') => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(j);
                        break;
                    }
                }
                _ => {}
            }
        }

        let end = end.ok_or_else(|| format!("Unterminated interpolation in '{}'", text))?;
        pieces.push(Piece::Expr(&text[i + 1..end]));
        text_start = end + 1;
    }

    if text_start < text.len() {
        pieces.push(Piece::Text(&text[text_start..]));
    }
    Ok(pieces)
}
