//! SP-007: Statement argument binding.
//!
//! Each asserter declares its arguments as `ArgSpec`s. Binding looks each one
//! up under the statement's `with:` object, interpolates string leaves, and
//! checks the runtime type against the declared one.

use super::error::ScriptError;
use super::interpolate::Interpolator;
use super::types::*;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;

/// What to do when an argument is missing from `with:`.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgDefault {
    Required,
    /// Optional, left unbound when absent
    Optional,
    Value(Value),
}

/// Declaration of one asserter argument.
#[derive(Debug, Clone, PartialEq)]
pub struct ArgSpec {
    pub name: &'static str,
    pub ty: NodeType,
    pub default: ArgDefault,
    /// Name to bind the value under, when different from `name`
    pub alias: Option<&'static str>,
}

impl ArgSpec {
    pub const fn required(name: &'static str, ty: NodeType) -> Self {
        Self {
            name,
            ty,
            default: ArgDefault::Required,
            alias: None,
        }
    }

    pub const fn optional(name: &'static str, ty: NodeType) -> Self {
        Self {
            name,
            ty,
            default: ArgDefault::Optional,
            alias: None,
        }
    }

    pub fn with_default(name: &'static str, ty: NodeType, value: Value) -> Self {
        Self {
            name,
            ty,
            default: ArgDefault::Value(value),
            alias: None,
        }
    }

    pub const fn alias(mut self, alias: &'static str) -> Self {
        self.alias = Some(alias);
        self
    }

    fn bound_name(&self) -> &'static str {
        self.alias.unwrap_or(self.name)
    }
}

/// Argument values bound for one statement.
#[derive(Debug, Clone)]
pub struct BoundArgs {
    with_node: SyntaxNode,
    values: IndexMap<&'static str, Value>,
    nodes: HashMap<&'static str, SyntaxNode>,
}

impl BoundArgs {
    /// The `with:` node, or an empty object at the statement when absent.
    pub fn with_node(&self) -> &SyntaxNode {
        &self.with_node
    }

    /// Node an argument came from, if it was given.
    pub fn node(&self, name: &str) -> Option<&SyntaxNode> {
        self.nodes.get(name)
    }

    /// Node to blame for a bad argument value.
    pub fn blame(&self, name: &str) -> &SyntaxNode {
        self.nodes.get(name).unwrap_or(&self.with_node)
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.value(name).and_then(Value::as_str)
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.value(name).and_then(Value::as_bool)
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.value(name).and_then(Value::as_f64)
    }

    /// A required string argument.
    pub fn require_str(&self, name: &str) -> Result<&str, ScriptError> {
        self.str(name).ok_or_else(|| {
            ScriptError::new(format!("Argument '{}' is required", name), self.blame(name))
        })
    }

    /// A non-negative integer argument, such as a file mode.
    pub fn u32(&self, name: &str) -> Result<Option<u32>, ScriptError> {
        match self.value(name) {
            None => Ok(None),
            Some(v) => v
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .map(Some)
                .ok_or_else(|| {
                    ScriptError::new(
                        format!("Argument '{}' must be a non-negative integer", name),
                        self.blame(name),
                    )
                }),
        }
    }
}

/// Bind `specs` against a statement node's `with:` object.
pub fn bind_args(
    statement: &SyntaxNode,
    specs: &[ArgSpec],
    interpolator: &Interpolator,
) -> Result<BoundArgs, ScriptError> {
    let with_node = match statement.get("with") {
        Some(node) => node.clone(),
        None => SyntaxNode::new(
            statement.location.clone(),
            NodeValue::Object(IndexMap::new()),
        ),
    };

    let mut values = IndexMap::new();
    let mut nodes = HashMap::new();

    for spec in specs {
        match with_node.get(spec.name) {
            None => match &spec.default {
                ArgDefault::Required => {
                    return Err(ScriptError::new(
                        format!("Argument '{}' is required", spec.name),
                        &with_node,
                    ))
                }
                ArgDefault::Optional => {}
                ArgDefault::Value(v) => {
                    values.insert(spec.bound_name(), v.clone());
                }
            },
            Some(node) => {
                let value = interpolator.resolve(node)?;
                let actual = NodeType::of(&value);
                if actual != spec.ty {
                    return Err(ScriptError::new(
                        format!(
                            "Expected argument '{}' to be of type '{}' and was '{}'",
                            spec.name, spec.ty, actual
                        ),
                        node,
                    ));
                }
                values.insert(spec.bound_name(), value);
                nodes.insert(spec.bound_name(), node.clone());
            }
        }
    }

    Ok(BoundArgs {
        with_node,
        values,
        nodes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::host::{RealFs, SystemClock};
    use crate::core::parser::parse_nodes;
    use proptest::prelude::*;
    use serde_json::json;
    use std::sync::Arc;

    fn interpolator() -> Interpolator {
        let mut context = RunContext::default();
        context.vars.insert("n".into(), json!(5));
        context.vars.insert("s".into(), json!("text"));
        Interpolator::new(Arc::new(context), Arc::new(RealFs), Arc::new(SystemClock))
    }

    fn statement(yaml: &str) -> SyntaxNode {
        parse_nodes("s.yaml", yaml).unwrap()
    }

    #[test]
    fn test_sp007_binds_present_args() {
        let node = statement("assert: X\nwith:\n  file: '{vars.s}.txt'\n  mode: 420\n  count: '{vars.n}'\n");
        let specs = [
            ArgSpec::required("file", NodeType::String),
            ArgSpec::optional("mode", NodeType::Number),
            ArgSpec::required("count", NodeType::Number).alias("total"),
        ];
        let args = bind_args(&node, &specs, &interpolator()).unwrap();
        assert_eq!(args.str("file"), Some("text.txt"));
        assert_eq!(args.u32("mode").unwrap(), Some(420));
        assert_eq!(args.number("total"), Some(5.0));
        assert!(args.value("count").is_none());
        assert_eq!(args.node("file").unwrap().location.line, 3);
    }

    #[test]
    fn test_sp007_required_missing_blames_with_node() {
        let node = statement("assert: X\nwith:\n  other: 1\n");
        let err = bind_args(
            &node,
            &[ArgSpec::required("file", NodeType::String)],
            &interpolator(),
        )
        .unwrap_err();
        assert_eq!(err.message, "Argument 'file' is required");
        assert_eq!(err.location.line, 3);
    }

    #[test]
    fn test_sp007_missing_with_is_empty() {
        let node = statement("assert: X\n");
        let args = bind_args(
            &node,
            &[ArgSpec::with_default("flag", NodeType::Boolean, json!(true))],
            &interpolator(),
        )
        .unwrap();
        assert_eq!(args.bool("flag"), Some(true));
        assert!(args.node("flag").is_none());
        assert_eq!(args.with_node().location, node.location);

        let err = bind_args(
            &node,
            &[ArgSpec::required("file", NodeType::String)],
            &interpolator(),
        )
        .unwrap_err();
        assert_eq!(err.location, node.location);
    }

    #[test]
    fn test_sp007_type_mismatch_after_interpolation() {
        let node = statement("assert: X\nwith:\n  file: '{vars.n}'\n");
        let err = bind_args(
            &node,
            &[ArgSpec::required("file", NodeType::String)],
            &interpolator(),
        )
        .unwrap_err();
        assert!(err.message.contains("type 'string' and was 'number'"));
        assert_eq!(err.location.line, 3);
    }

    #[test]
    fn test_sp007_default_only_when_absent() {
        let node = statement("assert: X\nwith:\n  flag: null\n");
        let err = bind_args(
            &node,
            &[ArgSpec::with_default("flag", NodeType::Boolean, json!(false))],
            &interpolator(),
        );
        assert!(err.is_err(), "present null must not fall back to the default");
    }

    #[test]
    fn test_sp007_u32_rejects_negative() {
        let node = statement("assert: X\nwith:\n  mode: -1\n");
        let args = bind_args(
            &node,
            &[ArgSpec::optional("mode", NodeType::Number)],
            &interpolator(),
        )
        .unwrap();
        assert!(args.u32("mode").is_err());
    }

    proptest! {
        #[test]
        fn prop_sp007_number_literals_bind_as_numbers(n in 0u32..100_000) {
            let node = statement(&format!("assert: X\nwith:\n  v: {}\n", n));
            let args = bind_args(
                &node,
                &[ArgSpec::required("v", NodeType::Number)],
                &interpolator(),
            ).unwrap();
            prop_assert_eq!(args.u32("v").unwrap(), Some(n));
        }

        #[test]
        fn prop_sp007_wrong_type_always_rejected(s in "[a-z]{1,12}") {
            let node = statement(&format!("assert: X\nwith:\n  v: '{}'\n", s));
            let result = bind_args(
                &node,
                &[ArgSpec::required("v", NodeType::Number)],
                &interpolator(),
            );
            prop_assert!(result.is_err());
        }
    }
}
