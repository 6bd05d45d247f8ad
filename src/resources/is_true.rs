//! `IsTrue`: stop the run unless an expression holds.

use super::{AssertError, Asserter, StatementDeps};
use crate::core::args::{bind_args, ArgSpec};
use crate::core::error::ScriptError;
use crate::core::types::{NodeType, SyntaxNode};
use async_trait::async_trait;
use serde_json::{json, Value};

pub struct IsTrue {
    deps: StatementDeps,
    message: String,
}

impl IsTrue {
    pub fn new(deps: StatementDeps) -> Self {
        Self {
            deps,
            message: String::new(),
        }
    }
}

#[async_trait]
impl Asserter for IsTrue {
    async fn assert(&mut self, statement: &SyntaxNode) -> Result<bool, AssertError> {
        let args = bind_args(
            statement,
            &[
                ArgSpec::required("expression", NodeType::Boolean).alias("value"),
                ArgSpec::with_default(
                    "message",
                    NodeType::String,
                    Value::from("Expression is not true"),
                ),
            ],
            &self.deps.interpolator,
        )?;
        self.message = args.str("message").unwrap_or_default().to_string();

        if args.bool("value") != Some(true) {
            return Err(ScriptError::new(self.message.clone(), args.blame("value")).into());
        }
        Ok(true)
    }

    /// Never reached; `assert` either holds or fails.
    async fn rectify(&mut self) -> Result<(), AssertError> {
        Ok(())
    }

    fn result(&self) -> Value {
        json!({ "message": self.message })
    }
}
