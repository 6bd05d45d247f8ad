//! SP-016: Convergence engine.
//!
//! Walks a resolved script context in `script_paths` order, then document
//! order. Per statement: guard → resolve asserter → bind (inside `assert`) →
//! elevate → assert → rectify → record. Any error aborts the rest of the run.

use super::error::{Error, Result, ScriptError};
use super::host::{Clock, FileSystem, RealFs, SystemClock};
use super::interpolate::Interpolator;
use super::privilege::{
    check_run_precondition, statement_identity, BecomeGuard, Privileges, SystemPrivileges,
};
use super::types::*;
use crate::resources::{AssertError, Registry, StatementDeps};
use crate::transport::local::LocalRunner;
use crate::transport::ProcessRunner;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Script-private variable, reset for every script.
pub const LOCAL_VAR: &str = "local";

/// Options for one engine run.
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    pub mode: RunMode,

    /// Globals arrive already interpolated; only `local` is evaluated.
    pub local_vars_only: bool,

    /// Variables known before the first script, such as a shipped vars file
    pub vars: Map<String, Value>,

    /// Host facts for the `sys` namespace
    pub sys: Value,

    pub env: BTreeMap<String, String>,
}

impl RunConfig {
    /// A run against this machine: real facts and the process environment.
    pub fn for_this_host(mode: RunMode) -> Self {
        Self {
            mode,
            sys: super::facts::gather(),
            env: std::env::vars().collect(),
            ..Self::default()
        }
    }
}

/// Progress notifications. Every method defaults to doing nothing.
pub trait Reporter: Send {
    fn started(&mut self, _statement: &Statement) {}
    fn finished(&mut self, _result: &StatementResult) {}
    fn skipped(&mut self, _statement: &Statement) {}
    /// Free-form progress, such as a remote host announcing its next statement.
    fn progress(&mut self, _message: &str) {}
}

/// Ignores everything.
pub struct Silent;

impl Reporter for Silent {}

/// Machine-facing services the engine and asserters use.
#[derive(Clone)]
pub struct Collaborators {
    pub fs: Arc<dyn FileSystem>,
    pub runner: Arc<dyn ProcessRunner>,
    pub clock: Arc<dyn Clock>,
    pub privileges: Arc<dyn Privileges>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            fs: Arc::new(RealFs),
            runner: Arc::new(LocalRunner::default()),
            clock: Arc::new(SystemClock),
            privileges: Arc::new(SystemPrivileges),
        }
    }
}

pub struct Engine {
    registry: Registry,
    collaborators: Collaborators,
}

impl Engine {
    /// Built-in asserters against the real machine.
    pub fn new() -> Self {
        Self::with(Registry::builtin(), Collaborators::default())
    }

    pub fn with(registry: Registry, collaborators: Collaborators) -> Self {
        Self {
            registry,
            collaborators,
        }
    }

    fn interpolator(&self, run: &Arc<RunContext>) -> Interpolator {
        Interpolator::new(
            Arc::clone(run),
            Arc::clone(&self.collaborators.fs),
            Arc::clone(&self.collaborators.clock),
        )
    }

    fn initial_context(config: &RunConfig) -> Arc<RunContext> {
        Arc::new(RunContext {
            sys: config.sys.clone(),
            vars: config.vars.clone(),
            results: Vec::new(),
            env: config.env.clone(),
        })
    }

    /// Merge one script's `vars:` into the run scope.
    fn merge_vars(
        &self,
        run: &mut Arc<RunContext>,
        doc: &ScriptDocument,
        local_only: bool,
    ) -> Result<(), ScriptError> {
        Arc::make_mut(run).vars.remove(LOCAL_VAR);

        let Some(entries) = doc.vars.as_ref().and_then(SyntaxNode::as_object) else {
            return Ok(());
        };

        for (name, node) in entries {
            let value = if name == LOCAL_VAR {
                self.interpolator(run).resolve_deep(node)?
            } else if run.vars.contains_key(name) {
                if !local_only {
                    warn!(var = %name, script = %doc.path.display(), "variable already defined; ignoring");
                }
                continue;
            } else if local_only {
                node.to_value()
            } else {
                self.interpolator(run).resolve_deep(node)?
            };
            Arc::make_mut(run).vars.insert(name.clone(), value);
        }
        Ok(())
    }

    /// Global variables of every script, interpolated, without `local`.
    pub fn global_vars(&self, context: &ScriptContext, config: &RunConfig) -> Result<Map<String, Value>> {
        let mut run = Self::initial_context(config);
        for doc in context.documents() {
            self.merge_vars(&mut run, doc, false)?;
        }
        let mut vars = Arc::unwrap_or_clone(run).vars;
        vars.remove(LOCAL_VAR);
        Ok(vars)
    }

    /// Converge every statement of `context`.
    pub async fn run(
        &self,
        context: &ScriptContext,
        config: &RunConfig,
        reporter: &mut dyn Reporter,
    ) -> Result<RunSummary> {
        let start = Instant::now();
        let privileges = self.collaborators.privileges.as_ref();
        check_run_precondition(privileges, context.any_script_has_becomes)?;

        let mut run = Self::initial_context(config);
        let mut summary = RunSummary::default();

        for doc in context.documents() {
            self.merge_vars(&mut run, doc, config.local_vars_only)?;

            if let Some(when) = &doc.settings.when {
                if !guard_allows(&self.interpolator(&run), when)? {
                    info!(script = %doc.path.display(), "script skipped by 'when'");
                    for statement in &doc.statements {
                        reporter.skipped(statement);
                    }
                    summary.skipped += doc.statements.len() as u32;
                    continue;
                }
            }

            for statement in &doc.statements {
                if let Some(when) = &statement.when {
                    if !guard_allows(&self.interpolator(&run), when)? {
                        debug!(assert = %statement.name, "statement skipped by 'when'");
                        reporter.skipped(statement);
                        summary.skipped += 1;
                        continue;
                    }
                }

                let result = self.run_statement(&run, statement, config.mode, reporter).await?;
                summary.record(result.outcome);
                reporter.finished(&result);
                Arc::make_mut(&mut run).results.push(result_value(&result));
            }
        }

        summary.duration = start.elapsed();
        info!(
            asserted = summary.asserted,
            rectified = summary.rectified,
            would_rectify = summary.would_rectify,
            skipped = summary.skipped,
            "run complete"
        );
        Ok(summary)
    }

    async fn run_statement(
        &self,
        run: &Arc<RunContext>,
        statement: &Statement,
        mode: RunMode,
        reporter: &mut dyn Reporter,
    ) -> Result<StatementResult> {
        let deps = StatementDeps {
            interpolator: self.interpolator(run),
            fs: Arc::clone(&self.collaborators.fs),
            runner: Arc::clone(&self.collaborators.runner),
            privileges: Arc::clone(&self.collaborators.privileges),
            clock: Arc::clone(&self.collaborators.clock),
        };
        let mut asserter = self.registry.create(&statement.name, deps).ok_or_else(|| {
            ScriptError::new(
                format!("Unable to find asserter '{}'", statement.name),
                &statement.node,
            )
        })?;

        let privileges = self.collaborators.privileges.as_ref();
        let identity = statement_identity(privileges, statement.elevation.as_ref())?;
        let _become = BecomeGuard::enter(privileges, identity)?;

        reporter.started(statement);
        let failed = |e: AssertError| match e {
            AssertError::Script(e) => Error::Script(e),
            AssertError::Failed(message) => Error::Statement {
                name: statement.name.clone(),
                location: statement.node.location.clone(),
                message,
            },
        };

        let outcome = if asserter.assert(&statement.node).await.map_err(failed)? {
            Outcome::Asserted
        } else if mode == RunMode::AssertOnly {
            Outcome::WouldRectify
        } else {
            asserter.rectify().await.map_err(failed)?;
            Outcome::Rectified
        };
        info!(assert = %statement.name, %outcome, location = %statement.node.location);

        Ok(StatementResult {
            outcome,
            assert: statement.name.clone(),
            description: statement.description.clone(),
            location: statement.node.location.to_string(),
            result: asserter.result(),
        })
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// Evaluate a `when` guard: booleans decide, an empty string allows.
fn guard_allows(interpolator: &Interpolator, when: &SyntaxNode) -> Result<bool, ScriptError> {
    match interpolator.resolve(when)? {
        Value::Bool(allowed) => Ok(allowed),
        Value::String(s) if s.is_empty() => Ok(true),
        other => Err(ScriptError::new(
            format!(
                "'when' must evaluate to a boolean and was '{}'",
                NodeType::of(&other)
            ),
            when,
        )),
    }
}

/// How a result appears in the `results` namespace.
fn result_value(result: &StatementResult) -> Value {
    json!({
        "outcome": result.outcome.to_string(),
        "assert": result.assert,
        "description": result.description,
        "location": result.location,
        "result": result.result,
    })
}
