//! SP-015: systemd service state asserters.

use super::{AssertError, Asserter, StatementDeps};
use crate::core::args::{bind_args, ArgSpec};
use crate::core::error::ScriptError;
use crate::core::types::{NodeType, SyntaxNode};
use crate::transport::shell_quote;
use async_trait::async_trait;
use serde_json::{json, Value};

/// Desired unit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Desired {
    Running,
    Stopped,
}

/// `ServiceRunning` / `ServiceStopped`, via `systemctl`.
pub struct ServiceState {
    deps: StatementDeps,
    desired: Desired,
    service: String,
}

impl ServiceState {
    pub fn running(deps: StatementDeps) -> Self {
        Self::new(deps, Desired::Running)
    }

    pub fn stopped(deps: StatementDeps) -> Self {
        Self::new(deps, Desired::Stopped)
    }

    fn new(deps: StatementDeps, desired: Desired) -> Self {
        Self {
            deps,
            desired,
            service: String::new(),
        }
    }
}

#[async_trait]
impl Asserter for ServiceState {
    async fn assert(&mut self, statement: &SyntaxNode) -> Result<bool, AssertError> {
        let args = bind_args(
            statement,
            &[ArgSpec::required("service", NodeType::String)],
            &self.deps.interpolator,
        )?;
        self.service = args.require_str("service")?.to_string();

        let out = self
            .deps
            .exec(&format!("systemctl is-active {}", shell_quote(&self.service)))?;
        let active = out.stdout.trim() == "active";
        let holds = match self.desired {
            Desired::Running => active,
            Desired::Stopped => !active,
        };

        if !holds && !self.deps.is_root() {
            let verb = match self.desired {
                Desired::Running => "start",
                Desired::Stopped => "stop",
            };
            return Err(ScriptError::new(
                format!("Only root user can {} a service", verb),
                statement,
            )
            .into());
        }
        Ok(holds)
    }

    async fn rectify(&mut self) -> Result<(), AssertError> {
        let verb = match self.desired {
            Desired::Running => "restart",
            Desired::Stopped => "stop",
        };
        self.deps
            .exec_ok(&format!("systemctl {} {}", verb, shell_quote(&self.service)))?;
        Ok(())
    }

    fn result(&self) -> Value {
        json!({ "service": self.service })
    }
}
