//! SP-015: System package asserter (dpkg / apt-get).

use super::{AssertError, Asserter, StatementDeps};
use crate::core::args::{bind_args, ArgSpec};
use crate::core::error::ScriptError;
use crate::core::types::{NodeType, SyntaxNode};
use crate::transport::shell_quote;
use async_trait::async_trait;
use serde_json::{json, Value};

const INSTALLED: &str = "install ok installed";

/// A Debian package is installed.
pub struct SystemPackageInstalled {
    deps: StatementDeps,
    package: String,
}

impl SystemPackageInstalled {
    pub fn new(deps: StatementDeps) -> Self {
        Self {
            deps,
            package: String::new(),
        }
    }

    fn query_script(&self) -> String {
        format!(
            "dpkg-query -W -f='${{Status}}' {} 2>/dev/null",
            shell_quote(&self.package)
        )
    }
}

#[async_trait]
impl Asserter for SystemPackageInstalled {
    async fn assert(&mut self, statement: &SyntaxNode) -> Result<bool, AssertError> {
        let args = bind_args(
            statement,
            &[ArgSpec::required("package", NodeType::String)],
            &self.deps.interpolator,
        )?;
        self.package = args.require_str("package")?.to_string();

        let out = self.deps.exec(&self.query_script())?;
        if out.success() && out.stdout.trim() == INSTALLED {
            return Ok(true);
        }

        if !self.deps.is_root() {
            return Err(
                ScriptError::new("Only root user can install packages", statement).into(),
            );
        }
        Ok(false)
    }

    async fn rectify(&mut self) -> Result<(), AssertError> {
        self.deps.exec_ok(&format!(
            "set -euo pipefail\n\
             apt-get update -qq\n\
             DEBIAN_FRONTEND=noninteractive apt-get install -y -qq {}",
            shell_quote(&self.package)
        ))?;
        Ok(())
    }

    fn result(&self) -> Value {
        json!({ "package": self.package })
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{deps_with, statement, FakeRunner};
    use super::*;
    use std::sync::Arc;

    const QUERY: &str = "dpkg-query -W -f='${Status}' curl 2>/dev/null";

    #[tokio::test]
    async fn test_sp015_package_installed() {
        let runner = Arc::new(FakeRunner::default().reply(QUERY, 0, INSTALLED));
        let mut asserter = SystemPackageInstalled::new(deps_with(runner, false));
        assert!(asserter
            .assert(&statement("with:\n  package: curl\n"))
            .await
            .unwrap());
        assert_eq!(asserter.result(), json!({"package": "curl"}));
    }

    #[tokio::test]
    async fn test_sp015_package_missing_installs() {
        let runner = Arc::new(FakeRunner::default().reply(QUERY, 1, ""));
        let mut asserter = SystemPackageInstalled::new(deps_with(Arc::clone(&runner), true));
        assert!(!asserter
            .assert(&statement("with:\n  package: curl\n"))
            .await
            .unwrap());
        asserter.rectify().await.unwrap();
        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].contains("apt-get install -y -qq curl"));
    }

    #[tokio::test]
    async fn test_sp015_package_needs_root() {
        let runner = Arc::new(FakeRunner::default().reply(QUERY, 1, ""));
        let mut asserter = SystemPackageInstalled::new(deps_with(runner, false));
        let err = asserter
            .assert(&statement("with:\n  package: curl\n"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Only root user"));
    }
}
