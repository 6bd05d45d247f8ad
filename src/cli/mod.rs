//! SP-018: Command line. Local runs, host runs and the `--remote` side.

use crate::core::error::{Error, Result};
use crate::core::executor::{Engine, Reporter, RunConfig};
use crate::core::host::RealFs;
use crate::core::remote::{PtySessions, RemoteOptions, RemoteRunner};
use crate::core::resolver;
use crate::core::types::{HostSpec, RunMode, RunSummary, ScriptContext, Statement, StatementResult};
use crate::transport::pty::{NativePtySpawner, TerminalPrompt};
use crate::transport::ConnectOptions;
use clap::Args;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Args, Debug, Default)]
pub struct Options {
    /// Script to converge
    #[arg(required_unless_present = "version")]
    pub script: Option<PathBuf>,

    /// Remote host, as host, user@host or host:port
    #[arg(long)]
    pub host: Option<String>,

    /// YAML list of {host, port, user, identity} entries
    #[arg(long = "hostFile", value_name = "FILE")]
    pub host_file: Option<PathBuf>,

    /// SSH private key for hosts that do not name one
    #[arg(long, value_name = "FILE")]
    pub identity: Option<PathBuf>,

    /// SSH user for hosts that do not name one (default: $USER)
    #[arg(long)]
    pub user: Option<String>,

    /// Answer for the `user@host's password:` login prompt
    #[arg(long, env = "SPADE_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// SSH port for hosts that do not name one
    #[arg(long)]
    pub port: Option<u16>,

    /// Limit for connects and remote housekeeping commands
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// Show full error detail and debug logging
    #[arg(long)]
    pub debug: bool,

    /// Only assert; report what would be rectified
    #[arg(long = "assertOnly", alias = "dry-run")]
    pub assert_only: bool,

    /// Do not animate progress on stderr
    #[arg(long = "noSpinner")]
    pub no_spinner: bool,

    /// Run all hosts at once
    #[arg(long)]
    pub parallel: bool,

    /// Print the version
    #[arg(long)]
    pub version: bool,

    /// Target side of a host run: JSON lines on stdout
    #[arg(long, hide = true)]
    pub remote: bool,

    /// Pre-interpolated global vars shipped by the driver
    #[arg(long = "varsFile", hide = true, value_name = "FILE")]
    pub vars_file: Option<PathBuf>,
}

impl Options {
    pub fn mode(&self) -> RunMode {
        if self.assert_only {
            RunMode::AssertOnly
        } else {
            RunMode::Converge
        }
    }

    fn spinner(&self) -> bool {
        !self.no_spinner && !self.remote && std::io::stderr().is_terminal()
    }

    /// `--host` then every `--hostFile` entry, with flag defaults filled in.
    pub fn hosts(&self) -> Result<Vec<HostSpec>> {
        let mut hosts = Vec::new();
        if let Some(text) = &self.host {
            hosts.push(parse_host(text).map_err(Error::Runtime)?);
        }
        if let Some(path) = &self.host_file {
            hosts.extend(load_host_file(path)?);
        }

        let user = self.user.clone().or_else(|| std::env::var("USER").ok());
        for host in &mut hosts {
            if host.user.is_none() {
                host.user = user.clone();
            }
            if host.port.is_none() {
                host.port = self.port;
            }
            if host.identity.is_none() {
                host.identity = self.identity.clone();
            }
        }
        Ok(hosts)
    }
}

/// Parse `[user@]host[:port]`.
pub fn parse_host(text: &str) -> Result<HostSpec, String> {
    let (user, rest) = match text.split_once('@') {
        Some((user, rest)) if !user.is_empty() => (Some(user.to_string()), rest),
        Some(_) => return Err(format!("invalid host '{}'", text)),
        None => (None, text),
    };
    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| format!("invalid port in host '{}'", text))?;
            (host, Some(port))
        }
        None => (rest, None),
    };
    if host.is_empty() {
        return Err(format!("invalid host '{}'", text));
    }
    Ok(HostSpec {
        host: host.to_string(),
        port,
        user,
        identity: None,
    })
}

pub fn load_host_file(path: &Path) -> Result<Vec<HostSpec>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::io(format!("unable to read host file {}", path.display()), e))?;
    serde_yaml_ng::from_str(&text)
        .map_err(|e| Error::Runtime(format!("invalid host file {}: {}", path.display(), e)))
}

fn load_vars_file(path: &Path) -> Result<Map<String, Value>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::io(format!("unable to read vars file {}", path.display()), e))?;
    serde_json::from_str(&text)
        .map_err(|e| Error::Runtime(format!("invalid vars file {}: {}", path.display(), e)))
}

// ============================================================================
// Dispatch
// ============================================================================

/// Run whatever the options ask for.
pub async fn dispatch(options: &Options) -> Result<()> {
    if options.version {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }
    let Some(script) = options.script.as_deref() else {
        return Err(Error::Runtime("no script given".to_string()));
    };
    let context = resolver::create_script_context(script, &RealFs)?;

    if options.remote {
        return cmd_remote(options, &context).await;
    }
    let hosts = options.hosts()?;
    if hosts.is_empty() {
        cmd_local(options, &context).await
    } else {
        cmd_hosts(options, context, hosts).await
    }
}

/// Print a fatal error the way the current mode expects.
pub fn report_failure(options: &Options, err: &Error) {
    let message = if options.debug {
        err.detail()
    } else {
        err.to_string()
    };
    if options.remote {
        for line in message.lines() {
            println!("error: {}", line);
        }
    } else {
        eprintln!("error: {}", message);
    }
}

async fn cmd_local(options: &Options, context: &ScriptContext) -> Result<()> {
    let mut reporter = ConsoleReporter::new(None, options.spinner());
    let outcome = Engine::new()
        .run(context, &RunConfig::for_this_host(options.mode()), &mut reporter)
        .await;
    reporter.clear();
    let summary = outcome?;
    eprintln!("{}", summary_line("localhost", &summary));
    Ok(())
}

async fn cmd_remote(options: &Options, context: &ScriptContext) -> Result<()> {
    let mut config = RunConfig::for_this_host(options.mode());
    config.local_vars_only = true;
    if let Some(path) = &options.vars_file {
        config.vars = load_vars_file(path)?;
    }
    Engine::new()
        .run(context, &config, &mut RemoteReporter)
        .await?;
    Ok(())
}

async fn cmd_hosts(options: &Options, context: ScriptContext, hosts: Vec<HostSpec>) -> Result<()> {
    let vars = Engine::new().global_vars(&context, &RunConfig::for_this_host(options.mode()))?;

    let mut login_passwords = HashMap::new();
    if let Some(password) = &options.password {
        for host in &hosts {
            login_passwords.insert(
                ConnectOptions::for_host(host).login_prompt(),
                password.clone(),
            );
        }
    }
    let runner = Arc::new(RemoteRunner::new(
        Arc::new(PtySessions {
            spawner: Arc::new(NativePtySpawner),
            prompt: Arc::new(TerminalPrompt),
        }),
        Arc::new(RealFs),
        RemoteOptions {
            mode: options.mode(),
            no_prompts: !std::io::stdin().is_terminal(),
            timeout: options.timeout.map(Duration::from_secs),
            login_passwords,
            executable: None,
        },
    ));
    let context = Arc::new(context);
    let vars = Arc::new(vars);
    let total = hosts.len();

    let outcomes = if options.parallel {
        let handles: Vec<_> = hosts
            .into_iter()
            .map(|host| {
                let runner = Arc::clone(&runner);
                let context = Arc::clone(&context);
                let vars = Arc::clone(&vars);
                tokio::spawn(async move {
                    let mut reporter = ConsoleReporter::new(Some(host.to_string()), false);
                    let outcome = runner.run(&host, &context, &vars, &mut reporter).await;
                    (host, outcome)
                })
            })
            .collect();
        let mut outcomes = Vec::with_capacity(total);
        for handle in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!("host task ended abnormally: {}", e),
            }
        }
        outcomes
    } else {
        let mut outcomes = Vec::with_capacity(total);
        for host in hosts {
            let mut reporter = ConsoleReporter::new(Some(host.to_string()), options.spinner());
            let outcome = runner.run(&host, &context, &vars, &mut reporter).await;
            reporter.clear();
            outcomes.push((host, outcome));
        }
        outcomes
    };

    let mut failed = total - outcomes.len();
    for (host, outcome) in outcomes {
        match outcome {
            Ok(summary) => eprintln!("{}", summary_line(&summary.host, &summary)),
            Err(err) => {
                failed += 1;
                info!(host = %host, "host failed");
                report_failure(options, &err);
            }
        }
    }
    if failed > 0 {
        return Err(Error::Hosts { failed, total });
    }
    Ok(())
}

pub fn summary_line(host: &str, summary: &RunSummary) -> String {
    format!(
        "{}: {} asserted, {} rectified, {} would rectify, {} skipped in {:.1}s",
        host,
        summary.asserted,
        summary.rectified,
        summary.would_rectify,
        summary.skipped,
        summary.duration.as_secs_f64()
    )
}

// ============================================================================
// Reporters
// ============================================================================

fn label(statement: &Statement) -> &str {
    statement.description.as_deref().unwrap_or(&statement.name)
}

#[derive(Serialize)]
struct HostResult<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    host: Option<&'a str>,
    #[serde(flatten)]
    result: &'a StatementResult,
}

/// One JSON line per result, tagged with the host when there is one.
pub fn result_line(host: Option<&str>, result: &StatementResult) -> String {
    serde_json::to_string(&HostResult { host, result }).unwrap_or_default()
}

/// Operator-facing output: result lines on stdout, a transient progress
/// line on stderr.
pub struct ConsoleReporter {
    host: Option<String>,
    spinner: bool,
    showing: bool,
}

impl ConsoleReporter {
    pub fn new(host: Option<String>, spinner: bool) -> Self {
        Self {
            host,
            spinner,
            showing: false,
        }
    }

    fn show(&mut self, message: &str) {
        if !self.spinner {
            return;
        }
        let mut err = std::io::stderr();
        let _ = write!(err, "\r\x1b[2K> {}", message);
        let _ = err.flush();
        self.showing = true;
    }

    /// Remove the progress line, if one is showing.
    pub fn clear(&mut self) {
        if self.showing {
            let mut err = std::io::stderr();
            let _ = write!(err, "\r\x1b[2K");
            let _ = err.flush();
            self.showing = false;
        }
    }
}

impl Reporter for ConsoleReporter {
    fn started(&mut self, statement: &Statement) {
        self.show(label(statement));
    }

    fn finished(&mut self, result: &StatementResult) {
        self.clear();
        println!("{}", result_line(self.host.as_deref(), result));
    }

    fn skipped(&mut self, statement: &Statement) {
        info!(assert = %statement.name, "skipped");
    }

    fn progress(&mut self, message: &str) {
        self.show(message);
    }
}

/// Target side of a host run. The driver classifies these lines.
pub struct RemoteReporter;

impl Reporter for RemoteReporter {
    fn started(&mut self, statement: &Statement) {
        println!("> {}", label(statement));
    }

    fn finished(&mut self, result: &StatementResult) {
        println!("{}", result_line(None, result));
    }

    fn skipped(&mut self, statement: &Statement) {
        println!("> {} (skipped)", label(statement));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Outcome;
    use clap::Parser;

    #[derive(Parser)]
    #[command(disable_version_flag = true)]
    struct TestCli {
        #[command(flatten)]
        options: Options,
    }

    fn parse(args: &[&str]) -> Options {
        let mut argv = vec!["spade"];
        argv.extend_from_slice(args);
        TestCli::try_parse_from(argv).unwrap().options
    }

    #[test]
    fn test_sp018_camel_case_flags() {
        let options = parse(&[
            "--host",
            "box:2222",
            "--assertOnly",
            "--noSpinner",
            "--user",
            "fred",
            "main.yaml",
        ]);
        assert_eq!(options.script, Some(PathBuf::from("main.yaml")));
        assert_eq!(options.mode(), RunMode::AssertOnly);
        assert!(options.no_spinner);
        let hosts = options.hosts().unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].to_string(), "fred@box:2222");
    }

    #[test]
    fn test_sp018_dry_run_alias() {
        assert_eq!(parse(&["--dry-run", "x.yaml"]).mode(), RunMode::AssertOnly);
        assert_eq!(parse(&["x.yaml"]).mode(), RunMode::Converge);
    }

    #[test]
    fn test_sp018_script_required_unless_version() {
        assert!(parse(&["--version"]).script.is_none());
        assert!(TestCli::try_parse_from(["spade"]).is_err());
    }

    #[test]
    fn test_sp018_hidden_remote_flags() {
        let options = parse(&["--remote", "--varsFile", "vars.json", "main.yaml"]);
        assert!(options.remote);
        assert_eq!(options.vars_file, Some(PathBuf::from("vars.json")));
        assert!(!options.spinner());
    }

    #[test]
    fn test_sp018_parse_host() {
        let spec = parse_host("box").unwrap();
        assert_eq!((spec.host.as_str(), spec.port, spec.user), ("box", None, None));

        let spec = parse_host("root@10.0.0.5:22").unwrap();
        assert_eq!(spec.host, "10.0.0.5");
        assert_eq!(spec.port, Some(22));
        assert_eq!(spec.user.as_deref(), Some("root"));

        assert!(parse_host("box:ssh").is_err());
        assert!(parse_host(":22").is_err());
        assert!(parse_host("@box").is_err());
    }

    #[test]
    fn test_sp018_host_file_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts.yaml");
        std::fs::write(
            &path,
            "- host: web1\n- host: web2\n  port: 2200\n  user: deploy\n",
        )
        .unwrap();

        let options = Options {
            host_file: Some(path),
            user: Some("ops".into()),
            port: Some(22),
            identity: Some(PathBuf::from("/keys/id")),
            ..Options::default()
        };
        let hosts = options.hosts().unwrap();
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[0].to_string(), "ops@web1:22");
        assert_eq!(hosts[1].to_string(), "deploy@web2:2200");
        assert_eq!(hosts[1].identity, Some(PathBuf::from("/keys/id")));
    }

    #[test]
    fn test_sp018_bad_host_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts.yaml");
        std::fs::write(&path, "host: not-a-list\n").unwrap();
        assert!(matches!(load_host_file(&path), Err(Error::Runtime(_))));
        assert!(matches!(
            load_host_file(&dir.path().join("missing.yaml")),
            Err(Error::Io { .. })
        ));
    }

    #[test]
    fn test_sp018_result_line() {
        let result = StatementResult {
            outcome: Outcome::WouldRectify,
            assert: "FileExists".into(),
            description: None,
            location: "main.yaml:3:5".into(),
            result: serde_json::json!({"file": "/etc/motd"}),
        };
        assert_eq!(
            result_line(Some("box"), &result),
            r#"{"host":"box","outcome":"wouldRectify","assert":"FileExists","location":"main.yaml:3:5","result":{"file":"/etc/motd"}}"#
        );
        let bare: StatementResult = serde_json::from_str(&result_line(None, &result)).unwrap();
        assert_eq!(bare, result);
    }

    #[test]
    fn test_sp018_summary_line() {
        let summary = RunSummary {
            host: "box".into(),
            asserted: 3,
            rectified: 1,
            would_rectify: 0,
            skipped: 2,
            duration: Duration::from_millis(1500),
        };
        assert_eq!(
            summary_line("box", &summary),
            "box: 3 asserted, 1 rectified, 0 would rectify, 2 skipped in 1.5s"
        );
    }

    #[tokio::test]
    async fn test_sp018_remote_mode_runs_with_shipped_vars() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.txt");
        std::fs::write(
            dir.path().join("main.yaml"),
            format!(
                "vars:\n  name: ignored\nstatements:\n  - assert: FileExists\n    with:\n      file: {}\n      contents: \"{{vars.name}}\"\n",
                target.display()
            ),
        )
        .unwrap();
        std::fs::write(dir.path().join("vars.json"), r#"{"name": "shipped"}"#).unwrap();

        let options = Options {
            script: Some(dir.path().join("main.yaml")),
            remote: true,
            vars_file: Some(dir.path().join("vars.json")),
            ..Options::default()
        };
        dispatch(&options).await.unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "shipped");
    }
}
