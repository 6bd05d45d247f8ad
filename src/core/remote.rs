//! SP-017: Remote driver.
//!
//! Runs a resolved script context on one host:
//! 1. Connect the terminal and file-transfer sessions
//! 2. Check the platform, then the installed `spade` version; upload and
//!    install this executable when it is missing or older
//! 3. Upload every script plus the interpolated global vars to a temp dir
//! 4. Run `spade --remote` there and stream its JSON result lines back
//! 5. Clean up and close both sessions, whatever happened
//!
//! Every failure comes back as `Error::Remote` naming the host.

use super::error::{Error, Result};
use super::executor::Reporter;
use super::host::FileSystem;
use super::types::*;
use crate::transport::pty::{PtySpawner, SecretPrompt};
use crate::transport::sftp::SftpSession;
use crate::transport::ssh::SshSession;
use crate::transport::{
    shell_quote, ConnectOptions, FileTransferSession, NoOutput, OutputSink, RunOptions, RunOutput,
    TerminalSession,
};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where the tool is installed on remote hosts.
pub const REMOTE_BIN: &str = "/usr/local/bin/spade";

/// Name of the shipped vars file inside the remote work dir.
pub const VARS_FILE: &str = "vars.json";

/// Creates the session pair for one host.
pub trait SessionFactory: Send + Sync {
    fn terminal(&self) -> Box<dyn TerminalSession>;
    fn file_transfer(&self) -> Box<dyn FileTransferSession>;
}

/// `ssh` and `sftp` under pseudo-terminals.
pub struct PtySessions {
    pub spawner: Arc<dyn PtySpawner>,
    pub prompt: Arc<dyn SecretPrompt>,
}

impl SessionFactory for PtySessions {
    fn terminal(&self) -> Box<dyn TerminalSession> {
        Box::new(SshSession::new(
            Arc::clone(&self.spawner),
            Arc::clone(&self.prompt),
        ))
    }

    fn file_transfer(&self) -> Box<dyn FileTransferSession> {
        Box::new(SftpSession::new(
            Arc::clone(&self.spawner),
            Arc::clone(&self.prompt),
        ))
    }
}

/// Settings shared by every host of a run.
#[derive(Debug, Clone, Default)]
pub struct RemoteOptions {
    pub mode: RunMode,
    pub no_prompts: bool,
    /// Limit for connects and housekeeping commands; the script run itself is unbounded
    pub timeout: Option<Duration>,
    pub login_passwords: HashMap<String, String>,
    /// Executable to install remotely; defaults to the running one
    pub executable: Option<PathBuf>,
}

/// A `major.minor.patch` version.
pub type Version = (u64, u64, u64);

/// Parse `x.y.z` or `vx.y.z`, ignoring anything after the patch number.
pub fn parse_version(text: &str) -> Option<Version> {
    let text = text.trim();
    let text = text.strip_prefix('v').unwrap_or(text);
    let mut parts = text.splitn(3, '.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch_text = parts.next()?;
    let digits = patch_text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(patch_text.len());
    let patch = patch_text[..digits].parse().ok()?;
    Some((major, minor, patch))
}

/// Whether `uname -s` / `uname -m` output names this build's platform.
pub fn platform_matches(system: &str, machine: &str) -> bool {
    let os = match system.to_ascii_lowercase().as_str() {
        "darwin" => "macos".to_string(),
        other => other.to_string(),
    };
    let arch = match machine {
        "arm64" => "aarch64",
        "amd64" => "x86_64",
        other => other,
    };
    os == std::env::consts::OS && arch == std::env::consts::ARCH
}

/// Runs scripts on remote hosts.
pub struct RemoteRunner {
    sessions: Arc<dyn SessionFactory>,
    fs: Arc<dyn FileSystem>,
    options: RemoteOptions,
}

impl RemoteRunner {
    pub fn new(
        sessions: Arc<dyn SessionFactory>,
        fs: Arc<dyn FileSystem>,
        options: RemoteOptions,
    ) -> Self {
        Self {
            sessions,
            fs,
            options,
        }
    }

    /// Converge `context` on `host`. `vars` are the already interpolated globals.
    pub async fn run(
        &self,
        host: &HostSpec,
        context: &ScriptContext,
        vars: &Map<String, Value>,
        reporter: &mut dyn Reporter,
    ) -> Result<RunSummary> {
        let start = std::time::Instant::now();
        let mut ssh = self.sessions.terminal();
        let mut sftp = self.sessions.file_transfer();

        let mut driver = Driver {
            ssh: ssh.as_mut(),
            sftp: sftp.as_mut(),
            fs: self.fs.as_ref(),
            options: &self.options,
        };
        let outcome = driver.converge(host, context, vars, reporter).await;

        ssh.close();
        sftp.close();

        match outcome {
            Ok(mut summary) => {
                summary.host = host.to_string();
                summary.duration = start.elapsed();
                info!(host = %host, rectified = summary.rectified, "remote run complete");
                Ok(summary)
            }
            Err(e) => Err(Error::remote(host.to_string(), e)),
        }
    }
}

struct Driver<'a> {
    ssh: &'a mut dyn TerminalSession,
    sftp: &'a mut dyn FileTransferSession,
    fs: &'a dyn FileSystem,
    options: &'a RemoteOptions,
}

impl Driver<'_> {
    async fn converge(
        &mut self,
        host: &HostSpec,
        context: &ScriptContext,
        vars: &Map<String, Value>,
        reporter: &mut dyn Reporter,
    ) -> Result<RunSummary> {
        let connect = ConnectOptions {
            no_prompts: self.options.no_prompts,
            timeout: self.options.timeout,
            login_passwords: self.options.login_passwords.clone(),
            ..ConnectOptions::for_host(host)
        };
        self.ssh.connect(&connect).await?;
        self.sftp.connect(&connect).await?;

        self.ensure_platform().await?;
        self.ensure_runtime().await?;

        let work_dir = self.first_path("mktemp -d").await?;
        let outcome = self.ship_and_run(context, vars, &work_dir, reporter).await;

        let cleanup = format!("rm -rf {}", shell_quote(&work_dir));
        if let Err(e) = self.command(&cleanup, false, true).await {
            warn!(dir = %work_dir, "unable to remove remote work dir: {}", e);
        }
        outcome
    }

    /// Run a housekeeping command under the configured timeout.
    async fn command(
        &mut self,
        command: &str,
        sudo: bool,
        no_throw: bool,
    ) -> Result<RunOutput> {
        let options = RunOptions {
            sudo,
            no_throw,
            timeout: self.options.timeout,
            ..RunOptions::default()
        };
        debug!(command, "remote command");
        Ok(self
            .ssh
            .run(command, &options, &mut NoOutput)
            .await?)
    }

    /// First absolute-path line a command printed.
    async fn first_path(&mut self, command: &str) -> Result<String> {
        let out = self.command(command, false, false).await?;
        out.output
            .into_iter()
            .find(|line| line.starts_with('/'))
            .ok_or_else(|| Error::Runtime(format!("'{}' printed no path", command)))
    }

    async fn ensure_platform(&mut self) -> Result<()> {
        let line = self
            .first_path("bash -c 'echo /$(uname -s)/$(uname -m)'")
            .await?;
        let mut parts = line.trim_start_matches('/').splitn(2, '/');
        let system = parts.next().unwrap_or_default();
        let machine = parts.next().unwrap_or_default();
        if !platform_matches(system, machine) {
            return Err(Error::Runtime(format!(
                "remote platform {}/{} does not match local {}/{}",
                system,
                machine,
                std::env::consts::OS,
                std::env::consts::ARCH
            )));
        }
        Ok(())
    }

    async fn remote_version(&mut self) -> Result<Option<Version>> {
        let out = self.command("spade --version", false, true).await?;
        if out.exit_code != 0 {
            return Ok(None);
        }
        Ok(out.output.iter().find_map(|line| parse_version(line)))
    }

    /// Install this executable remotely unless an equal or newer one is there.
    async fn ensure_runtime(&mut self) -> Result<()> {
        let wanted = env!("CARGO_PKG_VERSION");
        let local = parse_version(wanted)
            .ok_or_else(|| Error::Runtime(format!("bad local version '{}'", wanted)))?;

        match self.remote_version().await? {
            Some(remote) if remote >= local => {
                debug!(?remote, "remote spade is current");
                return Ok(());
            }
            found => info!(?found, wanted, "installing spade on remote"),
        }

        let exe = match &self.options.executable {
            Some(path) => path.clone(),
            None => std::env::current_exe()
                .map_err(|e| Error::io("unable to locate the running executable", e))?,
        };
        let staged = self.first_path("mktemp").await?;
        self.sftp
            .put_file(&exe, &staged, self.options.timeout)
            .await?;
        self.command(
            &format!("install -m 0755 {} {}", shell_quote(&staged), REMOTE_BIN),
            true,
            false,
        )
        .await?;
        self.command(&format!("rm -f {}", shell_quote(&staged)), false, true)
            .await?;

        match self.remote_version().await? {
            Some(remote) if remote >= local => Ok(()),
            _ => Err(Error::Runtime(format!(
                "spade {} is still not available after install",
                wanted
            ))),
        }
    }

    async fn ship_and_run(
        &mut self,
        context: &ScriptContext,
        vars: &Map<String, Value>,
        work_dir: &str,
        reporter: &mut dyn Reporter,
    ) -> Result<RunSummary> {
        let relative = relative_paths(context)?;

        let dirs: BTreeSet<String> = relative
            .iter()
            .filter_map(|rel| Path::new(rel).parent())
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| shell_quote(&format!("{}/{}", work_dir, p.display())))
            .collect();
        if !dirs.is_empty() {
            let dirs: Vec<String> = dirs.into_iter().collect();
            self.command(&format!("mkdir -p {}", dirs.join(" ")), false, false)
                .await?;
        }

        for (path, rel) in context.script_paths.iter().zip(&relative) {
            let bytes = self
                .fs
                .read(path)
                .map_err(|e| Error::io(format!("unable to read {}", path.display()), e))?;
            self.sftp
                .put_content(&format!("{}/{}", work_dir, rel), &bytes, self.options.timeout)
                .await?;
        }

        let shipped = serde_json::to_vec_pretty(vars)
            .map_err(|e| Error::Runtime(format!("unable to encode vars: {}", e)))?;
        self.sftp
            .put_content(&format!("{}/{}", work_dir, VARS_FILE), &shipped, self.options.timeout)
            .await?;

        let entry = relative.first().cloned().unwrap_or_default();
        let mut command = format!("spade --remote --varsFile {}", VARS_FILE);
        if self.options.mode == RunMode::AssertOnly {
            command.push_str(" --assertOnly");
        }
        command.push(' ');
        command.push_str(&shell_quote(&entry));

        let options = RunOptions {
            cwd: Some(work_dir.to_string()),
            sudo: context.any_script_has_becomes,
            no_throw: true,
            timeout: None,
        };
        let mut sink = ResultSink {
            reporter,
            summary: RunSummary::default(),
            errors: Vec::new(),
        };
        let out = self.ssh.run(&command, &options, &mut sink).await?;

        if out.exit_code != 0 {
            let detail = if sink.errors.is_empty() {
                format!("remote run exited with code {}", out.exit_code)
            } else {
                sink.errors.join("\n")
            };
            return Err(Error::Runtime(detail));
        }
        Ok(sink.summary)
    }
}

/// Script paths relative to the root dir, in `script_paths` order.
fn relative_paths(context: &ScriptContext) -> Result<Vec<String>> {
    context
        .script_paths
        .iter()
        .map(|path| {
            path.strip_prefix(&context.root_dir)
                .map(|rel| rel.to_string_lossy().to_string())
                .map_err(|_| {
                    Error::Runtime(format!(
                        "script {} is outside {} and cannot be uploaded",
                        path.display(),
                        context.root_dir.display()
                    ))
                })
        })
        .collect()
}

/// Turns streamed remote lines into reporter calls.
struct ResultSink<'a> {
    reporter: &'a mut dyn Reporter,
    summary: RunSummary,
    errors: Vec<String>,
}

impl OutputSink for ResultSink<'_> {
    fn start(&mut self, line: &str) {
        self.reporter.progress(line);
    }

    fn json(&mut self, line: &str) {
        match serde_json::from_str::<StatementResult>(line) {
            Ok(result) => {
                self.summary.record(result.outcome);
                self.reporter.finished(&result);
            }
            Err(e) => warn!(line, "ignoring unreadable result line: {}", e),
        }
    }

    fn error(&mut self, line: &str) {
        warn!("remote: {}", line);
        let message = line.strip_prefix("error:").unwrap_or(line).trim();
        self.errors.push(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::SessionError;
    use crate::core::host::RealFs;
    use crate::core::resolver::create_script_context;
    use crate::transport::classify::PathInfo;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Shared record of what the fake sessions did.
    #[derive(Default)]
    struct Remote {
        version: Option<String>,
        refuse: bool,
        run_exit: i32,
        commands: Vec<(String, RunOptions)>,
        uploads: Vec<(String, Vec<u8>)>,
        closed: usize,
    }

    type Shared = Arc<Mutex<Remote>>;

    struct FakeTerminal(Shared);

    #[async_trait]
    impl TerminalSession for FakeTerminal {
        async fn connect(&mut self, options: &ConnectOptions) -> Result<(), SessionError> {
            if self.0.lock().unwrap().refuse {
                return Err(SessionError::ConnectionRefused {
                    host: options.host.clone(),
                });
            }
            Ok(())
        }

        async fn run(
            &mut self,
            command: &str,
            options: &RunOptions,
            sink: &mut dyn OutputSink,
        ) -> Result<RunOutput, SessionError> {
            let mut remote = self.0.lock().unwrap();
            remote.commands.push((command.to_string(), options.clone()));
            let reply = |exit_code: i32, lines: &[&str]| RunOutput {
                exit_code,
                output: lines.iter().map(|l| l.to_string()).collect(),
            };

            Ok(if command.starts_with("bash -c 'echo /$(uname") {
                let line = format!("/{}/{}", uname_system(), std::env::consts::ARCH);
                reply(0, &[&line])
            } else if command == "spade --version" {
                match &remote.version {
                    Some(v) => reply(0, &[v.as_str()]),
                    None => reply(127, &[]),
                }
            } else if command == "mktemp" {
                reply(0, &["/tmp/tmp.stage"])
            } else if command == "mktemp -d" {
                reply(0, &["/tmp/tmp.work"])
            } else if command.starts_with("install ") {
                remote.version = Some(env!("CARGO_PKG_VERSION").to_string());
                reply(0, &[])
            } else if command.starts_with("spade --remote") {
                sink.start("Creating motd");
                sink.json(
                    r#"{"outcome":"rectified","assert":"FileExists","location":"main.yaml:2:5","result":{"file":"/etc/motd"}}"#,
                );
                sink.json(
                    r#"{"outcome":"asserted","assert":"FileExists","location":"main.yaml:5:5","result":{}}"#,
                );
                if remote.run_exit != 0 {
                    sink.error("error: Argument 'file' is required (main.yaml:8:5)");
                }
                reply(remote.run_exit, &[])
            } else {
                reply(0, &[])
            })
        }

        fn close(&mut self) {
            self.0.lock().unwrap().closed += 1;
        }
    }

    fn uname_system() -> &'static str {
        match std::env::consts::OS {
            "macos" => "Darwin",
            _ => "Linux",
        }
    }

    struct FakeTransfer(Shared);

    #[async_trait]
    impl FileTransferSession for FakeTransfer {
        async fn connect(&mut self, _options: &ConnectOptions) -> Result<(), SessionError> {
            Ok(())
        }

        async fn get_info(
            &mut self,
            path: &str,
            _timeout: Option<Duration>,
        ) -> Result<PathInfo, SessionError> {
            Err(SessionError::NotFound {
                path: path.to_string(),
            })
        }

        async fn put_file(
            &mut self,
            local: &Path,
            remote: &str,
            _timeout: Option<Duration>,
        ) -> Result<(), SessionError> {
            let bytes = std::fs::read(local).map_err(SessionError::Write)?;
            self.0.lock().unwrap().uploads.push((remote.to_string(), bytes));
            Ok(())
        }

        async fn put_content(
            &mut self,
            remote: &str,
            contents: &[u8],
            _timeout: Option<Duration>,
        ) -> Result<(), SessionError> {
            self.0
                .lock()
                .unwrap()
                .uploads
                .push((remote.to_string(), contents.to_vec()));
            Ok(())
        }

        fn close(&mut self) {
            self.0.lock().unwrap().closed += 1;
        }
    }

    struct FakeSessions(Shared);

    impl SessionFactory for FakeSessions {
        fn terminal(&self) -> Box<dyn TerminalSession> {
            Box::new(FakeTerminal(Arc::clone(&self.0)))
        }
        fn file_transfer(&self) -> Box<dyn FileTransferSession> {
            Box::new(FakeTransfer(Arc::clone(&self.0)))
        }
    }

    #[derive(Default)]
    struct Recorder(Vec<String>);

    impl Reporter for Recorder {
        fn finished(&mut self, result: &StatementResult) {
            self.0.push(format!("{}:{}", result.assert, result.outcome));
        }
        fn progress(&mut self, message: &str) {
            self.0.push(format!("> {}", message));
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        remote: Shared,
    }

    impl Fixture {
        fn new(remote: Remote) -> Self {
            let dir = tempfile::tempdir().unwrap();
            std::fs::create_dir_all(dir.path().join("lib")).unwrap();
            std::fs::write(
                dir.path().join("main.yaml"),
                "includes:\n  - lib/base.yaml\nstatements: []\n",
            )
            .unwrap();
            std::fs::write(dir.path().join("lib/base.yaml"), "statements: []\n").unwrap();
            std::fs::write(dir.path().join("spade-bin"), b"ELF").unwrap();
            Self {
                dir,
                remote: Arc::new(Mutex::new(remote)),
            }
        }

        async fn run(&self, mode: RunMode) -> (Result<RunSummary>, Vec<String>) {
            let context = create_script_context(&self.dir.path().join("main.yaml"), &RealFs).unwrap();
            let runner = RemoteRunner::new(
                Arc::new(FakeSessions(Arc::clone(&self.remote))),
                Arc::new(RealFs),
                RemoteOptions {
                    mode,
                    executable: Some(self.dir.path().join("spade-bin")),
                    ..RemoteOptions::default()
                },
            );
            let host = HostSpec {
                host: "box".into(),
                port: None,
                user: Some("fred".into()),
                identity: None,
            };
            let mut vars = Map::new();
            vars.insert("greeting".into(), Value::from("hi"));
            let mut recorder = Recorder::default();
            let result = runner.run(&host, &context, &vars, &mut recorder).await;
            (result, recorder.0)
        }

        fn commands(&self) -> Vec<String> {
            self.remote
                .lock()
                .unwrap()
                .commands
                .iter()
                .map(|(c, _)| c.clone())
                .collect()
        }

        fn uploads(&self) -> Vec<String> {
            self.remote
                .lock()
                .unwrap()
                .uploads
                .iter()
                .map(|(path, _)| path.clone())
                .collect()
        }
    }

    fn current() -> Remote {
        Remote {
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
            ..Remote::default()
        }
    }

    #[test]
    fn test_sp017_parse_version() {
        assert_eq!(parse_version("0.4.0"), Some((0, 4, 0)));
        assert_eq!(parse_version("v10.2.31\n"), Some((10, 2, 31)));
        assert_eq!(parse_version("1.2.3-beta.1"), Some((1, 2, 3)));
        assert_eq!(parse_version("spade 1.2.3"), None);
        assert_eq!(parse_version("1.2"), None);
        assert!(parse_version("0.10.0") > parse_version("0.9.9"));
    }

    #[test]
    fn test_sp017_platform_matches() {
        assert!(platform_matches(uname_system(), std::env::consts::ARCH));
        assert!(!platform_matches("Plan9", std::env::consts::ARCH));
    }

    #[tokio::test]
    async fn test_sp017_current_remote_ships_and_runs() {
        let fx = Fixture::new(current());
        let (result, seen) = fx.run(RunMode::Converge).await;
        let summary = result.unwrap();

        assert_eq!(summary.host, "fred@box");
        assert_eq!((summary.rectified, summary.asserted), (1, 1));
        assert_eq!(
            seen,
            vec!["> Creating motd", "FileExists:rectified", "FileExists:asserted"]
        );

        let commands = fx.commands();
        assert!(!commands.iter().any(|c| c.starts_with("install")));
        assert!(commands.contains(&"mkdir -p /tmp/tmp.work/lib".to_string()));
        assert!(commands.contains(&"spade --remote --varsFile vars.json main.yaml".to_string()));
        assert_eq!(commands.last().unwrap(), "rm -rf /tmp/tmp.work");

        assert_eq!(
            fx.uploads(),
            vec![
                "/tmp/tmp.work/main.yaml",
                "/tmp/tmp.work/lib/base.yaml",
                "/tmp/tmp.work/vars.json"
            ]
        );
        let remote = fx.remote.lock().unwrap();
        let vars: Value = serde_json::from_slice(&remote.uploads[2].1).unwrap();
        assert_eq!(vars["greeting"], "hi");

        let (_, run_options) = remote
            .commands
            .iter()
            .find(|(c, _)| c.starts_with("spade --remote"))
            .unwrap();
        assert_eq!(run_options.cwd.as_deref(), Some("/tmp/tmp.work"));
        assert!(!run_options.sudo);
        assert_eq!(remote.closed, 2);
    }

    #[tokio::test]
    async fn test_sp017_missing_remote_installs_first() {
        let fx = Fixture::new(Remote::default());
        let (result, _) = fx.run(RunMode::AssertOnly).await;
        result.unwrap();

        let commands = fx.commands();
        let install = commands
            .iter()
            .position(|c| c == "install -m 0755 /tmp/tmp.stage /usr/local/bin/spade")
            .unwrap();
        let versions: Vec<usize> = commands
            .iter()
            .enumerate()
            .filter(|(_, c)| *c == "spade --version")
            .map(|(i, _)| i)
            .collect();
        assert_eq!(versions.len(), 2);
        assert!(versions[0] < install && install < versions[1]);
        assert!(commands
            .iter()
            .any(|c| c == "spade --remote --varsFile vars.json --assertOnly main.yaml"));

        let remote = fx.remote.lock().unwrap();
        assert_eq!(remote.uploads[0], ("/tmp/tmp.stage".to_string(), b"ELF".to_vec()));
        let (_, install_options) = &remote.commands[install];
        assert!(install_options.sudo);
    }

    #[tokio::test]
    async fn test_sp017_older_remote_is_upgraded() {
        let fx = Fixture::new(Remote {
            version: Some("0.0.1".into()),
            ..Remote::default()
        });
        let (result, _) = fx.run(RunMode::Converge).await;
        result.unwrap();
        assert!(fx.commands().iter().any(|c| c.starts_with("install -m 0755")));
    }

    #[tokio::test]
    async fn test_sp017_connect_failure_names_host_and_closes() {
        let fx = Fixture::new(Remote {
            refuse: true,
            ..current()
        });
        let (result, _) = fx.run(RunMode::Converge).await;
        let err = result.unwrap_err();
        match &err {
            Error::Remote { host, source } => {
                assert_eq!(host, "fred@box");
                assert!(matches!(
                    **source,
                    Error::Session(SessionError::ConnectionRefused { .. })
                ));
            }
            other => panic!("unexpected {other}"),
        }
        assert_eq!(fx.remote.lock().unwrap().closed, 2);
        assert!(fx.commands().is_empty());
    }

    #[tokio::test]
    async fn test_sp017_remote_failure_carries_error_lines() {
        let fx = Fixture::new(Remote {
            run_exit: 1,
            ..current()
        });
        let (result, _) = fx.run(RunMode::Converge).await;
        let err = result.unwrap_err();
        assert!(err
            .to_string()
            .contains("host fred@box: Argument 'file' is required (main.yaml:8:5)"));
        assert_eq!(fx.commands().last().unwrap(), "rm -rf /tmp/tmp.work");
    }

    #[test]
    fn test_sp017_scripts_outside_root_rejected() {
        let context = ScriptContext {
            root_dir: PathBuf::from("/srv/scripts"),
            script_paths: vec![
                PathBuf::from("/srv/scripts/main.yaml"),
                PathBuf::from("/srv/shared/x.yaml"),
            ],
            script_nodes: HashMap::new(),
            any_script_has_becomes: false,
        };
        assert!(matches!(relative_paths(&context), Err(Error::Runtime(_))));
    }
}
