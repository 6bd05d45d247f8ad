//! SP-010: Terminal output classification.
//!
//! Raw pty chunks are stripped of ANSI escapes, split into trimmed lines and
//! each line tagged with at most one meaning. The SSH scanner carries partial
//! JSON between chunks; everything else is a pure function of the chunk.

use once_cell::sync::Lazy;
use regex::Regex;

/// Primary prompt installed on the remote shell.
pub const PS1_SENTINEL: &str = "SPADE1>";
/// Continuation prompt installed on the remote shell.
pub const PS2_SENTINEL: &str = "SPADE2>";
/// Native prompt of the sftp client.
pub const SFTP_PROMPT: &str = "sftp>";

// ============================================================================
// Line helpers
// ============================================================================

/// CSI (7- and 8-bit), OSC ending at BEL or ESC, charset selects, and any
/// other two-byte escape. Unterminated sequences run to the end of the text.
static ANSI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"\x1b\[[^\x40-\x7e]*[\x40-\x7e]?",
        r"|\x{9b}[^\x40-\x7e]*[\x40-\x7e]?",
        r"|\x1b\][^\x07\x1b]*(?:\x07|\x1b(?s:.)?|$)",
        r"|\x1b[()#](?s:.)?",
        r"|\x1b(?s:.)?",
    ))
    .expect("ANSI pattern must compile")
});

static VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^v?\d+\.\d+\.\d+").expect("version pattern must compile"));

static LOGIN_PROMPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^.+@.+'s password:").expect("login pattern must compile"));

static PERMISSION_DENIED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^.+@.+: Permission denied").expect("permission pattern must compile")
});

static LISTING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[dl-][rwx-]{9}").expect("listing pattern must compile"));

pub fn strip_ansi(text: &str) -> String {
    ANSI.replace_all(text, "").into_owned()
}

/// Split on `\r\n`, `\n` or `\r` and trim. A trailing newline yields a final
/// empty line, so "ready" only holds when the prompt is the very last thing.
pub fn split_lines(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                lines.push(current.trim().to_string());
                current.clear();
            }
            '\n' => {
                lines.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    lines.push(current.trim().to_string());
    lines
}

fn is_exit_code(line: &str) -> bool {
    !line.is_empty() && line.chars().all(|c| c.is_ascii_digit())
}

/// Open minus close braces, ignoring any inside JSON string literals.
fn brace_balance(text: &str) -> i64 {
    let mut depth = 0;
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => depth -= 1,
            _ => {}
        }
    }
    depth
}

// ============================================================================
// SSH
// ============================================================================

/// Meaning of one non-JSON line of remote shell output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    Empty,
    ConnectionRefused,
    Error,
    ExitCode(i32),
    Output,
    Start,
    SudoPrompt,
    LoginPrompt,
    PermissionDenied,
    VerificationPrompt,
    PassphraseRequired,
    Other,
}

/// Classify one trimmed line. Checks run in priority order.
pub fn classify_line(line: &str) -> LineKind {
    if line.is_empty() {
        LineKind::Empty
    } else if line.ends_with(": Connection refused") {
        LineKind::ConnectionRefused
    } else if line.starts_with("error:") || line.starts_with("warning:") {
        LineKind::Error
    } else if is_exit_code(line) {
        line.parse().map(LineKind::ExitCode).unwrap_or(LineKind::Other)
    } else if VERSION.is_match(line) || line.starts_with('/') {
        LineKind::Output
    } else if line.starts_with('>') {
        LineKind::Start
    } else if line.starts_with("[sudo] password for") {
        LineKind::SudoPrompt
    } else if LOGIN_PROMPT.is_match(line) {
        LineKind::LoginPrompt
    } else if PERMISSION_DENIED.is_match(line) {
        LineKind::PermissionDenied
    } else if line.starts_with("Verification code:") {
        LineKind::VerificationPrompt
    } else if line.starts_with("Enter passphrase for") {
        LineKind::PassphraseRequired
    } else {
        LineKind::Other
    }
}

/// Everything recognized in one chunk of SSH output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SshEvents {
    pub output_lines: Vec<String>,
    pub error_lines: Vec<String>,
    pub json_lines: Vec<String>,
    /// Text after the `>` of the last start marker
    pub start_line: Option<String>,
    pub exit_code: Option<i32>,
    pub ready: bool,
    pub permission_denied: bool,
    pub connection_refused: bool,
    pub passphrase_required: bool,
    pub login_prompt: Option<String>,
    pub sudo_prompt: Option<String>,
    pub verification_prompt: Option<String>,
}

/// Stateful SSH chunk scanner. Reassembles JSON split across chunks.
#[derive(Debug, Default)]
pub struct SshScanner {
    partial_json: Option<String>,
}

impl SshScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scan(&mut self, chunk: &str) -> SshEvents {
        let lines = split_lines(&strip_ansi(chunk));
        let mut events = SshEvents::default();

        for line in &lines {
            if line.is_empty() {
                continue;
            }

            if self.partial_json.is_some() || line.starts_with('{') {
                let joined = match self.partial_json.take() {
                    Some(partial) => partial + line,
                    None => line.clone(),
                };
                if brace_balance(&joined) == 0 {
                    events.json_lines.push(joined);
                } else {
                    self.partial_json = Some(joined);
                }
                continue;
            }

            match classify_line(line) {
                LineKind::ConnectionRefused => events.connection_refused = true,
                LineKind::Error => events.error_lines.push(line.clone()),
                LineKind::ExitCode(code) => events.exit_code = Some(code),
                LineKind::Output => events.output_lines.push(line.clone()),
                LineKind::Start => events.start_line = Some(line[1..].trim().to_string()),
                LineKind::SudoPrompt => events.sudo_prompt = Some(line.clone()),
                LineKind::LoginPrompt => events.login_prompt = Some(line.clone()),
                LineKind::PermissionDenied => events.permission_denied = true,
                LineKind::VerificationPrompt => events.verification_prompt = Some(line.clone()),
                LineKind::PassphraseRequired => events.passphrase_required = true,
                LineKind::Empty | LineKind::Other => {}
            }
        }

        events.ready = lines
            .last()
            .is_some_and(|l| l.ends_with(PS1_SENTINEL) || l.ends_with(PS2_SENTINEL));
        events
    }
}

// ============================================================================
// SFTP
// ============================================================================

/// Everything recognized in one chunk of sftp output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SftpEvents {
    pub info_lines: Vec<String>,
    pub error_lines: Vec<String>,
    pub ready: bool,
    pub login_prompt: Option<String>,
    pub permission_denied: bool,
    pub not_found: bool,
}

pub fn scan_sftp(chunk: &str) -> SftpEvents {
    let lines = split_lines(&strip_ansi(chunk));
    let mut events = SftpEvents::default();

    for line in &lines {
        if line.is_empty() {
            continue;
        } else if line.starts_with("error:") || line.starts_with("warning:") {
            events.error_lines.push(line.clone());
        } else if LOGIN_PROMPT.is_match(line) {
            events.login_prompt = Some(line.clone());
        } else if PERMISSION_DENIED.is_match(line) {
            events.permission_denied = true;
        } else if line.ends_with("not found") {
            events.not_found = true;
        } else if LISTING.is_match(line) {
            events.info_lines.push(line.clone());
        }
    }

    events.ready = lines.last().is_some_and(|l| l.ends_with(SFTP_PROMPT));
    events
}

/// Attributes parsed from one `ls -l` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathInfo {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
}

/// Parse `-rwxr-xr-x ? 1000 1000 9999 ...` into permission bits and ids.
pub fn parse_listing(line: &str) -> Option<PathInfo> {
    if !LISTING.is_match(line) {
        return None;
    }
    let mut fields = line.split_whitespace();
    let perms = fields.next()?;
    if perms.len() != 10 || fields.next()? != "?" {
        return None;
    }
    let uid = fields.next()?.parse().ok()?;
    let gid = fields.next()?.parse().ok()?;
    let size = fields.next()?.parse().ok()?;

    let mode = perms
        .chars()
        .skip(1)
        .zip((0..9).rev())
        .filter(|(c, _)| *c != '-')
        .fold(0, |mode, (_, bit)| mode | (1 << bit));

    Some(PathInfo {
        mode,
        uid,
        gid,
        size,
    })
}
