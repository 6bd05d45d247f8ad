//! Host facts exposed to scripts as `sys`.

use nix::unistd::{geteuid, gethostname, User};
use serde_json::{json, Value};

/// Gather facts about the machine this process runs on.
pub fn gather() -> Value {
    let os_release = std::fs::read_to_string("/etc/os-release").unwrap_or_default();
    let (id, version_id) = parse_os_release(&os_release);

    let hostname = gethostname()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_default();

    json!({
        "platform": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "hostname": hostname,
        "id": id,
        "versionId": version_id,
        "user": user_info(),
    })
}

fn user_info() -> Value {
    match User::from_uid(geteuid()) {
        Ok(Some(user)) => json!({
            "name": user.name,
            "uid": user.uid.as_raw(),
            "gid": user.gid.as_raw(),
            "shell": user.shell.to_string_lossy(),
            "homeDir": user.dir.to_string_lossy(),
        }),
        _ => json!({ "uid": geteuid().as_raw() }),
    }
}

/// Pull `ID` and `VERSION_ID` out of `/etc/os-release` text.
pub fn parse_os_release(text: &str) -> (String, String) {
    let mut id = String::new();
    let mut version_id = String::new();
    for line in text.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').trim_matches('\'').to_string();
        match key.trim() {
            "ID" => id = value,
            "VERSION_ID" => version_id = value,
            _ => {}
        }
    }
    (id, version_id)
}
