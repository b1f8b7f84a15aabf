//! Privilege escalation for setup commands
//!
//! Escalation is decided once per host, then applied per shell segment: in
//! `curl ... | gpg --dearmor -o /etc/...` only the `gpg` segment gets `sudo`.

use crate::detect::probe;
use crate::error::InstallError;
use superviz_ssh::{CallContext, RemoteExecutor};
use tracing::{debug, info};

/// Package manager configuration directories; write access to any of them
/// means escalation is not needed
pub const CONFIG_DIRS: [&str; 4] = ["/etc/apt", "/etc/apk", "/etc/yum.repos.d", "/etc/pacman.d"];

/// Programs that always need privileges
const PACKAGE_MANAGERS: &[&str] = &["apt", "apt-get", "apk", "yum", "dnf", "rpm", "pacman", "pacman-key"];

/// Programs that need privileges when they touch a system path
const WRITERS: &[&str] = &[
    "tee", "curl", "gpg", "cp", "mv", "install", "mkdir", "chmod", "ln", "rm",
];

const SYSTEM_PATHS: &[&str] = &["/etc/", "/usr/", "/var/lib/"];

/// Decides and applies `sudo` prefixes
#[derive(Debug, Default, Clone, Copy)]
pub struct SudoHelper;

impl SudoHelper {
    /// Whether commands must run through sudo on this host
    ///
    /// Returns [`InstallError::SudoUnavailable`] when privileges are missing
    /// and sudo is not installed.
    pub async fn is_needed(ctx: &CallContext, exec: &dyn RemoteExecutor) -> Result<bool, InstallError> {
        for dir in CONFIG_DIRS {
            if probe(ctx, exec, &format!("test -w {}", dir)).await? {
                debug!("{} is writable, running without sudo", dir);
                return Ok(false);
            }
        }

        if probe(ctx, exec, "command -v sudo").await? {
            info!("Package manager configuration is not writable, using sudo");
            Ok(true)
        } else {
            Err(InstallError::SudoUnavailable)
        }
    }

    /// Prefix the privileged segments of each command with `sudo`
    pub fn add_prefix(commands: &[String], needed: bool) -> Vec<String> {
        if !needed {
            return commands.to_vec();
        }
        commands.iter().map(|command| prefix_command(command)).collect()
    }
}

fn prefix_command(command: &str) -> String {
    let mut out = String::with_capacity(command.len() + 16);
    for (segment, separator) in split_segments(command) {
        if is_privileged(segment) {
            let trimmed = segment.trim_start();
            out.push_str(&segment[..segment.len() - trimmed.len()]);
            out.push_str("sudo ");
            out.push_str(trimmed);
        } else {
            out.push_str(segment);
        }
        out.push_str(separator);
    }
    out
}

/// Split at `&&`, `||`, `;` and `|` outside quotes, keeping each separator
fn split_segments(command: &str) -> Vec<(&str, &str)> {
    let bytes = command.as_bytes();
    let mut segments = Vec::new();
    let mut start = 0;
    let mut i = 0;
    let mut single = false;
    let mut double = false;

    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b'\\' if !single => {
                i += 2;
                continue;
            }
            b'\'' if !double => single = !single,
            b'"' if !single => double = !double,
            b'&' | b'|' | b';' if !single && !double => {
                let width = match (c, bytes.get(i + 1)) {
                    (b'&', Some(b'&')) | (b'|', Some(b'|')) => 2,
                    (b';', _) | (b'|', _) => 1,
                    // A lone `&` backgrounds the command; not a split point
                    _ => {
                        i += 1;
                        continue;
                    }
                };
                segments.push((&command[start..i], &command[i..i + width]));
                i += width;
                start = i;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    segments.push((&command[start.min(command.len())..], ""));
    segments
}

fn is_privileged(segment: &str) -> bool {
    let mut words = segment
        .split_whitespace()
        .skip_while(|w| is_env_assignment(w));
    let Some(program) = words.next() else {
        return false;
    };
    let program = program.rsplit('/').next().unwrap_or(program);

    if program == "sudo" {
        return false;
    }
    if PACKAGE_MANAGERS.contains(&program) {
        return true;
    }
    WRITERS.contains(&program) && words.any(touches_system_path)
}

fn is_env_assignment(word: &str) -> bool {
    match word.split_once('=') {
        Some((name, _)) => !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'),
        None => false,
    }
}

fn touches_system_path(word: &str) -> bool {
    let word = word.trim_matches(|c| c == '\'' || c == '"');
    SYSTEM_PATHS.iter().any(|path| {
        word.starts_with(path) || word.contains(&format!("={}", path))
    })
}
