//! Host key trust: known-hosts store and trust-on-first-use decisions
//!
//! A host key is either already pinned in the known-hosts file (`Verified`),
//! or unknown, in which case it is shown to the user and pinned after an
//! explicit "yes" or because auto-accept is configured. Pinned entries are
//! only ever appended.

use crate::config::{ConnectionConfig, DEFAULT_PORT};
use crate::error::{ErrorKind, SshError};
use crate::prompt::Prompter;
use crate::wire::WireReader;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine as _;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Broad host key family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKeyType {
    /// `ssh-ed25519`
    Ed25519,
    /// `ssh-rsa`
    Rsa,
    /// `ecdsa-sha2-*`
    Ecdsa,
    /// `ssh-dss`
    Dsa,
    /// Anything else
    Unknown,
}

impl HostKeyType {
    /// Classify an SSH algorithm name
    pub fn from_algorithm(algorithm: &str) -> Self {
        match algorithm {
            "ssh-ed25519" => Self::Ed25519,
            "ssh-rsa" => Self::Rsa,
            "ssh-dss" => Self::Dsa,
            a if a.starts_with("ecdsa-sha2-") => Self::Ecdsa,
            _ => Self::Unknown,
        }
    }

    /// Name shown to users
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Ed25519 => "ED25519",
            Self::Rsa => "RSA",
            Self::Ecdsa => "ECDSA",
            Self::Dsa => "DSA",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for HostKeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Public key presented by a server, in SSH wire encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostKey {
    algorithm: String,
    blob: Vec<u8>,
}

impl HostKey {
    /// Build from the wire blob; the algorithm is read from the blob itself
    pub fn from_blob(blob: Vec<u8>) -> Result<Self, SshError> {
        let algorithm = WireReader::new(&blob)
            .read_utf8()
            .ok_or_else(|| SshError::new(ErrorKind::HostKeyRejected, "malformed host key blob"))?
            .to_string();
        Ok(Self { algorithm, blob })
    }

    /// Build from the base64 field of a known-hosts line
    pub fn from_base64(encoded: &str) -> Result<Self, SshError> {
        let blob = STANDARD.decode(encoded.trim()).map_err(|e| {
            SshError::wrap(ErrorKind::HostKeyRejected, "host key is not valid base64", e)
        })?;
        Self::from_blob(blob)
    }

    /// SSH algorithm name, e.g. `ssh-ed25519`
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// Key family
    pub fn key_type(&self) -> HostKeyType {
        HostKeyType::from_algorithm(&self.algorithm)
    }

    /// Raw wire blob
    pub fn blob(&self) -> &[u8] {
        &self.blob
    }

    /// Base64 of the wire blob, as stored in known-hosts files
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.blob)
    }

    /// OpenSSH-style `SHA256:` fingerprint
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&self.blob);
        format!("SHA256:{}", STANDARD_NO_PAD.encode(digest))
    }
}

/// Result of looking a host key up in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMatch {
    /// The exact host/key pair is pinned
    Found,
    /// The host is pinned, but with different keys
    Changed,
    /// The host has no entry
    Unknown,
}

/// Append-only known-hosts file in OpenSSH line format
#[derive(Debug)]
pub struct KnownHostsStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl KnownHostsStore {
    /// Store backed by `path`; the file is created on first append
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// `~/.ssh/known_hosts`
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".ssh").join("known_hosts"))
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Host field for `host` and `port` (`[host]:port` off the default port)
    pub fn host_pattern(host: &str, port: u16) -> String {
        if port == DEFAULT_PORT {
            host.to_string()
        } else {
            format!("[{}]:{}", host, port)
        }
    }

    /// Check whether `key` is pinned for `host:port`
    pub fn lookup(&self, host: &str, port: u16, key: &HostKey) -> io::Result<KeyMatch> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(KeyMatch::Unknown),
            Err(e) => return Err(e),
        };

        let pattern = Self::host_pattern(host, port);
        let encoded = key.to_base64();
        let mut host_seen = false;

        for line in contents.lines() {
            let Some((hosts, algorithm, blob)) = parse_line(line) else {
                continue;
            };
            if !hosts.split(',').any(|h| h == pattern) {
                continue;
            }
            host_seen = true;
            if algorithm == key.algorithm() && blob == encoded {
                return Ok(KeyMatch::Found);
            }
        }

        Ok(if host_seen { KeyMatch::Changed } else { KeyMatch::Unknown })
    }

    /// Pin `key` for `host:port`
    pub fn append(&self, host: &str, port: u16, key: &HostKey) -> io::Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "known hosts lock poisoned"))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
                set_permissions(parent, 0o700)?;
            }
        }

        let mut options = OpenOptions::new();
        options.read(true).append(true).create(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&self.path)?;

        let mut line = String::new();
        if needs_leading_newline(&mut file)? {
            line.push('\n');
        }
        line.push_str(&format!(
            "{} {} {}\n",
            Self::host_pattern(host, port),
            key.algorithm(),
            key.to_base64()
        ));
        file.write_all(line.as_bytes())?;
        file.sync_all()?;

        debug!("Pinned {} host key for {} in {}", key.algorithm(), host, self.path.display());
        Ok(())
    }
}

/// Split a known-hosts line into (hosts, algorithm, base64 key)
///
/// Comments, markers and hashed host entries never match.
fn parse_line(line: &str) -> Option<(&str, &str, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') || line.starts_with('@') || line.starts_with('|') {
        return None;
    }
    let mut fields = line.split_whitespace();
    let hosts = fields.next()?;
    let algorithm = fields.next()?;
    let blob = fields.next()?;
    Some((hosts, algorithm, blob))
}

fn needs_leading_newline(file: &mut std::fs::File) -> io::Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

#[cfg(unix)]
fn set_permissions(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_permissions(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// Outcome of a successful host key check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustDecision {
    /// Verification disabled by configuration
    Skipped,
    /// Key was already pinned
    Verified,
    /// Unknown key pinned because auto-accept is on
    AutoAccepted,
    /// Unknown key pinned after the user said yes
    UserAccepted,
}

/// Produces the host key check used for one connection attempt
pub trait HostKeyManager: Send + Sync {
    /// Build the callback for a connection described by `config`
    fn callback(&self, config: &ConnectionConfig) -> Result<HostKeyCallback, SshError>;
}

enum VerifyPolicy {
    Skip,
    Tofu {
        store: Arc<KnownHostsStore>,
        auto_accept: bool,
    },
}

struct CallbackInner {
    host: String,
    port: u16,
    policy: VerifyPolicy,
    prompter: Arc<dyn Prompter>,
    decision: OnceCell<Result<TrustDecision, SshError>>,
}

/// Host key check for a single connection attempt
///
/// The decision is made on the first [`HostKeyCallback::verify`] call; later
/// calls replay it without prompting again.
#[derive(Clone)]
pub struct HostKeyCallback {
    inner: Arc<CallbackInner>,
}

impl HostKeyCallback {
    /// Callback that accepts any key, warning every time it is used
    pub fn insecure(host: impl Into<String>, port: u16, prompter: Arc<dyn Prompter>) -> Self {
        Self::with_policy(host.into(), port, VerifyPolicy::Skip, prompter)
    }

    /// Trust-on-first-use callback over `store`
    pub fn tofu(
        host: impl Into<String>,
        port: u16,
        store: Arc<KnownHostsStore>,
        auto_accept: bool,
        prompter: Arc<dyn Prompter>,
    ) -> Self {
        Self::with_policy(host.into(), port, VerifyPolicy::Tofu { store, auto_accept }, prompter)
    }

    fn with_policy(host: String, port: u16, policy: VerifyPolicy, prompter: Arc<dyn Prompter>) -> Self {
        Self {
            inner: Arc::new(CallbackInner {
                host,
                port,
                policy,
                prompter,
                decision: OnceCell::new(),
            }),
        }
    }

    /// Decide whether to trust `key`
    pub async fn verify(&self, key: &HostKey) -> Result<TrustDecision, SshError> {
        self.inner
            .decision
            .get_or_init(|| self.inner.decide(key))
            .await
            .clone()
    }

    /// Decision already taken, if any
    pub fn decision(&self) -> Option<Result<TrustDecision, SshError>> {
        self.inner.decision.get().cloned()
    }
}

impl fmt::Debug for HostKeyCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostKeyCallback")
            .field("host", &self.inner.host)
            .field("port", &self.inner.port)
            .field("decision", &self.inner.decision.get())
            .finish()
    }
}

impl CallbackInner {
    fn label(&self) -> String {
        KnownHostsStore::host_pattern(&self.host, self.port)
    }

    async fn decide(&self, key: &HostKey) -> Result<TrustDecision, SshError> {
        let (store, auto_accept) = match &self.policy {
            VerifyPolicy::Skip => {
                warn!("Host key verification disabled for {}", self.label());
                self.prompter.notice(&format!(
                    "WARNING: host key verification is disabled for {}. \
                     The connection is vulnerable to man-in-the-middle attacks.",
                    self.label()
                ));
                return Ok(TrustDecision::Skipped);
            }
            VerifyPolicy::Tofu { store, auto_accept } => (Arc::clone(store), *auto_accept),
        };

        let lookup = {
            let reader = Arc::clone(&store);
            let host = self.host.clone();
            let port = self.port;
            let key = key.clone();
            tokio::task::spawn_blocking(move || reader.lookup(&host, port, &key))
                .await
                .map_err(|e| SshError::wrap(ErrorKind::HostKeyRejected, "known hosts lookup panicked", e))?
                .map_err(|e| {
                    SshError::wrap(ErrorKind::HostKeyRejected, "failed to read known hosts", e)
                        .with_context("known_hosts", store.path().display())
                })?
        };

        if lookup == KeyMatch::Found {
            debug!("Host key for {} matches known hosts", self.label());
            return Ok(TrustDecision::Verified);
        }

        let key_type = key.key_type();
        let fingerprint = key.fingerprint();
        if lookup == KeyMatch::Changed {
            warn!("Host key for {} differs from the pinned key", self.label());
            self.prompter.notice(&format!(
                "WARNING: the {} host key for '{}' does not match any key pinned in {}.\n\
                 Someone could be eavesdropping on you right now, or the host key has just been changed.",
                key_type,
                self.label(),
                store.path().display()
            ));
        } else {
            self.prompter.notice(&format!(
                "The authenticity of host '{}' can't be established.",
                self.label()
            ));
        }
        self.prompter
            .notice(&format!("{} key fingerprint is {}.", key_type, fingerprint));

        // A changed key always needs a human decision
        if auto_accept && lookup == KeyMatch::Unknown {
            self.persist(&store, key).await?;
            warn!("Permanently added {} host key for {}", key_type, self.label());
            self.prompter.notice(&format!(
                "Warning: Permanently added '{}' ({}) to the list of known hosts.",
                self.label(),
                key_type
            ));
            return Ok(TrustDecision::AutoAccepted);
        }

        let answer = {
            let prompter = Arc::clone(&self.prompter);
            tokio::task::spawn_blocking(move || {
                prompter.ask("Are you sure you want to continue connecting (yes/no)?")
            })
            .await
            .map_err(|e| SshError::wrap(ErrorKind::HostKeyRejected, "host key prompt panicked", e))?
            .map_err(|e| SshError::wrap(ErrorKind::HostKeyRejected, "failed to read host key answer", e))?
        };

        let answer = answer.trim().to_lowercase();
        if answer == "yes" || answer == "y" {
            self.persist(&store, key).await?;
            info!("User accepted {} host key for {}", key_type, self.label());
            Ok(TrustDecision::UserAccepted)
        } else {
            Err(SshError::new(ErrorKind::HostKeyRejected, "host key rejected by user")
                .with_context("host", self.label())
                .with_context("fingerprint", fingerprint))
        }
    }

    async fn persist(&self, store: &Arc<KnownHostsStore>, key: &HostKey) -> Result<(), SshError> {
        let store = Arc::clone(store);
        let host = self.host.clone();
        let port = self.port;
        let key = key.clone();
        let path = store.path().display().to_string();
        tokio::task::spawn_blocking(move || store.append(&host, port, &key))
            .await
            .map_err(|e| SshError::wrap(ErrorKind::HostKeyRejected, "known hosts writer panicked", e))?
            .map_err(|e| {
                SshError::wrap(ErrorKind::HostKeyRejected, "failed to persist host key", e)
                    .with_context("known_hosts", path)
            })
    }
}

/// Default manager: trust-on-first-use over a shared known-hosts store
pub struct TofuHostKeyManager {
    /// Store used unless a connection overrides the path
    store: Arc<KnownHostsStore>,
    /// Interactive input for accept/reject
    prompter: Arc<dyn Prompter>,
}

impl TofuHostKeyManager {
    /// Manager over an explicit store
    pub fn new(store: Arc<KnownHostsStore>, prompter: Arc<dyn Prompter>) -> Self {
        Self { store, prompter }
    }

    /// Manager over `~/.ssh/known_hosts`
    pub fn with_default_store(prompter: Arc<dyn Prompter>) -> Result<Self, SshError> {
        let path = KnownHostsStore::default_path().ok_or_else(|| {
            SshError::new(ErrorKind::InvalidConfig, "cannot determine home directory for known_hosts")
        })?;
        Ok(Self::new(Arc::new(KnownHostsStore::new(path)), prompter))
    }

    /// Shared store
    pub fn store(&self) -> &Arc<KnownHostsStore> {
        &self.store
    }
}

impl HostKeyManager for TofuHostKeyManager {
    fn callback(&self, config: &ConnectionConfig) -> Result<HostKeyCallback, SshError> {
        if config.skip_host_key_check {
            return Ok(HostKeyCallback::insecure(
                config.host.clone(),
                config.port,
                Arc::clone(&self.prompter),
            ));
        }

        let store = match &config.known_hosts_path {
            Some(path) if path.as_path() != self.store.path() => Arc::new(KnownHostsStore::new(path)),
            _ => Arc::clone(&self.store),
        };

        Ok(HostKeyCallback::tofu(
            config.host.clone(),
            config.port,
            store,
            config.auto_accept_new_host_key,
            Arc::clone(&self.prompter),
        ))
    }
}

#[cfg(test)]
mod tests;
