//! Typed error taxonomy for the SSH layer
//!
//! Every failure that leaves the dialer is an [`SshError`] carrying an
//! [`ErrorKind`] drawn from a fixed set, so callers never string-match raw
//! transport errors. Classification of raw errors happens once, at the dialer
//! boundary, through [`classify`].

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Shared error cause. Reference counted so [`SshError`] stays `Clone`.
pub type BoxError = Arc<dyn StdError + Send + Sync + 'static>;

/// Failure classes surfaced by the SSH layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Connection configuration failed validation
    InvalidConfig,
    /// An operation needed a connection that was never established
    NotConnected,
    /// A session/channel could not be opened on the connection
    SessionCreation,
    /// A remote command ran and failed
    CommandFailed,
    /// A remote command outlived its context
    CommandTimeout,
    /// The remote host key was rejected or could not be pinned
    HostKeyRejected,
    /// Credentials could not be loaded or were refused
    AuthFailed,
    /// The transport connection could not be established
    ConnectionFailed,
}

impl ErrorKind {
    /// Stable snake_case name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidConfig => "invalid_config",
            Self::NotConnected => "not_connected",
            Self::SessionCreation => "session_creation",
            Self::CommandFailed => "command_failed",
            Self::CommandTimeout => "command_timeout",
            Self::HostKeyRejected => "host_key_rejected",
            Self::AuthFailed => "auth_failed",
            Self::ConnectionFailed => "connection_failed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified SSH-layer error
///
/// The kind is fixed at construction. Context entries are additive: setting a
/// key that is already present keeps the first value.
#[derive(Debug, Clone)]
pub struct SshError {
    kind: ErrorKind,
    message: String,
    cause: Option<BoxError>,
    context: BTreeMap<String, String>,
}

impl SshError {
    /// Create an error without an underlying cause
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
            context: BTreeMap::new(),
        }
    }

    /// Create an error wrapping an underlying cause
    pub fn wrap<E>(kind: ErrorKind, message: impl Into<String>, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            kind,
            message: message.into(),
            cause: Some(Arc::new(cause)),
            context: BTreeMap::new(),
        }
    }

    /// Attach a context entry
    pub fn with_context(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.entry(key.into()).or_insert_with(|| value.to_string());
        self
    }

    /// Error kind
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Human readable message, without kind or context
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Look up a context entry
    pub fn context(&self, key: &str) -> Option<&str> {
        self.context.get(key).map(String::as_str)
    }

    /// All context entries
    pub fn context_entries(&self) -> &BTreeMap<String, String> {
        &self.context
    }

    /// Underlying cause, if any
    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    /// Whether this error, or any error it wraps, has the given kind
    pub fn is(&self, kind: ErrorKind) -> bool {
        has_kind(self, kind)
    }

    /// The remote exit status, when this error reports a command that ran
    /// and exited non-zero
    pub fn remote_exit(&self) -> Option<&RemoteExit> {
        let mut current = self.source();
        while let Some(e) = current {
            if let Some(exit) = e.downcast_ref::<RemoteExit>() {
                return Some(exit);
            }
            current = e.source();
        }
        None
    }
}

impl fmt::Display for SshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if !self.context.is_empty() {
            let pairs: Vec<String> = self
                .context
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            write!(f, " [{}]", pairs.join(", "))?;
        }
        if let Some(cause) = &self.cause {
            write!(f, ": {}", cause)?;
        }
        Ok(())
    }
}

impl StdError for SshError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn StdError + 'static))
    }
}

impl PartialEq<ErrorKind> for SshError {
    fn eq(&self, kind: &ErrorKind) -> bool {
        self.is(*kind)
    }
}

/// Walk an error chain looking for an [`SshError`] of the given kind
pub fn has_kind(err: &(dyn StdError + 'static), kind: ErrorKind) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(ssh) = e.downcast_ref::<SshError>() {
            if ssh.kind == kind {
                return true;
            }
        }
        current = e.source();
    }
    false
}

/// Remote command finished with a non-zero exit status
#[derive(Debug, Clone, Error)]
#[error("remote command exited with status {code}{}", stderr_suffix(.stderr))]
pub struct RemoteExit {
    /// Exit status reported by the remote side
    pub code: i32,
    /// Captured standard error (stdout when stderr was empty)
    pub stderr: String,
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {}", trimmed)
    }
}

/// One row of the classifier table
struct Pattern {
    needles: &'static [&'static str],
    kind: ErrorKind,
    message: &'static str,
}

/// Best-effort mapping from transport error text to kinds, checked in order.
///
/// libssh2 reports failures as free text with numeric codes that differ
/// between builds, so matching is case-insensitive substring matching.
const CLASSIFIERS: &[Pattern] = &[
    Pattern {
        needles: &["permission denied", "unable to authenticate"],
        kind: ErrorKind::AuthFailed,
        message: "authentication failed",
    },
    Pattern {
        needles: &["connection refused", "no route to host", "host is unreachable"],
        kind: ErrorKind::ConnectionFailed,
        message: "host unreachable",
    },
    Pattern {
        needles: &["host key"],
        kind: ErrorKind::HostKeyRejected,
        message: "host key verification failed",
    },
];

/// Classify a raw transport error into the taxonomy
///
/// Errors that are already classified pass through with their kind intact.
/// Every result carries the attempted address as `address` context.
pub fn classify<E>(err: E, address: &str) -> SshError
where
    E: StdError + Send + Sync + 'static,
{
    let dyn_err: &(dyn StdError + 'static) = &err;
    if let Some(ssh) = dyn_err.downcast_ref::<SshError>() {
        return ssh.clone().with_context("address", address);
    }

    if is_network_timeout(dyn_err) {
        return SshError::wrap(ErrorKind::ConnectionFailed, "timeout", err)
            .with_context("address", address)
            .with_context("reason", "timeout");
    }

    let text = chain_text(dyn_err).to_lowercase();
    for pattern in CLASSIFIERS {
        if pattern.needles.iter().any(|needle| text.contains(needle)) {
            return SshError::wrap(pattern.kind, pattern.message, err)
                .with_context("address", address);
        }
    }

    SshError::wrap(ErrorKind::ConnectionFailed, "connection failed", err)
        .with_context("address", address)
}

fn is_network_timeout(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            if io_err.kind() == io::ErrorKind::TimedOut {
                return true;
            }
        }
        let text = e.to_string().to_lowercase();
        if text.contains("timed out") {
            return true;
        }
        current = e.source();
    }
    false
}

fn chain_text(err: &(dyn StdError + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut current = err.source();
    while let Some(e) = current {
        parts.push(e.to_string());
        current = e.source();
    }
    parts.join(": ")
}
