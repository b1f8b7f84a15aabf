//! Error types for repository installation

use superviz_ssh::{has_kind, ErrorKind, SshError};
use thiserror::Error;

/// Main error type for install operations
#[derive(Debug, Error)]
pub enum InstallError {
    /// Target string is not `user@host`
    #[error("invalid target '{target}': expected user@host")]
    InvalidTarget {
        /// Target as given
        target: String,
    },

    /// Install configuration is unusable
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Could not connect to or authenticate with the target
    #[error("failed to connect to {target}: {source}")]
    Connection {
        /// `user@host` of the attempt
        target: String,
        /// Classified transport error
        #[source]
        source: SshError,
    },

    /// No distribution probe matched
    #[error("unable to detect the Linux distribution (detected: {distro})")]
    DetectionFailed {
        /// Reported distribution id, `unknown` when nothing matched
        distro: String,
    },

    /// Detected distribution has no repository handler
    #[error("unsupported distribution: {0}")]
    UnsupportedDistribution(String),

    /// Privileges are insufficient and sudo is missing
    #[error("root privileges required but sudo is not available")]
    SudoUnavailable,

    /// Repository descriptor or signing key data failed validation
    #[error("invalid repository configuration: {0}")]
    InvalidRepository(String),

    /// A setup command failed; later commands were not run
    #[error("command {index}/{total} failed ({command}): {source}")]
    CommandFailed {
        /// 1-based position of the command
        index: usize,
        /// Number of commands in the batch
        total: usize,
        /// Command as sent to the remote host
        command: String,
        /// Underlying failure
        #[source]
        source: SshError,
    },

    /// Any other transport error
    #[error(transparent)]
    Remote(#[from] SshError),

    /// Writing progress output failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl InstallError {
    /// Transport error kind carried by this error, if any
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Connection { source, .. } | Self::CommandFailed { source, .. } | Self::Remote(source) => {
                Some(source.kind())
            }
            _ => None,
        }
    }

    /// Whether the underlying transport error, or anything it wraps, has the
    /// given kind
    pub fn is(&self, kind: ErrorKind) -> bool {
        if self.kind() == Some(kind) {
            return true;
        }
        match self {
            Self::Connection { source, .. } | Self::CommandFailed { source, .. } | Self::Remote(source) => {
                has_kind(source, kind)
            }
            _ => false,
        }
    }
}
