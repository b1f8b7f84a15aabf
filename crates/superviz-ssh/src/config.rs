//! Connection configuration

use crate::error::{ErrorKind, SshError};
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

/// Default SSH port
pub const DEFAULT_PORT: u16 = 22;

/// Default connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// SSH connection configuration
///
/// Must pass [`ConnectionConfig::validate`] before it is handed to a client.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Remote hostname or IP
    pub host: String,
    /// Remote user
    pub user: String,
    /// Remote port
    pub port: u16,
    /// Private key to authenticate with; prompts for a password when unset
    pub key_path: Option<PathBuf>,
    /// Time allowed for TCP connect, handshake and authentication
    pub connect_timeout: Duration,
    /// Disable host key verification entirely (insecure)
    pub skip_host_key_check: bool,
    /// Pin unknown host keys without asking
    pub auto_accept_new_host_key: bool,
    /// Known-hosts file override; defaults to `~/.ssh/known_hosts`
    pub known_hosts_path: Option<PathBuf>,
    /// Prompt for a password when the configured key cannot be loaded
    pub password_fallback: bool,
    /// Cached `host:port`, filled by validation
    address: OnceLock<String>,
}

impl ConnectionConfig {
    /// Create a configuration for `user@host` on the default port
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            ..Default::default()
        }
    }

    /// Set the port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self.address = OnceLock::new();
        self
    }

    /// Set the private key path
    pub fn with_key(mut self, key_path: impl Into<PathBuf>) -> Self {
        self.key_path = Some(key_path.into());
        self
    }

    /// Set the connect timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Disable host key verification
    pub fn with_skip_host_key_check(mut self, skip: bool) -> Self {
        self.skip_host_key_check = skip;
        self
    }

    /// Pin unknown host keys without prompting
    pub fn with_auto_accept(mut self, accept: bool) -> Self {
        self.auto_accept_new_host_key = accept;
        self
    }

    /// Use a specific known-hosts file
    pub fn with_known_hosts(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts_path = Some(path.into());
        self
    }

    /// Allow falling back to a password prompt when the key fails to load
    pub fn with_password_fallback(mut self, fallback: bool) -> Self {
        self.password_fallback = fallback;
        self
    }

    /// Check the configuration and cache the dial address
    pub fn validate(&self) -> Result<(), SshError> {
        if self.host.trim().is_empty() {
            return Err(SshError::new(ErrorKind::InvalidConfig, "host must not be empty"));
        }
        if self.user.trim().is_empty() {
            return Err(SshError::new(ErrorKind::InvalidConfig, "user must not be empty")
                .with_context("host", &self.host));
        }
        if self.port == 0 {
            return Err(SshError::new(ErrorKind::InvalidConfig, "port must be between 1 and 65535")
                .with_context("port", self.port));
        }
        if self.connect_timeout.is_zero() {
            return Err(SshError::new(ErrorKind::InvalidConfig, "connect timeout must be positive"));
        }
        self.address();
        Ok(())
    }

    /// `host:port` dial address, computed once
    pub fn address(&self) -> &str {
        self.address
            .get_or_init(|| format!("{}:{}", self.host, self.port))
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            user: String::new(),
            port: DEFAULT_PORT,
            key_path: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            skip_host_key_check: false,
            auto_accept_new_host_key: false,
            known_hosts_path: None,
            password_fallback: false,
            address: OnceLock::new(),
        }
    }
}
