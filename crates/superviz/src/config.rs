//! Install configuration as handed over by the CLI layer

use crate::error::InstallError;
use crate::target::InstallTarget;
use std::path::PathBuf;
use std::time::Duration;
use superviz_ssh::{ConnectionConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_PORT};

/// Default per-command timeout
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// Settings for one install run
#[derive(Debug, Clone)]
pub struct InstallConfig {
    /// `user@host` as given on the command line
    pub target: String,
    /// User parsed from `target`
    pub user: String,
    /// Host parsed from `target`
    pub host: String,
    /// Private key; a password is prompted for when unset
    pub key_path: Option<PathBuf>,
    /// SSH port
    pub port: u16,
    /// Connect timeout
    pub timeout: Duration,
    /// Per-command timeout
    pub command_timeout: Duration,
    /// Reconfigure even if the repository is already set up
    pub force: bool,
    /// Disable host key verification (insecure)
    pub skip_host_key_check: bool,
    /// Pin unknown host keys without asking
    pub auto_accept_host_key: bool,
    /// Known-hosts file override
    pub known_hosts_path: Option<PathBuf>,
    /// Prompt for a password when the key cannot be used
    pub password_fallback: bool,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            target: String::new(),
            user: String::new(),
            host: String::new(),
            key_path: None,
            port: DEFAULT_PORT,
            timeout: DEFAULT_CONNECT_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            force: false,
            skip_host_key_check: false,
            auto_accept_host_key: false,
            known_hosts_path: None,
            password_fallback: false,
        }
    }
}

impl InstallConfig {
    /// Configuration for `target` with defaults for everything else
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Default::default()
        }
    }

    /// Connection settings for `target`
    pub fn connection_config(&self, target: &InstallTarget) -> ConnectionConfig {
        let mut config = ConnectionConfig::new(target.host.clone(), target.user.clone())
            .with_port(self.port)
            .with_timeout(self.timeout)
            .with_skip_host_key_check(self.skip_host_key_check)
            .with_auto_accept(self.auto_accept_host_key)
            .with_password_fallback(self.password_fallback);
        if let Some(key) = &self.key_path {
            config = config.with_key(key);
        }
        if let Some(path) = &self.known_hosts_path {
            config = config.with_known_hosts(path);
        }
        config
    }
}

/// Check the positional arguments and configuration, then fill in the parsed
/// target
///
/// `args` holds the positional arguments; the single expected one is the
/// `user@host` target. On error `config` is left untouched.
pub fn validate_and_prepare_config(config: &mut InstallConfig, args: &[String]) -> Result<(), InstallError> {
    let raw = match args {
        [target] => target.as_str(),
        [] if !config.target.is_empty() => config.target.as_str(),
        [] => return Err(InstallError::InvalidConfig("missing target (user@host)".into())),
        _ => {
            return Err(InstallError::InvalidConfig(format!(
                "expected exactly one target, got {}",
                args.len()
            )))
        }
    };

    let target = InstallTarget::parse(raw)?;

    if config.port == 0 {
        return Err(InstallError::InvalidConfig("port must be between 1 and 65535".into()));
    }
    if config.timeout.is_zero() {
        return Err(InstallError::InvalidConfig("timeout must be positive".into()));
    }
    if config.command_timeout.is_zero() {
        return Err(InstallError::InvalidConfig("command timeout must be positive".into()));
    }
    if let Some(key) = &config.key_path {
        if !key.is_file() {
            return Err(InstallError::InvalidConfig(format!(
                "private key {} does not exist",
                key.display()
            )));
        }
    }

    config.target = target.to_string();
    config.user = target.user;
    config.host = target.host;
    Ok(())
}
