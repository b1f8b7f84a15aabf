//! Install orchestration: connect, detect, configure, report

use crate::config::InstallConfig;
use crate::detect::{DistroDetector, ProbeDetector};
use crate::error::InstallError;
use crate::executor::CommandExecutor;
use crate::info::InstallInfo;
use crate::repository::{handler_for, SetupOptions, SetupOutcome};
use crate::target::InstallTarget;
use std::io::Write;
use std::sync::Arc;
use superviz_ssh::{
    Authenticator, CallContext, Client, Dialer, HostKeyManager, KeyAuthenticator, Prompter,
    RateLimiter, TerminalPrompter, TofuHostKeyManager, WindowRateLimiter,
};
use tracing::{info, warn};

/// Builder for [`Installer`]
#[derive(Default)]
pub struct InstallerBuilder {
    info: Option<InstallInfo>,
    dialer: Option<Arc<dyn Dialer>>,
    authenticator: Option<Arc<dyn Authenticator>>,
    host_keys: Option<Arc<dyn HostKeyManager>>,
    rate_limiter: Option<Arc<dyn RateLimiter>>,
    prompter: Option<Arc<dyn Prompter>>,
    detector: Option<Arc<dyn DistroDetector>>,
}

impl InstallerBuilder {
    /// Create a builder with nothing set
    pub fn new() -> Self {
        Self::default()
    }

    /// Install metadata; defaults to [`InstallInfo::default`]
    pub fn with_info(mut self, info: InstallInfo) -> Self {
        self.info = Some(info);
        self
    }

    /// Use a custom dialer
    pub fn with_dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = Some(dialer);
        self
    }

    /// Use a custom authenticator
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Use a custom host key manager
    pub fn with_host_key_manager(mut self, host_keys: Arc<dyn HostKeyManager>) -> Self {
        self.host_keys = Some(host_keys);
        self
    }

    /// Share a rate limiter with other installers
    pub fn with_rate_limiter(mut self, rate_limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = Some(rate_limiter);
        self
    }

    /// Prompter for passwords and host key decisions
    pub fn with_prompter(mut self, prompter: Arc<dyn Prompter>) -> Self {
        self.prompter = Some(prompter);
        self
    }

    /// Use a custom distribution detector
    pub fn with_detector(mut self, detector: Arc<dyn DistroDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Build the installer
    ///
    /// The authenticator, host key manager and rate limiter are created once
    /// here and shared by every run, so key caches and attempt windows span
    /// runs.
    pub fn build(self) -> Result<Installer, InstallError> {
        let prompter = self.prompter.unwrap_or_else(|| Arc::new(TerminalPrompter));
        let authenticator = self
            .authenticator
            .unwrap_or_else(|| Arc::new(KeyAuthenticator::new(Arc::clone(&prompter))));
        let host_keys = match self.host_keys {
            Some(host_keys) => host_keys,
            None => Arc::new(TofuHostKeyManager::with_default_store(Arc::clone(&prompter))?),
        };

        Ok(Installer {
            info: Arc::new(self.info.unwrap_or_default()),
            dialer: self.dialer,
            authenticator,
            host_keys,
            rate_limiter: self
                .rate_limiter
                .unwrap_or_else(|| Arc::new(WindowRateLimiter::default())),
            prompter,
            detector: self.detector.unwrap_or_else(|| Arc::new(ProbeDetector::new())),
        })
    }
}

/// Provisions the package repository on remote hosts
pub struct Installer {
    info: Arc<InstallInfo>,
    dialer: Option<Arc<dyn Dialer>>,
    authenticator: Arc<dyn Authenticator>,
    host_keys: Arc<dyn HostKeyManager>,
    rate_limiter: Arc<dyn RateLimiter>,
    prompter: Arc<dyn Prompter>,
    detector: Arc<dyn DistroDetector>,
}

impl Installer {
    /// Start building an installer
    pub fn builder() -> InstallerBuilder {
        InstallerBuilder::new()
    }

    /// Metadata of what gets installed
    pub fn install_info(&self) -> &InstallInfo {
        &self.info
    }

    /// See [`crate::config::validate_and_prepare_config`]
    pub fn validate_and_prepare_config(config: &mut InstallConfig, args: &[String]) -> Result<(), InstallError> {
        crate::config::validate_and_prepare_config(config, args)
    }

    /// Configure the repository on `config.target`, writing progress to `out`
    ///
    /// The connection is always closed before returning; a failed close is
    /// logged and never replaces the result.
    pub async fn install(
        &self,
        ctx: &CallContext,
        out: &mut (dyn Write + Send),
        config: &InstallConfig,
    ) -> Result<(), InstallError> {
        let target = InstallTarget::parse(&config.target)?;
        if config.command_timeout.is_zero() {
            return Err(InstallError::InvalidConfig("command timeout must be positive".into()));
        }
        let label = target.to_string();
        writeln!(out, "Starting repository setup on {}", label)?;

        let mut client = self.client()?;
        let result = self.run(ctx, out, config, &target, &label, &mut client).await;

        if let Err(e) = client.close().await {
            warn!("Failed to close connection to {}: {}", label, e);
        }
        result
    }

    fn client(&self) -> Result<Client, InstallError> {
        let mut builder = Client::builder()
            .with_authenticator(Arc::clone(&self.authenticator))
            .with_host_key_manager(Arc::clone(&self.host_keys))
            .with_rate_limiter(Arc::clone(&self.rate_limiter))
            .with_prompter(Arc::clone(&self.prompter));
        if let Some(dialer) = &self.dialer {
            builder = builder.with_dialer(Arc::clone(dialer));
        }
        Ok(builder.build()?)
    }

    async fn run(
        &self,
        ctx: &CallContext,
        out: &mut (dyn Write + Send),
        config: &InstallConfig,
        target: &InstallTarget,
        label: &str,
        client: &mut Client,
    ) -> Result<(), InstallError> {
        client
            .connect(ctx, &config.connection_config(target))
            .await
            .map_err(|source| InstallError::Connection {
                target: label.to_string(),
                source,
            })?;
        writeln!(out, "Connected to {}", label)?;

        let client = &*client;
        let distro = self.detector.detect(ctx, client).await?;
        writeln!(out, "Detected distribution: {}", distro)?;

        let handler = handler_for(distro, Arc::clone(&self.info))?;
        let options = SetupOptions {
            target: label,
            force: config.force,
            executor: CommandExecutor::new().with_command_timeout(config.command_timeout),
        };
        if handler.setup(ctx, client, out, options).await? == SetupOutcome::Configured {
            info!("Repository configured on {} ({})", label, distro);
            writeln!(out, "Repository setup completed successfully on {}", label)?;
        }

        if let Some(command) = distro.install_command(&self.info.package_name) {
            writeln!(out)?;
            writeln!(out, "To install {}, run:", self.info.package_name)?;
            writeln!(out, "  {}", command)?;
        }
        Ok(())
    }
}
