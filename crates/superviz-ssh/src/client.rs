//! SSH client: the single entry point for connect / execute / close
//!
//! The client composes the injectable pieces of the transport layer. Each
//! `connect` validates the configuration, consults the rate limiter, builds the
//! host key check, resolves credentials and finally dials. The connect timeout
//! covers the network phases of the dial, not a pending host key prompt.

use crate::auth::{Authenticator, KeyAuthenticator};
use crate::config::ConnectionConfig;
use crate::connection::{CommandOutput, Connection, RemoteSession};
use crate::context::CallContext;
use crate::dialer::{DialRequest, Dialer};
use crate::error::{ErrorKind, RemoteExit, SshError};
use crate::hostkey::{HostKeyManager, TofuHostKeyManager};
use crate::prompt::{Prompter, TerminalPrompter};
use crate::ratelimit::{RateLimiter, WindowRateLimiter};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Anything that can run a command on a connected remote host
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run `command` and return its output
    ///
    /// Non-zero exits are reported as [`ErrorKind::CommandFailed`].
    async fn execute(&self, ctx: &CallContext, command: &str) -> Result<CommandOutput, SshError>;
}

/// Builder for [`Client`]
///
/// Every component not set explicitly gets its default implementation.
#[derive(Default)]
pub struct ClientBuilder {
    dialer: Option<Arc<dyn Dialer>>,
    authenticator: Option<Arc<dyn Authenticator>>,
    host_keys: Option<Arc<dyn HostKeyManager>>,
    rate_limiter: Option<Arc<dyn RateLimiter>>,
    prompter: Option<Arc<dyn Prompter>>,
}

impl ClientBuilder {
    /// Create a builder with nothing set
    pub fn new() -> Self {
        Self::default()
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

    /// Use a custom (usually shared) rate limiter
    pub fn with_rate_limiter(mut self, rate_limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = Some(rate_limiter);
        self
    }

    /// Prompter used by the default authenticator and host key manager
    pub fn with_prompter(mut self, prompter: Arc<dyn Prompter>) -> Self {
        self.prompter = Some(prompter);
        self
    }

    /// Build the client
    pub fn build(self) -> Result<Client, SshError> {
        let prompter = self.prompter.unwrap_or_else(|| Arc::new(TerminalPrompter));

        let dialer = match self.dialer {
            Some(dialer) => dialer,
            None => default_dialer()?,
        };
        let authenticator = self
            .authenticator
            .unwrap_or_else(|| Arc::new(KeyAuthenticator::new(Arc::clone(&prompter))));
        let host_keys = match self.host_keys {
            Some(host_keys) => host_keys,
            None => Arc::new(TofuHostKeyManager::with_default_store(Arc::clone(&prompter))?),
        };
        let rate_limiter = self
            .rate_limiter
            .unwrap_or_else(|| Arc::new(WindowRateLimiter::default()));

        Ok(Client {
            dialer,
            authenticator,
            host_keys,
            rate_limiter,
            connection: None,
            address: None,
        })
    }
}

#[cfg(feature = "ssh2")]
fn default_dialer() -> Result<Arc<dyn Dialer>, SshError> {
    Ok(Arc::new(crate::dialer::Ssh2Dialer::new()))
}

#[cfg(not(feature = "ssh2"))]
fn default_dialer() -> Result<Arc<dyn Dialer>, SshError> {
    Err(SshError::new(
        ErrorKind::InvalidConfig,
        "no dialer configured and the ssh2 feature is disabled",
    ))
}

/// SSH client holding at most one live connection
pub struct Client {
    dialer: Arc<dyn Dialer>,
    authenticator: Arc<dyn Authenticator>,
    host_keys: Arc<dyn HostKeyManager>,
    rate_limiter: Arc<dyn RateLimiter>,
    connection: Option<Arc<dyn Connection>>,
    address: Option<String>,
}

impl Client {
    /// Start building a client
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Whether `connect` succeeded and `close` has not been called since
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Address of the live connection
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    /// Connect and authenticate
    ///
    /// A previous connection is closed first.
    pub async fn connect(&mut self, ctx: &CallContext, config: &ConnectionConfig) -> Result<(), SshError> {
        config.validate()?;
        let address = config.address().to_string();

        if self.connection.is_some() {
            debug!("Replacing existing connection before connecting to {}", address);
            if let Err(e) = self.close().await {
                warn!("Failed to close previous connection: {}", e);
            }
        }

        if !self.rate_limiter.allow(ctx, &config.host).await? {
            return Err(SshError::new(ErrorKind::ConnectionFailed, "too many connection attempts")
                .with_context("address", &address)
                .with_context("reason", "rate_limited"));
        }

        let host_key = self.host_keys.callback(config)?;

        let methods = match ctx.run(self.authenticator.resolve(config)).await {
            Ok(methods) => methods?,
            Err(interrupt) => {
                return Err(interrupt
                    .into_error(ErrorKind::ConnectionFailed, "credential resolution")
                    .with_context("address", &address))
            }
        };
        debug!(
            "Resolved {} authentication method(s) for {}@{}",
            methods.len(),
            config.user,
            address
        );

        let request = DialRequest {
            host: config.host.clone(),
            port: config.port,
            user: config.user.clone(),
            methods,
            host_key,
            connect_timeout: config.connect_timeout,
        };
        let connection = self.dialer.dial(ctx, &address, request).await?;

        info!("Connected to {} as {}", address, config.user);
        self.connection = Some(connection);
        self.address = Some(address);
        Ok(())
    }

    /// Run one command on a fresh session
    ///
    /// The command runs on a worker task raced against `ctx`. If the context
    /// ends first the worker is aborted and its session dropped, which tells
    /// the transport to stop reading, and [`ErrorKind::CommandTimeout`] is
    /// returned. The remote process may keep running since SSH gives no way
    /// to confirm it was terminated.
    pub async fn execute(&self, ctx: &CallContext, command: &str) -> Result<CommandOutput, SshError> {
        let connection = self
            .connection
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| SshError::new(ErrorKind::NotConnected, "client is not connected"))?;
        let address = self.address.clone().unwrap_or_default();

        let session = match ctx.run(connection.open_session()).await {
            Ok(session) => session.map_err(|e| e.with_context("command", command))?,
            Err(interrupt) => {
                return Err(interrupt
                    .into_error(ErrorKind::CommandTimeout, "command")
                    .with_context("address", &address)
                    .with_context("command", command))
            }
        };

        debug!("Executing on {}: {}", address, command);
        let owned = command.to_string();
        let mut worker = tokio::spawn(async move {
            let mut session = session;
            let result = session.run(&owned).await;
            (session, result)
        });

        tokio::select! {
            biased;
            joined = &mut worker => match joined {
                Ok((session, result)) => {
                    close_session(session, &address).await;
                    command_result(result, command, &address)
                }
                Err(e) => Err(SshError::wrap(ErrorKind::CommandFailed, "command task failed", e)
                    .with_context("address", &address)
                    .with_context("command", command)),
            },
            interrupt = ctx.done() => {
                worker.abort();
                // Wait for the abort so the session is dropped before returning
                let _ = worker.await;
                warn!(
                    "Command on {} interrupted ({}); it may still be running remotely: {}",
                    address,
                    interrupt.reason(),
                    command
                );
                Err(interrupt
                    .into_error(ErrorKind::CommandTimeout, "command")
                    .with_context("address", &address)
                    .with_context("command", command))
            }
        }
    }

    /// Close the connection; a no-op when not connected
    pub async fn close(&mut self) -> Result<(), SshError> {
        let Some(connection) = self.connection.take() else {
            return Ok(());
        };
        let address = self.address.take().unwrap_or_default();
        debug!("Closing connection to {}", address);
        connection
            .close()
            .await
            .map_err(|e| e.with_context("address", address))
    }
}

#[async_trait]
impl RemoteExecutor for Client {
    async fn execute(&self, ctx: &CallContext, command: &str) -> Result<CommandOutput, SshError> {
        Client::execute(self, ctx, command).await
    }
}

async fn close_session(mut session: Box<dyn RemoteSession>, address: &str) {
    if let Err(e) = session.close().await {
        warn!("Failed to close session on {}: {}", address, e);
    }
}

fn command_result(
    result: Result<CommandOutput, SshError>,
    command: &str,
    address: &str,
) -> Result<CommandOutput, SshError> {
    match result {
        Ok(output) if output.success() => Ok(output),
        Ok(output) => {
            let stderr = if output.stderr.trim().is_empty() {
                output.stdout
            } else {
                output.stderr
            };
            let exit = RemoteExit {
                code: output.exit_code,
                stderr,
            };
            Err(SshError::wrap(ErrorKind::CommandFailed, "command failed", exit)
                .with_context("address", address)
                .with_context("command", command)
                .with_context("exit_code", output.exit_code))
        }
        Err(e) => Err(SshError::wrap(ErrorKind::CommandFailed, "command failed", e)
            .with_context("address", address)
            .with_context("command", command)),
    }
}
