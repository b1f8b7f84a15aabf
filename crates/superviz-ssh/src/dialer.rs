//! Transport dialing

use crate::auth::AuthMethod;
use crate::connection::Connection;
use crate::context::CallContext;
use crate::error::SshError;
use crate::hostkey::HostKeyCallback;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "ssh2")]
mod libssh2;

#[cfg(feature = "ssh2")]
pub use libssh2::{Ssh2Connection, Ssh2Dialer, Ssh2Session};

/// Everything a dialer needs besides the address
#[derive(Debug, Clone)]
pub struct DialRequest {
    /// Remote hostname, as used for host key lookups
    pub host: String,
    /// Remote port
    pub port: u16,
    /// Login user
    pub user: String,
    /// Authentication methods, tried in order
    pub methods: Vec<AuthMethod>,
    /// Host key check for this attempt
    pub host_key: HostKeyCallback,
    /// Bound on TCP connect, handshake and authentication together
    pub connect_timeout: Duration,
}

/// Opens authenticated connections
///
/// Implementations honour the context's cancellation and deadline, and
/// return errors already classified with `address` context. The request's
/// `connect_timeout` bounds the network phases only: time spent waiting on a
/// host key decision is limited by `ctx` alone.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Connect to `address` (`host:port`) and authenticate
    async fn dial(
        &self,
        ctx: &CallContext,
        address: &str,
        request: DialRequest,
    ) -> Result<Arc<dyn Connection>, SshError>;
}
