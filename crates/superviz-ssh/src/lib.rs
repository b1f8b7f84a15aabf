//! # SuperViz SSH
//!
//! SSH transport and trust layer used by the SuperViz provisioner: a typed
//! error taxonomy, cancellable call contexts, per-host rate limiting,
//! credential resolution, trust-on-first-use host key checks and a client
//! that ties them together.

#![warn(missing_docs)]

/// Error taxonomy and transport error classification
pub mod error;

/// Cancellation and deadlines
pub mod context;

/// Connection configuration
pub mod config;

/// Per-host connection attempt limiting
pub mod ratelimit;

/// Interactive input
pub mod prompt;

/// Credential resolution
pub mod auth;

/// Host key verification and the known-hosts store
pub mod hostkey;

/// Connections and command sessions
pub mod connection;

/// Transport dialing
pub mod dialer;

/// Client entry point
pub mod client;

mod wire;

pub use auth::{AuthMethod, Authenticator, KeyAuthenticator, PrivateKey};
pub use client::{Client, ClientBuilder, RemoteExecutor};
pub use config::{ConnectionConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_PORT};
pub use connection::{CommandOutput, Connection, RemoteSession};
pub use context::{CallContext, Interrupt};
#[cfg(feature = "ssh2")]
pub use dialer::Ssh2Dialer;
pub use dialer::{DialRequest, Dialer};
pub use error::{classify, has_kind, ErrorKind, RemoteExit, SshError};
pub use hostkey::{
    HostKey, HostKeyCallback, HostKeyManager, HostKeyType, KeyMatch, KnownHostsStore,
    TofuHostKeyManager, TrustDecision,
};
pub use prompt::{Prompter, TerminalPrompter};
pub use ratelimit::{NoopRateLimiter, RateLimiter, WindowRateLimiter};

/// Result alias for this crate
pub type Result<T> = std::result::Result<T, SshError>;
