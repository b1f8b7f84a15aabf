//! Established connections and per-command sessions

use crate::error::SshError;
use async_trait::async_trait;

/// An authenticated SSH connection
#[async_trait]
pub trait Connection: Send + Sync {
    /// Open a channel for running one command
    async fn open_session(&self) -> Result<Box<dyn RemoteSession>, SshError>;

    /// Tear the connection down
    async fn close(&self) -> Result<(), SshError>;
}

/// A single-use command channel
#[async_trait]
pub trait RemoteSession: Send {
    /// Run `command` to completion
    ///
    /// A non-zero exit status is reported in the output, not as an error.
    async fn run(&mut self, command: &str) -> Result<CommandOutput, SshError>;

    /// Release the channel
    async fn close(&mut self) -> Result<(), SshError>;
}

/// Captured result of one remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit status
    pub exit_code: i32,
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the command exited with status 0
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout followed by stderr
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        out.push_str(&self.stderr);
        out
    }
}
