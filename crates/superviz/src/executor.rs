//! Sequential command execution with progress output

use crate::error::InstallError;
use std::io::Write;
use std::time::Duration;
use superviz_ssh::{CallContext, RemoteExecutor};
use tracing::{debug, error};

/// Runs a batch of commands in order, stopping at the first failure
///
/// Nothing is rolled back: commands that already ran stay applied.
#[derive(Debug, Clone, Copy)]
pub struct CommandExecutor {
    command_timeout: Option<Duration>,
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandExecutor {
    /// Executor bounded only by the caller's context
    pub fn new() -> Self {
        Self {
            command_timeout: None,
        }
    }

    /// Give each command its own deadline
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    /// Run `commands`, writing `[i/N] <command>` before each one
    pub async fn run(
        &self,
        ctx: &CallContext,
        exec: &dyn RemoteExecutor,
        commands: &[String],
        progress: &mut (dyn Write + Send),
    ) -> Result<(), InstallError> {
        let total = commands.len();
        for (i, command) in commands.iter().enumerate() {
            let index = i + 1;
            writeln!(progress, "[{}/{}] {}", index, total, command)?;

            let command_ctx = match self.command_timeout {
                Some(timeout) => ctx.with_timeout(timeout),
                None => ctx.clone(),
            };
            match exec.execute(&command_ctx, command).await {
                Ok(output) => debug!("[{}/{}] done: {} bytes of output", index, total, output.stdout.len()),
                Err(source) => {
                    error!("[{}/{}] failed: {}", index, total, source);
                    return Err(InstallError::CommandFailed {
                        index,
                        total,
                        command: command.clone(),
                        source,
                    });
                }
            }
        }
        Ok(())
    }
}
