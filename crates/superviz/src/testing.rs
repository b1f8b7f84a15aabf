//! In-memory remote host used by the unit tests

use async_trait::async_trait;
use std::io;
use std::sync::{Arc, Mutex};
use superviz_ssh::{
    CallContext, CommandOutput, Connection, DialRequest, Dialer, ErrorKind, Prompter,
    RemoteExecutor, RemoteExit, RemoteSession, SshError,
};
use zeroize::Zeroizing;

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Answers every password prompt and declines every question
pub(crate) struct TestPrompter;

impl Prompter for TestPrompter {
    fn password(&self, _prompt: &str) -> io::Result<Zeroizing<String>> {
        Ok(Zeroizing::new("secret".to_string()))
    }

    fn ask(&self, _prompt: &str) -> io::Result<String> {
        Ok("no".to_string())
    }

    fn notice(&self, _message: &str) {}
}

/// Canned reaction to a command
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    /// Exit 0 with this stdout
    Ok(String),
    /// Exit with this status
    Exit(i32),
    /// The channel breaks before the command completes
    Broken,
}

/// Scripted remote host: the first rule whose pattern is a substring of the
/// command decides the reply; unmatched commands exit 1
#[derive(Debug, Default)]
pub(crate) struct MockRemote {
    rules: Vec<(String, Reply)>,
    calls: Mutex<Vec<String>>,
}

impl MockRemote {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on(mut self, pattern: &str, reply: Reply) -> Self {
        self.rules.push((pattern.to_string(), reply));
        self
    }

    /// Probes and setup commands all succeed
    pub(crate) fn succeed_all(self) -> Self {
        self.on("", Reply::Ok(String::new()))
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn reply(&self, command: &str) -> Result<CommandOutput, SshError> {
        self.calls.lock().unwrap().push(command.to_string());
        let reply = self
            .rules
            .iter()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or(Reply::Exit(1));
        match reply {
            Reply::Ok(stdout) => Ok(CommandOutput {
                exit_code: 0,
                stdout,
                stderr: String::new(),
            }),
            Reply::Exit(code) => Ok(CommandOutput {
                exit_code: code,
                stdout: String::new(),
                stderr: format!("exit {}", code),
            }),
            Reply::Broken => Err(SshError::new(ErrorKind::SessionCreation, "channel closed")),
        }
    }
}

#[async_trait]
impl RemoteExecutor for MockRemote {
    async fn execute(&self, _ctx: &CallContext, command: &str) -> Result<CommandOutput, SshError> {
        match self.reply(command) {
            Ok(output) if output.success() => Ok(output),
            Ok(output) => Err(SshError::wrap(
                ErrorKind::CommandFailed,
                "command failed",
                RemoteExit {
                    code: output.exit_code,
                    stderr: output.stderr,
                },
            )),
            Err(e) => Err(SshError::wrap(ErrorKind::CommandFailed, "command failed", e)),
        }
    }
}

/// Dialer whose connections are backed by a [`MockRemote`]
pub(crate) struct MockDialer {
    pub(crate) remote: Arc<MockRemote>,
    pub(crate) error: Option<SshError>,
    pub(crate) closes: Arc<Mutex<usize>>,
}

impl MockDialer {
    pub(crate) fn new(remote: Arc<MockRemote>) -> Self {
        Self {
            remote,
            error: None,
            closes: Arc::new(Mutex::new(0)),
        }
    }

    pub(crate) fn failing(error: SshError) -> Self {
        Self {
            error: Some(error),
            ..Self::new(Arc::new(MockRemote::new()))
        }
    }
}

#[async_trait]
impl Dialer for MockDialer {
    async fn dial(
        &self,
        _ctx: &CallContext,
        address: &str,
        _request: DialRequest,
    ) -> Result<Arc<dyn Connection>, SshError> {
        if let Some(err) = &self.error {
            return Err(err.clone().with_context("address", address));
        }
        Ok(Arc::new(MockConnection {
            remote: Arc::clone(&self.remote),
            closes: Arc::clone(&self.closes),
        }))
    }
}

struct MockConnection {
    remote: Arc<MockRemote>,
    closes: Arc<Mutex<usize>>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn open_session(&self) -> Result<Box<dyn RemoteSession>, SshError> {
        Ok(Box::new(MockSession {
            remote: Arc::clone(&self.remote),
        }))
    }

    async fn close(&self) -> Result<(), SshError> {
        *self.closes.lock().unwrap() += 1;
        Ok(())
    }
}

struct MockSession {
    remote: Arc<MockRemote>,
}

#[async_trait]
impl RemoteSession for MockSession {
    async fn run(&mut self, command: &str) -> Result<CommandOutput, SshError> {
        self.remote.reply(command)
    }

    async fn close(&mut self) -> Result<(), SshError> {
        Ok(())
    }
}
