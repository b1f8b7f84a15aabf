//! libssh2-backed dialer
//!
//! libssh2 is blocking, so every call into it runs on the blocking pool. The
//! library has no host key hook, so the key is checked right after the
//! handshake and before any credentials are sent.
//!
//! Once authenticated the session keeps a short libssh2 timeout. Blocking
//! steps retry on that timeout until their stop token fires, so a step never
//! holds the session lock for longer than one poll interval after its caller
//! has gone away.

use super::{DialRequest, Dialer};
use crate::auth::AuthMethod;
use crate::connection::{CommandOutput, Connection, RemoteSession};
use crate::context::CallContext;
use crate::error::{classify, ErrorKind, SshError};
use crate::hostkey::HostKey;
use async_trait::async_trait;
use ssh2::{Channel, ErrorCode, Session};
use std::io::{self, Read};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// libssh2 codes meaning "this method was refused, try the next one"
const LIBSSH2_ERROR_FILE: i32 = -16;
const LIBSSH2_ERROR_AUTHENTICATION_FAILED: i32 = -18;
const LIBSSH2_ERROR_PUBLICKEY_UNVERIFIED: i32 = -19;

// libssh2 codes meaning "nothing happened yet"
const LIBSSH2_ERROR_TIMEOUT: i32 = -9;
const LIBSSH2_ERROR_EAGAIN: i32 = -37;

/// libssh2 timeout between stop checks on an authenticated session
const POLL_INTERVAL_MS: u32 = 100;

const READ_CHUNK: usize = 16 * 1024;

/// Failure inside a blocking libssh2 step
#[derive(Debug, Error)]
enum Libssh2Failure {
    #[error(transparent)]
    Ssh(#[from] ssh2::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("unable to authenticate as {user} (tried {methods})")]
    AuthExhausted {
        user: String,
        methods: String,
        #[source]
        last: Option<ssh2::Error>,
    },
    #[error("operation abandoned")]
    Abandoned,
}

/// Dialer over libssh2
#[derive(Debug, Default, Clone, Copy)]
pub struct Ssh2Dialer;

impl Ssh2Dialer {
    /// Create a dialer
    pub fn new() -> Self {
        Self
    }

    async fn handshake(&self, budget: &CallContext, address: &str) -> Result<Session, SshError> {
        debug!("Opening TCP connection to {}", address);
        let tcp = TcpStream::connect(address)
            .await
            .map_err(|e| classify(e, address))?
            .into_std()
            .map_err(|e| classify(e, address))?;
        tcp.set_nonblocking(false).map_err(|e| classify(e, address))?;

        let limit = timeout_ms(budget);
        blocking(address, move || {
            let mut session = Session::new()?;
            session.set_tcp_stream(tcp);
            session.set_timeout(limit);
            session.handshake()?;
            Ok(session)
        })
        .await
    }

    async fn authenticate(
        &self,
        budget: &CallContext,
        address: &str,
        session: Session,
        user: String,
        methods: Vec<AuthMethod>,
    ) -> Result<Session, SshError> {
        let limit = timeout_ms(budget);
        blocking(address, move || {
            session.set_timeout(limit);
            authenticate(&session, &user, &methods)?;
            session.set_timeout(POLL_INTERVAL_MS);
            Ok(session)
        })
        .await
    }
}

#[async_trait]
impl Dialer for Ssh2Dialer {
    async fn dial(
        &self,
        ctx: &CallContext,
        address: &str,
        request: DialRequest,
    ) -> Result<Arc<dyn Connection>, SshError> {
        let connect_timeout = request.connect_timeout;
        let budget = ctx.with_timeout(connect_timeout);
        let session = bounded(&budget, address, "dial", self.handshake(&budget, address)).await?;

        // The connect budget does not run while the host key decision is pending
        let left = budget.remaining().unwrap_or(connect_timeout);

        let blob = session
            .host_key()
            .map(|(blob, _)| blob.to_vec())
            .ok_or_else(|| {
                SshError::new(ErrorKind::HostKeyRejected, "server sent no host key")
                    .with_context("address", address)
            })?;
        let key = HostKey::from_blob(blob).map_err(|e| e.with_context("address", address))?;
        let decision = bounded(ctx, address, "host key check", request.host_key.verify(&key)).await?;
        debug!("Host key for {} trusted: {:?}", address, decision);

        let budget = ctx.with_timeout(left);
        let user = request.user.clone();
        let session = bounded(
            &budget,
            address,
            "authentication",
            self.authenticate(&budget, address, session, user, request.methods),
        )
        .await?;

        info!("Authenticated to {} as {}", address, request.user);
        Ok(Arc::new(Ssh2Connection::new(session, address)))
    }
}

/// Run one dial phase under `ctx`, adding `address` to every failure
async fn bounded<T, F>(ctx: &CallContext, address: &str, phase: &str, fut: F) -> Result<T, SshError>
where
    F: std::future::Future<Output = Result<T, SshError>>,
{
    match ctx.run(fut).await {
        Ok(result) => result.map_err(|e| e.with_context("address", address)),
        Err(interrupt) => Err(interrupt
            .into_error(ErrorKind::ConnectionFailed, phase)
            .with_context("address", address)),
    }
}

/// What is left of `ctx`'s deadline as a libssh2 timeout; 0 waits forever
fn timeout_ms(ctx: &CallContext) -> u32 {
    ctx.remaining()
        .map(|d| d.max(Duration::from_millis(1)).as_millis().min(u32::MAX as u128) as u32)
        .unwrap_or(0)
}

/// Run a blocking libssh2 step and classify its failure
async fn blocking<T, F>(address: &str, f: F) -> Result<T, SshError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, Libssh2Failure> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| classify(e, address))?
        .map_err(|e| classify(e, address))
}

fn is_method_refusal(err: &ssh2::Error) -> bool {
    matches!(
        err.code(),
        ErrorCode::Session(
            LIBSSH2_ERROR_FILE | LIBSSH2_ERROR_AUTHENTICATION_FAILED | LIBSSH2_ERROR_PUBLICKEY_UNVERIFIED
        )
    )
}

fn is_pending(err: &ssh2::Error) -> bool {
    matches!(
        err.code(),
        ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT | LIBSSH2_ERROR_EAGAIN)
    )
}

/// Retry `op` across poll timeouts until it settles or `stop` fires
fn until_settled<T>(
    stop: &CancellationToken,
    mut op: impl FnMut() -> Result<T, ssh2::Error>,
) -> Result<T, Libssh2Failure> {
    loop {
        match op() {
            Err(e) if is_pending(&e) => {
                if stop.is_cancelled() {
                    return Err(Libssh2Failure::Abandoned);
                }
            }
            other => return other.map_err(Libssh2Failure::from),
        }
    }
}

/// Move whatever `stream` has ready into `sink`; a poll timeout counts as nothing
fn drain(stream: &mut impl Read, buf: &mut [u8], sink: &mut Vec<u8>) -> Result<usize, Libssh2Failure> {
    match stream.read(buf) {
        Ok(n) => {
            sink.extend_from_slice(&buf[..n]);
            Ok(n)
        }
        Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => Ok(0),
        Err(e) => Err(e.into()),
    }
}

fn authenticate(session: &Session, user: &str, methods: &[AuthMethod]) -> Result<(), Libssh2Failure> {
    let mut last = None;
    for method in methods {
        let attempt = match method {
            AuthMethod::PublicKey(key) => session.userauth_pubkey_memory(user, None, key.pem(), None),
            AuthMethod::Password(password) => session.userauth_password(user, password),
        };
        match attempt {
            Ok(()) if session.authenticated() => return Ok(()),
            Ok(()) => {}
            Err(e) if is_method_refusal(&e) => {
                debug!("{} authentication refused: {}", method.name(), e);
                last = Some(e);
            }
            Err(e) => return Err(e.into()),
        }
    }

    let tried: Vec<&str> = methods.iter().map(AuthMethod::name).collect();
    Err(Libssh2Failure::AuthExhausted {
        user: user.to_string(),
        methods: if tried.is_empty() { "none".to_string() } else { tried.join(", ") },
        last,
    })
}

/// Authenticated libssh2 connection
pub struct Ssh2Connection {
    session: Session,
    address: String,
    closed: CancellationToken,
}

impl Ssh2Connection {
    fn new(session: Session, address: &str) -> Self {
        Self {
            session,
            address: address.to_string(),
            closed: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl Connection for Ssh2Connection {
    async fn open_session(&self) -> Result<Box<dyn RemoteSession>, SshError> {
        if self.closed.is_cancelled() {
            return Err(SshError::new(ErrorKind::NotConnected, "connection is closed")
                .with_context("address", &self.address));
        }
        let session = self.session.clone();
        let stop = self.closed.child_token();
        let opener = stop.clone();
        let channel = tokio::task::spawn_blocking(move || until_settled(&opener, || session.channel_session()))
            .await
            .map_err(|e| SshError::wrap(ErrorKind::SessionCreation, "session worker panicked", e))?
            .map_err(|e| {
                SshError::wrap(ErrorKind::SessionCreation, "failed to open session", e)
                    .with_context("address", &self.address)
            })?;
        Ok(Box::new(Ssh2Session {
            channel: Some(channel),
            address: self.address.clone(),
            stop,
        }))
    }

    async fn close(&self) -> Result<(), SshError> {
        if self.closed.is_cancelled() {
            return Ok(());
        }
        // Stop every blocking step first so none of them holds the session lock
        self.closed.cancel();
        debug!("Disconnecting from {}", self.address);
        let session = self.session.clone();
        tokio::task::spawn_blocking(move || session.disconnect(None, "closing", None))
            .await
            .map_err(|e| SshError::wrap(ErrorKind::ConnectionFailed, "disconnect worker panicked", e))?
            .map_err(|e| {
                SshError::wrap(ErrorKind::ConnectionFailed, "failed to disconnect", e)
                    .with_context("address", &self.address)
            })
    }
}

/// One exec channel on a libssh2 connection
///
/// Dropping the session stops a command that is still being read.
pub struct Ssh2Session {
    channel: Option<Channel>,
    address: String,
    stop: CancellationToken,
}

impl Drop for Ssh2Session {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

fn exec(
    mut channel: Channel,
    command: &str,
    stop: &CancellationToken,
) -> (Channel, Result<CommandOutput, Libssh2Failure>) {
    let result = (|| -> Result<CommandOutput, Libssh2Failure> {
        until_settled(stop, || channel.exec(command))?;

        // Alternate between the streams so a full stderr window cannot stall stdout
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            if stop.is_cancelled() {
                return Err(Libssh2Failure::Abandoned);
            }
            let out = drain(&mut channel, &mut buf, &mut stdout)?;
            let err = drain(&mut channel.stderr(), &mut buf, &mut stderr)?;
            if out == 0 && err == 0 && channel.eof() {
                break;
            }
        }

        until_settled(stop, || channel.wait_close())?;
        Ok(CommandOutput {
            exit_code: channel.exit_status()?,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    })();
    (channel, result)
}

#[async_trait]
impl RemoteSession for Ssh2Session {
    async fn run(&mut self, command: &str) -> Result<CommandOutput, SshError> {
        let channel = self.channel.take().ok_or_else(|| {
            SshError::new(ErrorKind::SessionCreation, "session already used")
                .with_context("address", &self.address)
        })?;

        let owned = command.to_string();
        let stop = self.stop.clone();
        let (channel, result) = tokio::task::spawn_blocking(move || exec(channel, &owned, &stop))
            .await
            .map_err(|e| SshError::wrap(ErrorKind::CommandFailed, "command worker panicked", e))?;
        self.channel = Some(channel);

        result.map_err(|e| {
            SshError::wrap(ErrorKind::CommandFailed, "failed to run command", e)
                .with_context("address", &self.address)
        })
    }

    async fn close(&mut self) -> Result<(), SshError> {
        let Some(mut channel) = self.channel.take() else {
            return Ok(());
        };
        let address = self.address.clone();
        let stop = self.stop.clone();
        tokio::task::spawn_blocking(move || {
            until_settled(&stop, || channel.close())?;
            until_settled(&stop, || channel.wait_close())
        })
        .await
        .map_err(|e| SshError::wrap(ErrorKind::SessionCreation, "session close worker panicked", e))?
        .map_err(|e| {
            warn!("Failed to close channel to {}: {}", address, e);
            SshError::wrap(ErrorKind::SessionCreation, "failed to close session", e)
                .with_context("address", address)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hostkey::HostKeyCallback;
    use crate::prompt::TerminalPrompter;

    fn request(port: u16) -> DialRequest {
        DialRequest {
            host: "127.0.0.1".into(),
            port,
            user: "deploy".into(),
            methods: Vec::new(),
            host_key: HostKeyCallback::insecure("127.0.0.1", port, Arc::new(TerminalPrompter)),
            connect_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_refused_connection_is_classified() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let address = format!("127.0.0.1:{}", port);
        let err = Ssh2Dialer::new()
            .dial(&CallContext::background(), &address, request(port))
            .await
            .err()
            .unwrap();

        assert_eq!(err.kind(), ErrorKind::ConnectionFailed);
        assert_eq!(err.context("address"), Some(address.as_str()));
    }

    #[tokio::test]
    async fn test_cancelled_dial_reports_reason() {
        let ctx = CallContext::background();
        ctx.cancel();

        let err = Ssh2Dialer::new()
            .dial(&ctx, "192.0.2.1:22", request(22))
            .await
            .err()
            .unwrap();

        assert_eq!(err.kind(), ErrorKind::ConnectionFailed);
        assert_eq!(err.context("reason"), Some("cancelled"));
        assert_eq!(err.context("address"), Some("192.0.2.1:22"));
    }

    #[test]
    fn test_pending_steps_retry_until_settled() {
        let stop = CancellationToken::new();
        let mut attempts = 0;
        let value = until_settled(&stop, || {
            attempts += 1;
            if attempts < 3 {
                Err(ssh2::Error::new(ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT), "timed out"))
            } else {
                Ok(attempts)
            }
        })
        .unwrap();
        assert_eq!(value, 3);
    }

    #[test]
    fn test_stopped_step_is_abandoned() {
        let stop = CancellationToken::new();
        stop.cancel();
        let mut attempts = 0;
        let result: Result<(), _> = until_settled(&stop, || {
            attempts += 1;
            Err(ssh2::Error::new(ErrorCode::Session(LIBSSH2_ERROR_EAGAIN), "would block"))
        });
        assert!(matches!(result, Err(Libssh2Failure::Abandoned)));
        assert_eq!(attempts, 1);
    }

    #[test]
    fn test_real_failures_are_not_retried() {
        let stop = CancellationToken::new();
        let result: Result<(), _> = until_settled(&stop, || {
            Err(ssh2::Error::new(ErrorCode::Session(-7), "socket send failure"))
        });
        assert!(matches!(result, Err(Libssh2Failure::Ssh(_))));
    }

    struct Idle;

    impl Read for Idle {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::TimedOut, "timed out waiting on socket"))
        }
    }

    #[test]
    fn test_drain_treats_poll_timeout_as_no_data() {
        let mut buf = [0u8; 8];
        let mut sink = Vec::new();
        assert_eq!(drain(&mut Idle, &mut buf, &mut sink).unwrap(), 0);

        let mut ready: &[u8] = b"ID=ubuntu";
        assert_eq!(drain(&mut ready, &mut buf, &mut sink).unwrap(), 8);
        assert_eq!(sink, b"ID=ubunt");
    }

    #[test]
    fn test_exhausted_methods_classify_as_auth_failure() {
        let err = Libssh2Failure::AuthExhausted {
            user: "deploy".into(),
            methods: "publickey, password".into(),
            last: None,
        };
        let classified = classify(err, "example.com:22");
        assert_eq!(classified.kind(), ErrorKind::AuthFailed);
    }
}
