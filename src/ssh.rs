//! Remote Shutdown Client
//!
//! Opens an SSH session to the target machine and runs a single shutdown command.
//! libssh2 is blocking, so the whole exchange runs on tokio's blocking pool and
//! the async side only waits for it, bounded by the configured timeout.

use crate::error::ShutdownError;
use crate::models::{CommandOutput, Phase, SshCredential, SshTarget};
use ssh2::{Channel, Session};
use std::io::{self, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// Progress of one shutdown run, shared between the blocking task and its waiter
const RUN_CONNECTING: u8 = 0;
const RUN_CONNECTED: u8 = 1;
const RUN_ABANDONED: u8 = 2;

const OUTPUT_POLL: Duration = Duration::from_millis(20);

/// How a remote command ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteExit {
    Status(i32),
    Signal(String),
}

/// Opens authenticated shell sessions
pub trait ShellConnector: Send + Sync {
    fn connect(&self, target: &SshTarget, timeout: Duration) -> io::Result<Box<dyn ShellSession>>;
}

/// One authenticated session, used for exactly one command
pub trait ShellSession: Send {
    fn exec(&mut self, command: &str) -> io::Result<()>;

    /// Read stdout and stderr until the remote side closes them
    fn read_output(&mut self) -> io::Result<(String, String)>;

    /// Wait for the channel to close and report the exit
    fn wait_exit(&mut self) -> io::Result<RemoteExit>;

    fn close(&mut self) {}
}

/// libssh2-backed connector
pub struct Ssh2Connector;

impl ShellConnector for Ssh2Connector {
    fn connect(&self, target: &SshTarget, timeout: Duration) -> io::Result<Box<dyn ShellSession>> {
        let addr = target
            .address()
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{} did not resolve", target.host),
                )
            })?;

        let tcp = TcpStream::connect_timeout(&addr, timeout)?;
        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));
        session.handshake()?;

        tracing::debug!(
            "authenticating SSH session to {} for {} ({:?})",
            target.host,
            target.username,
            target.credential
        );
        match &target.credential {
            SshCredential::Password(password) => {
                session.userauth_password(&target.username, password)?
            }
            SshCredential::Agent => session.userauth_agent(&target.username)?,
            SshCredential::Key {
                private_key,
                passphrase,
            } => session.userauth_pubkey_file(
                &target.username,
                None,
                private_key,
                passphrase.as_deref(),
            )?,
        }

        if !session.authenticated() {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "SSH authentication rejected",
            ));
        }

        Ok(Box::new(Ssh2Session {
            session,
            channel: None,
            timeout,
        }))
    }
}

struct Ssh2Session {
    session: Session,
    channel: Option<Channel>,
    timeout: Duration,
}

/// Both output streams of a running command, read without blocking
trait OutputStreams {
    fn read_stdout(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn read_stderr(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn eof(&self) -> bool;
}

impl OutputStreams for Channel {
    fn read_stdout(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read(buf)
    }

    fn read_stderr(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stderr().read(buf)
    }

    fn eof(&self) -> bool {
        Channel::eof(self)
    }
}

/// Append whatever `read` has ready to `out`; true if anything arrived
fn pull(read: io::Result<usize>, buf: &[u8], out: &mut Vec<u8>) -> io::Result<bool> {
    match read {
        Ok(0) => Ok(false),
        Ok(n) => {
            out.extend_from_slice(&buf[..n]);
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
        Err(e) => Err(e),
    }
}

/// Interleave reads of stdout and stderr so neither stream's window can stall
/// the other, until EOF or `deadline`.
fn drain_output(
    streams: &mut impl OutputStreams,
    deadline: Instant,
) -> io::Result<(String, String)> {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut buf = [0u8; 4096];

    loop {
        let read = streams.read_stdout(&mut buf);
        let got_out = pull(read, &buf, &mut stdout)?;
        let read = streams.read_stderr(&mut buf);
        let got_err = pull(read, &buf, &mut stderr)?;

        if got_out || got_err {
            continue;
        }
        if streams.eof() {
            break;
        }
        if Instant::now() >= deadline {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "remote output did not close in time",
            ));
        }
        std::thread::sleep(OUTPUT_POLL);
    }

    Ok((
        String::from_utf8_lossy(&stdout).into_owned(),
        String::from_utf8_lossy(&stderr).into_owned(),
    ))
}

impl Ssh2Session {
    fn channel(&mut self) -> io::Result<&mut Channel> {
        self.channel
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no command running"))
    }
}

impl ShellSession for Ssh2Session {
    fn exec(&mut self, command: &str) -> io::Result<()> {
        let mut channel = self.session.channel_session()?;
        channel.exec(command)?;
        self.channel = Some(channel);
        Ok(())
    }

    fn read_output(&mut self) -> io::Result<(String, String)> {
        let deadline = Instant::now() + self.timeout;
        let channel = self
            .channel
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no command running"))?;

        self.session.set_blocking(false);
        let output = drain_output(channel, deadline);
        self.session.set_blocking(true);
        output
    }

    fn wait_exit(&mut self) -> io::Result<RemoteExit> {
        let channel = self.channel()?;
        channel.wait_close()?;
        if let Some(signal) = channel.exit_signal()?.exit_signal {
            return Ok(RemoteExit::Signal(signal));
        }
        Ok(RemoteExit::Status(channel.exit_status()?))
    }

    fn close(&mut self) {
        if let Err(e) = self.session.disconnect(None, "shutdown sent", None) {
            tracing::debug!("SSH disconnect failed: {}", e);
        }
    }
}

/// Runs the shutdown command on a target
pub struct ShutdownClient {
    connector: Arc<dyn ShellConnector>,
    command: String,
    timeout: Duration,
}

impl ShutdownClient {
    pub fn new(connector: Arc<dyn ShellConnector>, command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            connector,
            command: command.into(),
            timeout,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Run the shutdown command and wait for its stream to close.
    ///
    /// `on_connected` fires once the session is authenticated. If the timeout
    /// expires before that, the session is closed without running the command.
    pub async fn shutdown(
        &self,
        target: &SshTarget,
        on_connected: impl FnOnce() + Send + 'static,
    ) -> Result<CommandOutput, ShutdownError> {
        let progress = Arc::new(AtomicU8::new(RUN_CONNECTING));
        let task = {
            let connector = Arc::clone(&self.connector);
            let target = target.clone();
            let command = self.command.clone();
            let timeout = self.timeout;
            let progress = Arc::clone(&progress);
            tokio::task::spawn_blocking(move || {
                run_command(
                    connector.as_ref(),
                    &target,
                    &command,
                    timeout,
                    &progress,
                    on_connected,
                )
            })
        };

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(ShutdownError::StreamError(format!("SSH task failed: {}", e))),
            Err(_) => {
                // Whichever side moves the state first decides whether the command runs
                let abandoned = progress
                    .compare_exchange(
                        RUN_CONNECTING,
                        RUN_ABANDONED,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    )
                    .is_ok();
                Err(ShutdownError::Timeout(if abandoned {
                    Phase::ConnectingSsh
                } else {
                    Phase::Executing
                }))
            }
        }
    }
}

fn classify(e: io::Error, phase: Phase, other: fn(String) -> ShutdownError) -> ShutdownError {
    if e.kind() == io::ErrorKind::TimedOut {
        ShutdownError::Timeout(phase)
    } else {
        other(e.to_string())
    }
}

fn run_command(
    connector: &dyn ShellConnector,
    target: &SshTarget,
    command: &str,
    timeout: Duration,
    progress: &AtomicU8,
    on_connected: impl FnOnce(),
) -> Result<CommandOutput, ShutdownError> {
    tracing::debug!("creating an SSH session to {}", target.address());
    let mut session = connector
        .connect(target, timeout)
        .map_err(|e| classify(e, Phase::ConnectingSsh, ShutdownError::ConnectFailed))?;

    if progress
        .compare_exchange(
            RUN_CONNECTING,
            RUN_CONNECTED,
            Ordering::SeqCst,
            Ordering::SeqCst,
        )
        .is_err()
    {
        tracing::warn!(
            "   -> Connected to {} after the deadline, closing without running the command",
            target.address()
        );
        session.close();
        return Err(ShutdownError::Timeout(Phase::ConnectingSsh));
    }
    on_connected();

    tracing::info!("   -> Connected, executing \"{}\"", command);
    session
        .exec(command)
        .map_err(|e| classify(e, Phase::Executing, ShutdownError::ExecFailed))?;

    let (stdout, stderr) = session
        .read_output()
        .map_err(|e| classify(e, Phase::Executing, ShutdownError::StreamError))?;
    let exit = session
        .wait_exit()
        .map_err(|e| classify(e, Phase::Executing, ShutdownError::StreamError))?;
    session.close();

    if !stdout.is_empty() {
        tracing::debug!("   -> stdout: {}", stdout.trim_end());
    }
    if !stderr.is_empty() {
        tracing::warn!("   -> stderr: {}", stderr.trim_end());
    }

    match exit {
        RemoteExit::Status(0) => Ok(CommandOutput {
            stdout,
            stderr,
            exit_status: Some(0),
        }),
        RemoteExit::Status(status) => Err(ShutdownError::CommandFailed { status, stderr }),
        RemoteExit::Signal(signal) => Err(ShutdownError::StreamError(format!(
            "remote command killed by signal {}",
            signal
        ))),
    }
}
