//! Executor launch protocol.
//!
//! One [`run`] starts the executor binary with:
//!
//! - no arguments, an empty environment and `/` as working directory;
//! - stdin and stdout connected to pipes, stderr discarded unless
//!   [`RunConfig::inherit_stderr`] is set;
//! - two extra descriptors at fixed numbers, which is how the executor finds
//!   them:
//!
//! | Descriptor | Resource |
//! |------------|----------|
//! | 0 | handshake pipe (stdin) |
//! | 1 | output pipe (stdout) |
//! | 3 ([`abi::PAYLOAD_FD`]) | sealed payload file |
//! | 4 ([`abi::LOADER_FD`]) | loader binary |
//!
//! The [`PayloadDescriptor`](crate::payload::PayloadDescriptor) is written to
//! stdin as the first and only input, stdout is drained to EOF, and the exit
//! status decides whether the captured output is returned.

mod config;
mod exit;

pub use config::RunConfig;
pub use exit::loader_diagnosis;

use std::fmt;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use nix::fcntl::{fcntl, FcntlArg};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::{dup2, Pid};

use crate::abi;
use crate::env::Environment;
use crate::error::{Result, SandboxError};
use crate::payload::{Payload, SealableFile};

/// How often a run with a deadline polls for executor termination.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// How long output collection waits for EOF once the executor group is dead.
const DRAIN_GRACE: Duration = Duration::from_millis(100);

/// Lifecycle of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Command prepared
    Created,
    /// Executor process running
    Started,
    /// Payload descriptor delivered
    HandshakeSent,
    /// Executor output read to EOF
    OutputDrained,
    /// Executor reaped
    Waited,
    /// Executor exited successfully
    Succeeded,
    /// Executor could not be started
    FailedStart,
    /// Payload descriptor could not be delivered
    FailedHandshake,
    /// Executor forcibly terminated
    Killed,
    /// Executor could not be reaped
    FailedWait,
    /// Executor exited unsuccessfully
    FailedExitStatus,
    /// Executor exceeded its deadline
    TimedOut,
}

impl RunState {
    /// True once the run can make no further progress.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::FailedStart | Self::FailedWait | Self::FailedExitStatus | Self::TimedOut
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Run a payload in a new executor process and return its output.
///
/// The payload is consumed: it is handed to exactly one executor and closed
/// once that executor has terminated.
pub fn run<F: SealableFile>(env: &Environment, payload: Payload<F>, config: &RunConfig) -> Result<Vec<u8>> {
    let mut launch = Launch::new();
    let result = launch.execute(env, &payload, config);

    if let Err(err) = payload.close() {
        tracing::warn!(error = %err, "failed to close payload");
    }

    result
}

/// State tracking for one executor launch.
#[derive(Debug)]
pub(crate) struct Launch {
    state: RunState,
}

impl Launch {
    pub(crate) fn new() -> Self {
        Self {
            state: RunState::Created,
        }
    }

    pub(crate) fn state(&self) -> RunState {
        self.state
    }

    fn advance(&mut self, next: RunState) {
        tracing::trace!(from = %self.state, to = %next, "run state");
        self.state = next;
    }

    pub(crate) fn execute<F: SealableFile>(
        &mut self,
        env: &Environment,
        payload: &Payload<F>,
        config: &RunConfig,
    ) -> Result<Vec<u8>> {
        let inherited = [
            (payload.file().as_fd().as_raw_fd(), abi::PAYLOAD_FD),
            (env.loader().as_raw_fd(), abi::LOADER_FD),
        ];

        let mut cmd = Command::new(env.executor());
        cmd.env_clear()
            .current_dir("/")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(if config.inherit_stderr {
                Stdio::inherit()
            } else {
                Stdio::null()
            });

        // With a deadline the executor leads its own process group, so that
        // everything holding its stdout can be killed at once.
        if config.timeout().is_some() {
            cmd.process_group(0);
        }

        // SAFETY: inherit_fds only calls fcntl and dup2, which are
        // async-signal-safe, and does not allocate.
        unsafe {
            cmd.pre_exec(move || inherit_fds(&inherited));
        }

        let started = Instant::now();
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                self.advance(RunState::FailedStart);
                return Err(SandboxError::Spawn {
                    path: env.executor().to_path_buf(),
                    source,
                });
            }
        };
        self.advance(RunState::Started);

        tracing::info!(
            pid = child.id(),
            executor = %env.executor().display(),
            "executor started"
        );

        self.handshake(&mut child, &payload.descriptor().encode())?;

        let Some(stdout) = child.stdout.take() else {
            let _ = self.kill_and_reap(&mut child);
            return Err(SandboxError::Wait(io::Error::other("executor stdout is not piped")));
        };

        let waited = match config.timeout() {
            None => {
                let output = drain(stdout);
                self.advance(RunState::OutputDrained);
                child.wait().map(|status| Some((status, output)))
            }
            Some(limit) => {
                let deadline = started + limit;
                let group = Pid::from_raw(child.id() as libc::pid_t);

                let (tx, rx) = mpsc::channel();
                thread::spawn(move || {
                    let _ = tx.send(drain(stdout));
                });

                let waited = wait_with_deadline(&mut child, group, deadline);
                let output = collect_output(&rx, group, deadline);
                self.advance(RunState::OutputDrained);

                match (waited, output) {
                    (Ok(Some(status)), Some(output)) => Ok(Some((status, output))),
                    (Ok(_), _) => Ok(None),
                    (Err(err), _) => Err(err),
                }
            }
        };

        let (status, output) = match waited {
            Ok(Some(done)) => done,
            Ok(None) => {
                self.advance(RunState::TimedOut);
                let limit = config.timeout().unwrap_or_default();
                tracing::warn!(pid = child.id(), ?limit, "executor killed at deadline");
                return Err(SandboxError::Timeout(limit));
            }
            Err(err) => {
                self.advance(RunState::FailedWait);
                return Err(SandboxError::Wait(err));
            }
        };
        self.advance(RunState::Waited);

        if !status.success() {
            self.advance(RunState::FailedExitStatus);
            tracing::info!(%status, "executor failed");
            return Err(exit_status_error(status));
        }

        self.advance(RunState::Succeeded);
        tracing::info!(
            output_len = output.len(),
            elapsed = ?started.elapsed(),
            "executor finished"
        );
        Ok(output)
    }

    /// Deliver the payload descriptor and close stdin.
    ///
    /// On failure the executor is killed and reaped. An executor that had
    /// already exited on its own with a failing code is reported by its exit
    /// status rather than as a handshake failure.
    fn handshake(&mut self, child: &mut Child, handshake: &[u8]) -> Result<()> {
        let Err(err) = send_handshake(child, handshake) else {
            self.advance(RunState::HandshakeSent);
            return Ok(());
        };
        self.advance(RunState::FailedHandshake);

        match self.kill_and_reap(child) {
            Some(status) if status.code().is_some() && !status.success() => {
                self.advance(RunState::FailedExitStatus);
                Err(exit_status_error(status))
            }
            _ => Err(SandboxError::Handshake(err)),
        }
    }

    /// Kill the executor and reap it, returning its final status.
    fn kill_and_reap(&mut self, child: &mut Child) -> Option<ExitStatus> {
        if let Err(err) = child.kill() {
            tracing::warn!(pid = child.id(), error = %err, "failed to kill executor");
        }
        self.advance(RunState::Killed);

        match child.wait() {
            Ok(status) => {
                self.advance(RunState::Waited);
                Some(status)
            }
            Err(err) => {
                tracing::warn!(pid = child.id(), error = %err, "failed to reap executor");
                self.advance(RunState::FailedWait);
                None
            }
        }
    }
}

fn exit_status_error(status: ExitStatus) -> SandboxError {
    SandboxError::ExitStatus {
        status,
        diagnosis: status.code().and_then(loader_diagnosis),
    }
}

/// Write the handshake and close stdin.
fn send_handshake(child: &mut Child, handshake: &[u8]) -> io::Result<()> {
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| io::Error::other("executor stdin is not piped"))?;

    stdin.write_all(handshake)?;
    stdin.flush()
}

/// Read executor output until EOF. Read errors end the output early but are
/// not fatal; the exit status decides the outcome.
fn drain(mut stdout: ChildStdout) -> Vec<u8> {
    let mut output = Vec::new();
    if let Err(err) = stdout.read_to_end(&mut output) {
        tracing::warn!(error = %err, "reading executor output failed");
    }
    output
}

/// Wait for the executor, killing its process group once `deadline` passes.
///
/// Returns `None` if the executor had to be killed. The executor is never
/// left running when this returns.
fn wait_with_deadline(child: &mut Child, group: Pid, deadline: Instant) -> io::Result<Option<ExitStatus>> {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(Some(status)),
            Ok(None) => {}
            Err(err) => {
                kill_group(child, group);
                let _ = child.wait();
                return Err(err);
            }
        }

        if Instant::now() >= deadline {
            kill_group(child, group);
            child.wait()?;
            return Ok(None);
        }

        thread::sleep(WAIT_POLL_INTERVAL);
    }
}

/// SIGKILL the executor's process group, falling back to the executor alone.
fn kill_group(child: &mut Child, group: Pid) {
    if let Err(errno) = killpg(group, Signal::SIGKILL) {
        tracing::warn!(pgid = group.as_raw(), error = %errno, "failed to kill executor group");
        let _ = child.kill();
    }
}

/// Receive the drained output, waiting no longer than `deadline`.
///
/// Descendants that outlive the executor keep stdout open; once the deadline
/// passes they are killed along with the rest of the group. Returns `None` if
/// the output could not be collected in time.
fn collect_output(rx: &Receiver<Vec<u8>>, group: Pid, deadline: Instant) -> Option<Vec<u8>> {
    let remaining = deadline.saturating_duration_since(Instant::now());

    match rx.recv_timeout(remaining.max(DRAIN_GRACE)) {
        Ok(output) => return Some(output),
        Err(RecvTimeoutError::Disconnected) => {
            tracing::warn!("executor output reader panicked");
            return Some(Vec::new());
        }
        Err(RecvTimeoutError::Timeout) => {}
    }

    // The group leader may already be reaped; remaining members keep the id.
    if let Err(errno) = killpg(group, Signal::SIGKILL) {
        tracing::debug!(pgid = group.as_raw(), error = %errno, "executor group already gone");
    }

    if let Err(err) = rx.recv_timeout(DRAIN_GRACE) {
        tracing::warn!(error = %err, "abandoning executor output");
    }
    None
}

/// Install `(source, target)` descriptor pairs in the child.
///
/// Sources are first duplicated above every target so that installing one
/// target never clobbers a source that is still needed. The staged copies are
/// close-on-exec; the installed targets are not.
fn inherit_fds<const N: usize>(fds: &[(RawFd, RawFd); N]) -> io::Result<()> {
    let floor = fds.iter().map(|&(_, target)| target).max().unwrap_or(0) + 1;

    let mut staged = [0 as RawFd; N];
    for (slot, &(source, _)) in staged.iter_mut().zip(fds) {
        *slot = fcntl(source, FcntlArg::F_DUPFD_CLOEXEC(floor))?;
    }

    for (&source, &(_, target)) in staged.iter().zip(fds) {
        dup2(source, target)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::PayloadDescriptor;
    use std::io::{BufRead, BufReader};
    use std::os::unix::process::ExitStatusExt;

    /// A process group id that cannot exist (beyond `pid_max`).
    const NO_GROUP: libc::pid_t = 0x3fff_fff0;

    #[test]
    fn test_terminal_states() {
        assert!(RunState::Succeeded.is_terminal());
        assert!(RunState::FailedExitStatus.is_terminal());
        assert!(RunState::TimedOut.is_terminal());
        assert!(!RunState::Created.is_terminal());
        assert!(!RunState::Killed.is_terminal());
        assert!(!RunState::HandshakeSent.is_terminal());
    }

    #[test]
    fn test_new_launch_is_created() {
        assert_eq!(Launch::new().state(), RunState::Created);
    }

    #[test]
    fn test_run_state_display() {
        assert_eq!(RunState::HandshakeSent.to_string(), "HandshakeSent");
    }

    #[test]
    fn test_handshake_to_closed_stdin_kills_executor() {
        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg("exec 0<&-; echo closed; exec sleep 30")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .unwrap();

        // Only hand over the descriptor once stdin is known to be closed.
        let mut stdout = BufReader::new(child.stdout.take().unwrap());
        let mut line = String::new();
        stdout.read_line(&mut line).unwrap();
        assert_eq!(line, "closed\n");

        let mut launch = Launch::new();
        let started = Instant::now();
        let err = launch
            .handshake(&mut child, &[0u8; PayloadDescriptor::ENCODED_LEN])
            .unwrap_err();

        match err {
            SandboxError::Handshake(e) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(launch.state(), RunState::Waited);
        assert!(started.elapsed() < Duration::from_secs(5));

        let status = child.try_wait().unwrap().expect("executor was not reaped");
        assert_eq!(status.signal(), Some(Signal::SIGKILL as i32));
    }

    #[test]
    fn test_collect_output_reader_panic() {
        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        let reader = thread::spawn(move || {
            let _tx = tx;
            panic!("reader failed");
        });
        assert!(reader.join().is_err());

        let output = collect_output(&rx, Pid::from_raw(NO_GROUP), Instant::now() + Duration::from_secs(5));
        assert_eq!(output, Some(Vec::new()));
    }

    #[test]
    fn test_collect_output_abandoned_at_deadline() {
        let (tx, rx) = mpsc::channel::<Vec<u8>>();

        let started = Instant::now();
        let output = collect_output(&rx, Pid::from_raw(NO_GROUP), started);

        assert_eq!(output, None);
        assert!(started.elapsed() < Duration::from_secs(2));
        drop(tx);
    }

    #[test]
    fn test_collect_output_received() {
        let (tx, rx) = mpsc::channel();
        tx.send(b"done".to_vec()).unwrap();

        let output = collect_output(&rx, Pid::from_raw(NO_GROUP), Instant::now());
        assert_eq!(output.as_deref(), Some(&b"done"[..]));
    }
}
