//! Adapter launching and child-process lifecycle.
//!
//! [`AdapterLauncher`] abstracts how an adapter comes to exist on the other
//! end of a transport: [`ProcessLauncher`] spawns the adapter binary over an
//! inherited duplex socket pair (the `local://` mode), [`ConnectLauncher`]
//! reaches an already-running adapter over any other URI, and the test
//! harness provides a thread-in-process implementation. The client code is
//! identical across all three.

use std::{
    path::PathBuf,
    process::{Child, Command, ExitStatus, Stdio},
    time::{Duration, Instant},
};

use cortex_transport::{
    Endpoint, FdTransport, Role, Transport, TransportUri, open_endpoint, pipe,
};
use nix::{sys::signal::Signal, unistd::Pid};

use crate::errors::ClientError;

/// Grace period per teardown escalation step (close-wait, then SIGTERM-wait).
pub const TEARDOWN_GRACE_MS: u64 = 2000;

/// Poll interval while waiting for a child to exit.
const REAP_POLL_MS: u64 = 10;

/// How far teardown had to escalate to reap the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Escalation {
    /// Child exited on transport close alone.
    None,
    /// Child needed SIGTERM.
    Sigterm,
    /// Child ignored SIGTERM and was killed.
    Sigkill,
}

/// Outcome of a teardown. Teardown never fails visibly; this is the log
/// record of what it took.
#[derive(Debug, Clone, Copy)]
pub struct TeardownReport {
    /// Reaped exit status, when there was a child to reap.
    pub exit_status: Option<ExitStatus>,
    /// Highest escalation step used.
    pub escalation: Escalation,
}

impl TeardownReport {
    /// Report for a session with no spawned child.
    #[must_use]
    pub fn no_child() -> Self {
        Self { exit_status: None, escalation: Escalation::None }
    }
}

/// A spawned adapter process owned by the harness.
///
/// The exit status MUST be reaped, via [`AdapterChild::reap_with_grace`], to
/// avoid zombies; [`DeviceClient`](crate::DeviceClient) teardown does this.
#[derive(Debug)]
pub struct AdapterChild {
    child: Child,
}

impl AdapterChild {
    /// Take ownership of a spawned adapter.
    #[must_use]
    pub fn new(child: Child) -> Self {
        Self { child }
    }

    /// OS process id.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Poll for exit for up to `grace`.
    fn wait_with_deadline(&mut self, grace: Duration) -> Option<ExitStatus> {
        let deadline = Instant::now() + grace;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => return Some(status),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(pid = self.id(), error = %e, "try_wait failed");
                    return None;
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(Duration::from_millis(REAP_POLL_MS));
        }
    }

    /// Reap the child, escalating close-wait → SIGTERM → SIGKILL.
    ///
    /// The caller is expected to have closed the transport already; EOF is
    /// the adapter's intended shutdown signal, so a well-behaved child exits
    /// within the first grace window with status 0.
    pub fn reap_with_grace(mut self, grace: Duration) -> TeardownReport {
        if let Some(status) = self.wait_with_deadline(grace) {
            return TeardownReport { exit_status: Some(status), escalation: Escalation::None };
        }

        let pid = Pid::from_raw(self.id() as i32);
        tracing::warn!(%pid, "adapter ignored EOF; sending SIGTERM");
        if let Err(e) = nix::sys::signal::kill(pid, Signal::SIGTERM) {
            tracing::warn!(%pid, error = %e, "SIGTERM failed");
        }
        if let Some(status) = self.wait_with_deadline(grace) {
            return TeardownReport { exit_status: Some(status), escalation: Escalation::Sigterm };
        }

        tracing::warn!(%pid, "adapter ignored SIGTERM; killing");
        if let Err(e) = self.child.kill() {
            tracing::warn!(%pid, error = %e, "SIGKILL failed");
        }
        match self.child.wait() {
            Ok(status) => {
                TeardownReport { exit_status: Some(status), escalation: Escalation::Sigkill }
            }
            Err(e) => {
                tracing::error!(%pid, error = %e, "could not reap adapter; leaking child");
                TeardownReport { exit_status: None, escalation: Escalation::Sigkill }
            }
        }
    }
}

/// A transport with, optionally, the child process behind it.
pub struct LaunchedAdapter {
    /// Connected, handshake-ready transport.
    pub transport: Box<dyn Transport>,
    /// The spawned child for `local://` launches; `None` for remote peers.
    pub child: Option<AdapterChild>,
}

/// How an adapter comes to exist on the far end of a transport.
pub trait AdapterLauncher {
    /// Produce a connected adapter.
    fn launch(&mut self) -> Result<LaunchedAdapter, ClientError>;
}

/// Spawns the adapter binary with a duplex socket pair as its stdin/stdout.
pub struct ProcessLauncher {
    binary: PathBuf,
    extra_args: Vec<String>,
}

impl ProcessLauncher {
    /// Launcher for the given adapter binary.
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into(), extra_args: Vec::new() }
    }

    /// Add arguments placed before the positional URI.
    #[must_use]
    pub fn with_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.extra_args.extend(args);
        self
    }
}

impl AdapterLauncher for ProcessLauncher {
    fn launch(&mut self) -> Result<LaunchedAdapter, ClientError> {
        let (host_end, child_end) = pipe::duplex_socketpair()?;
        let child_stdout = child_end.try_clone().map_err(ClientError::Launch)?;

        let child = Command::new(&self.binary)
            .args(&self.extra_args)
            .arg("local://")
            .stdin(Stdio::from(child_end))
            .stdout(Stdio::from(child_stdout))
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(ClientError::Launch)?;

        tracing::info!(binary = %self.binary.display(), pid = child.id(), "adapter spawned");
        let transport = FdTransport::from_duplex(host_end)?;
        Ok(LaunchedAdapter {
            transport: Box::new(transport),
            child: Some(AdapterChild::new(child)),
        })
    }
}

/// Connects to an adapter that already exists (TCP, serial, or shm URIs).
pub struct ConnectLauncher {
    uri: TransportUri,
}

impl ConnectLauncher {
    /// Launcher for an already-parsed URI.
    #[must_use]
    pub fn new(uri: TransportUri) -> Self {
        Self { uri }
    }
}

impl AdapterLauncher for ConnectLauncher {
    fn launch(&mut self) -> Result<LaunchedAdapter, ClientError> {
        let transport = open_endpoint(&self.uri, Role::Host)?;
        Ok(LaunchedAdapter { transport, child: None })
    }
}

/// Pick the launcher a URI implies.
///
/// `local://` needs `adapter_binary`; every other scheme connects to a peer
/// that is already running.
pub fn launcher_for_uri(
    uri: &str,
    adapter_binary: Option<PathBuf>,
) -> Result<Box<dyn AdapterLauncher>, ClientError> {
    let parsed = TransportUri::parse(uri)?;
    match (&parsed.endpoint, adapter_binary) {
        (Endpoint::Local, Some(binary)) => Ok(Box::new(ProcessLauncher::new(binary))),
        (Endpoint::Local, None) => Err(ClientError::Launch(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "local:// requires an adapter binary path",
        ))),
        _ => Ok(Box::new(ConnectLauncher::new(parsed))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn_shell(script: &str) -> AdapterChild {
        let child = Command::new("/bin/sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
            .unwrap();
        AdapterChild::new(child)
    }

    #[test]
    fn prompt_exit_needs_no_escalation() {
        let child = spawn_shell("exit 0");
        let report = child.reap_with_grace(Duration::from_millis(TEARDOWN_GRACE_MS));
        assert_eq!(report.escalation, Escalation::None);
        assert_eq!(report.exit_status.and_then(|s| s.code()), Some(0));
    }

    #[test]
    fn sleeper_is_escalated_and_reaped() {
        // `exec` so the sleep IS the child process; a default SIGTERM
        // disposition means escalation stops at the first signal.
        let child = spawn_shell("exec sleep 30");
        let report = child.reap_with_grace(Duration::from_millis(100));
        assert_eq!(report.escalation, Escalation::Sigterm);
        let status = report.exit_status.unwrap();
        assert!(!status.success());
    }

    #[test]
    fn sigterm_ignorer_is_killed() {
        // A shell that traps SIGTERM must be SIGKILLed.
        let child = spawn_shell("trap '' TERM; while true; do sleep 0.05; done");
        let report = child.reap_with_grace(Duration::from_millis(100));
        assert_eq!(report.escalation, Escalation::Sigkill);
        assert!(report.exit_status.is_some());
    }

    #[test]
    fn local_uri_without_binary_is_rejected() {
        assert!(matches!(
            launcher_for_uri("local://", None),
            Err(ClientError::Launch(_))
        ));
    }
}
