//! In-process adapter harness.
//!
//! Runs the real [`AdapterSession`] on a thread over a duplex socket pair,
//! so the full client/adapter state machine (handshake, chunking, timing,
//! teardown) is exercised inside one test process. [`ThreadLauncher`] is
//! the thread-in-process [`AdapterLauncher`] implementation; production
//! swaps in the process launcher without touching client code.

// Harness helpers abort the test run on setup failure.
#![allow(clippy::panic)]

use std::thread::JoinHandle;

use cortex_adapter::{
    AdapterConfig, AdapterSession, KernelRegistry, SessionError, SessionOutcome, ShutdownFlag,
    kernels,
};
use cortex_client::{AdapterLauncher, ClientError, LaunchedAdapter, SessionConfig};
use cortex_transport::{FdTransport, Transport, pipe};

/// Create a connected pair of descriptor-backed transports.
///
/// The pair behaves exactly like the `local://` spawn path minus the child
/// process: same socketpair, same buffer tuning.
pub fn transport_pair() -> (FdTransport, FdTransport) {
    let (a, b) = pipe::duplex_socketpair().unwrap_or_else(|e| panic!("socketpair: {e}"));
    let a = FdTransport::from_duplex(a).unwrap_or_else(|e| panic!("dup: {e}"));
    let b = FdTransport::from_duplex(b).unwrap_or_else(|e| panic!("dup: {e}"));
    (a, b)
}

/// Runs the adapter session on a thread instead of in a child process.
pub struct ThreadLauncher {
    registry: fn() -> KernelRegistry,
    config: AdapterConfig,
    /// Shutdown flag shared with the session (stands in for SIGTERM).
    pub shutdown: ShutdownFlag,
    handle: Option<JoinHandle<Result<SessionOutcome, SessionError>>>,
}

impl Default for ThreadLauncher {
    fn default() -> Self {
        Self::new(kernels::builtin_registry)
    }
}

impl ThreadLauncher {
    /// Launcher whose sessions use the given registry.
    #[must_use]
    pub fn new(registry: fn() -> KernelRegistry) -> Self {
        Self {
            registry,
            config: AdapterConfig::default(),
            shutdown: ShutdownFlag::new(),
            handle: None,
        }
    }

    /// Wait for the session thread and return its outcome.
    ///
    /// # Panics
    ///
    /// Panics if no session was launched or the session thread panicked.
    pub fn join(&mut self) -> Result<SessionOutcome, SessionError> {
        let handle = self.handle.take().unwrap_or_else(|| panic!("no session launched"));
        handle.join().unwrap_or_else(|_| panic!("adapter session thread panicked"))
    }
}

impl AdapterLauncher for ThreadLauncher {
    fn launch(&mut self) -> Result<LaunchedAdapter, ClientError> {
        let (host_end, adapter_end) = transport_pair();
        let registry = (self.registry)();
        let config = self.config.clone();
        let shutdown = self.shutdown.clone();

        let handle = std::thread::spawn(move || {
            AdapterSession::new(Box::new(adapter_end), registry, config, shutdown).run()
        });
        self.handle = Some(handle);

        Ok(LaunchedAdapter { transport: Box::new(host_end), child: None })
    }
}

/// Run a hand-written peer on a thread, for fault-injection tests that need
/// an adapter which deliberately misbehaves.
pub fn scripted_peer<F>(script: F) -> (FdTransport, JoinHandle<()>)
where
    F: FnOnce(&mut dyn Transport) + Send + 'static,
{
    let (host_end, peer_end) = transport_pair();
    let handle = std::thread::spawn(move || {
        let mut peer: Box<dyn Transport> = Box::new(peer_end);
        script(peer.as_mut());
    });
    (host_end, handle)
}

/// Session config for an identity-kernel run of `window_samples x channels`.
#[must_use]
pub fn identity_session(window_samples: u32, channels: u32) -> SessionConfig {
    SessionConfig {
        kernel_name: "identity".to_owned(),
        kernel_params: String::new(),
        sample_rate_hz: 1000,
        window_samples,
        hop_samples: window_samples,
        channels,
        calibration: Vec::new(),
    }
}
