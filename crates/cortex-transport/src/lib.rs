//! Byte-stream carriers for the CORTEX device adapter protocol.
//!
//! A [`Transport`] is the minimal capability set the protocol layer needs:
//! send everything or fail, receive some bytes under a deadline, close, and
//! read the endpoint's monotonic clock. Concrete carriers:
//!
//! - [`mem::MemPipe`]: in-process loopback, the reference implementation
//!   and the test vehicle.
//! - [`pipe`]: duplex `AF_UNIX` socket pair backing locally spawned
//!   adapters (the child inherits its end as stdin/stdout).
//! - [`tcp`]: active connect, or bind-and-accept-once for the single-peer
//!   server form.
//! - [`serial`]: POSIX termios, 8N1 raw mode, for embedded debugging.
//! - [`shm`]: two mmap'd ring buffers with named semaphores for blocking.
//!
//! Endpoints are selected by URI ([`TransportUri`]) and constructed with
//! [`open_endpoint`]. `local://` on the host side is the one URI this crate
//! cannot open by itself: it needs a child process, which is the launcher's
//! job in `cortex-client`.

mod errors;
mod fd;
pub mod mem;
pub mod pipe;
pub mod serial;
pub mod shm;
pub mod tcp;
mod time;
mod uri;

pub use errors::TransportError;
pub use fd::FdTransport;
pub use time::{Deadline, Timeout, monotonic_ns};
pub use uri::{Endpoint, TransportUri, UriOptions};

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// A full-duplex byte-stream carrier with per-call receive deadlines.
///
/// Implementations are owned by exactly one endpoint session; the core never
/// issues concurrent operations on one transport.
pub trait Transport: Send {
    /// Deliver the whole buffer or fail.
    ///
    /// Partial delivery counts as failure for frame writes; implementations
    /// loop internally over short writes.
    fn send(&mut self, buf: &[u8]) -> Result<()>;

    /// Receive at least one byte into `buf`, waiting at most `timeout`.
    ///
    /// Returns the number of bytes received (never zero). The protocol layer
    /// loops to fill fixed-size reads. [`Timeout::POLL`] checks without
    /// blocking; [`Timeout::FOREVER`] blocks until data, peer close, or
    /// error. A clean peer close is [`TransportError::Eof`].
    fn recv(&mut self, buf: &mut [u8], timeout: Timeout) -> Result<usize>;

    /// Wait until at least one byte is receivable, without consuming it.
    ///
    /// Returns `Ok(true)` when data (or a pending close) is ready and
    /// `Ok(false)` on timeout. Sessions use this to idle at a frame boundary
    /// (polling a shutdown flag between windows) without ever starting a
    /// frame read they might have to abandon halfway.
    fn poll_recv(&mut self, timeout: Timeout) -> Result<bool>;

    /// Release the carrier. Idempotent.
    ///
    /// Closing wakes a peer blocked in [`Transport::recv`] with
    /// [`TransportError::Eof`]: this is the intended shutdown path.
    fn close(&mut self);

    /// This endpoint's monotonic clock, in nanoseconds.
    ///
    /// Strictly nondecreasing; comparable only with timestamps from the same
    /// endpoint.
    fn monotonic_ns(&self) -> u64 {
        time::monotonic_ns()
    }
}

/// Which side of the protocol this endpoint plays.
///
/// The two sides open the same URI differently: for `shm://` the host
/// creates the region and the adapter opens it, and `local://` is only
/// openable on the adapter side (the host must spawn the child first).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Harness-side device client.
    Host,
    /// Adapter process.
    Adapter,
}

/// Open the transport a parsed URI describes, for the given role.
pub fn open_endpoint(uri: &TransportUri, role: Role) -> Result<Box<dyn Transport>> {
    let connect_timeout = uri
        .options
        .timeout_ms
        .map_or(Timeout::from_ms(tcp::DEFAULT_CONNECT_TIMEOUT_MS), Timeout::from_ms);
    let accept_timeout = uri
        .options
        .accept_timeout_ms
        .or(uri.options.timeout_ms)
        .map_or(Timeout::from_ms(tcp::DEFAULT_CONNECT_TIMEOUT_MS), Timeout::from_ms);

    match &uri.endpoint {
        Endpoint::Local => match role {
            Role::Adapter => Ok(Box::new(pipe::stdio_transport()?)),
            Role::Host => Err(TransportError::Config(
                "local:// on the host side requires the adapter launcher".to_owned(),
            )),
        },
        Endpoint::TcpConnect { host, port } => {
            Ok(Box::new(tcp::connect(host, *port, connect_timeout)?))
        }
        Endpoint::TcpListen { port } => Ok(Box::new(tcp::accept_once(*port, accept_timeout)?)),
        Endpoint::Serial { path, baud } => Ok(Box::new(serial::open(path, *baud)?)),
        Endpoint::Shm { name } => match role {
            Role::Host => Ok(Box::new(shm::ShmTransport::create(name)?)),
            Role::Adapter => Ok(Box::new(shm::ShmTransport::open(name)?)),
        },
    }
}
