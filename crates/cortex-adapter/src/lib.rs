//! Device-side half of the CORTEX adapter protocol.
//!
//! An adapter hosts signal-processing kernels and executes windows on the
//! host's behalf: it advertises its kernels (HELLO), accepts a session
//! (CONFIG/ACK), then loops receive-window → process → send-RESULT until the
//! host closes the transport. Device-side timing is captured around every
//! step with the transport's monotonic clock.
//!
//! Kernels are resolved through a static [`KernelRegistry`] (a link table
//! keyed by name) rather than `dlopen`, which keeps embedded builds and
//! host builds on the same code path.

mod errors;
mod kernel;
pub mod kernels;
mod session;
mod shutdown;

pub use errors::{KernelError, SessionError};
pub use kernel::{Kernel, KernelConfig, KernelCtor, KernelInstance, KernelRegistry};
pub use session::{AdapterConfig, AdapterSession, SessionOutcome};
pub use shutdown::ShutdownFlag;
