//! Adapter-side error types.

use cortex_link::LinkError;
use cortex_proto::{FrameType, ProtocolError};
use thiserror::Error;

/// Errors raised by kernel resolution, init, and processing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KernelError {
    /// Name not present in the registry.
    #[error("no kernel named {0:?}")]
    Unknown(String),

    /// The kernel rejected its configuration.
    #[error("kernel init failed: {0}")]
    Init(String),

    /// The parameter string did not parse.
    #[error("invalid kernel parameters: {0}")]
    Params(String),

    /// The calibration blob did not match what the kernel expects.
    #[error("invalid calibration state: {0}")]
    Calibration(String),

    /// `process` failed mid-window.
    #[error("kernel processing failed: {0}")]
    Process(String),
}

/// Fatal session errors on the adapter side.
///
/// Handshake and kernel failures are reported to the host with an ERROR
/// frame before the session terminates; transport-level failures cannot be.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Frame or window transfer failure.
    #[error(transparent)]
    Link(#[from] LinkError),

    /// Payload decode failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Kernel failure.
    #[error(transparent)]
    Kernel(#[from] KernelError),

    /// CONFIG parameters failed validation.
    #[error("invalid CONFIG: {0}")]
    BadConfig(String),

    /// A frame arrived that the state machine cannot accept.
    #[error("unexpected {got:?} frame in state {state}")]
    UnexpectedFrame {
        /// State the session was in.
        state: &'static str,
        /// Frame type that arrived.
        got: FrameType,
    },

    /// The host sent an ERROR frame.
    #[error("host reported error {code}: {message}")]
    HostError {
        /// Taxonomy code from the frame.
        code: u32,
        /// Message from the frame.
        message: String,
    },

    /// A reassembled window does not match the configured dimensions.
    #[error("window of {got} bytes does not match configured {expected}")]
    WindowSizeMismatch {
        /// `window_samples x channels x 4` from CONFIG.
        expected: usize,
        /// Bytes actually received.
        got: usize,
    },
}
