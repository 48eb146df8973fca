//! Client-side error types.

use cortex_link::LinkError;
use cortex_proto::{FrameType, ProtocolError};
use cortex_transport::TransportError;
use thiserror::Error;

/// Fatal errors on the harness side of a session.
///
/// All of them leave the adapter's state indeterminate; the scheduler
/// decides whether to abort the kernel run or move on. Teardown itself never
/// surfaces an error; leaked resources are logged instead.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Frame or window transfer failure.
    #[error(transparent)]
    Link(#[from] LinkError),

    /// Payload decode failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Carrier failure outside a link operation.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Could not spawn the adapter child.
    #[error("failed to launch adapter: {0}")]
    Launch(std::io::Error),

    /// The adapter sent an ERROR frame.
    #[error("adapter reported error {code}: {message}")]
    Adapter {
        /// Taxonomy code from the frame.
        code: u32,
        /// Message from the frame.
        message: String,
    },

    /// A frame arrived that the client state machine cannot accept.
    #[error("unexpected {got:?} frame in state {state}")]
    UnexpectedFrame {
        /// State the client was in.
        state: &'static str,
        /// Frame type that arrived.
        got: FrameType,
    },

    /// HELLO advertised an ABI this client does not speak.
    #[error("adapter ABI version {got} unsupported (want {want})")]
    AbiMismatch {
        /// Version from HELLO.
        got: u8,
        /// Version this client implements.
        want: u8,
    },

    /// ACK acknowledged something other than CONFIG.
    #[error("ACK acknowledges kind {got}, expected CONFIG (0)")]
    AckKindMismatch {
        /// Kind field from the ACK.
        got: u32,
    },

    /// RESULT carried a different session than CONFIG established.
    ///
    /// The usual cause is an adapter restart behind the client's back.
    #[error("RESULT session {got:#010x} does not match session {expected:#010x}")]
    SessionMismatch {
        /// Session id sent in CONFIG.
        expected: u32,
        /// Session id in the RESULT.
        got: u32,
    },

    /// RESULT answered a different window than the one just sent.
    #[error("RESULT sequence {got} does not match window {expected}")]
    SequenceMismatch {
        /// Sequence of the window just sent.
        expected: u32,
        /// Sequence in the RESULT.
        got: u32,
    },

    /// Input buffer does not match the configured window shape.
    #[error("input of {got} samples does not match configured {expected}")]
    InputSizeMismatch {
        /// `window_samples x channels` from the session config.
        expected: usize,
        /// Samples provided by the caller.
        got: usize,
    },

    /// RESULT dimensions drifted from what ACK established.
    #[error("RESULT shape {got_w}x{got_c} does not match acknowledged {want_w}x{want_c}")]
    ResultShapeMismatch {
        /// Acknowledged output window length.
        want_w: u32,
        /// Acknowledged output channels.
        want_c: u32,
        /// Window length in the RESULT.
        got_w: u32,
        /// Channels in the RESULT.
        got_c: u32,
    },

    /// Caller's output buffer cannot hold the result.
    #[error("output buffer holds {capacity} samples, result carries {needed}")]
    OutputBufferTooSmall {
        /// Samples in the RESULT.
        needed: usize,
        /// Capacity of the caller's buffer.
        capacity: usize,
    },
}
