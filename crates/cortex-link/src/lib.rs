//! Frame and window transfer over any [`Transport`](cortex_transport::Transport).
//!
//! Two layers:
//!
//! - [`framing`]: whole frames: serialize-and-send, and receive with magic
//!   hunting, header validation, and CRC verification, all under one
//!   deadline budget.
//! - [`chunk`]: logical windows: split into WINDOW_CHUNK frames at the
//!   sender, reassemble offset-addressed at the receiver with strict tiling
//!   checks.
//!
//! The timeout constants for the three protocol phases live here; both the
//! adapter session and the device client use them.

pub mod chunk;
mod errors;
pub mod framing;

pub use chunk::{ReceivedWindow, WindowReassembler, recv_window, send_window};
pub use errors::{ChunkError, LinkError};
pub use framing::{recv_frame, send_frame};

/// Result alias for link operations.
pub type Result<T> = std::result::Result<T, LinkError>;

/// Deadline for each handshake exchange (HELLO, CONFIG, ACK).
pub const HANDSHAKE_TIMEOUT_MS: u32 = 5000;

/// Deadline for a whole window exchange (chunk set or RESULT).
pub const WINDOW_TIMEOUT_MS: u32 = 10_000;

/// Deadline for a single chunk-frame operation.
pub const CHUNK_TIMEOUT_MS: u32 = 1000;
