//! Link-layer error types.

use cortex_proto::{FrameType, ProtocolError};
use cortex_transport::TransportError;
use thiserror::Error;

/// Errors from frame and window transfer.
///
/// Transport and protocol failures pass through unmodified; the variants
/// declared here are the link layer's own: scan exhaustion, undersized
/// receive buffers, and frames of the wrong type mid-transfer. All are fatal
/// for the session.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Carrier failure or timeout.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Wire format violation.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Window tiling violation.
    #[error(transparent)]
    Chunk(#[from] ChunkError),

    /// The magic hunt consumed the bounded scan budget without finding a
    /// frame boundary.
    #[error("no frame magic within {scanned} scanned bytes")]
    MagicNotFound {
        /// Bytes discarded before giving up.
        scanned: usize,
    },

    /// The caller's buffer cannot hold the advertised payload.
    #[error("receive buffer of {capacity} bytes cannot hold a {needed} byte payload")]
    BufferTooSmall {
        /// Payload length the header advertised.
        needed: usize,
        /// Capacity of the caller's buffer.
        capacity: usize,
    },

    /// A frame of the wrong type arrived mid-transfer.
    #[error("expected {context} frame, received {got:?}")]
    UnexpectedFrame {
        /// What the receiver was waiting for.
        context: &'static str,
        /// What actually arrived.
        got: FrameType,
    },
}

impl LinkError {
    /// Whether this error is a receive deadline expiry.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(TransportError::Timeout))
    }

    /// Whether this error is a clean peer close.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Transport(TransportError::Eof))
    }
}

/// Window reassembly errors: every way a chunk set can fail to tile its
/// window. Each carries enough context to name the offending chunk.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChunkError {
    /// Chunk belongs to a different window.
    #[error("chunk sequence {got} does not match window {expected}")]
    SequenceMismatch {
        /// Window the reassembler is collecting.
        expected: u32,
        /// Sequence the chunk carried.
        got: u32,
    },

    /// Chunk disagrees with the first chunk about the window size.
    #[error("chunk total_bytes {got} disagrees with first chunk's {expected}")]
    TotalBytesMismatch {
        /// Size established by the first chunk.
        expected: u32,
        /// Size this chunk claimed.
        got: u32,
    },

    /// Claimed window size exceeds the protocol bound.
    #[error("window of {total} bytes exceeds the {max} byte limit")]
    WindowTooLarge {
        /// Claimed window size.
        total: u32,
        /// The enforced limit.
        max: usize,
    },

    /// Claimed window size is zero.
    #[error("window has no bytes")]
    EmptyWindow,

    /// Chunk carries no data.
    #[error("chunk at offset {offset} carries no data")]
    EmptyChunk {
        /// Offset of the empty chunk.
        offset: u32,
    },

    /// Chunk range extends past the end of the window.
    #[error("chunk range {offset}+{len} exceeds window of {total} bytes")]
    RangeOutOfBounds {
        /// Chunk start offset.
        offset: u32,
        /// Chunk length.
        len: u32,
        /// Window size.
        total: u32,
    },

    /// Exact byte range was already received.
    #[error("duplicate chunk at offset {offset}")]
    DuplicateChunk {
        /// Offset of the repeated chunk.
        offset: u32,
    },

    /// Range intersects previously received data.
    #[error("chunk at offset {offset} overlaps previously received data")]
    Overlap {
        /// Offset of the overlapping chunk.
        offset: u32,
    },

    /// LAST arrived while part of the window was still missing.
    #[error("LAST chunk received with {missing} bytes still missing")]
    GapAtCompletion {
        /// Bytes not yet received.
        missing: u32,
    },

    /// The tiling completed but no chunk carried the LAST flag.
    #[error("window fully tiled but no chunk carried the LAST flag")]
    MissingLast,

    /// Header length field and actual data length disagree.
    #[error("chunk header claims {header} bytes but {data} were provided")]
    LengthMismatch {
        /// Length from the chunk header.
        header: u32,
        /// Length of the provided data.
        data: usize,
    },
}
