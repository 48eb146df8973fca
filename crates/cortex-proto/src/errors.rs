//! Protocol error types.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while encoding or decoding wire data.
///
/// Every variant is fatal for the session that produced it: a malformed or
/// corrupted frame leaves the peer's state indeterminate, so callers tear the
/// session down rather than retry (retries are the scheduler's decision).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Decoder ran past the end of the buffer.
    #[error("truncated data: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEnd {
        /// Bytes the decoder tried to consume.
        needed: usize,
        /// Bytes that were actually available.
        remaining: usize,
    },

    /// Header bytes did not start with the `CRTX` magic.
    #[error("invalid frame magic")]
    InvalidMagic,

    /// Header carried a protocol version other than [`crate::PROTOCOL_VERSION`].
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    /// Header carried a frame type tag this implementation does not know.
    #[error("unknown frame type {0:#04x}")]
    UnknownFrameType(u8),

    /// Payload length exceeds the single-frame limit.
    #[error("payload of {size} bytes exceeds the {max} byte frame limit")]
    PayloadTooLarge {
        /// Claimed or attempted payload size.
        size: usize,
        /// The enforced limit.
        max: usize,
    },

    /// Computed CRC does not match the CRC carried in the header.
    #[error("crc mismatch: header claims {expected:#010x}, computed {actual:#010x}")]
    CrcMismatch {
        /// CRC field from the received header.
        expected: u32,
        /// CRC computed over the received bytes.
        actual: u32,
    },

    /// A string does not fit its fixed-width NUL-padded field.
    #[error("{field} is {len} bytes, field limit is {max}")]
    FieldTooLong {
        /// Name of the wire field.
        field: &'static str,
        /// Byte length of the rejected value.
        len: usize,
        /// Width of the fixed field.
        max: usize,
    },

    /// A fixed-width string field did not decode as UTF-8.
    #[error("{field} is not valid UTF-8")]
    InvalidUtf8 {
        /// Name of the wire field.
        field: &'static str,
    },

    /// Calibration blob does not fit a single CONFIG frame.
    ///
    /// Oversize calibration state is rejected, never truncated.
    #[error("calibration state of {size} bytes exceeds the {max} byte limit")]
    CalibrationTooLarge {
        /// Size of the rejected blob.
        size: usize,
        /// Maximum blob size that fits a CONFIG frame.
        max: usize,
    },

    /// Payload fields are internally inconsistent.
    #[error("malformed payload: {0}")]
    MalformedPayload(&'static str),
}
