//! Fixed-layout frame payloads.
//!
//! Headers and payloads alike are raw little-endian binary: the adapter may
//! run on embedded hardware where a self-describing encoding is dead weight,
//! and fixed offsets keep the decode path allocation-light. Strings travel in
//! NUL-padded fixed-width fields.
//!
//! # Invariants
//!
//! Each payload struct maps to exactly one [`FrameType`](crate::FrameType).
//! Round-trip encoding must produce identical values; this is covered by the
//! property tests in `tests/frame_properties.rs`.

mod handshake;
mod window;

use bytes::BufMut;

pub use handshake::{
    ACK_KIND_CONFIG, ADAPTER_ABI_VERSION, ADAPTER_NAME_LEN, Ack, Config, Hello, KERNEL_NAME_LEN,
    KERNEL_PARAMS_LEN, MAX_CALIBRATION_LEN, MAX_KERNELS,
};
pub use window::{
    CHUNK_FLAG_LAST, CHUNK_HEADER_LEN, ChunkHeader, DEFAULT_CHUNK_BYTES, DeviceTiming,
    MAX_CHUNK_DATA, MAX_RESULT_PAYLOAD, MAX_WINDOW_BYTES, RESULT_FIXED_LEN,
    RESULT_TLAST_TX_OFFSET, WindowResult,
};

use crate::{
    errors::Result,
    wire::{self, ByteReader},
};

/// Width of the NUL-padded error message field.
pub const ERROR_MESSAGE_LEN: usize = 256;

/// ERROR frame payload: a taxonomy code plus a human-readable message.
///
/// Receivers log the pair and treat the session as terminated; the core never
/// retries on behalf of the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPayload {
    /// Error code identifying the failure class.
    pub code: u32,
    /// Human-readable detail, at most [`ERROR_MESSAGE_LEN`] bytes on the wire.
    pub message: String,
}

impl ErrorPayload {
    /// CONFIG parameters failed validation.
    pub const BAD_CONFIG: u32 = 1;
    /// Requested kernel is not in the adapter's registry.
    pub const UNKNOWN_KERNEL: u32 = 2;
    /// Kernel `init` failed.
    pub const KERNEL_INIT: u32 = 3;
    /// Calibration blob exceeds the CONFIG frame bound.
    pub const CALIBRATION_TOO_LARGE: u32 = 4;
    /// Framing or payload decode failure.
    pub const PROTOCOL: u32 = 5;
    /// Window chunk set violated the tiling rules.
    pub const CHUNKING: u32 = 6;
    /// Unexpected internal failure.
    pub const INTERNAL: u32 = 7;

    /// Build an error payload, truncating the message to fit the wire field.
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        let mut message = message.into();
        if message.len() > ERROR_MESSAGE_LEN {
            // Truncate on a char boundary so the field stays valid UTF-8.
            let mut end = ERROR_MESSAGE_LEN;
            while !message.is_char_boundary(end) {
                end -= 1;
            }
            message.truncate(end);
        }
        Self { code, message }
    }

    /// CONFIG rejected.
    pub fn bad_config(message: impl Into<String>) -> Self {
        Self::new(Self::BAD_CONFIG, message)
    }

    /// Unknown kernel name.
    pub fn unknown_kernel(name: &str) -> Self {
        Self::new(Self::UNKNOWN_KERNEL, format!("no kernel named {name:?}"))
    }

    /// Kernel init failure.
    pub fn kernel_init(message: impl Into<String>) -> Self {
        Self::new(Self::KERNEL_INIT, message)
    }

    /// Protocol-level failure.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(Self::PROTOCOL, message)
    }

    /// Chunk tiling failure.
    pub fn chunking(message: impl Into<String>) -> Self {
        Self::new(Self::CHUNKING, message)
    }

    /// Serialize to wire bytes.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        dst.put_slice(&self.code.to_le_bytes());
        wire::put_fixed_str(dst, "error_message", &self.message, ERROR_MESSAGE_LEN)
    }

    /// Parse from wire bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(bytes);
        let code = r.read_u32()?;
        let message = r.read_fixed_str("error_message", ERROR_MESSAGE_LEN)?;
        Ok(Self { code, message })
    }
}
