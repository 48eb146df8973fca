//! Wire format for the CORTEX device adapter protocol.
//!
//! Everything that crosses a transport is defined here: the 16-byte frame
//! header, the six frame types, and the fixed-layout little-endian payloads.
//! This crate is pure data; it never performs I/O. Frame-level send/receive
//! (magic hunting, deadlines) lives in `cortex-link`.
//!
//! # Invariants
//!
//! - All multi-byte fields are little-endian and go through the [`wire`]
//!   codec; buffers are never reinterpreted as packed structs, so the format
//!   is byte-identical on big-endian and strict-alignment targets.
//! - Magic, version, and CRC are validated before any payload is consumed.
//! - A single frame payload never exceeds [`MAX_FRAME_PAYLOAD`] (64 KiB);
//!   logical windows larger than that are chunked by `cortex-link`.

pub mod crc32;
mod errors;
mod header;
pub mod payloads;
pub mod wire;

pub use errors::{ProtocolError, Result};
pub use header::{
    FrameHeader, FrameType, HEADER_LEN, MAGIC, MAX_FRAME_PAYLOAD, PROTOCOL_VERSION,
};
pub use payloads::{
    ADAPTER_ABI_VERSION, Ack, ChunkHeader, Config, DeviceTiming, ErrorPayload, Hello, WindowResult,
};
