//! Frame header: the fixed 16-byte preamble of every frame.
//!
//! Layout (all little-endian):
//!
//! | offset | field | |
//! |---|---|---|
//! | 0 | `u32` magic | `0x43525458` ("CRTX") |
//! | 4 | `u8` version | fixed 1 |
//! | 5 | `u8` type | [`FrameType`] tag |
//! | 6 | `u16` flags | reserved, zero |
//! | 8 | `u32` payload length | bytes following the header |
//! | 12 | `u32` crc | CRC-32 of bytes 0..12 then the payload |
//!
//! The CRC field is never part of its own input. Receivers validate magic,
//! version, type, and length before reading the payload, and the CRC after.

use crate::{
    crc32,
    errors::{ProtocolError, Result},
    wire::ByteReader,
};

/// Frame magic: `"CRTX"` as a little-endian `u32`.
pub const MAGIC: u32 = 0x4352_5458;

/// Fixed protocol version. There is no version negotiation; a mismatch is
/// fatal.
pub const PROTOCOL_VERSION: u8 = 1;

/// Serialized header size in bytes.
pub const HEADER_LEN: usize = 16;

/// Header bytes covered by the CRC (everything before the CRC field).
pub const CRC_COVERED_LEN: usize = 12;

/// Maximum payload carried by a single frame (64 KiB). Larger logical
/// transfers are chunked.
pub const MAX_FRAME_PAYLOAD: usize = 64 * 1024;

/// Frame type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Adapter capability advertisement (adapter → host).
    Hello = 1,
    /// Kernel selection and parameters (host → adapter).
    Config = 2,
    /// CONFIG accepted, output dimensions confirmed (adapter → host).
    Ack = 3,
    /// One slice of an input window (host → adapter).
    WindowChunk = 4,
    /// Kernel output plus device timing (adapter → host).
    Result = 5,
    /// Fatal error report (either direction).
    Error = 6,
}

impl FrameType {
    /// Parse a wire tag. `None` for unknown tags.
    #[must_use]
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Hello),
            2 => Some(Self::Config),
            3 => Some(Self::Ack),
            4 => Some(Self::WindowChunk),
            5 => Some(Self::Result),
            6 => Some(Self::Error),
            _ => None,
        }
    }

    /// Wire tag for this type.
    #[must_use]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Decoded frame header.
///
/// # Invariants
///
/// - `payload_len <= MAX_FRAME_PAYLOAD`, enforced by both [`FrameHeader::for_payload`]
///   and [`FrameHeader::decode`].
/// - `crc` covers the first 12 header bytes followed by the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Frame type tag.
    pub frame_type: FrameType,
    /// Reserved flags, zero in version 1. Preserved on decode so the CRC
    /// input re-serializes byte-identically.
    pub flags: u16,
    /// Payload length in bytes.
    pub payload_len: u32,
    /// CRC-32 over header bytes 0..12 and the payload.
    pub crc: u32,
}

impl FrameHeader {
    /// Build the header for an outgoing frame, computing length and CRC.
    pub fn for_payload(frame_type: FrameType, payload: &[u8]) -> Result<Self> {
        if payload.len() > MAX_FRAME_PAYLOAD {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_FRAME_PAYLOAD,
            });
        }
        let mut header = Self {
            frame_type,
            flags: 0,
            payload_len: payload.len() as u32,
            crc: 0,
        };
        header.crc = header.expected_crc(payload);
        Ok(header)
    }

    /// The 12 CRC-covered header bytes.
    #[must_use]
    pub fn prefix_bytes(&self) -> [u8; CRC_COVERED_LEN] {
        let mut out = [0u8; CRC_COVERED_LEN];
        out[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        out[4] = PROTOCOL_VERSION;
        out[5] = self.frame_type.as_u8();
        out[6..8].copy_from_slice(&self.flags.to_le_bytes());
        out[8..12].copy_from_slice(&self.payload_len.to_le_bytes());
        out
    }

    /// Serialize the full 16-byte header.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..CRC_COVERED_LEN].copy_from_slice(&self.prefix_bytes());
        out[CRC_COVERED_LEN..].copy_from_slice(&self.crc.to_le_bytes());
        out
    }

    /// Parse and validate a 16-byte header.
    ///
    /// Checks magic, version, frame type, and the payload length bound. The
    /// CRC is *recorded*, not checked; it can only be verified once the
    /// payload has been read, via [`FrameHeader::verify_crc`].
    pub fn decode(bytes: &[u8; HEADER_LEN]) -> Result<Self> {
        let mut r = ByteReader::new(bytes);

        // Infallible reads: the input is exactly HEADER_LEN bytes.
        let magic = r.read_u32()?;
        if magic != MAGIC {
            return Err(ProtocolError::InvalidMagic);
        }

        let version = r.read_u8()?;
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }

        let tag = r.read_u8()?;
        let frame_type = FrameType::from_u8(tag).ok_or(ProtocolError::UnknownFrameType(tag))?;

        let flags = r.read_u16()?;
        let payload_len = r.read_u32()?;
        if payload_len as usize > MAX_FRAME_PAYLOAD {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_len as usize,
                max: MAX_FRAME_PAYLOAD,
            });
        }

        let crc = r.read_u32()?;
        Ok(Self { frame_type, flags, payload_len, crc })
    }

    /// CRC this header *should* carry for `payload`.
    #[must_use]
    pub fn expected_crc(&self, payload: &[u8]) -> u32 {
        crc32::update(crc32::update(0, &self.prefix_bytes()), payload)
    }

    /// Verify the received CRC against the received payload.
    pub fn verify_crc(&self, payload: &[u8]) -> Result<()> {
        let actual = self.expected_crc(payload);
        if actual != self.crc {
            return Err(ProtocolError::CrcMismatch { expected: self.crc, actual });
        }
        Ok(())
    }
}
