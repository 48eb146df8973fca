//! Window transfer payloads: WINDOW_CHUNK and RESULT.

use bytes::BufMut;

use crate::{
    errors::{ProtocolError, Result},
    header::MAX_FRAME_PAYLOAD,
    wire::{self, ByteReader},
};

/// WINDOW_CHUNK flag bit: this chunk completes the window's byte range.
pub const CHUNK_FLAG_LAST: u32 = 1;

/// Serialized [`ChunkHeader`] size in bytes.
pub const CHUNK_HEADER_LEN: usize = 20;

/// Default chunk data size used by senders (8 KiB).
pub const DEFAULT_CHUNK_BYTES: usize = 8 * 1024;

/// Maximum logical window size (256 KiB of sample bytes).
pub const MAX_WINDOW_BYTES: usize = 256 * 1024;

/// Largest chunk data that fits a single frame alongside the chunk header.
pub const MAX_CHUNK_DATA: usize = MAX_FRAME_PAYLOAD - CHUNK_HEADER_LEN;

/// Fixed bytes of RESULT before the output sample data.
pub const RESULT_FIXED_LEN: usize = 4 + 4 + 5 * 8 + 4 + 4;

/// Largest encoded RESULT payload: the fixed part plus a full-size output
/// window. A RESULT this big cannot ride a single frame; the sender chunks
/// it with the same WINDOW_CHUNK mechanism used for input windows.
pub const MAX_RESULT_PAYLOAD: usize = RESULT_FIXED_LEN + MAX_WINDOW_BYTES;

/// Byte offset of `tlast_tx` inside an encoded RESULT payload.
///
/// `tlast_tx` must be inside the frame it describes, so the adapter encodes
/// the payload with a placeholder, stamps the clock, and patches these eight
/// bytes immediately before the transport send.
pub const RESULT_TLAST_TX_OFFSET: usize = 4 + 4 + 4 * 8;

/// WINDOW_CHUNK header: addresses one contiguous byte range of a window.
///
/// # Invariants (enforced by the reassembler in `cortex-link`)
///
/// - All chunks of one window carry the same `sequence` and `total_bytes`.
/// - `(offset_bytes, chunk_len)` ranges tile `[0, total_bytes)` with no
///   overlap and no gap.
/// - Exactly one chunk carries [`CHUNK_FLAG_LAST`], as the final piece of
///   the tiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Window index this chunk belongs to.
    pub sequence: u32,
    /// Total window size in bytes (`W x C x 4`), identical across chunks.
    pub total_bytes: u32,
    /// Byte offset of this chunk within the window.
    pub offset_bytes: u32,
    /// Data bytes carried by this chunk.
    pub chunk_len: u32,
    /// Flag bits; bit 0 is [`CHUNK_FLAG_LAST`].
    pub flags: u32,
}

impl ChunkHeader {
    /// Whether this chunk claims to complete the window.
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.flags & CHUNK_FLAG_LAST != 0
    }

    /// Serialize header followed by `data` into a WINDOW_CHUNK payload.
    pub fn encode_with_data(&self, dst: &mut impl BufMut, data: &[u8]) -> Result<()> {
        if data.len() != self.chunk_len as usize {
            return Err(ProtocolError::MalformedPayload("chunk_length does not match data"));
        }
        if data.len() > MAX_CHUNK_DATA {
            return Err(ProtocolError::PayloadTooLarge { size: data.len(), max: MAX_CHUNK_DATA });
        }
        dst.put_slice(&self.sequence.to_le_bytes());
        dst.put_slice(&self.total_bytes.to_le_bytes());
        dst.put_slice(&self.offset_bytes.to_le_bytes());
        dst.put_slice(&self.chunk_len.to_le_bytes());
        dst.put_slice(&self.flags.to_le_bytes());
        dst.put_slice(data);
        Ok(())
    }

    /// Split a WINDOW_CHUNK payload into header and data.
    ///
    /// The payload must contain exactly `chunk_len` data bytes after the
    /// header; a frame carries one chunk, nothing more.
    pub fn decode(payload: &[u8]) -> Result<(Self, &[u8])> {
        let mut r = ByteReader::new(payload);
        let header = Self {
            sequence: r.read_u32()?,
            total_bytes: r.read_u32()?,
            offset_bytes: r.read_u32()?,
            chunk_len: r.read_u32()?,
            flags: r.read_u32()?,
        };
        let data = r.take(header.chunk_len as usize)?;
        if r.remaining() != 0 {
            return Err(ProtocolError::MalformedPayload("trailing bytes after chunk data"));
        }
        Ok((header, data))
    }
}

/// The five device-side timestamps, nanoseconds on the adapter's monotonic
/// clock.
///
/// Host and device clocks are not comparable; these are device-local only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceTiming {
    /// Window fully received (stamped right after the LAST chunk lands).
    pub tin_ns: u64,
    /// Kernel `process` entered.
    pub tstart_ns: u64,
    /// Kernel `process` returned.
    pub tend_ns: u64,
    /// RESULT serialization began.
    pub tfirst_tx_ns: u64,
    /// RESULT serialization finished, immediately before the transport send.
    /// Brackets serialization cost, not wire cost; the value must be inside
    /// the frame it describes, so it cannot postdate the send itself.
    pub tlast_tx_ns: u64,
}

impl DeviceTiming {
    /// Check `tin <= tstart <= tend <= tfirst_tx <= tlast_tx`.
    #[must_use]
    pub fn is_monotonic(&self) -> bool {
        self.tin_ns <= self.tstart_ns
            && self.tstart_ns <= self.tend_ns
            && self.tend_ns <= self.tfirst_tx_ns
            && self.tfirst_tx_ns <= self.tlast_tx_ns
    }

    fn encode(&self, dst: &mut impl BufMut) {
        for t in [self.tin_ns, self.tstart_ns, self.tend_ns, self.tfirst_tx_ns, self.tlast_tx_ns] {
            dst.put_slice(&t.to_le_bytes());
        }
    }

    fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            tin_ns: r.read_u64()?,
            tstart_ns: r.read_u64()?,
            tend_ns: r.read_u64()?,
            tfirst_tx_ns: r.read_u64()?,
            tlast_tx_ns: r.read_u64()?,
        })
    }
}

/// RESULT payload: kernel output plus device timing for one window.
///
/// Output samples are kept as raw little-endian bytes; [`WindowResult::output_f32`]
/// decodes them when the caller wants host-order floats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowResult {
    /// Session this result belongs to; must equal the CONFIG `session_id`.
    pub session_id: u32,
    /// Window index this result answers; must equal the window's `sequence`.
    pub sequence: u32,
    /// Device-side timestamps.
    pub timing: DeviceTiming,
    /// Output window length in samples.
    pub output_window_samples: u32,
    /// Output channel count.
    pub output_channels: u32,
    /// `output_window_samples x output_channels x 4` bytes of little-endian
    /// f32 output.
    pub output: Vec<u8>,
}

impl WindowResult {
    /// Build a RESULT from host-order output samples.
    pub fn from_samples(
        session_id: u32,
        sequence: u32,
        timing: DeviceTiming,
        output_window_samples: u32,
        output_channels: u32,
        samples: &[f32],
    ) -> Result<Self> {
        let expected = output_window_samples as usize * output_channels as usize;
        if samples.len() != expected {
            return Err(ProtocolError::MalformedPayload("output sample count mismatch"));
        }
        let mut output = Vec::with_capacity(samples.len() * 4);
        wire::put_f32_slice(&mut output, samples);
        Ok(Self { session_id, sequence, timing, output_window_samples, output_channels, output })
    }

    /// Serialize to wire bytes.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let expected = self.output_window_samples as usize * self.output_channels as usize * 4;
        if self.output.len() != expected {
            return Err(ProtocolError::MalformedPayload("output length does not match dimensions"));
        }
        if RESULT_FIXED_LEN + self.output.len() > MAX_RESULT_PAYLOAD {
            return Err(ProtocolError::PayloadTooLarge {
                size: RESULT_FIXED_LEN + self.output.len(),
                max: MAX_RESULT_PAYLOAD,
            });
        }
        dst.put_slice(&self.session_id.to_le_bytes());
        dst.put_slice(&self.sequence.to_le_bytes());
        self.timing.encode(dst);
        dst.put_slice(&self.output_window_samples.to_le_bytes());
        dst.put_slice(&self.output_channels.to_le_bytes());
        dst.put_slice(&self.output);
        Ok(())
    }

    /// Parse from wire bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(bytes);
        let session_id = r.read_u32()?;
        let sequence = r.read_u32()?;
        let timing = DeviceTiming::decode(&mut r)?;
        let output_window_samples = r.read_u32()?;
        let output_channels = r.read_u32()?;
        let output_len = output_window_samples as usize * output_channels as usize * 4;
        let output = r.take(output_len)?.to_vec();
        if r.remaining() != 0 {
            return Err(ProtocolError::MalformedPayload("trailing bytes after output data"));
        }
        Ok(Self { session_id, sequence, timing, output_window_samples, output_channels, output })
    }

    /// Decode the output bytes into host-order samples.
    pub fn output_f32(&self) -> Result<Vec<f32>> {
        wire::f32_vec_from_le(&self.output)
    }
}
