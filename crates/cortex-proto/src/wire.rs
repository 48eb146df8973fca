//! Little-endian scalar codec.
//!
//! All multi-byte wire fields pass through these helpers. Values are copied
//! byte-by-byte out of (or into) the buffer and converted with
//! `from_le_bytes`/`to_le_bytes`; a network buffer is never aliased as a
//! typed struct. This keeps the format correct on big-endian hosts and safe
//! on strict-alignment targets.

use bytes::BufMut;

use crate::errors::{ProtocolError, Result};

/// Sequential reader over a byte buffer with explicit bounds errors.
#[derive(Debug)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Start reading at the beginning of `buf`.
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Consume the next `n` bytes.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(ProtocolError::UnexpectedEnd { needed: n, remaining: self.remaining() });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Read one byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Read a little-endian `u16`.
    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    /// Read a little-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a little-endian `u64`.
    pub fn read_u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    /// Read a little-endian `i32`.
    pub fn read_i32(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a little-endian IEEE-754 `f32`.
    pub fn read_f32(&mut self) -> Result<f32> {
        let b = self.take(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a `width`-byte NUL-padded UTF-8 string field.
    ///
    /// Takes bytes up to the first NUL (or the full field if none).
    pub fn read_fixed_str(&mut self, field: &'static str, width: usize) -> Result<String> {
        let raw = self.take(width)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(width);
        let s = std::str::from_utf8(&raw[..end])
            .map_err(|_| ProtocolError::InvalidUtf8 { field })?;
        Ok(s.to_owned())
    }
}

/// Write a string into a `width`-byte NUL-padded field.
///
/// Rejects values longer than the field; short values are padded with NULs.
pub fn put_fixed_str(
    dst: &mut impl BufMut,
    field: &'static str,
    value: &str,
    width: usize,
) -> Result<()> {
    let bytes = value.as_bytes();
    if bytes.len() > width {
        return Err(ProtocolError::FieldTooLong { field, len: bytes.len(), max: width });
    }
    dst.put_slice(bytes);
    dst.put_bytes(0, width - bytes.len());
    Ok(())
}

/// Append a slice of `f32` samples as little-endian bytes.
pub fn put_f32_slice(dst: &mut impl BufMut, samples: &[f32]) {
    for &s in samples {
        dst.put_slice(&s.to_le_bytes());
    }
}

/// Decode a little-endian `f32` sample buffer.
///
/// The byte length must be a multiple of four.
pub fn f32_vec_from_le(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(ProtocolError::MalformedPayload("sample buffer length is not a multiple of 4"));
    }
    let mut out = Vec::with_capacity(bytes.len() / 4);
    for chunk in bytes.chunks_exact(4) {
        out.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }
    Ok(out)
}
