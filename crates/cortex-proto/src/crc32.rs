//! IEEE 802.3 CRC-32, table-driven and streamable.
//!
//! This is the reflected CRC-32 used by Ethernet and zlib (polynomial
//! 0xEDB88320). [`update`] folds a buffer into a running checksum so callers
//! can feed the frame header prefix and the payload in separate calls without
//! concatenating them.

const POLYNOMIAL: u32 = 0xEDB8_8320;

const fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut c = i as u32;
        let mut bit = 0;
        while bit < 8 {
            c = if c & 1 != 0 { POLYNOMIAL ^ (c >> 1) } else { c >> 1 };
            bit += 1;
        }
        table[i] = c;
        i += 1;
    }
    table
}

static TABLE: [u32; 256] = build_table();

/// Fold `data` into a running CRC.
///
/// Start with a seed of 0; feed buffers in wire order. The final value for
/// `b"123456789"` is `0xCBF43926` (the standard check value).
#[must_use]
pub fn update(crc: u32, data: &[u8]) -> u32 {
    let mut c = !crc;
    for &byte in data {
        c = TABLE[((c ^ u32::from(byte)) & 0xFF) as usize] ^ (c >> 8);
    }
    !c
}

/// One-shot CRC of a single buffer.
#[must_use]
pub fn checksum(data: &[u8]) -> u32 {
    update(0, data)
}
