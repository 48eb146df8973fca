//! Fuzz target for window reassembly.
//!
//! Arbitrary chunk sequences drive the tiling checks.
//!
//! # Invariants
//!
//! - the reassembler never panics and never allocates past the window bound
//! - completion only happens on an exact tiling closed by a LAST chunk
//! - after any rejection the reassembler object is still safe to feed

#![no_main]

use arbitrary::Arbitrary;
use cortex_link::{chunk::MAX_TRANSFER_BYTES, WindowReassembler};
use cortex_proto::ChunkHeader;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct FuzzChunk {
    sequence: u32,
    total_bytes: u32,
    offset_bytes: u32,
    flags: u32,
    data: Vec<u8>,
}

fuzz_target!(|chunks: Vec<FuzzChunk>| {
    let mut reassembler = WindowReassembler::new(0);
    let mut covered: u64 = 0;

    for chunk in &chunks {
        let header = ChunkHeader {
            sequence: chunk.sequence,
            total_bytes: chunk.total_bytes,
            offset_bytes: chunk.offset_bytes,
            chunk_len: chunk.data.len() as u32,
            flags: chunk.flags,
        };
        match reassembler.accept(&header, &chunk.data) {
            Ok(true) => {
                // Complete: LAST was set and coverage is exact.
                covered += chunk.data.len() as u64;
                assert!(header.is_last());
                assert_eq!(covered, u64::from(chunk.total_bytes));
                assert!(chunk.total_bytes as usize <= MAX_TRANSFER_BYTES);
                let window = reassembler.into_window();
                assert_eq!(window.len(), chunk.total_bytes as usize);
                return;
            }
            Ok(false) => covered += chunk.data.len() as u64,
            // Rejections leave the reassembler usable for the next chunk.
            Err(_) => {}
        }
    }
});
