//! Fuzz target for the frame receive path.
//!
//! Arbitrary bytes go through the magic hunt, header validation, and CRC
//! check over a loopback transport.
//!
//! # Invariants
//!
//! - recv_frame never panics, whatever the stream contains
//! - every outcome is a documented error kind or a structurally valid frame
//! - a returned frame's payload length is within the advertised bound

#![no_main]

use cortex_link::{recv_frame, LinkError};
use cortex_proto::{ProtocolError, MAX_FRAME_PAYLOAD};
use cortex_transport::{mem::MemPipe, Timeout, Transport, TransportError};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let (mut tx, mut rx) = MemPipe::pair();
    if tx.send(data).is_err() {
        return;
    }
    // Close so a truncated frame surfaces as EOF instead of blocking.
    tx.close();

    let mut payload = vec![0u8; MAX_FRAME_PAYLOAD];
    match recv_frame(&mut rx, &mut payload, Timeout::POLL) {
        Ok((_, len)) => assert!(len <= MAX_FRAME_PAYLOAD),
        Err(
            LinkError::Transport(TransportError::Eof | TransportError::Timeout)
            | LinkError::Protocol(
                ProtocolError::UnsupportedVersion(_)
                | ProtocolError::UnknownFrameType(_)
                | ProtocolError::PayloadTooLarge { .. }
                | ProtocolError::CrcMismatch { .. },
            )
            | LinkError::MagicNotFound { .. },
        ) => {}
        Err(other) => panic!("undocumented outcome: {other}"),
    }
});
