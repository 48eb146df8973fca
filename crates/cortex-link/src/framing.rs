//! Whole-frame send and receive.
//!
//! Sending is serialize-header, send, send-payload; any short send is the
//! transport's failure. Receiving is a magic hunt (one byte at a time into
//! a 4-byte sliding window until `CRTX` appears) followed by the header
//! remainder, the payload, and the CRC check. The hunt makes the receiver
//! self-synchronizing after stream corruption without resync frames.
//!
//! All reads within one `recv_frame` call share the caller's timeout budget
//! via [`Deadline`]; if it elapses mid-frame the partial frame is discarded
//! and a timeout error returned.

use cortex_proto::{FrameHeader, FrameType, HEADER_LEN, MAGIC};
use cortex_transport::{Deadline, Timeout, Transport};

use crate::{LinkError, Result};

/// Give up hunting for magic after this many discarded bytes.
pub const MAGIC_SCAN_LIMIT: usize = 64 * 1024;

/// Serialize and send one frame.
pub fn send_frame(
    transport: &mut dyn Transport,
    frame_type: FrameType,
    payload: &[u8],
) -> Result<()> {
    let header = FrameHeader::for_payload(frame_type, payload)?;
    transport.send(&header.encode())?;
    transport.send(payload)?;
    tracing::trace!(?frame_type, len = payload.len(), "frame sent");
    Ok(())
}

/// Receive one frame into `payload_buf`, returning its type and payload
/// length.
///
/// `payload_buf` must be able to hold [`cortex_proto::MAX_FRAME_PAYLOAD`]
/// bytes to accept any conforming frame; a smaller buffer fails with
/// [`LinkError::BufferTooSmall`] when an oversized payload is advertised.
pub fn recv_frame(
    transport: &mut dyn Transport,
    payload_buf: &mut [u8],
    timeout: Timeout,
) -> Result<(FrameType, usize)> {
    let deadline = Deadline::after(timeout);

    let mut header_bytes = [0u8; HEADER_LEN];
    hunt_magic(transport, &mut header_bytes, &deadline)?;
    recv_exact(transport, &mut header_bytes[4..], &deadline)?;

    let header = FrameHeader::decode(&header_bytes)?;
    let payload_len = header.payload_len as usize;
    if payload_len > payload_buf.len() {
        return Err(LinkError::BufferTooSmall {
            needed: payload_len,
            capacity: payload_buf.len(),
        });
    }

    recv_exact(transport, &mut payload_buf[..payload_len], &deadline)?;
    header.verify_crc(&payload_buf[..payload_len])?;

    tracing::trace!(frame_type = ?header.frame_type, len = payload_len, "frame received");
    Ok((header.frame_type, payload_len))
}

/// Read bytes one at a time until the 4-byte sliding window matches the
/// magic, then store it as the start of `header_bytes`.
fn hunt_magic(
    transport: &mut dyn Transport,
    header_bytes: &mut [u8; HEADER_LEN],
    deadline: &Deadline,
) -> Result<()> {
    let mut window = [0u8; 4];
    let mut filled = 0usize;
    let mut scanned = 0usize;

    loop {
        if filled == 4 {
            if u32::from_le_bytes(window) == MAGIC {
                header_bytes[..4].copy_from_slice(&window);
                if scanned > 4 {
                    tracing::debug!(discarded = scanned - 4, "resynchronized to frame magic");
                }
                return Ok(());
            }
            if scanned >= MAGIC_SCAN_LIMIT {
                return Err(LinkError::MagicNotFound { scanned });
            }
            window.rotate_left(1);
            filled = 3;
        }

        // An exhausted deadline leaves remaining() at POLL, so the recv
        // below still makes exactly one non-blocking attempt before the
        // transport reports the timeout.
        let mut byte = [0u8; 1];
        let n = transport.recv(&mut byte, deadline.remaining())?;
        debug_assert_eq!(n, 1);
        window[filled] = byte[0];
        filled += 1;
        scanned += 1;
    }
}

/// Fill `buf` exactly, looping over partial reads under the shared deadline.
fn recv_exact(transport: &mut dyn Transport, buf: &mut [u8], deadline: &Deadline) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        filled += transport.recv(&mut buf[filled..], deadline.remaining())?;
    }
    Ok(())
}
