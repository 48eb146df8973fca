//! Chunked window transfer.
//!
//! Windows up to 256 KiB ride in WINDOW_CHUNK frames of at most 8 KiB
//! (default). The sender emits chunks in offset order; the receiver is
//! offset-addressed, so it tolerates any spatial order as long as the ranges
//! tile the window exactly: no overlap, no gap, no duplicate, exactly one
//! LAST as the final piece.

use cortex_proto::{
    ChunkHeader, FrameType,
    payloads::{CHUNK_FLAG_LAST, CHUNK_HEADER_LEN, DEFAULT_CHUNK_BYTES, MAX_CHUNK_DATA,
        MAX_RESULT_PAYLOAD, MAX_WINDOW_BYTES},
};
use cortex_transport::{Deadline, Timeout, Transport};

use crate::{ChunkError, LinkError, Result, framing};

/// Upper bound for one chunked transfer: an input window
/// ([`MAX_WINDOW_BYTES`]), or a RESULT payload wrapping a full-size output
/// window ([`MAX_RESULT_PAYLOAD`]). Whether the bytes are a legal window for
/// the session is the receiver's check, not the transfer layer's.
pub const MAX_TRANSFER_BYTES: usize = MAX_RESULT_PAYLOAD;

/// A fully reassembled window plus its arrival timestamp.
#[derive(Debug)]
pub struct ReceivedWindow {
    /// The window bytes, exactly `total_bytes` long.
    pub data: Vec<u8>,
    /// Receiver's monotonic clock right after the tiling completed. This is
    /// the `tin` of the device timing record.
    pub tin_ns: u64,
}

/// Split `window` into chunk frames and send them in offset order.
///
/// `chunk_bytes` is clamped to 1..=[`MAX_CHUNK_DATA`];
/// [`DEFAULT_CHUNK_BYTES`] is the conventional size. Aborts on the first
/// send error.
pub fn send_window(
    transport: &mut dyn Transport,
    sequence: u32,
    window: &[u8],
    chunk_bytes: usize,
) -> Result<()> {
    if window.is_empty() {
        return Err(ChunkError::EmptyWindow.into());
    }
    if window.len() > MAX_TRANSFER_BYTES {
        return Err(ChunkError::WindowTooLarge {
            total: window.len() as u32,
            max: MAX_TRANSFER_BYTES,
        }
        .into());
    }
    let chunk_bytes = chunk_bytes.clamp(1, MAX_CHUNK_DATA);

    let total = window.len();
    let mut payload = Vec::with_capacity(CHUNK_HEADER_LEN + chunk_bytes.min(total));
    let mut offset = 0usize;
    while offset < total {
        let len = chunk_bytes.min(total - offset);
        let last = offset + len == total;
        let header = ChunkHeader {
            sequence,
            total_bytes: total as u32,
            offset_bytes: offset as u32,
            chunk_len: len as u32,
            flags: if last { CHUNK_FLAG_LAST } else { 0 },
        };
        payload.clear();
        header.encode_with_data(&mut payload, &window[offset..offset + len])?;
        framing::send_frame(transport, FrameType::WindowChunk, &payload)?;
        offset += len;
    }
    tracing::trace!(sequence, total, "window sent");
    Ok(())
}

/// Offset-addressed window reassembly with strict tiling checks.
///
/// Feed each decoded chunk to [`WindowReassembler::accept`]; it reports
/// completion when a LAST-flagged chunk closes an exact tiling of
/// `[0, total_bytes)`.
#[derive(Debug)]
pub struct WindowReassembler {
    expected_sequence: u32,
    buf: Vec<u8>,
    /// Received `(start, end)` ranges, kept sorted and non-adjacent-merged.
    ranges: Vec<(u32, u32)>,
    total_bytes: Option<u32>,
    covered: u32,
}

impl WindowReassembler {
    /// Start collecting the window with the given sequence number.
    #[must_use]
    pub fn new(expected_sequence: u32) -> Self {
        Self { expected_sequence, buf: Vec::new(), ranges: Vec::new(), total_bytes: None, covered: 0 }
    }

    /// Accept one chunk. Returns `true` when the window is complete.
    pub fn accept(&mut self, header: &ChunkHeader, data: &[u8]) -> std::result::Result<bool, ChunkError> {
        if header.sequence != self.expected_sequence {
            return Err(ChunkError::SequenceMismatch {
                expected: self.expected_sequence,
                got: header.sequence,
            });
        }
        if header.chunk_len as usize != data.len() {
            return Err(ChunkError::LengthMismatch { header: header.chunk_len, data: data.len() });
        }
        if header.chunk_len == 0 {
            return Err(ChunkError::EmptyChunk { offset: header.offset_bytes });
        }

        // The first chunk establishes the window size and buffer.
        let total = match self.total_bytes {
            Some(total) => {
                if header.total_bytes != total {
                    return Err(ChunkError::TotalBytesMismatch {
                        expected: total,
                        got: header.total_bytes,
                    });
                }
                total
            }
            None => {
                let total = header.total_bytes;
                if total == 0 {
                    return Err(ChunkError::EmptyWindow);
                }
                if total as usize > MAX_TRANSFER_BYTES {
                    return Err(ChunkError::WindowTooLarge { total, max: MAX_TRANSFER_BYTES });
                }
                self.buf = vec![0u8; total as usize];
                self.total_bytes = Some(total);
                total
            }
        };

        let start = header.offset_bytes;
        let end = start
            .checked_add(header.chunk_len)
            .filter(|&end| end <= total)
            .ok_or(ChunkError::RangeOutOfBounds {
                offset: start,
                len: header.chunk_len,
                total,
            })?;

        // Overlap scan; the range list stays tiny (<= 32 chunks per window).
        for &(s, e) in &self.ranges {
            if start < e && s < end {
                if start == s && end == e {
                    return Err(ChunkError::DuplicateChunk { offset: start });
                }
                return Err(ChunkError::Overlap { offset: start });
            }
        }

        self.buf[start as usize..end as usize].copy_from_slice(data);
        let insert_at = self.ranges.partition_point(|&(s, _)| s < start);
        self.ranges.insert(insert_at, (start, end));
        self.covered += header.chunk_len;

        if header.is_last() {
            if self.covered != total {
                return Err(ChunkError::GapAtCompletion { missing: total - self.covered });
            }
            return Ok(true);
        }
        if self.covered == total {
            // Fully tiled, but the sender never said LAST. Waiting for more
            // chunks can only fail later and less clearly; reject now.
            return Err(ChunkError::MissingLast);
        }
        Ok(false)
    }

    /// The assembled window. Only meaningful once `accept` returned `true`.
    #[must_use]
    pub fn into_window(self) -> Vec<u8> {
        self.buf
    }
}

/// Receive one logical window by chunk reassembly.
///
/// `first_timeout` bounds the wait for the first chunk; once it arrives,
/// `window_timeout` budgets the rest of the chunk set. Callers that must
/// idle indefinitely between windows park on
/// [`Transport::poll_recv`] first, so this function only ever starts with
/// bytes already in flight.
///
/// `tin` is stamped from the transport's monotonic clock strictly after the
/// final chunk lands.
pub fn recv_window(
    transport: &mut dyn Transport,
    expected_sequence: u32,
    first_timeout: Timeout,
    window_timeout: Timeout,
) -> Result<ReceivedWindow> {
    let mut frame_buf = vec![0u8; cortex_proto::MAX_FRAME_PAYLOAD];
    let mut reassembler = WindowReassembler::new(expected_sequence);

    let mut timeout = first_timeout;
    let mut deadline: Option<Deadline> = None;

    loop {
        if let Some(d) = &deadline {
            timeout = d.remaining();
        }

        let (frame_type, len) = framing::recv_frame(transport, &mut frame_buf, timeout)?;
        if frame_type != FrameType::WindowChunk {
            return Err(LinkError::UnexpectedFrame { context: "WINDOW_CHUNK", got: frame_type });
        }
        let (header, data) = ChunkHeader::decode(&frame_buf[..len])?;

        if deadline.is_none() {
            // First chunk arrived: the rest of the window runs on its own
            // budget.
            deadline = Some(Deadline::after(window_timeout));
        }

        if reassembler.accept(&header, data)? {
            let tin_ns = transport.monotonic_ns();
            tracing::trace!(sequence = expected_sequence, bytes = reassembler.buf.len(), "window received");
            return Ok(ReceivedWindow { data: reassembler.into_window(), tin_ns });
        }
    }
}

#[cfg(test)]
mod tests {
    use cortex_transport::{TransportError, mem::MemPipe};

    use super::*;

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 253) as u8).collect()
    }

    fn chunk(seq: u32, total: u32, offset: u32, len: u32, last: bool) -> ChunkHeader {
        ChunkHeader {
            sequence: seq,
            total_bytes: total,
            offset_bytes: offset,
            chunk_len: len,
            flags: if last { CHUNK_FLAG_LAST } else { 0 },
        }
    }

    #[test]
    fn round_trip_default_chunks() {
        let (mut tx, mut rx) = MemPipe::pair();
        let window = patterned(160 * 64 * 4); // 40 KiB
        send_window(&mut tx, 0, &window, DEFAULT_CHUNK_BYTES).unwrap();

        let received =
            recv_window(&mut rx, 0, Timeout::from_ms(1000), Timeout::from_ms(1000)).unwrap();
        assert_eq!(received.data, window);
        assert!(received.tin_ns > 0);
    }

    #[test]
    fn forty_kib_window_is_five_chunks_with_last_at_32768() {
        let (mut tx, mut rx) = MemPipe::pair();
        let window = patterned(40 * 1024);
        send_window(&mut tx, 7, &window, 8 * 1024).unwrap();

        let mut frame_buf = vec![0u8; cortex_proto::MAX_FRAME_PAYLOAD];
        let mut headers = Vec::new();
        for _ in 0..5 {
            let (frame_type, len) =
                framing::recv_frame(&mut rx, &mut frame_buf, Timeout::from_ms(1000)).unwrap();
            assert_eq!(frame_type, FrameType::WindowChunk);
            let (header, _) = ChunkHeader::decode(&frame_buf[..len]).unwrap();
            headers.push(header);
        }

        // No sixth frame on the wire.
        assert!(matches!(
            framing::recv_frame(&mut rx, &mut frame_buf, Timeout::POLL),
            Err(LinkError::Transport(TransportError::Timeout))
        ));

        assert!(headers.iter().all(|h| h.sequence == 7 && h.total_bytes == 40 * 1024));
        assert_eq!(headers.iter().filter(|h| h.is_last()).count(), 1);
        let last = headers.last().unwrap();
        assert!(last.is_last());
        assert_eq!(last.offset_bytes, 32_768);
        assert_eq!(last.chunk_len, 8_192);
    }

    #[test]
    fn round_trip_odd_chunk_sizes() {
        for chunk_bytes in [1usize, 3, 1000, 8191] {
            let (mut tx, mut rx) = MemPipe::pair();
            let window = patterned(5000);
            send_window(&mut tx, 1, &window, chunk_bytes).unwrap();
            let received =
                recv_window(&mut rx, 1, Timeout::from_ms(2000), Timeout::from_ms(2000)).unwrap();
            assert_eq!(received.data, window, "chunk_bytes={chunk_bytes}");
        }
    }

    #[test]
    fn max_window_splits_into_32_chunks() {
        let (mut tx, mut rx) = MemPipe::pair();
        let window = patterned(MAX_WINDOW_BYTES);
        send_window(&mut tx, 2, &window, 8 * 1024).unwrap();

        let received =
            recv_window(&mut rx, 2, Timeout::from_ms(5000), Timeout::from_ms(5000)).unwrap();
        assert_eq!(received.data, window);
        assert_eq!(MAX_WINDOW_BYTES / (8 * 1024), 32);
    }

    #[test]
    fn oversize_window_rejected_at_send() {
        let (mut tx, _rx) = MemPipe::pair();
        let window = vec![0u8; MAX_TRANSFER_BYTES + 1];
        assert!(matches!(
            send_window(&mut tx, 0, &window, DEFAULT_CHUNK_BYTES),
            Err(LinkError::Chunk(ChunkError::WindowTooLarge { .. }))
        ));
    }

    #[test]
    fn reassembler_accepts_out_of_order_offsets() {
        let window = patterned(24);
        let mut r = WindowReassembler::new(0);
        assert!(!r.accept(&chunk(0, 24, 8, 8, false), &window[8..16]).unwrap());
        assert!(!r.accept(&chunk(0, 24, 0, 8, false), &window[0..8]).unwrap());
        assert!(r.accept(&chunk(0, 24, 16, 8, true), &window[16..24]).unwrap());
        assert_eq!(r.into_window(), window);
    }

    #[test]
    fn reassembler_rejects_sequence_mismatch() {
        let mut r = WindowReassembler::new(5);
        let err = r.accept(&chunk(6, 8, 0, 8, true), &[0u8; 8]).unwrap_err();
        assert_eq!(err, ChunkError::SequenceMismatch { expected: 5, got: 6 });
    }

    #[test]
    fn reassembler_rejects_total_bytes_drift() {
        let mut r = WindowReassembler::new(0);
        r.accept(&chunk(0, 16, 0, 8, false), &[0u8; 8]).unwrap();
        let err = r.accept(&chunk(0, 24, 8, 8, false), &[0u8; 8]).unwrap_err();
        assert_eq!(err, ChunkError::TotalBytesMismatch { expected: 16, got: 24 });
    }

    #[test]
    fn reassembler_rejects_duplicate_chunk() {
        let mut r = WindowReassembler::new(0);
        r.accept(&chunk(0, 16, 0, 8, false), &[1u8; 8]).unwrap();
        let err = r.accept(&chunk(0, 16, 0, 8, false), &[1u8; 8]).unwrap_err();
        assert_eq!(err, ChunkError::DuplicateChunk { offset: 0 });
    }

    #[test]
    fn reassembler_rejects_overlap() {
        let mut r = WindowReassembler::new(0);
        r.accept(&chunk(0, 16, 0, 8, false), &[1u8; 8]).unwrap();
        let err = r.accept(&chunk(0, 16, 4, 8, false), &[1u8; 8]).unwrap_err();
        assert_eq!(err, ChunkError::Overlap { offset: 4 });
    }

    #[test]
    fn reassembler_rejects_last_with_gap() {
        let mut r = WindowReassembler::new(0);
        r.accept(&chunk(0, 24, 0, 8, false), &[1u8; 8]).unwrap();
        let err = r.accept(&chunk(0, 24, 16, 8, true), &[1u8; 8]).unwrap_err();
        assert_eq!(err, ChunkError::GapAtCompletion { missing: 8 });
    }

    #[test]
    fn reassembler_rejects_range_past_end() {
        let mut r = WindowReassembler::new(0);
        let err = r.accept(&chunk(0, 16, 12, 8, true), &[1u8; 8]).unwrap_err();
        assert!(matches!(err, ChunkError::RangeOutOfBounds { .. }));
    }

    #[test]
    fn reassembler_rejects_offset_overflow() {
        let mut r = WindowReassembler::new(0);
        r.accept(&chunk(0, 16, 0, 8, false), &[1u8; 8]).unwrap();
        let err = r.accept(&chunk(0, 16, u32::MAX, 8, false), &[1u8; 8]).unwrap_err();
        assert!(matches!(err, ChunkError::RangeOutOfBounds { .. }));
    }

    #[test]
    fn reassembler_rejects_complete_tiling_without_last() {
        let mut r = WindowReassembler::new(0);
        r.accept(&chunk(0, 16, 0, 8, false), &[1u8; 8]).unwrap();
        let err = r.accept(&chunk(0, 16, 8, 8, false), &[1u8; 8]).unwrap_err();
        assert_eq!(err, ChunkError::MissingLast);
    }

    #[test]
    fn reassembler_rejects_oversize_total() {
        let mut r = WindowReassembler::new(0);
        let err = r
            .accept(&chunk(0, MAX_TRANSFER_BYTES as u32 + 1, 0, 8, false), &[1u8; 8])
            .unwrap_err();
        assert!(matches!(err, ChunkError::WindowTooLarge { .. }));
    }

    #[test]
    fn recv_window_rejects_wrong_frame_type() {
        let (mut tx, mut rx) = MemPipe::pair();
        framing::send_frame(&mut tx, FrameType::Ack, &[0u8; 12]).unwrap();
        let err =
            recv_window(&mut rx, 0, Timeout::from_ms(500), Timeout::from_ms(500)).unwrap_err();
        assert!(matches!(err, LinkError::UnexpectedFrame { got: FrameType::Ack, .. }));
    }

    #[test]
    fn recv_window_times_out_when_sender_stalls_mid_window() {
        let (mut tx, mut rx) = MemPipe::pair();
        let window = patterned(32 * 1024);
        // Send only the first chunk of four.
        let header = chunk(0, 32 * 1024, 0, 8 * 1024, false);
        let mut payload = Vec::new();
        header.encode_with_data(&mut payload, &window[..8 * 1024]).unwrap();
        framing::send_frame(&mut tx, FrameType::WindowChunk, &payload).unwrap();

        let err =
            recv_window(&mut rx, 0, Timeout::from_ms(5000), Timeout::from_ms(80)).unwrap_err();
        assert!(err.is_timeout());
    }
}
