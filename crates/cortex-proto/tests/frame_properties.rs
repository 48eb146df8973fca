//! Property-based tests for header, CRC, and payload encoding.
//!
//! These verify the wire format for ALL valid inputs, not just examples:
//! round-trips are identity, and any single-bit corruption of a serialized
//! frame is caught by the CRC.

use cortex_proto::{
    Config, DeviceTiming, FrameHeader, FrameType, HEADER_LEN, Hello, ProtocolError, WindowResult,
    payloads::{ADAPTER_ABI_VERSION, MAX_KERNELS},
};
use proptest::{prelude::*, test_runner::TestCaseError};

fn arbitrary_frame_type() -> impl Strategy<Value = FrameType> {
    prop_oneof![
        Just(FrameType::Hello),
        Just(FrameType::Config),
        Just(FrameType::Ack),
        Just(FrameType::WindowChunk),
        Just(FrameType::Result),
        Just(FrameType::Error),
    ]
}

fn short_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,15}"
}

#[test]
fn prop_header_round_trip() {
    proptest!(|(
        frame_type in arbitrary_frame_type(),
        payload in prop::collection::vec(any::<u8>(), 0..2048),
    )| {
        let header = FrameHeader::for_payload(frame_type, &payload).expect("within bounds");
        let bytes = header.encode();
        let decoded = FrameHeader::decode(&bytes).expect("should decode");

        prop_assert_eq!(decoded, header);
        decoded.verify_crc(&payload).expect("crc should verify");
    });
}

#[test]
fn prop_any_single_bit_flip_is_detected() {
    proptest!(|(
        frame_type in arbitrary_frame_type(),
        payload in prop::collection::vec(any::<u8>(), 1..256),
        flip_bit in any::<proptest::sample::Index>(),
    )| {
        let header = FrameHeader::for_payload(frame_type, &payload).expect("within bounds");
        let mut wire: Vec<u8> = header.encode().to_vec();
        wire.extend_from_slice(&payload);

        let bit = flip_bit.index(wire.len() * 8);
        wire[bit / 8] ^= 1 << (bit % 8);

        let mut header_bytes = [0u8; HEADER_LEN];
        header_bytes.copy_from_slice(&wire[..HEADER_LEN]);

        // Either the header fails structural validation (magic, version,
        // type, length) or the CRC catches the corruption. Valid outcomes
        // are exactly the documented fatal error kinds; a flip must never
        // pass unnoticed.
        match FrameHeader::decode(&header_bytes) {
            Err(
                ProtocolError::InvalidMagic
                | ProtocolError::UnsupportedVersion(_)
                | ProtocolError::UnknownFrameType(_)
                | ProtocolError::PayloadTooLarge { .. },
            ) => {}
            Err(e) => return Err(TestCaseError::fail(format!("unexpected header error: {e}"))),
            Ok(decoded) => {
                prop_assert!(
                    matches!(
                        decoded.verify_crc(&wire[HEADER_LEN..]),
                        Err(ProtocolError::CrcMismatch { .. })
                    ),
                    "bit flip at index {} escaped the crc",
                    bit
                );
            }
        }
    });
}

#[test]
fn prop_hello_round_trip() {
    proptest!(|(
        boot_id in any::<u32>(),
        adapter_name in short_name(),
        max_window_samples in 1u32..=65_536,
        max_channels in 1u32..=1024,
        kernels in prop::collection::vec(short_name(), 0..8),
    )| {
        let hello = Hello {
            boot_id,
            adapter_name,
            abi_version: ADAPTER_ABI_VERSION,
            max_window_samples,
            max_channels,
            kernels,
        };
        prop_assert!(hello.kernels.len() <= MAX_KERNELS);

        let mut buf = Vec::new();
        hello.encode(&mut buf).expect("encode should succeed");
        prop_assert_eq!(Hello::decode(&buf).expect("decode should succeed"), hello);
    });
}

#[test]
fn prop_config_round_trip() {
    proptest!(|(
        session_id in any::<u32>(),
        sample_rate_hz in 1u32..=50_000,
        window_samples in 1u32..=4096,
        hop_samples in 1u32..=4096,
        channels in 1u32..=256,
        kernel_name in short_name(),
        kernel_params in "[a-z0-9=.,]{0,64}",
        calibration in prop::collection::vec(any::<u8>(), 0..512),
    )| {
        let config = Config {
            session_id,
            sample_rate_hz,
            window_samples,
            hop_samples,
            channels,
            kernel_name,
            kernel_params,
            calibration,
        };

        let mut buf = Vec::new();
        config.encode(&mut buf).expect("encode should succeed");
        prop_assert_eq!(Config::decode(&buf).expect("decode should succeed"), config);
    });
}

#[test]
fn prop_result_round_trip_preserves_samples_bit_exactly() {
    proptest!(|(
        session_id in any::<u32>(),
        sequence in any::<u32>(),
        timestamps in prop::collection::vec(any::<u64>(), 5),
        channels in 1u32..=8,
        window in 1u32..=64,
        seed in any::<u32>(),
    )| {
        let timing = DeviceTiming {
            tin_ns: timestamps[0],
            tstart_ns: timestamps[1],
            tend_ns: timestamps[2],
            tfirst_tx_ns: timestamps[3],
            tlast_tx_ns: timestamps[4],
        };
        // Include non-finite and denormal patterns: output must survive
        // bit-exactly, not value-approximately.
        let samples: Vec<f32> = (0..window * channels)
            .map(|i| f32::from_bits(seed.wrapping_mul(2_654_435_761).wrapping_add(i)))
            .collect();

        let result = WindowResult::from_samples(
            session_id, sequence, timing, window, channels, &samples,
        ).expect("dims match");

        let mut buf = Vec::new();
        result.encode(&mut buf).expect("encode should succeed");
        let decoded = WindowResult::decode(&buf).expect("decode should succeed");

        prop_assert_eq!(decoded.session_id, session_id);
        prop_assert_eq!(decoded.sequence, sequence);
        prop_assert_eq!(decoded.timing, timing);
        prop_assert_eq!(decoded.output, result.output);
    });
}
