//! Session-invariant violations: every mismatch the client must reject, and
//! every rejection the adapter must report.

use cortex_client::{ClientError, DeviceClient, SessionConfig};
use cortex_harness::{ThreadLauncher, identity_session, scripted_peer};
use cortex_link::{HANDSHAKE_TIMEOUT_MS, recv_frame, recv_window, send_frame};
use cortex_proto::{
    Ack, Config, DeviceTiming, ErrorPayload, FrameType, Hello, MAX_FRAME_PAYLOAD, WindowResult,
    payloads::{ACK_KIND_CONFIG, ADAPTER_ABI_VERSION, MAX_CALIBRATION_LEN},
};
use cortex_transport::{Timeout, Transport};

/// One-shot launcher handing the client a pre-connected transport.
struct RawLauncher(Option<cortex_transport::FdTransport>);

impl cortex_client::AdapterLauncher for RawLauncher {
    fn launch(&mut self) -> Result<cortex_client::LaunchedAdapter, ClientError> {
        let transport = self.0.take().map_or_else(
            || unreachable!("launcher used once"),
            |t| Box::new(t) as Box<dyn Transport>,
        );
        Ok(cortex_client::LaunchedAdapter { transport, child: None })
    }
}

/// A hand-rolled adapter that completes the handshake, then answers the
/// first window with a RESULT doctored by `doctor`.
fn doctored_adapter(
    doctor: fn(&mut WindowResult),
) -> (cortex_transport::FdTransport, std::thread::JoinHandle<()>) {
    scripted_peer(move |peer| {
        let mut buf = vec![0u8; MAX_FRAME_PAYLOAD];

        let hello = Hello {
            boot_id: 99,
            adapter_name: "doctored".to_owned(),
            abi_version: ADAPTER_ABI_VERSION,
            max_window_samples: 65_536,
            max_channels: 1024,
            kernels: vec!["identity".to_owned()],
        };
        let mut payload = Vec::new();
        hello.encode(&mut payload).unwrap();
        send_frame(peer, FrameType::Hello, &payload).unwrap();

        let (frame_type, len) =
            recv_frame(peer, &mut buf, Timeout::from_ms(HANDSHAKE_TIMEOUT_MS)).unwrap();
        assert_eq!(frame_type, FrameType::Config);
        let config = Config::decode(&buf[..len]).unwrap();

        let ack = Ack { acknowledged_kind: ACK_KIND_CONFIG, output_window_samples: 0, output_channels: 0 };
        let mut payload = Vec::new();
        ack.encode(&mut payload);
        send_frame(peer, FrameType::Ack, &payload).unwrap();

        let window = recv_window(peer, 0, Timeout::from_ms(5000), Timeout::from_ms(5000)).unwrap();
        let samples = cortex_proto::wire::f32_vec_from_le(&window.data).unwrap();
        let timing = DeviceTiming {
            tin_ns: 1,
            tstart_ns: 2,
            tend_ns: 3,
            tfirst_tx_ns: 4,
            tlast_tx_ns: 5,
        };
        let mut result = WindowResult::from_samples(
            config.session_id,
            0,
            timing,
            config.window_samples,
            config.channels,
            &samples,
        )
        .unwrap();
        doctor(&mut result);

        let mut payload = Vec::new();
        result.encode(&mut payload).unwrap();
        send_frame(peer, FrameType::Result, &payload).unwrap();

        // Hold the transport open until the client is done judging the
        // result.
        let _ = recv_frame(peer, &mut buf, Timeout::from_ms(2000));
    })
}

fn run_against_doctored(doctor: fn(&mut WindowResult)) -> ClientError {
    let (host_end, peer) = doctored_adapter(doctor);
    let mut launcher = RawLauncher(Some(host_end));
    let mut client = DeviceClient::launch(&mut launcher, &identity_session(8, 2)).unwrap();

    let input = vec![0.5f32; 16];
    let mut output = vec![0.0f32; 16];
    let err = client.execute_window(0, &input, &mut output).unwrap_err();
    drop(client);
    peer.join().unwrap();
    err
}

/// A RESULT from a restarted adapter (different session id) is rejected
/// with a session mismatch, not silently accepted.
#[test]
fn session_id_mismatch_is_fatal() {
    let err = run_against_doctored(|result| result.session_id ^= 0xDEAD_BEEF);
    assert!(matches!(err, ClientError::SessionMismatch { .. }), "{err}");
}

/// A RESULT answering the wrong window is rejected.
#[test]
fn sequence_mismatch_is_fatal() {
    let err = run_against_doctored(|result| result.sequence = 3);
    assert!(matches!(
        err,
        ClientError::SequenceMismatch { expected: 0, got: 3 }
    ));
}

/// Output dimensions cannot drift from what ACK established.
#[test]
fn result_shape_drift_is_fatal() {
    let err = run_against_doctored(|result| {
        // Keep the byte length consistent with the claimed shape.
        result.output_window_samples = 4;
        result.output_channels = 4;
    });
    assert!(matches!(err, ClientError::ResultShapeMismatch { .. }));
}

/// Asking for a kernel the adapter does not have yields the adapter's ERROR
/// frame as a distinct client error, and the session is over.
#[test]
fn unknown_kernel_is_reported_by_adapter() {
    let mut launcher = ThreadLauncher::default();
    let config = SessionConfig {
        kernel_name: "spectral-warp".to_owned(),
        ..identity_session(8, 2)
    };
    let err = DeviceClient::launch(&mut launcher, &config).unwrap_err();
    match err {
        ClientError::Adapter { code, message } => {
            assert_eq!(code, ErrorPayload::UNKNOWN_KERNEL);
            assert!(message.contains("spectral-warp"), "{message}");
        }
        other => panic!("expected adapter error, got {other}"),
    }
    assert!(launcher.join().is_err());
}

/// Zero-valued CONFIG fields are rejected by the adapter with BAD_CONFIG.
#[test]
fn invalid_config_is_reported_by_adapter() {
    let mut launcher = ThreadLauncher::default();
    let config = SessionConfig { sample_rate_hz: 0, ..identity_session(8, 2) };
    let err = DeviceClient::launch(&mut launcher, &config).unwrap_err();
    match err {
        ClientError::Adapter { code, .. } => assert_eq!(code, ErrorPayload::BAD_CONFIG),
        other => panic!("expected adapter error, got {other}"),
    }
}

/// An oversize calibration blob never reaches the wire: CONFIG encode
/// rejects it and the handshake tears the adapter down.
#[test]
fn oversize_calibration_is_rejected_locally() {
    let mut launcher = ThreadLauncher::default();
    let config = SessionConfig {
        calibration: vec![0u8; MAX_CALIBRATION_LEN + 1],
        ..identity_session(8, 2)
    };
    let err = DeviceClient::launch(&mut launcher, &config).unwrap_err();
    assert!(matches!(
        err,
        ClientError::Protocol(cortex_proto::ProtocolError::CalibrationTooLarge { .. })
    ));
}

/// An adapter advertising a foreign ABI version is rejected at HELLO.
#[test]
fn abi_mismatch_is_fatal() {
    let (host_end, peer) = scripted_peer(|peer| {
        let hello = Hello {
            boot_id: 1,
            adapter_name: "future".to_owned(),
            abi_version: 9,
            max_window_samples: 1024,
            max_channels: 8,
            kernels: vec![],
        };
        let mut payload = Vec::new();
        hello.encode(&mut payload).unwrap();
        send_frame(peer, FrameType::Hello, &payload).unwrap();
        let _ = recv_frame(peer, &mut [0u8; 64], Timeout::from_ms(2000));
    });

    let mut launcher = RawLauncher(Some(host_end));
    let err = DeviceClient::launch(&mut launcher, &identity_session(8, 2)).unwrap_err();
    assert!(matches!(err, ClientError::AbiMismatch { got: 9, .. }));
    peer.join().unwrap();
}
