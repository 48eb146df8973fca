//! Lifecycle invariants: death detection, graceful shutdown, idempotent
//! teardown.

use std::time::{Duration, Instant};

use cortex_adapter::SessionOutcome;
use cortex_client::{ClientError, DeviceClient};
use cortex_harness::{ThreadLauncher, identity_session, scripted_peer};
use cortex_link::{HANDSHAKE_TIMEOUT_MS, recv_frame, send_frame};
use cortex_proto::{
    Ack, FrameType, Hello, MAX_FRAME_PAYLOAD,
    payloads::{ACK_KIND_CONFIG, ADAPTER_ABI_VERSION},
};
use cortex_transport::{Timeout, Transport};

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

/// An adapter that handshakes, swallows one window, and dies mid-exchange:
/// the client's RESULT wait must end in a timeout near its deadline, and
/// teardown must still succeed.
#[test]
fn adapter_death_mid_window_times_out() {
    let (host_end, peer) = scripted_peer(|peer| {
        let mut buf = vec![0u8; MAX_FRAME_PAYLOAD];

        let hello = Hello {
            boot_id: 5,
            adapter_name: "mortal".to_owned(),
            abi_version: ADAPTER_ABI_VERSION,
            max_window_samples: 65_536,
            max_channels: 1024,
            kernels: vec!["identity".to_owned()],
        };
        let mut payload = Vec::new();
        hello.encode(&mut payload).unwrap();
        send_frame(peer, FrameType::Hello, &payload).unwrap();

        let _ = recv_frame(peer, &mut buf, Timeout::from_ms(HANDSHAKE_TIMEOUT_MS)).unwrap();
        let ack = Ack {
            acknowledged_kind: ACK_KIND_CONFIG,
            output_window_samples: 0,
            output_channels: 0,
        };
        let mut payload = Vec::new();
        ack.encode(&mut payload);
        send_frame(peer, FrameType::Ack, &payload).unwrap();

        // Consume the first chunk, then hang without replying. The client
        // must not wait for us past its window deadline.
        let _ = recv_frame(peer, &mut buf, Timeout::from_ms(5000));
        std::thread::sleep(Duration::from_millis(1500));
    });

    let mut launcher = RawLauncher(Some(host_end));
    let mut client = DeviceClient::launch(&mut launcher, &identity_session(8, 2)).unwrap();
    client.set_window_timeout(300);

    let input = vec![1.0f32; 16];
    let mut output = vec![0.0f32; 16];
    let started = Instant::now();
    let err = client.execute_window(0, &input, &mut output).unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, ClientError::Link(e) if e.is_timeout()), "unexpected error kind");
    assert!(elapsed >= Duration::from_millis(300), "returned early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1200), "overshot deadline: {elapsed:?}");

    let report = client.teardown();
    assert!(report.exit_status.is_none());
    peer.join().unwrap();
}

/// The shutdown flag (SIGTERM stand-in) is honored between windows: the
/// in-flight window completes, the session exits with ShutdownRequested.
#[test]
fn shutdown_flag_is_checked_between_windows() {
    let mut launcher = ThreadLauncher::default();
    let mut client = DeviceClient::launch(&mut launcher, &identity_session(8, 2)).unwrap();

    let input = vec![2.0f32; 16];
    let mut output = vec![0.0f32; 16];
    client.execute_window(0, &input, &mut output).unwrap();
    assert_eq!(output, input);

    launcher.shutdown.request();
    assert_eq!(launcher.join().unwrap(), SessionOutcome::ShutdownRequested);

    client.teardown();
}

/// Closing the transport is the intended shutdown path: the session ends
/// with PeerClosed even mid-idle, and teardown is idempotent.
#[test]
fn transport_close_ends_idle_session() {
    let mut launcher = ThreadLauncher::default();
    let mut client = DeviceClient::launch(&mut launcher, &identity_session(8, 2)).unwrap();

    client.teardown();
    client.teardown(); // second call is a no-op
    assert_eq!(launcher.join().unwrap(), SessionOutcome::PeerClosed);
}

/// A host that vanishes mid-handshake (before CONFIG) leaves the adapter
/// exiting cleanly, not erroring.
#[test]
fn host_abort_before_config_is_clean() {
    let mut launcher = ThreadLauncher::default();
    let launched = cortex_client::AdapterLauncher::launch(&mut launcher).unwrap();
    drop(launched); // transport closes without a handshake

    assert_eq!(launcher.join().unwrap(), SessionOutcome::PeerClosed);
}
