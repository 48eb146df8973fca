//! Adapter session loop.
//!
//! One session per process: HELLO out, CONFIG in, kernel load, ACK out, then
//! the window loop until the host closes the transport. Any handshake or
//! kernel failure is reported to the host with an ERROR frame before the
//! session terminates.
//!
//! # State machine
//!
//! STARTUP → SEND_HELLO → RECV_CONFIG → LOAD_KERNEL → SEND_ACK →
//! RUN (RECV_WINDOW → PROCESS → SEND_RESULT) → CLEANUP. EOF in RUN is the
//! clean exit; a SIGTERM/SIGINT flag is polled between windows.

use cortex_link::{
    HANDSHAKE_TIMEOUT_MS, LinkError, WINDOW_TIMEOUT_MS, recv_frame, recv_window, send_frame,
    send_window,
};
use cortex_proto::{
    Ack, Config, DeviceTiming, ErrorPayload, FrameType, Hello, MAX_FRAME_PAYLOAD, WindowResult,
    payloads::{
        ACK_KIND_CONFIG, ADAPTER_ABI_VERSION, DEFAULT_CHUNK_BYTES, MAX_WINDOW_BYTES,
        RESULT_TLAST_TX_OFFSET,
    },
    wire,
};
use cortex_transport::{Timeout, Transport};

use crate::{
    errors::{KernelError, SessionError},
    kernel::{Kernel, KernelConfig, KernelRegistry},
    shutdown::ShutdownFlag,
};

/// Cadence of the shutdown-flag poll while idle between windows.
const IDLE_TICK_MS: u32 = 500;

/// Static identity and limits the adapter advertises in HELLO.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Adapter implementation name (32 bytes max on the wire).
    pub adapter_name: String,
    /// Largest `window_length_samples` accepted in CONFIG.
    pub max_window_samples: u32,
    /// Largest channel count accepted in CONFIG.
    pub max_channels: u32,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            adapter_name: "cortex-adapter".to_owned(),
            max_window_samples: (MAX_WINDOW_BYTES / 4) as u32,
            max_channels: 1024,
        }
    }
}

/// How a session ended cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The host closed the transport (EOF at a frame boundary).
    PeerClosed,
    /// SIGTERM/SIGINT was observed between windows.
    ShutdownRequested,
}

/// One adapter session over one transport.
pub struct AdapterSession {
    transport: Box<dyn Transport>,
    registry: KernelRegistry,
    config: AdapterConfig,
    shutdown: ShutdownFlag,
    boot_id: u32,
}

impl AdapterSession {
    /// Bind a session to a transport and kernel registry.
    pub fn new(
        transport: Box<dyn Transport>,
        registry: KernelRegistry,
        config: AdapterConfig,
        shutdown: ShutdownFlag,
    ) -> Self {
        Self { transport, registry, config, shutdown, boot_id: rand::random() }
    }

    /// Run the session to completion.
    ///
    /// `Ok` is a clean shutdown (kernel torn down, transport closed); `Err`
    /// is fatal and, where a peer might still be listening, was preceded by
    /// an ERROR frame.
    pub fn run(mut self) -> Result<SessionOutcome, SessionError> {
        tracing::info!(
            boot_id = self.boot_id,
            adapter = %self.config.adapter_name,
            kernels = ?self.registry.names(),
            "adapter session starting"
        );

        self.send_hello()?;

        let session_config = match self.recv_config()? {
            Some(config) => config,
            None => {
                tracing::info!("host closed before CONFIG; exiting cleanly");
                self.transport.close();
                return Ok(SessionOutcome::PeerClosed);
            }
        };

        let kernel_instance = match self.load_kernel(&session_config) {
            Ok(instance) => instance,
            Err(e) => {
                self.report_error(&error_payload_for_kernel(&e));
                self.transport.close();
                return Err(e.into());
            }
        };

        let ack = Ack {
            acknowledged_kind: ACK_KIND_CONFIG,
            output_window_samples: kernel_instance.output_window_samples,
            output_channels: kernel_instance.output_channels,
        };
        let mut ack_buf = Vec::with_capacity(12);
        ack.encode(&mut ack_buf);
        send_frame(self.transport.as_mut(), FrameType::Ack, &ack_buf)?;
        let (out_w, out_c) =
            ack.resolve_dims(session_config.window_samples, session_config.channels);

        tracing::info!(
            session_id = session_config.session_id,
            kernel = %session_config.kernel_name,
            input = %format_args!("{}x{}", session_config.window_samples, session_config.channels),
            output = %format_args!("{out_w}x{out_c}"),
            "session configured"
        );

        let outcome = self.run_windows(&session_config, kernel_instance.kernel, out_w, out_c);
        // Kernel teardown is Drop; it happens before the transport closes so
        // a crash in teardown cannot outlive the session.
        self.transport.close();
        match &outcome {
            Ok(outcome) => tracing::info!(?outcome, "adapter session ended"),
            Err(e) => tracing::error!(error = %e, "adapter session failed"),
        }
        outcome
    }

    fn send_hello(&mut self) -> Result<(), SessionError> {
        let hello = Hello {
            boot_id: self.boot_id,
            adapter_name: self.config.adapter_name.clone(),
            abi_version: ADAPTER_ABI_VERSION,
            max_window_samples: self.config.max_window_samples,
            max_channels: self.config.max_channels,
            kernels: self.registry.names(),
        };
        let mut buf = Vec::new();
        hello.encode(&mut buf)?;
        send_frame(self.transport.as_mut(), FrameType::Hello, &buf)?;
        Ok(())
    }

    /// Wait for CONFIG. `None` means the host closed first (clean).
    fn recv_config(&mut self) -> Result<Option<Config>, SessionError> {
        let mut buf = vec![0u8; MAX_FRAME_PAYLOAD];
        let (frame_type, len) = match recv_frame(
            self.transport.as_mut(),
            &mut buf,
            Timeout::from_ms(HANDSHAKE_TIMEOUT_MS),
        ) {
            Ok(frame) => frame,
            Err(e) if e.is_eof() => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match frame_type {
            FrameType::Config => {
                let config = Config::decode(&buf[..len])?;
                if let Err(message) = validate_config(&config, &self.config) {
                    self.report_error(&ErrorPayload::bad_config(&message));
                    return Err(SessionError::BadConfig(message));
                }
                Ok(Some(config))
            }
            FrameType::Error => {
                let error = ErrorPayload::decode(&buf[..len])?;
                Err(SessionError::HostError { code: error.code, message: error.message })
            }
            other => {
                self.report_error(&ErrorPayload::protocol(format!(
                    "expected CONFIG, got {other:?}"
                )));
                Err(SessionError::UnexpectedFrame { state: "RECV_CONFIG", got: other })
            }
        }
    }

    fn load_kernel(
        &mut self,
        config: &Config,
    ) -> Result<crate::kernel::KernelInstance, KernelError> {
        let kernel_config = KernelConfig {
            sample_rate_hz: config.sample_rate_hz,
            window_samples: config.window_samples,
            hop_samples: config.hop_samples,
            channels: config.channels,
            params: &config.kernel_params,
            calibration: if config.calibration.is_empty() {
                None
            } else {
                Some(config.calibration.as_slice())
            },
        };
        self.registry.instantiate(&config.kernel_name, &kernel_config)
    }

    fn run_windows(
        &mut self,
        config: &Config,
        mut kernel: Box<dyn Kernel>,
        out_w: u32,
        out_c: u32,
    ) -> Result<SessionOutcome, SessionError> {
        let expected_bytes = config.window_bytes();
        let mut output = vec![0.0f32; out_w as usize * out_c as usize];
        let mut sequence: u32 = 0;

        loop {
            // Idle at the frame boundary so the shutdown flag is honored
            // without ever abandoning a partially read frame.
            loop {
                if self.shutdown.requested() {
                    tracing::info!(sequence, "shutdown requested between windows");
                    return Ok(SessionOutcome::ShutdownRequested);
                }
                match self.transport.poll_recv(Timeout::from_ms(IDLE_TICK_MS)) {
                    Ok(true) => break,
                    Ok(false) => {}
                    Err(e) => return Err(LinkError::from(e).into()),
                }
            }

            let window = match recv_window(
                self.transport.as_mut(),
                sequence,
                Timeout::from_ms(WINDOW_TIMEOUT_MS),
                Timeout::from_ms(WINDOW_TIMEOUT_MS),
            ) {
                Ok(window) => window,
                Err(e) if e.is_eof() => {
                    tracing::info!(windows = sequence, "host closed the session");
                    return Ok(SessionOutcome::PeerClosed);
                }
                Err(LinkError::Chunk(chunk_err)) => {
                    self.report_error(&ErrorPayload::chunking(chunk_err.to_string()));
                    return Err(LinkError::Chunk(chunk_err).into());
                }
                Err(e) => return Err(e.into()),
            };

            if window.data.len() != expected_bytes {
                let mismatch = SessionError::WindowSizeMismatch {
                    expected: expected_bytes,
                    got: window.data.len(),
                };
                self.report_error(&ErrorPayload::chunking(mismatch.to_string()));
                return Err(mismatch);
            }
            let input = wire::f32_vec_from_le(&window.data)?;

            let tstart_ns = self.transport.monotonic_ns();
            if let Err(e) = kernel.process(&input, &mut output) {
                self.report_error(&ErrorPayload::new(ErrorPayload::INTERNAL, e.to_string()));
                return Err(e.into());
            }
            let tend_ns = self.transport.monotonic_ns();

            let tfirst_tx_ns = self.transport.monotonic_ns();
            let timing = DeviceTiming {
                tin_ns: window.tin_ns,
                tstart_ns,
                tend_ns,
                tfirst_tx_ns,
                tlast_tx_ns: 0, // patched below, after serialization
            };
            let result = WindowResult::from_samples(
                config.session_id,
                sequence,
                timing,
                out_w,
                out_c,
                &output,
            )?;
            let mut payload = Vec::with_capacity(64 + result.output.len());
            result.encode(&mut payload)?;

            // tlast_tx is stamped as late as it can be while still riding
            // inside the frame it describes: after serialization,
            // immediately before the transport send.
            let tlast_tx_ns = self.transport.monotonic_ns();
            payload[RESULT_TLAST_TX_OFFSET..RESULT_TLAST_TX_OFFSET + 8]
                .copy_from_slice(&tlast_tx_ns.to_le_bytes());
            if payload.len() <= MAX_FRAME_PAYLOAD {
                send_frame(self.transport.as_mut(), FrameType::Result, &payload)?;
            } else {
                // An output too big for one frame rides the chunk mechanism
                // in reverse, under the window's own sequence number.
                send_window(self.transport.as_mut(), sequence, &payload, DEFAULT_CHUNK_BYTES)?;
            }

            tracing::debug!(
                sequence,
                process_ns = tend_ns - tstart_ns,
                "window processed"
            );
            sequence = sequence.wrapping_add(1);
        }
    }

    /// Best-effort ERROR frame; the session is terminating either way.
    fn report_error(&mut self, payload: &ErrorPayload) {
        tracing::error!(code = payload.code, message = %payload.message, "reporting session error");
        let mut buf = Vec::new();
        if payload.encode(&mut buf).is_ok() {
            if let Err(e) = send_frame(self.transport.as_mut(), FrameType::Error, &buf) {
                tracing::warn!(error = %e, "could not deliver ERROR frame");
            }
        }
    }
}

fn validate_config(config: &Config, limits: &AdapterConfig) -> Result<(), String> {
    if config.sample_rate_hz == 0 {
        return Err("sample_rate_hz is zero".to_owned());
    }
    if config.window_samples == 0 {
        return Err("window_length_samples is zero".to_owned());
    }
    if config.hop_samples == 0 {
        return Err("hop_samples is zero".to_owned());
    }
    if config.channels == 0 {
        return Err("channels is zero".to_owned());
    }
    if config.window_samples > limits.max_window_samples {
        return Err(format!(
            "window_length_samples {} exceeds adapter limit {}",
            config.window_samples, limits.max_window_samples
        ));
    }
    if config.channels > limits.max_channels {
        return Err(format!(
            "channels {} exceeds adapter limit {}",
            config.channels, limits.max_channels
        ));
    }
    if config.window_bytes() > MAX_WINDOW_BYTES {
        return Err(format!(
            "window of {} bytes exceeds the {MAX_WINDOW_BYTES} byte limit",
            config.window_bytes()
        ));
    }
    Ok(())
}

fn error_payload_for_kernel(error: &KernelError) -> ErrorPayload {
    match error {
        KernelError::Unknown(name) => ErrorPayload::unknown_kernel(name),
        other => ErrorPayload::kernel_init(other.to_string()),
    }
}
