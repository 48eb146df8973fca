//! The device client: handshake, per-window execute, teardown.

use std::time::Duration;

use cortex_link::{
    HANDSHAKE_TIMEOUT_MS, LinkError, WINDOW_TIMEOUT_MS, WindowReassembler, recv_frame, send_frame,
    send_window,
};
use cortex_proto::{
    Ack, ChunkHeader, Config, DeviceTiming, ErrorPayload, FrameType, Hello, MAX_FRAME_PAYLOAD,
    WindowResult,
    payloads::{ACK_KIND_CONFIG, ADAPTER_ABI_VERSION, DEFAULT_CHUNK_BYTES},
    wire,
};
use cortex_transport::{Deadline, Timeout, Transport};

use crate::{
    errors::ClientError,
    launcher::{AdapterChild, AdapterLauncher, TEARDOWN_GRACE_MS, TeardownReport, launcher_for_uri},
};

/// Everything the host chooses for a session: kernel, stream shape, and
/// calibration state.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Kernel to load on the adapter.
    pub kernel_name: String,
    /// Free-form parameter string for the kernel.
    pub kernel_params: String,
    /// Input sample rate in Hz.
    pub sample_rate_hz: u32,
    /// Samples per window per channel.
    pub window_samples: u32,
    /// Hop between successive windows, in samples.
    pub hop_samples: u32,
    /// Channel count.
    pub channels: u32,
    /// Opaque calibration state, transported bit-for-bit to the kernel.
    /// Owned by the host; freed on every exit path with the config itself.
    pub calibration: Vec<u8>,
}

impl SessionConfig {
    fn input_samples(&self) -> usize {
        self.window_samples as usize * self.channels as usize
    }
}

/// A connected, configured session with one adapter.
///
/// Operations are serial; the scheduler calls [`DeviceClient::execute_window`]
/// once per window and consumes the returned timing record. Dropping the
/// client tears the adapter down (transport close, then child reap with
/// escalation).
pub struct DeviceClient {
    transport: Box<dyn Transport>,
    child: Option<AdapterChild>,
    hello: Hello,
    session_id: u32,
    input_samples: usize,
    output_window_samples: u32,
    output_channels: u32,
    frame_buf: Vec<u8>,
    window_bytes: Vec<u8>,
    window_timeout: Timeout,
    torn_down: bool,
}

impl std::fmt::Debug for DeviceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceClient")
            .field("session_id", &self.session_id)
            .field("torn_down", &self.torn_down)
            .finish_non_exhaustive()
    }
}

impl DeviceClient {
    /// Launch (or connect to) an adapter and run the full handshake.
    pub fn launch(
        launcher: &mut dyn AdapterLauncher,
        config: &SessionConfig,
    ) -> Result<Self, ClientError> {
        let launched = launcher.launch()?;
        Self::handshake(launched.transport, launched.child, config)
    }

    /// Convenience wrapper: pick the launcher from a URI string.
    ///
    /// `adapter_binary` is required for `local://` and ignored otherwise.
    pub fn connect_uri(
        uri: &str,
        adapter_binary: Option<std::path::PathBuf>,
        config: &SessionConfig,
    ) -> Result<Self, ClientError> {
        let mut launcher = launcher_for_uri(uri, adapter_binary)?;
        Self::launch(launcher.as_mut(), config)
    }

    fn handshake(
        transport: Box<dyn Transport>,
        child: Option<AdapterChild>,
        config: &SessionConfig,
    ) -> Result<Self, ClientError> {
        let mut client = Self {
            transport,
            child,
            hello: Hello {
                boot_id: 0,
                adapter_name: String::new(),
                abi_version: 0,
                max_window_samples: 0,
                max_channels: 0,
                kernels: Vec::new(),
            },
            session_id: rand::random(),
            input_samples: config.input_samples(),
            output_window_samples: 0,
            output_channels: 0,
            frame_buf: vec![0u8; MAX_FRAME_PAYLOAD],
            window_bytes: Vec::with_capacity(config.input_samples() * 4),
            window_timeout: Timeout::from_ms(WINDOW_TIMEOUT_MS),
            torn_down: false,
        };

        match client.run_handshake(config) {
            Ok(()) => Ok(client),
            Err(e) => {
                // Symmetric cleanup: the handshake owns the adapter it
                // started, so a failed handshake reaps it too.
                client.teardown();
                Err(e)
            }
        }
    }

    fn run_handshake(&mut self, config: &SessionConfig) -> Result<(), ClientError> {
        let handshake_timeout = Timeout::from_ms(HANDSHAKE_TIMEOUT_MS);

        // HELLO
        let (frame_type, len) =
            recv_frame(self.transport.as_mut(), &mut self.frame_buf, handshake_timeout)?;
        self.hello = match frame_type {
            FrameType::Hello => Hello::decode(&self.frame_buf[..len])?,
            FrameType::Error => return Err(self.adapter_error(len)),
            other => {
                return Err(ClientError::UnexpectedFrame { state: "RECV_HELLO", got: other });
            }
        };
        if self.hello.abi_version != ADAPTER_ABI_VERSION {
            return Err(ClientError::AbiMismatch {
                got: self.hello.abi_version,
                want: ADAPTER_ABI_VERSION,
            });
        }
        tracing::info!(
            adapter = %self.hello.adapter_name,
            boot_id = self.hello.boot_id,
            kernels = ?self.hello.kernels,
            "adapter identified"
        );

        // CONFIG
        let wire_config = Config {
            session_id: self.session_id,
            sample_rate_hz: config.sample_rate_hz,
            window_samples: config.window_samples,
            hop_samples: config.hop_samples,
            channels: config.channels,
            kernel_name: config.kernel_name.clone(),
            kernel_params: config.kernel_params.clone(),
            calibration: config.calibration.clone(),
        };
        let mut payload = Vec::new();
        wire_config.encode(&mut payload)?;
        send_frame(self.transport.as_mut(), FrameType::Config, &payload)?;

        // ACK
        let (frame_type, len) =
            recv_frame(self.transport.as_mut(), &mut self.frame_buf, handshake_timeout)?;
        let ack = match frame_type {
            FrameType::Ack => Ack::decode(&self.frame_buf[..len])?,
            FrameType::Error => return Err(self.adapter_error(len)),
            other => {
                return Err(ClientError::UnexpectedFrame { state: "RECV_ACK", got: other });
            }
        };
        if ack.acknowledged_kind != ACK_KIND_CONFIG {
            return Err(ClientError::AckKindMismatch { got: ack.acknowledged_kind });
        }
        let (out_w, out_c) = ack.resolve_dims(config.window_samples, config.channels);
        self.output_window_samples = out_w;
        self.output_channels = out_c;

        tracing::info!(
            session_id = self.session_id,
            kernel = %config.kernel_name,
            output = %format_args!("{out_w}x{out_c}"),
            "session established"
        );
        Ok(())
    }

    /// The adapter's HELLO advertisement (identity, limits, kernel names).
    #[must_use]
    pub fn adapter_info(&self) -> &Hello {
        &self.hello
    }

    /// Session identifier negotiated at CONFIG time.
    #[must_use]
    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    /// Resolved output shape `(window_samples, channels)`.
    #[must_use]
    pub fn output_dims(&self) -> (u32, u32) {
        (self.output_window_samples, self.output_channels)
    }

    /// Samples the caller's output buffer must hold.
    #[must_use]
    pub fn output_samples(&self) -> usize {
        self.output_window_samples as usize * self.output_channels as usize
    }

    /// Override the RESULT wait deadline (default
    /// [`WINDOW_TIMEOUT_MS`]).
    pub fn set_window_timeout(&mut self, timeout_ms: u32) {
        self.window_timeout = Timeout::from_ms(timeout_ms);
    }

    /// Execute one window: send it chunked, await its RESULT, validate
    /// session and sequence, copy the output, return the device timing.
    pub fn execute_window(
        &mut self,
        sequence: u32,
        input: &[f32],
        output: &mut [f32],
    ) -> Result<DeviceTiming, ClientError> {
        if input.len() != self.input_samples {
            return Err(ClientError::InputSizeMismatch {
                expected: self.input_samples,
                got: input.len(),
            });
        }

        self.window_bytes.clear();
        wire::put_f32_slice(&mut self.window_bytes, input);
        send_window(self.transport.as_mut(), sequence, &self.window_bytes, DEFAULT_CHUNK_BYTES)?;

        let result = self.recv_result(sequence)?;

        if result.session_id != self.session_id {
            return Err(ClientError::SessionMismatch {
                expected: self.session_id,
                got: result.session_id,
            });
        }
        if result.sequence != sequence {
            return Err(ClientError::SequenceMismatch { expected: sequence, got: result.sequence });
        }
        if (result.output_window_samples, result.output_channels)
            != (self.output_window_samples, self.output_channels)
        {
            return Err(ClientError::ResultShapeMismatch {
                want_w: self.output_window_samples,
                want_c: self.output_channels,
                got_w: result.output_window_samples,
                got_c: result.output_channels,
            });
        }

        let samples = result.output_f32()?;
        if output.len() < samples.len() {
            return Err(ClientError::OutputBufferTooSmall {
                needed: samples.len(),
                capacity: output.len(),
            });
        }
        output[..samples.len()].copy_from_slice(&samples);

        tracing::trace!(sequence, "window executed");
        Ok(result.timing)
    }

    /// Await this window's RESULT under one deadline.
    ///
    /// A small result arrives as a single RESULT frame; an output too big
    /// for one frame arrives as WINDOW_CHUNK frames carrying the encoded
    /// RESULT payload, reassembled here before decoding.
    fn recv_result(&mut self, sequence: u32) -> Result<WindowResult, ClientError> {
        let deadline = Deadline::after(self.window_timeout);
        let mut reassembler: Option<WindowReassembler> = None;

        loop {
            let (frame_type, len) = recv_frame(
                self.transport.as_mut(),
                &mut self.frame_buf,
                deadline.remaining(),
            )?;
            match frame_type {
                FrameType::Result => {
                    if reassembler.is_some() {
                        return Err(ClientError::UnexpectedFrame {
                            state: "RECV_RESULT_CHUNKED",
                            got: FrameType::Result,
                        });
                    }
                    return Ok(WindowResult::decode(&self.frame_buf[..len])?);
                }
                FrameType::WindowChunk => {
                    let (header, data) = ChunkHeader::decode(&self.frame_buf[..len])?;
                    let complete = reassembler
                        .get_or_insert_with(|| WindowReassembler::new(sequence))
                        .accept(&header, data)
                        .map_err(LinkError::from)?;
                    if complete {
                        if let Some(done) = reassembler.take() {
                            return Ok(WindowResult::decode(&done.into_window())?);
                        }
                    }
                }
                FrameType::Error => return Err(self.adapter_error(len)),
                other => {
                    return Err(ClientError::UnexpectedFrame { state: "RECV_RESULT", got: other });
                }
            }
        }
    }

    /// Close the transport and reap any spawned child. Idempotent; never
    /// fails; escalation and leaks are logged.
    pub fn teardown(&mut self) -> TeardownReport {
        if self.torn_down {
            return TeardownReport::no_child();
        }
        self.torn_down = true;

        // Closing our end delivers EOF to the adapter; that is its shutdown
        // signal.
        self.transport.close();

        let report = match self.child.take() {
            Some(child) => child.reap_with_grace(Duration::from_millis(TEARDOWN_GRACE_MS)),
            None => TeardownReport::no_child(),
        };
        match (&report.exit_status, report.escalation) {
            (None, crate::launcher::Escalation::None) => {}
            (Some(status), crate::launcher::Escalation::None) => {
                tracing::info!(%status, "adapter exited cleanly");
            }
            (status, escalation) => {
                tracing::warn!(?status, ?escalation, "adapter teardown escalated");
            }
        }
        report
    }

    fn adapter_error(&self, len: usize) -> ClientError {
        match ErrorPayload::decode(&self.frame_buf[..len]) {
            Ok(error) => {
                tracing::error!(code = error.code, message = %error.message, "adapter error frame");
                ClientError::Adapter { code: error.code, message: error.message }
            }
            Err(e) => e.into(),
        }
    }
}

impl Drop for DeviceClient {
    fn drop(&mut self) {
        self.teardown();
    }
}
