//! Handshake payloads: HELLO, CONFIG, ACK.

use bytes::BufMut;

use crate::{
    errors::{ProtocolError, Result},
    header::MAX_FRAME_PAYLOAD,
    wire::{self, ByteReader},
};

/// Adapter ABI version carried in HELLO. Fixed at 1.
pub const ADAPTER_ABI_VERSION: u8 = 1;

/// Width of the NUL-padded adapter name field.
pub const ADAPTER_NAME_LEN: usize = 32;

/// Width of each NUL-padded kernel name entry in HELLO, and of the kernel
/// selection field in CONFIG's parameter block.
pub const KERNEL_NAME_LEN: usize = 32;

/// Width of the NUL-padded kernel selection field in CONFIG.
pub const CONFIG_KERNEL_NAME_LEN: usize = 64;

/// Width of the NUL-padded kernel parameter string in CONFIG.
pub const KERNEL_PARAMS_LEN: usize = 256;

/// HELLO can advertise at most this many kernels (8-bit count).
pub const MAX_KERNELS: usize = 255;

/// Fixed bytes of HELLO before the kernel name table.
const HELLO_FIXED_LEN: usize = 4 + ADAPTER_NAME_LEN + 1 + 1 + 2 + 4 + 4;

/// Fixed bytes of CONFIG before the calibration blob.
const CONFIG_FIXED_LEN: usize = 5 * 4 + CONFIG_KERNEL_NAME_LEN + KERNEL_PARAMS_LEN + 4;

/// Largest calibration blob that fits a single CONFIG frame.
pub const MAX_CALIBRATION_LEN: usize = MAX_FRAME_PAYLOAD - CONFIG_FIXED_LEN;

/// ACK `acknowledged_kind` value for CONFIG.
pub const ACK_KIND_CONFIG: u32 = 0;

/// HELLO payload: the adapter's capability advertisement.
///
/// Sent once, unprompted, immediately after the adapter's transport comes up.
/// Decoding tolerates trailing bytes past the kernel table so future device
/// metadata extensions stay wire-compatible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    /// Random per-process-start identifier. A change mid-session means the
    /// adapter restarted behind the host's back.
    pub boot_id: u32,
    /// Adapter implementation name.
    pub adapter_name: String,
    /// ABI version, fixed at [`ADAPTER_ABI_VERSION`].
    pub abi_version: u8,
    /// Largest `window_length_samples` the adapter accepts.
    pub max_window_samples: u32,
    /// Largest channel count the adapter accepts.
    pub max_channels: u32,
    /// Names of the kernels this adapter can serve.
    pub kernels: Vec<String>,
}

impl Hello {
    /// Serialize to wire bytes.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        if self.kernels.len() > MAX_KERNELS {
            return Err(ProtocolError::FieldTooLong {
                field: "kernels",
                len: self.kernels.len(),
                max: MAX_KERNELS,
            });
        }
        dst.put_slice(&self.boot_id.to_le_bytes());
        wire::put_fixed_str(dst, "adapter_name", &self.adapter_name, ADAPTER_NAME_LEN)?;
        dst.put_u8(self.abi_version);
        dst.put_u8(self.kernels.len() as u8);
        dst.put_slice(&0u16.to_le_bytes()); // reserved
        dst.put_slice(&self.max_window_samples.to_le_bytes());
        dst.put_slice(&self.max_channels.to_le_bytes());
        for kernel in &self.kernels {
            wire::put_fixed_str(dst, "kernel_name", kernel, KERNEL_NAME_LEN)?;
        }
        Ok(())
    }

    /// Parse from wire bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(bytes);
        let boot_id = r.read_u32()?;
        let adapter_name = r.read_fixed_str("adapter_name", ADAPTER_NAME_LEN)?;
        let abi_version = r.read_u8()?;
        let num_kernels = r.read_u8()?;
        let _reserved = r.read_u16()?;
        let max_window_samples = r.read_u32()?;
        let max_channels = r.read_u32()?;

        let mut kernels = Vec::with_capacity(usize::from(num_kernels));
        for _ in 0..num_kernels {
            kernels.push(r.read_fixed_str("kernel_name", KERNEL_NAME_LEN)?);
        }
        // Anything after the kernel table is optional device metadata from a
        // newer adapter; ignore it.

        Ok(Self { boot_id, adapter_name, abi_version, max_window_samples, max_channels, kernels })
    }

    /// Fixed payload bytes before the kernel table.
    #[must_use]
    pub fn fixed_len() -> usize {
        HELLO_FIXED_LEN
    }
}

/// CONFIG payload: kernel selection, stream shape, and calibration state.
///
/// The calibration blob is opaque to the core; it is transported bit-for-bit
/// and handed to the kernel's init. It must fit a single frame; oversize is
/// rejected at encode *and* decode, never truncated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Random per-handshake session identifier, echoed in every RESULT.
    pub session_id: u32,
    /// Input sample rate in Hz.
    pub sample_rate_hz: u32,
    /// Samples per window per channel.
    pub window_samples: u32,
    /// Hop between successive windows, in samples.
    pub hop_samples: u32,
    /// Channel count.
    pub channels: u32,
    /// Name of the kernel to load.
    pub kernel_name: String,
    /// Free-form kernel parameter string (`key=value` pairs by convention).
    pub kernel_params: String,
    /// Opaque calibration state for the kernel, possibly empty.
    pub calibration: Vec<u8>,
}

impl Config {
    /// Input window size in bytes (`window_samples x channels x 4`).
    #[must_use]
    pub fn window_bytes(&self) -> usize {
        self.window_samples as usize * self.channels as usize * 4
    }

    /// Serialize to wire bytes.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        if self.calibration.len() > MAX_CALIBRATION_LEN {
            return Err(ProtocolError::CalibrationTooLarge {
                size: self.calibration.len(),
                max: MAX_CALIBRATION_LEN,
            });
        }
        dst.put_slice(&self.session_id.to_le_bytes());
        dst.put_slice(&self.sample_rate_hz.to_le_bytes());
        dst.put_slice(&self.window_samples.to_le_bytes());
        dst.put_slice(&self.hop_samples.to_le_bytes());
        dst.put_slice(&self.channels.to_le_bytes());
        wire::put_fixed_str(dst, "kernel_name", &self.kernel_name, CONFIG_KERNEL_NAME_LEN)?;
        wire::put_fixed_str(dst, "kernel_params", &self.kernel_params, KERNEL_PARAMS_LEN)?;
        dst.put_slice(&(self.calibration.len() as u32).to_le_bytes());
        dst.put_slice(&self.calibration);
        Ok(())
    }

    /// Parse from wire bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(bytes);
        let session_id = r.read_u32()?;
        let sample_rate_hz = r.read_u32()?;
        let window_samples = r.read_u32()?;
        let hop_samples = r.read_u32()?;
        let channels = r.read_u32()?;
        let kernel_name = r.read_fixed_str("kernel_name", CONFIG_KERNEL_NAME_LEN)?;
        let kernel_params = r.read_fixed_str("kernel_params", KERNEL_PARAMS_LEN)?;
        let calibration_len = r.read_u32()? as usize;
        if calibration_len > MAX_CALIBRATION_LEN {
            return Err(ProtocolError::CalibrationTooLarge {
                size: calibration_len,
                max: MAX_CALIBRATION_LEN,
            });
        }
        let calibration = r.take(calibration_len)?.to_vec();

        Ok(Self {
            session_id,
            sample_rate_hz,
            window_samples,
            hop_samples,
            channels,
            kernel_name,
            kernel_params,
            calibration,
        })
    }
}

/// ACK payload: CONFIG accepted, output dimensions resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// What is being acknowledged; [`ACK_KIND_CONFIG`] is the only kind in
    /// protocol version 1.
    pub acknowledged_kind: u32,
    /// Output window length in samples; zero means "same as input".
    pub output_window_samples: u32,
    /// Output channel count; zero means "same as input".
    pub output_channels: u32,
}

impl Ack {
    /// Serialize to wire bytes.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_slice(&self.acknowledged_kind.to_le_bytes());
        dst.put_slice(&self.output_window_samples.to_le_bytes());
        dst.put_slice(&self.output_channels.to_le_bytes());
    }

    /// Parse from wire bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(bytes);
        Ok(Self {
            acknowledged_kind: r.read_u32()?,
            output_window_samples: r.read_u32()?,
            output_channels: r.read_u32()?,
        })
    }

    /// Resolve the "zero means same as input" convention against the
    /// configured input dimensions.
    #[must_use]
    pub fn resolve_dims(&self, input_window_samples: u32, input_channels: u32) -> (u32, u32) {
        let w = if self.output_window_samples == 0 {
            input_window_samples
        } else {
            self.output_window_samples
        };
        let c = if self.output_channels == 0 { input_channels } else { self.output_channels };
        (w, c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> Config {
        Config {
            session_id: 0x1234_5678,
            sample_rate_hz: 1000,
            window_samples: 160,
            hop_samples: 80,
            channels: 64,
            kernel_name: "identity".to_owned(),
            kernel_params: "gain=1.0".to_owned(),
            calibration: vec![9, 8, 7],
        }
    }

    #[test]
    fn hello_round_trip() {
        let hello = Hello {
            boot_id: 42,
            adapter_name: "cortex-adapter".to_owned(),
            abi_version: ADAPTER_ABI_VERSION,
            max_window_samples: 65_536,
            max_channels: 1024,
            kernels: vec!["identity".to_owned(), "gain".to_owned()],
        };
        let mut buf = Vec::new();
        hello.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), Hello::fixed_len() + 2 * KERNEL_NAME_LEN);
        assert_eq!(Hello::decode(&buf).unwrap(), hello);
    }

    #[test]
    fn hello_ignores_trailing_metadata() {
        let hello = Hello {
            boot_id: 7,
            adapter_name: "dev".to_owned(),
            abi_version: ADAPTER_ABI_VERSION,
            max_window_samples: 1024,
            max_channels: 8,
            kernels: vec![],
        };
        let mut buf = Vec::new();
        hello.encode(&mut buf).unwrap();
        buf.extend_from_slice(b"hostname=nucleo\0");
        assert_eq!(Hello::decode(&buf).unwrap(), hello);
    }

    #[test]
    fn config_round_trip() {
        let config = sample_config();
        let mut buf = Vec::new();
        config.encode(&mut buf).unwrap();
        assert_eq!(Config::decode(&buf).unwrap(), config);
    }

    #[test]
    fn config_rejects_oversize_calibration() {
        let config = Config {
            calibration: vec![0; MAX_CALIBRATION_LEN + 1],
            ..sample_config()
        };
        let mut buf = Vec::new();
        assert!(matches!(
            config.encode(&mut buf),
            Err(ProtocolError::CalibrationTooLarge { .. })
        ));
    }

    #[test]
    fn config_decode_rejects_oversize_calibration_claim() {
        let config = sample_config();
        let mut buf = Vec::new();
        config.encode(&mut buf).unwrap();
        // Rewrite the calibration_state_size field with an absurd claim.
        let size_off = CONFIG_FIXED_LEN - 4;
        buf[size_off..size_off + 4]
            .copy_from_slice(&((MAX_CALIBRATION_LEN + 1) as u32).to_le_bytes());
        assert!(matches!(
            Config::decode(&buf),
            Err(ProtocolError::CalibrationTooLarge { .. })
        ));
    }

    #[test]
    fn config_decode_rejects_short_calibration() {
        let config = sample_config();
        let mut buf = Vec::new();
        config.encode(&mut buf).unwrap();
        buf.pop();
        assert!(matches!(Config::decode(&buf), Err(ProtocolError::UnexpectedEnd { .. })));
    }

    #[test]
    fn ack_round_trip_and_dim_resolution() {
        let ack = Ack { acknowledged_kind: ACK_KIND_CONFIG, output_window_samples: 0, output_channels: 4 };
        let mut buf = Vec::new();
        ack.encode(&mut buf);
        assert_eq!(buf.len(), 12);
        assert_eq!(Ack::decode(&buf).unwrap(), ack);
        assert_eq!(ack.resolve_dims(160, 64), (160, 4));
    }
}
