//! Reference kernels.
//!
//! Real DSP kernels live outside this repository; these two exist so the
//! registry, parameter parsing, calibration hand-off, and dimension
//! derivation have first-party coverage, and so the end-to-end suites have
//! an identity kernel to benchmark against.

use cortex_proto::wire;

use crate::{
    errors::KernelError,
    kernel::{Kernel, KernelConfig, KernelInstance, KernelRegistry},
};

/// Registry with the kernels this binary links in.
#[must_use]
pub fn builtin_registry() -> KernelRegistry {
    let mut registry = KernelRegistry::new();
    registry.register("identity", identity_ctor);
    registry.register("gain", gain_ctor);
    registry
}

/// Parse a `key=value[,key=value]` parameter string.
fn parse_params(params: &str) -> Result<Vec<(&str, &str)>, KernelError> {
    params
        .split(',')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            pair.split_once('=')
                .ok_or_else(|| KernelError::Params(format!("{pair:?} is not key=value")))
        })
        .collect()
}

struct Identity;

impl Kernel for Identity {
    fn process(&mut self, input: &[f32], output: &mut [f32]) -> Result<(), KernelError> {
        if output.len() != input.len() {
            return Err(KernelError::Process(format!(
                "identity dims drifted: {} in, {} out",
                input.len(),
                output.len()
            )));
        }
        output.copy_from_slice(input);
        Ok(())
    }
}

fn identity_ctor(config: &KernelConfig<'_>) -> Result<KernelInstance, KernelError> {
    if !config.params.is_empty() {
        return Err(KernelError::Params("identity takes no parameters".to_owned()));
    }
    Ok(KernelInstance {
        kernel: Box::new(Identity),
        output_window_samples: 0,
        output_channels: 0,
    })
}

/// Multiplies every sample by `gain` (from the parameter string) times an
/// optional calibration trim (a single little-endian `f32`).
struct Gain {
    factor: f32,
}

impl Kernel for Gain {
    fn process(&mut self, input: &[f32], output: &mut [f32]) -> Result<(), KernelError> {
        if output.len() != input.len() {
            return Err(KernelError::Process(format!(
                "gain dims drifted: {} in, {} out",
                input.len(),
                output.len()
            )));
        }
        for (out, sample) in output.iter_mut().zip(input) {
            *out = sample * self.factor;
        }
        Ok(())
    }
}

fn gain_ctor(config: &KernelConfig<'_>) -> Result<KernelInstance, KernelError> {
    let mut gain = 1.0f32;
    for (key, value) in parse_params(config.params)? {
        match key {
            "gain" => {
                gain = value
                    .parse()
                    .map_err(|_| KernelError::Params(format!("gain={value:?} is not a float")))?;
            }
            other => {
                return Err(KernelError::Params(format!("unknown parameter {other:?}")));
            }
        }
    }

    let trim = match config.calibration {
        None => 1.0,
        Some(blob) => {
            if blob.len() != 4 {
                return Err(KernelError::Calibration(format!(
                    "expected a 4-byte trim, got {} bytes",
                    blob.len()
                )));
            }
            wire::ByteReader::new(blob)
                .read_f32()
                .map_err(|e| KernelError::Calibration(e.to_string()))?
        }
    };

    Ok(KernelInstance {
        kernel: Box::new(Gain { factor: gain * trim }),
        output_window_samples: 0,
        output_channels: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(params: &str) -> KernelConfig<'_> {
        KernelConfig {
            sample_rate_hz: 1000,
            window_samples: 4,
            hop_samples: 4,
            channels: 2,
            params,
            calibration: None,
        }
    }

    #[test]
    fn identity_copies_input() {
        let instance = builtin_registry().instantiate("identity", &config("")).unwrap();
        let mut kernel = instance.kernel;
        let input = [1.0f32, -2.5, 0.0, f32::MIN_POSITIVE, 4.0, 5.0, 6.0, 7.0];
        let mut output = [0.0f32; 8];
        kernel.process(&input, &mut output).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn identity_rejects_parameters() {
        assert!(matches!(
            builtin_registry().instantiate("identity", &config("gain=2")),
            Err(KernelError::Params(_))
        ));
    }

    #[test]
    fn gain_scales_by_parameter() {
        let instance = builtin_registry().instantiate("gain", &config("gain=2.0")).unwrap();
        let mut kernel = instance.kernel;
        let input = [1.0f32, -3.0];
        let mut output = [0.0f32; 2];
        kernel.process(&input, &mut output).unwrap();
        assert_eq!(output, [2.0, -6.0]);
    }

    #[test]
    fn gain_applies_calibration_trim() {
        let trim = 0.5f32.to_le_bytes();
        let cfg = KernelConfig { calibration: Some(&trim), ..config("gain=4.0") };
        let mut kernel = builtin_registry().instantiate("gain", &cfg).unwrap().kernel;
        let mut output = [0.0f32; 1];
        kernel.process(&[1.0], &mut output).unwrap();
        assert_eq!(output, [2.0]);
    }

    #[test]
    fn gain_rejects_bad_calibration_size() {
        let blob = [0u8; 3];
        let cfg = KernelConfig { calibration: Some(&blob), ..config("") };
        assert!(matches!(
            builtin_registry().instantiate("gain", &cfg),
            Err(KernelError::Calibration(_))
        ));
    }

    #[test]
    fn gain_rejects_unknown_parameter() {
        assert!(matches!(
            builtin_registry().instantiate("gain", &config("q=7")),
            Err(KernelError::Params(_))
        ));
    }
}
