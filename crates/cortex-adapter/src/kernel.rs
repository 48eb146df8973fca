//! Kernel interface and static registry.
//!
//! A kernel is the unit the harness benchmarks: a deterministic,
//! allocation-free per-window transform. The adapter resolves kernels
//! through a registry keyed by name (a static link table), so the same code
//! path serves host builds and embedded builds with no dynamic loading.

use std::collections::BTreeMap;

use crate::errors::KernelError;

/// Configuration handed to a kernel constructor.
///
/// Borrows stay with the caller: the parameter string and calibration blob
/// are only guaranteed for the duration of the constructor call. Kernels
/// that need them later copy what they keep.
#[derive(Debug, Clone, Copy)]
pub struct KernelConfig<'a> {
    /// Input sample rate in Hz.
    pub sample_rate_hz: u32,
    /// Samples per window per channel.
    pub window_samples: u32,
    /// Hop between successive windows, in samples.
    pub hop_samples: u32,
    /// Channel count.
    pub channels: u32,
    /// Free-form parameter string from CONFIG (`key=value` pairs).
    pub params: &'a str,
    /// Opaque calibration state from CONFIG, `None` when empty.
    pub calibration: Option<&'a [u8]>,
}

/// A constructed kernel plus its resolved output shape.
pub struct KernelInstance {
    /// The kernel itself. Teardown is `Drop`.
    pub kernel: Box<dyn Kernel>,
    /// Output window length in samples; zero means "same as input".
    pub output_window_samples: u32,
    /// Output channel count; zero means "same as input".
    pub output_channels: u32,
}

/// A loaded signal-processing kernel.
///
/// `process` must be deterministic per window and must not allocate; the
/// session loop is on the latency path the harness is measuring.
pub trait Kernel: Send {
    /// Transform one input window into the output buffer.
    ///
    /// `input` is `window_samples x channels` and `output` matches the
    /// dimensions the constructor returned; both are channel-major
    /// host-order `f32`.
    fn process(&mut self, input: &[f32], output: &mut [f32]) -> Result<(), KernelError>;
}

/// Kernel constructor: validates configuration and builds an instance.
pub type KernelCtor = fn(&KernelConfig<'_>) -> Result<KernelInstance, KernelError>;

/// Name → constructor link table.
#[derive(Default)]
pub struct KernelRegistry {
    entries: BTreeMap<String, KernelCtor>,
}

impl KernelRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kernel under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, ctor: KernelCtor) {
        self.entries.insert(name.into(), ctor);
    }

    /// Names of every registered kernel, in sorted order (this is what HELLO
    /// advertises).
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Resolve and construct the named kernel.
    pub fn instantiate(
        &self,
        name: &str,
        config: &KernelConfig<'_>,
    ) -> Result<KernelInstance, KernelError> {
        let ctor = self.entries.get(name).ok_or_else(|| KernelError::Unknown(name.to_owned()))?;
        ctor(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Null;

    impl Kernel for Null {
        fn process(&mut self, _input: &[f32], output: &mut [f32]) -> Result<(), KernelError> {
            output.fill(0.0);
            Ok(())
        }
    }

    fn null_ctor(_config: &KernelConfig<'_>) -> Result<KernelInstance, KernelError> {
        Ok(KernelInstance { kernel: Box::new(Null), output_window_samples: 0, output_channels: 0 })
    }

    fn config() -> KernelConfig<'static> {
        KernelConfig {
            sample_rate_hz: 1000,
            window_samples: 4,
            hop_samples: 2,
            channels: 1,
            params: "",
            calibration: None,
        }
    }

    #[test]
    fn registry_resolves_by_name() {
        let mut registry = KernelRegistry::new();
        registry.register("null", null_ctor);

        assert!(registry.contains("null"));
        assert_eq!(registry.names(), vec!["null".to_owned()]);
        assert!(registry.instantiate("null", &config()).is_ok());
    }

    #[test]
    fn unknown_name_is_distinct_error() {
        let registry = KernelRegistry::new();
        assert_eq!(
            registry.instantiate("fft", &config()).err(),
            Some(KernelError::Unknown("fft".to_owned()))
        );
    }

    #[test]
    fn names_are_sorted() {
        let mut registry = KernelRegistry::new();
        registry.register("zeta", null_ctor);
        registry.register("alpha", null_ctor);
        assert_eq!(registry.names(), vec!["alpha".to_owned(), "zeta".to_owned()]);
    }
}
