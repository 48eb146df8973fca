//! Timeouts, deadlines, and the monotonic clock.

use std::time::{Duration, Instant};

use nix::time::ClockId;

/// A per-call receive timeout in milliseconds.
///
/// Zero polls without blocking; [`Timeout::FOREVER`] means "no timeout, but
/// still cancellable by peer close".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout(u32);

impl Timeout {
    /// Check readiness without blocking.
    pub const POLL: Self = Self(0);

    /// Block until data, peer close, or error.
    pub const FOREVER: Self = Self(u32::MAX);

    /// A timeout of `ms` milliseconds. `u32::MAX` is [`Timeout::FOREVER`].
    #[must_use]
    pub fn from_ms(ms: u32) -> Self {
        Self(ms)
    }

    /// The raw millisecond value (`u32::MAX` for forever).
    #[must_use]
    pub fn millis(self) -> u32 {
        self.0
    }

    /// Whether this timeout never expires.
    #[must_use]
    pub fn is_forever(self) -> bool {
        self.0 == u32::MAX
    }
}

/// A wall-clock budget threaded through layered receive calls.
///
/// Protocol operations consist of several nested reads (magic hunt, header,
/// payload; or many chunk frames). A `Deadline` is armed once from the
/// caller's [`Timeout`] and each nested read asks for [`Deadline::remaining`],
/// so the layered calls never exceed the caller's budget.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires: Option<Instant>,
}

impl Deadline {
    /// Arm a deadline `timeout` from now. [`Timeout::FOREVER`] never expires.
    #[must_use]
    pub fn after(timeout: Timeout) -> Self {
        let expires = if timeout.is_forever() {
            None
        } else {
            Some(Instant::now() + Duration::from_millis(u64::from(timeout.millis())))
        };
        Self { expires }
    }

    /// Whether the budget is exhausted.
    #[must_use]
    pub fn expired(&self) -> bool {
        self.expires.is_some_and(|e| Instant::now() >= e)
    }

    /// Budget left for the next blocking call.
    ///
    /// Rounds up to a whole millisecond so a sub-millisecond remainder still
    /// blocks instead of spinning; an expired deadline yields
    /// [`Timeout::POLL`].
    #[must_use]
    pub fn remaining(&self) -> Timeout {
        match self.expires {
            None => Timeout::FOREVER,
            Some(e) => {
                let left = e.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    Timeout::POLL
                } else {
                    let ms = left.as_millis().max(1).min(u128::from(u32::MAX - 1)) as u32;
                    Timeout::from_ms(ms)
                }
            }
        }
    }
}

/// This process's monotonic clock in nanoseconds.
///
/// `CLOCK_MONOTONIC`, strictly nondecreasing, unrelated to wall time and to
/// any other machine's clock.
#[must_use]
pub fn monotonic_ns() -> u64 {
    // clock_gettime cannot fail for CLOCK_MONOTONIC on POSIX.
    nix::time::clock_gettime(ClockId::CLOCK_MONOTONIC)
        .map(|ts| ts.tv_sec() as u64 * 1_000_000_000 + ts.tv_nsec() as u64)
        .unwrap_or(0)
}
