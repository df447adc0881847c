//! Reconnect backoff with full jitter.

use std::time::Duration;

use rand::Rng;

/// Default number of units the jitter window is capped at.
const DEFAULT_CEILING: u32 = 180;

/// Computes how long to wait before a reconnect attempt.
///
/// The wait for attempt `n` is
/// `unit * round(U(0, 1) * min(ceiling, 2^n - 1) + 1)`: an exponentially
/// growing window capped at `ceiling` units, fully jittered, never below one
/// unit. Halves round to even. With the defaults (`unit` = 1s,
/// `ceiling` = 180) every wait falls in `[1s, 181s]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Duration of one backoff unit.
    pub unit: Duration,
    /// Maximum jitter window, in units.
    pub ceiling: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            unit: Duration::from_secs(1),
            ceiling: DEFAULT_CEILING,
        }
    }
}

impl BackoffPolicy {
    /// Create a policy with a custom unit and the default ceiling.
    pub fn with_unit(unit: Duration) -> Self {
        Self {
            unit,
            ..Self::default()
        }
    }

    /// Jitter window for `attempt`, in units: `min(ceiling, 2^attempt - 1)`.
    pub fn ceiling_for(&self, attempt: u32) -> u32 {
        let window = 2u64.saturating_pow(attempt).saturating_sub(1);
        window.min(u64::from(self.ceiling)) as u32
    }

    /// Wait before `attempt`, drawing jitter from the thread-local generator.
    pub fn wait(&self, attempt: u32) -> Duration {
        self.wait_with(attempt, &mut rand::thread_rng())
    }

    /// Wait before `attempt`, drawing jitter from `rng`.
    ///
    /// Deterministic for a seeded generator.
    pub fn wait_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let jitter: f64 = rng.r#gen();
        let units = (jitter * f64::from(self.ceiling_for(attempt)) + 1.0).round_ties_even() as u32;
        self.unit.saturating_mul(units)
    }
}
