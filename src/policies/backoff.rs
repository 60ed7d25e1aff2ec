//! # Backoff policy for handshake retries.
//!
//! [`BackoffPolicy`] decides how long the supervisor sleeps between two failed
//! handshake attempts of a subprocess backend. The delay after attempt `n`
//! (0-indexed) is `first × factor^n`, clamped to `max`, then jittered. The base is
//! derived from the attempt number alone, so jitter never compounds.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use mcpvisor::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_millis(100),
//!     max: Duration::from_secs(1),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(backoff.next(0), Duration::from_millis(100));
//! assert_eq!(backoff.next(1), Duration::from_millis(200));
//! assert_eq!(backoff.next(5), Duration::from_secs(1)); // 3.2s capped
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Retry backoff policy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay after the first failed attempt.
    pub first: Duration,
    /// Upper bound for any delay.
    pub max: Duration,
    /// Multiplicative growth per attempt (`2.0` doubles).
    pub factor: f64,
    /// Randomization applied after clamping.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// `first = 500ms`, `factor = 2.0`, `max = 10s`, no jitter.
    fn default() -> Self {
        Self {
            first: Duration::from_millis(500),
            max: Duration::from_secs(10),
            factor: 2.0,
            jitter: JitterPolicy::None,
        }
    }
}

impl BackoffPolicy {
    /// Fixed delay, no growth. Handy in tests.
    pub fn constant(delay: Duration) -> Self {
        Self {
            first: delay,
            max: delay,
            factor: 1.0,
            jitter: JitterPolicy::None,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (0-indexed).
    ///
    /// Overflowing or non-finite intermediate values clamp to [`max`](Self::max).
    pub fn next(&self, attempt: u32) -> Duration {
        let exp = attempt.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);
        let base = if secs.is_finite() && secs >= 0.0 && secs <= self.max.as_secs_f64() {
            Duration::from_secs_f64(secs)
        } else {
            self.max
        };
        self.jitter.apply(base.min(self.max))
    }
}
