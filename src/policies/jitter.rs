//! # Jitter for handshake retry delays.
//!
//! When an operator tool starts a dozen backends at once and they all fail their
//! first handshake (a shared dependency still booting, say), identical backoff
//! schedules make them retry in lockstep. [`JitterPolicy`] spreads them out.
//!
//! - [`JitterPolicy::None`]: exact delay
//! - [`JitterPolicy::Full`]: uniform in `[0, delay]`
//! - [`JitterPolicy::Equal`]: `delay/2` plus uniform in `[0, delay/2]`

use std::time::Duration;

use rand::Rng;

/// Randomization applied to a computed backoff delay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JitterPolicy {
    /// Use the delay as computed.
    #[default]
    None,
    /// Anywhere between zero and the delay.
    Full,
    /// At least half the delay.
    Equal,
}

impl JitterPolicy {
    /// Applies this policy to `delay`.
    pub fn apply(self, delay: Duration) -> Duration {
        let ms = delay.as_millis().min(u128::from(u64::MAX)) as u64;
        if ms == 0 {
            return delay;
        }
        match self {
            JitterPolicy::None => delay,
            JitterPolicy::Full => Duration::from_millis(rand::rng().random_range(0..=ms)),
            JitterPolicy::Equal => {
                let half = ms / 2;
                Duration::from_millis(half + rand::rng().random_range(0..=ms - half))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_is_identity() {
        let d = Duration::from_millis(750);
        assert_eq!(JitterPolicy::None.apply(d), d);
    }

    #[test]
    fn full_stays_within_delay() {
        let d = Duration::from_millis(400);
        for _ in 0..200 {
            assert!(JitterPolicy::Full.apply(d) <= d);
        }
    }

    #[test]
    fn equal_keeps_at_least_half() {
        let d = Duration::from_millis(401);
        for _ in 0..200 {
            let j = JitterPolicy::Equal.apply(d);
            assert!(j >= Duration::from_millis(200) && j <= d, "{j:?}");
        }
    }

    #[test]
    fn zero_delay_is_untouched() {
        assert_eq!(JitterPolicy::Full.apply(Duration::ZERO), Duration::ZERO);
        assert_eq!(JitterPolicy::Equal.apply(Duration::ZERO), Duration::ZERO);
    }
}
