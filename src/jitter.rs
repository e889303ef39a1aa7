//! Jittering of renewal instants to avoid stampedes
//!
//! When many links (or many process instances) hold tokens for the same
//! audience, their renewal timers would otherwise all fire at the same
//! instant. Pulling each renewal earlier by a random amount spreads the
//! load on the credential source.

use aliri_clock::UnixTime;

/// A strategy for perturbing a scheduled renewal instant
pub trait JitterSource {
    /// Jitters the given instant
    fn jitter(&mut self, time: UnixTime) -> UnixTime;
}

/// Leaves renewal instants untouched
#[derive(Clone, Copy, Debug, Default)]
pub struct NullJitter;

impl JitterSource for NullJitter {
    #[inline]
    fn jitter(&mut self, time: UnixTime) -> UnixTime {
        time
    }
}

#[cfg(feature = "rand")]
mod random {
    use aliri_clock::{DurationSecs, UnixTime};
    use rand::{Rng, SeedableRng};

    /// Pulls renewal instants earlier by a uniformly random amount
    ///
    /// Jittered instants fall in the interval `(time - max_jitter, time]`.
    #[derive(Debug)]
    pub struct RandomEarlyJitter<R = rand::rngs::StdRng> {
        max_jitter: DurationSecs,
        rng: R,
    }

    impl RandomEarlyJitter {
        /// Constructs a jitter source that moves instants up to `max_jitter`
        /// earlier
        pub fn new(max_jitter: DurationSecs) -> Self {
            Self {
                max_jitter,
                rng: rand::rngs::StdRng::from_entropy(),
            }
        }
    }

    impl<R: Rng> super::JitterSource for RandomEarlyJitter<R> {
        fn jitter(&mut self, time: UnixTime) -> UnixTime {
            if self.max_jitter.0 == 0 {
                return time;
            }
            let early = self.rng.gen_range(0..self.max_jitter.0);
            time - DurationSecs(early)
        }
    }
}

#[cfg(feature = "rand")]
pub use random::RandomEarlyJitter;

#[cfg(test)]
mod tests {
    use super::*;
    use aliri_clock::DurationSecs;

    #[test]
    fn null_jitter_is_identity() {
        let mut jitter = NullJitter;
        assert_eq!(jitter.jitter(UnixTime(12_345)), UnixTime(12_345));
    }

    #[cfg(feature = "rand")]
    #[test]
    fn random_jitter_stays_within_bounds() {
        let mut jitter = RandomEarlyJitter::new(DurationSecs(60));
        let base = UnixTime(1_000_000);
        for _ in 0..256 {
            let jittered = jitter.jitter(base);
            assert!(jittered <= base);
            assert!(jittered > base - DurationSecs(60));
        }
    }

    #[cfg(feature = "rand")]
    #[test]
    fn zero_jitter_window_is_identity() {
        let mut jitter = RandomEarlyJitter::new(DurationSecs(0));
        assert_eq!(jitter.jitter(UnixTime(777)), UnixTime(777));
    }
}
