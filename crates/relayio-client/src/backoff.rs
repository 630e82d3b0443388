use std::time::Duration;

use rand::Rng;

/// Exponential backoff with jitter, driving the reconnection schedule.
#[derive(Debug)]
pub(crate) struct Backoff {
    base: Duration,
    max: Duration,
    /// Jitter factor in `[0, 1]`: each delay is scaled by a random value in
    /// `[1 - factor, 1 + factor]`.
    randomization_factor: f64,
    attempts: u32,
}

impl Backoff {
    pub(crate) fn new(base: Duration, max: Duration, randomization_factor: f64) -> Self {
        Self {
            base,
            max,
            randomization_factor: randomization_factor.clamp(0.0, 1.0),
            attempts: 0,
        }
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts
    }

    pub(crate) fn reset(&mut self) {
        self.attempts = 0;
    }

    /// The next delay: `base * 2^attempts`, capped at `max`, jittered.
    pub(crate) fn duration(&mut self) -> Duration {
        let exp = self.base.as_millis() as f64 * 2f64.powi(self.attempts.min(16) as i32);
        self.attempts = self.attempts.saturating_add(1);

        let capped = exp.min(self.max.as_millis() as f64);
        let jitter = if self.randomization_factor > 0.0 {
            rand::thread_rng().gen_range(
                (1.0 - self.randomization_factor)..=(1.0 + self.randomization_factor),
            )
        } else {
            1.0
        };
        Duration::from_millis((capped * jitter).min(self.max.as_millis() as f64) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_exponentially_and_caps() {
        let mut backoff = Backoff::new(
            Duration::from_millis(100),
            Duration::from_millis(1000),
            0.0,
        );
        assert_eq!(backoff.duration(), Duration::from_millis(100));
        assert_eq!(backoff.duration(), Duration::from_millis(200));
        assert_eq!(backoff.duration(), Duration::from_millis(400));
        assert_eq!(backoff.duration(), Duration::from_millis(800));
        assert_eq!(backoff.duration(), Duration::from_millis(1000));
        assert_eq!(backoff.duration(), Duration::from_millis(1000));
        assert_eq!(backoff.attempts(), 6);

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.duration(), Duration::from_millis(100));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let mut backoff = Backoff::new(
            Duration::from_millis(100),
            Duration::from_millis(10_000),
            0.5,
        );
        for _ in 0..20 {
            backoff.reset();
            let d = backoff.duration().as_millis();
            assert!((50..=150).contains(&d), "delay out of bounds: {d}");
        }
    }
}
