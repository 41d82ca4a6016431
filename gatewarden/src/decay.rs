// gatewarden/src/decay.rs
//
// Exponential half-life decay for scalar counters. All decay math runs on
// the injected wall clock so replayed traffic decays identically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DecayingCounter {
    pub value:       f64,
    pub last_update: DateTime<Utc>,
}

impl DecayingCounter {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { value: 0.0, last_update: now }
    }

    pub fn with_value(value: f64, now: DateTime<Utc>) -> Self {
        Self { value, last_update: now }
    }

    /// Current value after decaying to `now` with the given half-life in
    /// seconds. Non-positive half-life or negative elapsed time
    /// short-circuits to the stored value.
    pub fn decayed(&self, now: DateTime<Utc>, half_life_secs: f64) -> f64 {
        if half_life_secs <= 0.0 {
            return self.value;
        }
        let elapsed = (now - self.last_update).num_milliseconds() as f64 / 1000.0;
        if elapsed < 0.0 {
            return self.value;
        }
        self.value * 0.5_f64.powf(elapsed / half_life_secs)
    }

    /// Decay to `now`, then add `x`.
    pub fn increment_with_decay(&mut self, x: f64, now: DateTime<Utc>, half_life_secs: f64) {
        self.value = self.decayed(now, half_life_secs) + x;
        self.last_update = now;
    }

    /// Decay both sides to `now`, then fold `other` into self.
    pub fn merge_from(&mut self, other: &DecayingCounter, now: DateTime<Utc>, half_life_secs: f64) {
        let other_decayed = other.decayed(now, half_life_secs);
        self.increment_with_decay(other_decayed, now, half_life_secs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn one_half_life_halves() {
        let t0 = Utc::now();
        let c = DecayingCounter::with_value(8.0, t0);
        let v = c.decayed(t0 + Duration::seconds(100), 100.0);
        assert!((v - 4.0).abs() < 1e-6);
    }

    #[test]
    fn degenerate_inputs_short_circuit() {
        let t0 = Utc::now();
        let c = DecayingCounter::with_value(3.0, t0);
        assert_eq!(c.decayed(t0 + Duration::seconds(50), 0.0), 3.0);
        assert_eq!(c.decayed(t0 + Duration::seconds(50), -1.0), 3.0);
        assert_eq!(c.decayed(t0 - Duration::seconds(50), 100.0), 3.0);
    }

    #[test]
    fn increment_decays_then_adds() {
        let t0 = Utc::now();
        let mut c = DecayingCounter::with_value(4.0, t0);
        let t1 = t0 + Duration::seconds(100);
        c.increment_with_decay(1.0, t1, 100.0);
        assert!((c.value - 3.0).abs() < 1e-6);
        assert_eq!(c.last_update, t1);
    }

    #[test]
    fn merge_decays_both_sides() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(100);
        let mut a = DecayingCounter::with_value(4.0, t0);
        let b = DecayingCounter::with_value(2.0, t0);
        a.merge_from(&b, t1, 100.0);
        // 4 → 2, plus 2 → 1.
        assert!((a.value - 3.0).abs() < 1e-6);
    }
}
