// gatewarden/src/reputation.rs
//
// Per-country decaying bot-rate baseline. Two counters per country
// ({total, bots}) share one very slow half-life, so the rate reflects
// weeks of traffic rather than the last burst. Rates are withheld until a
// minimum sample size accrues.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::config::ReputationConfig;
use crate::decay::DecayingCounter;

#[derive(Debug)]
struct CountryCounters {
    total: DecayingCounter,
    bots:  DecayingCounter,
}

pub struct CountryReputationTracker {
    config:    ReputationConfig,
    countries: DashMap<String, Arc<Mutex<CountryCounters>>>,
}

impl CountryReputationTracker {
    pub fn new(config: ReputationConfig) -> Self {
        Self { config, countries: DashMap::new() }
    }

    fn half_life_secs(&self) -> f64 {
        self.config.decay_tau_hours * 3600.0
    }

    pub fn record_detection(&self, country: &str, is_bot: bool, now: DateTime<Utc>) {
        let country = country.to_uppercase();
        let entry = self
            .countries
            .entry(country)
            .or_insert_with(|| {
                Arc::new(Mutex::new(CountryCounters {
                    total: DecayingCounter::new(now),
                    bots:  DecayingCounter::new(now),
                }))
            })
            .clone();

        let hl = self.half_life_secs();
        let mut counters = entry.lock();
        counters.total.increment_with_decay(1.0, now, hl);
        if is_bot {
            counters.bots.increment_with_decay(1.0, now, hl);
        } else {
            // Keep both clocks aligned so the ratio decays coherently.
            counters.bots.increment_with_decay(0.0, now, hl);
        }
    }

    /// Decayed bot rate for a country, or 0 until `min_sample_size` total
    /// observations accrue.
    pub fn country_bot_rate(&self, country: &str, now: DateTime<Utc>) -> f64 {
        let country = country.to_uppercase();
        let Some(entry) = self.countries.get(&country).map(|e| e.clone()) else {
            return 0.0;
        };
        let hl = self.half_life_secs();
        let counters = entry.lock();
        let total = counters.total.decayed(now, hl);
        if total < self.config.min_sample_size {
            return 0.0;
        }
        (counters.bots.decayed(now, hl) / total).clamp(0.0, 1.0)
    }

    pub fn tracked_countries(&self) -> usize {
        self.countries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_withheld_below_min_sample() {
        let t = CountryReputationTracker::new(ReputationConfig::default());
        let now = Utc::now();
        for _ in 0..3 {
            t.record_detection("RU", true, now);
        }
        assert_eq!(t.country_bot_rate("RU", now), 0.0);
    }

    #[test]
    fn rate_reflects_bot_share_once_sampled() {
        let t = CountryReputationTracker::new(ReputationConfig::default());
        let now = Utc::now();
        for _ in 0..10 {
            t.record_detection("ru", true, now);
        }
        let rate = t.country_bot_rate("RU", now);
        assert!(rate >= 0.9 && rate <= 1.0);

        for _ in 0..10 {
            t.record_detection("DE", false, now);
        }
        assert_eq!(t.country_bot_rate("de", now), 0.0);
    }

    #[test]
    fn unknown_country_is_zero() {
        let t = CountryReputationTracker::new(ReputationConfig::default());
        assert_eq!(t.country_bot_rate("XX", Utc::now()), 0.0);
    }
}
