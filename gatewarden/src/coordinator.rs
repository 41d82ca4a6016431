// gatewarden/src/coordinator.rs
//
// SignatureCoordinator — the per-signature request store.
// DashMap of Arc<RwLock<behavior>>: sharded access across tokio tasks,
// per-signature lock for append/eviction, reads take a copy.
//
// Records are a bounded FIFO (default 200); aggregates derive from the
// surviving window only. Idle signatures are purged by the TTL sweeper.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::config::CoordinatorConfig;
use crate::events::{AggregateBehavior, RequestRecord};
use crate::normalize;

#[derive(Debug)]
struct SignatureBehavior {
    records:    std::collections::VecDeque<RequestRecord>,
    first_seen: DateTime<Utc>,
    last_seen:  DateTime<Utc>,
}

impl SignatureBehavior {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            records: std::collections::VecDeque::new(),
            first_seen: now,
            last_seen: now,
        }
    }

    fn intervals(&self) -> Vec<f64> {
        if self.records.len() < 2 {
            return vec![];
        }
        self.records
            .iter()
            .zip(self.records.iter().skip(1))
            .map(|(a, b)| (b.timestamp - a.timestamp).num_milliseconds() as f64 / 1000.0)
            .filter(|&d| d >= 0.0)
            .collect()
    }
}

pub struct SignatureCoordinator {
    config:     CoordinatorConfig,
    signatures: DashMap<String, Arc<RwLock<SignatureBehavior>>>,
    pub total_requests: AtomicU64,
}

impl SignatureCoordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            config,
            signatures: DashMap::new(),
            total_requests: AtomicU64::new(0),
        }
    }

    /// Append one completed record; evicts the oldest when the window is
    /// full. Record order within a signature matches arrival order.
    pub fn record_request(&self, record: RequestRecord) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let entry = self
            .signatures
            .entry(record.signature_id.clone())
            .or_insert_with(|| Arc::new(RwLock::new(SignatureBehavior::new(record.timestamp))))
            .clone();

        let mut behavior = entry.write();
        behavior.last_seen = behavior.last_seen.max(record.timestamp);
        behavior.records.push_back(record);
        while behavior.records.len() > self.config.max_records_per_signature {
            behavior.records.pop_front();
        }
    }

    /// Aggregate view of a signature, or None if it was never seen or has
    /// been purged.
    pub fn signature_behavior(&self, signature_id: &str) -> Option<AggregateBehavior> {
        let entry = self.signatures.get(signature_id)?.clone();
        let behavior = entry.read();
        if behavior.records.is_empty() {
            return None;
        }

        let records = &behavior.records;
        let n = records.len();

        let intervals = behavior.intervals();
        let average_interval = if intervals.is_empty() {
            0.0
        } else {
            intervals.iter().sum::<f64>() / intervals.len() as f64
        };

        // Sample stddev / mean; 0 until two records exist.
        let timing_coefficient = if intervals.len() >= 2 && average_interval > 0.0 {
            let var = intervals
                .iter()
                .map(|x| (x - average_interval).powi(2))
                .sum::<f64>()
                / (intervals.len() - 1) as f64;
            var.sqrt() / average_interval
        } else {
            0.0
        };

        let mut path_counts: std::collections::HashMap<&str, usize> =
            std::collections::HashMap::new();
        for r in records {
            *path_counts.entry(r.normalized_path.as_str()).or_insert(0) += 1;
        }
        let distinct_paths = path_counts.len();
        let path_entropy: f64 = path_counts
            .values()
            .map(|&c| {
                let p = c as f64 / n as f64;
                -p * p.log2()
            })
            .sum();

        let average_bot_probability =
            records.iter().map(|r| r.bot_probability).sum::<f64>() / n as f64;

        // Aberration: scripted timing, narrow path focus, and prior bot
        // evidence, averaged.
        let timing_part = timing_coefficient.min(1.0);
        let entropy_part = if distinct_paths > 1 {
            (1.0 - path_entropy / (distinct_paths as f64).log2()).clamp(0.0, 1.0)
        } else {
            1.0
        };
        let aberration_score = (timing_part + entropy_part + average_bot_probability) / 3.0;

        let last = records.back().map(|r| (r.country_code.clone(), r.asn, r.is_datacenter));
        let (country_code, asn, is_datacenter) = last.unwrap_or((None, None, false));

        Some(AggregateBehavior {
            signature_id: signature_id.to_string(),
            request_count: n,
            first_seen: behavior.first_seen,
            last_seen: behavior.last_seen,
            average_interval,
            timing_coefficient,
            path_entropy,
            distinct_paths,
            average_bot_probability,
            aberration_score,
            is_aberrant: aberration_score > self.config.aberration_threshold,
            country_code,
            asn,
            is_datacenter,
            escalated_count: records.iter().filter(|r| r.was_escalated).count(),
        })
    }

    /// Inter-arrival intervals for a signature's surviving window, oldest
    /// first. Used by the spectral cache.
    pub fn intervals(&self, signature_id: &str) -> Vec<f64> {
        self.signatures
            .get(signature_id)
            .map(|e| e.read().intervals())
            .unwrap_or_default()
    }

    /// Recent normalized paths, oldest first.
    pub fn recent_paths(&self, signature_id: &str) -> Vec<String> {
        self.signatures
            .get(signature_id)
            .map(|e| {
                e.read()
                    .records
                    .iter()
                    .map(|r| r.normalized_path.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// How many records hit auth-bucket routes.
    pub fn auth_route_count(&self, signature_id: &str) -> usize {
        self.signatures
            .get(signature_id)
            .map(|e| {
                e.read()
                    .records
                    .iter()
                    .filter(|r| normalize::classify(&r.normalized_path) == normalize::RouteBucket::Auth)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Distinct countries observed for a signature, in first-seen order.
    pub fn countries_seen(&self, signature_id: &str) -> Vec<String> {
        let Some(entry) = self.signatures.get(signature_id) else { return vec![] };
        let behavior = entry.read();
        let mut seen = Vec::new();
        for r in &behavior.records {
            if let Some(cc) = &r.country_code {
                if !seen.contains(cc) {
                    seen.push(cc.clone());
                }
            }
        }
        seen
    }

    pub fn request_count(&self, signature_id: &str) -> usize {
        self.signatures
            .get(signature_id)
            .map(|e| e.read().records.len())
            .unwrap_or(0)
    }

    pub fn is_returning(&self, signature_id: &str) -> bool {
        self.request_count(signature_id) > 0
    }

    pub fn active_signatures(&self) -> usize {
        self.signatures.len()
    }

    pub fn signature_ids(&self) -> Vec<String> {
        self.signatures.iter().map(|e| e.key().clone()).collect()
    }

    /// Purge signatures idle past the TTL. Returns how many were dropped.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::seconds(self.config.signature_ttl_secs);
        let before = self.signatures.len();
        self.signatures.retain(|_, entry| entry.read().last_seen >= cutoff);
        let purged = before - self.signatures.len();
        if purged > 0 {
            debug!(purged, "signature TTL sweep");
        }
        purged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};

    fn record(sig: &str, path: &str, at: DateTime<Utc>, bot_prob: f64) -> RequestRecord {
        RequestRecord {
            request_id:      format!("r-{}", at.timestamp_millis()),
            signature_id:    sig.to_string(),
            timestamp:       at,
            raw_path:        path.to_string(),
            normalized_path: normalize::normalize(path),
            method:          "GET".into(),
            remote_ip:       "198.51.100.9".parse().unwrap(),
            country_code:    Some("DE".into()),
            asn:             Some(64500),
            is_datacenter:   false,
            user_agent:      "test".into(),
            bot_probability: bot_prob,
            detectors_ran:   HashSet::new(),
            signals:         HashMap::new(),
            was_escalated:   false,
        }
    }

    #[test]
    fn fifo_eviction_caps_window() {
        let mut config = CoordinatorConfig::default();
        config.max_records_per_signature = 5;
        let c = SignatureCoordinator::new(config);
        let t0 = Utc::now();
        for i in 0..9 {
            c.record_request(record("s", &format!("/p{i}"), t0 + Duration::seconds(i), 0.1));
        }
        let b = c.signature_behavior("s").unwrap();
        assert_eq!(b.request_count, 5);
        // Aggregates derive from survivors only.
        assert_eq!(c.recent_paths("s").first().unwrap(), "/p4");
    }

    #[test]
    fn timing_coefficient_zero_under_two_records() {
        let c = SignatureCoordinator::new(CoordinatorConfig::default());
        c.record_request(record("s", "/a", Utc::now(), 0.0));
        let b = c.signature_behavior("s").unwrap();
        assert_eq!(b.timing_coefficient, 0.0);
        assert_eq!(b.average_interval, 0.0);
    }

    #[test]
    fn metronome_traffic_is_aberrant_when_bot_prob_high() {
        let mut config = CoordinatorConfig::default();
        config.aberration_threshold = 0.6;
        let c = SignatureCoordinator::new(config);
        let t0 = Utc::now();
        for i in 0..20 {
            c.record_request(record("s", "/scrape", t0 + Duration::seconds(i * 2), 0.95));
        }
        let b = c.signature_behavior("s").unwrap();
        // Perfect cadence (CV 0), one path, high bot prob.
        assert!(b.timing_coefficient < 0.01);
        assert!(b.aberration_score > 0.6);
        assert!(b.is_aberrant);
    }

    #[test]
    fn first_seen_never_exceeds_last_seen() {
        let c = SignatureCoordinator::new(CoordinatorConfig::default());
        let t0 = Utc::now();
        for i in 0..5 {
            c.record_request(record("s", "/x", t0 + Duration::seconds(i), 0.2));
        }
        let b = c.signature_behavior("s").unwrap();
        assert!(b.first_seen <= b.last_seen);
    }

    #[test]
    fn ttl_sweep_purges_idle_signatures() {
        let mut config = CoordinatorConfig::default();
        config.signature_ttl_secs = 60;
        let c = SignatureCoordinator::new(config);
        let t0 = Utc::now();
        c.record_request(record("old", "/a", t0, 0.1));
        c.record_request(record("fresh", "/a", t0 + Duration::seconds(300), 0.1));

        assert_eq!(c.sweep(t0 + Duration::seconds(301)), 1);
        assert!(c.signature_behavior("old").is_none());
        assert!(c.signature_behavior("fresh").is_some());
    }
}
