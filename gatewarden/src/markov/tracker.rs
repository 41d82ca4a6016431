// gatewarden/src/markov/tracker.rs
//
// MarkovTracker — owns every per-signature chain, the cohort baselines, and
// the global baseline. Requests record transitions inline; human traffic is
// queued and folded into the baselines by the background flush so request
// latency never pays for baseline writes.
//
// Cohort key: "{infra}-{visitor}[:{cluster_id}]" where infra is
// datacenter/residential and visitor is new/returning.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::MarkovConfig;
use crate::events::DriftSignals;
use crate::normalize;

use super::divergence;
use super::matrix::DecayingTransitionMatrix;
use super::recent::RecentTransitionBuffer;

// ── Per-signature entry ───────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct SignatureChain {
    chain:             DecayingTransitionMatrix,
    recent:            RecentTransitionBuffer,
    last_path:         Option<String>,
    transitions_count: u64,
    last_seen:         DateTime<Utc>,
}

impl SignatureChain {
    fn new(config: &MarkovConfig, now: DateTime<Utc>) -> Self {
        Self {
            chain: DecayingTransitionMatrix::new(config.half_life_secs, config.max_edges_per_node),
            recent: RecentTransitionBuffer::new(config.recent_buffer_capacity),
            last_path: None,
            transitions_count: 0,
            last_seen: now,
        }
    }
}

// ── Pending cohort updates ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CohortUpdate {
    cohort_key: String,
    from:       String,
    to:         String,
    at:         DateTime<Utc>,
}

// ── Tracker ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct MarkovStats {
    pub active_signatures: usize,
    pub cohort_count:      usize,
    pub pending_updates:   usize,
    pub dropped_updates:   u64,
    pub flushed_updates:   u64,
}

/// What a recorded transition produced for the current request.
#[derive(Debug, Clone, Copy)]
pub struct TransitionOutcome {
    pub drift:             DriftSignals,
    pub transitions_count: u64,
}

pub struct MarkovTracker {
    config:           MarkovConfig,
    per_signature:    DashMap<String, Arc<RwLock<SignatureChain>>>,
    cohort_baselines: DashMap<String, Arc<RwLock<DecayingTransitionMatrix>>>,
    global_baseline:  Arc<RwLock<DecayingTransitionMatrix>>,
    pending:          Mutex<VecDeque<CohortUpdate>>,
    dropped_updates:  AtomicU64,
    flushed_updates:  AtomicU64,
}

impl MarkovTracker {
    pub fn new(config: MarkovConfig) -> Self {
        let global = DecayingTransitionMatrix::new(config.half_life_secs, config.max_edges_per_node);
        Self {
            config,
            per_signature:    DashMap::new(),
            cohort_baselines: DashMap::new(),
            global_baseline:  Arc::new(RwLock::new(global)),
            pending:          Mutex::new(VecDeque::new()),
            dropped_updates:  AtomicU64::new(0),
            flushed_updates:  AtomicU64::new(0),
        }
    }

    pub fn cohort_key(is_datacenter: bool, is_returning: bool, cluster_id: Option<u64>) -> String {
        let infra   = if is_datacenter { "datacenter" } else { "residential" };
        let visitor = if is_returning { "returning" } else { "new" };
        match cluster_id {
            Some(cid) => format!("{infra}-{visitor}:{cid}"),
            None      => format!("{infra}-{visitor}"),
        }
    }

    /// Record one request for a signature. Normalizes the path, advances the
    /// per-signature chain, queues a cohort baseline update for human
    /// traffic, and returns drift signals once enough transitions exist.
    #[allow(clippy::too_many_arguments)]
    pub fn record_transition(
        &self,
        signature_id: &str,
        raw_path: &str,
        now: DateTime<Utc>,
        is_bot: bool,
        is_datacenter: bool,
        is_returning: bool,
        cluster_id: Option<u64>,
    ) -> TransitionOutcome {
        let to = normalize::normalize(raw_path);

        let entry = self
            .per_signature
            .entry(signature_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(SignatureChain::new(&self.config, now))))
            .clone();

        let cohort_key = Self::cohort_key(is_datacenter, is_returning, cluster_id);

        let (transitions_count, moved_from) = {
            let mut chain = entry.write();
            chain.last_seen = now;
            chain.chain.ensure_node(&to);
            let moved_from = match chain.last_path.take() {
                Some(last) if last != to => {
                    chain.chain.record_transition(&last, &to, now);
                    chain.recent.add(&last, &to);
                    chain.transitions_count += 1;
                    Some(last)
                }
                other => other,
            };
            chain.last_path = Some(to.clone());
            (chain.transitions_count, moved_from)
        };

        // Human traffic feeds the baselines; bot traffic must not poison them.
        if !is_bot {
            if let Some(from) = moved_from.filter(|f| *f != to) {
                self.enqueue_cohort_update(CohortUpdate {
                    cohort_key,
                    from,
                    to: to.clone(),
                    at: now,
                });
            }
        }

        let drift = if transitions_count >= self.config.min_transitions_for_drift as u64 {
            self.compute_drift(&entry, is_datacenter, is_returning, cluster_id, now)
        } else {
            DriftSignals::EMPTY
        };

        TransitionOutcome { drift, transitions_count }
    }

    fn enqueue_cohort_update(&self, update: CohortUpdate) {
        let mut pending = self.pending.lock();
        if pending.len() >= self.config.cohort_queue_cap {
            pending.pop_front();
            self.dropped_updates.fetch_add(1, Ordering::Relaxed);
        }
        pending.push_back(update);
    }

    /// Drift signals for a known signature; `Empty` for unknown or
    /// under-observed signatures. Never fails.
    pub fn get_drift_signals(
        &self,
        signature_id: &str,
        is_datacenter: bool,
        is_returning: bool,
        cluster_id: Option<u64>,
        now: DateTime<Utc>,
    ) -> DriftSignals {
        let Some(entry) = self.per_signature.get(signature_id).map(|e| e.clone()) else {
            return DriftSignals::EMPTY;
        };
        if entry.read().transitions_count < self.config.min_transitions_for_drift as u64 {
            return DriftSignals::EMPTY;
        }
        self.compute_drift(&entry, is_datacenter, is_returning, cluster_id, now)
    }

    fn compute_drift(
        &self,
        entry: &Arc<RwLock<SignatureChain>>,
        is_datacenter: bool,
        is_returning: bool,
        cluster_id: Option<u64>,
        now: DateTime<Utc>,
    ) -> DriftSignals {
        // Copy-under-lock: distributions and the recent sequence are cloned
        // out so a concurrent writer never exposes a half-updated view.
        let (self_dist, self_entropy, recent) = {
            let chain = entry.read();
            (
                chain.chain.aggregate_distribution(now),
                chain.chain.get_path_entropy(now),
                chain.recent.get_recent(),
            )
        };

        let (global_dist, global_entropy, novelty) = {
            let global = self.global_baseline.read();
            (
                global.aggregate_distribution(now),
                global.get_path_entropy(now),
                divergence::transition_novelty(&recent, &global, now),
            )
        };

        let cohort_key = Self::cohort_key(is_datacenter, is_returning, cluster_id);
        let (human_drift, sequence_surprise) = match self.cohort_baselines.get(&cohort_key) {
            Some(baseline) => {
                let baseline = baseline.read();
                (
                    divergence::jensen_shannon_divergence(
                        &self_dist,
                        &baseline.aggregate_distribution(now),
                    ),
                    divergence::average_transition_surprise(&recent, &baseline, now),
                )
            }
            // No cohort history yet: everything the signature does is novel
            // relative to an empty baseline.
            None => (
                if self_dist.is_empty() { 0.0 } else { 1.0 },
                divergence::average_transition_surprise(
                    &recent,
                    &DecayingTransitionMatrix::new(
                        self.config.half_life_secs,
                        self.config.max_edges_per_node,
                    ),
                    now,
                ),
            ),
        };

        DriftSignals {
            self_drift: divergence::jensen_shannon_divergence(&self_dist, &global_dist),
            human_drift,
            transition_novelty: novelty,
            entropy_delta: self_entropy - global_entropy,
            loop_score: divergence::loop_score(&recent),
            sequence_surprise,
        }
    }

    /// Drain the pending queue into the cohort and global baselines.
    /// Items are applied exactly once, in FIFO order; a second flush with an
    /// empty queue is a no-op.
    pub fn flush_cohort_updates(&self) -> usize {
        let drained: VecDeque<CohortUpdate> = {
            let mut pending = self.pending.lock();
            std::mem::take(&mut *pending)
        };
        if drained.is_empty() {
            return 0;
        }

        let n = drained.len();
        for update in drained {
            let baseline = self
                .cohort_baselines
                .entry(update.cohort_key.clone())
                .or_insert_with(|| {
                    Arc::new(RwLock::new(DecayingTransitionMatrix::new(
                        self.config.half_life_secs,
                        self.config.max_edges_per_node,
                    )))
                })
                .clone();
            baseline
                .write()
                .record_transition(&update.from, &update.to, update.at);
            self.global_baseline
                .write()
                .record_transition(&update.from, &update.to, update.at);
        }
        self.flushed_updates.fetch_add(n as u64, Ordering::Relaxed);
        tracing::debug!(flushed = n, "cohort baselines updated");
        n
    }

    pub fn has_significant_drift(&self, signals: &DriftSignals) -> bool {
        let t = &self.config.drift_thresholds;
        signals.self_drift >= t.self_drift
            || signals.human_drift >= t.human_drift
            || signals.loop_score >= t.loop_score
            || signals.sequence_surprise >= t.sequence_surprise
            || signals.transition_novelty >= t.transition_novelty
            || signals.entropy_delta.abs() >= t.entropy_delta
    }

    pub fn stats(&self) -> MarkovStats {
        MarkovStats {
            active_signatures: self.per_signature.len(),
            cohort_count:      self.cohort_baselines.len(),
            pending_updates:   self.pending.lock().len(),
            dropped_updates:   self.dropped_updates.load(Ordering::Relaxed),
            flushed_updates:   self.flushed_updates.load(Ordering::Relaxed),
        }
    }

    /// Per-signature chain shape, for tests and the stats loop.
    pub fn signature_chain_info(&self, signature_id: &str) -> Option<(usize, u64)> {
        self.per_signature.get(signature_id).map(|entry| {
            let chain = entry.read();
            (chain.chain.node_count(), chain.transitions_count)
        })
    }

    /// Drop signatures idle since `cutoff`. Baselines are kept — they decay
    /// on their own schedule.
    pub fn purge_idle(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.per_signature.len();
        self.per_signature.retain(|_, entry| entry.read().last_seen >= cutoff);
        before - self.per_signature.len()
    }

    // ── Snapshot / restore ────────────────────────────────────────────────────

    pub fn snapshot(&self) -> MarkovSnapshot {
        let cohorts = self
            .cohort_baselines
            .iter()
            .map(|e| (e.key().clone(), e.value().read().clone()))
            .collect();
        MarkovSnapshot {
            taken_at: Utc::now(),
            global:   self.global_baseline.read().clone(),
            cohorts,
        }
    }

    pub fn restore(&self, snapshot: MarkovSnapshot) {
        *self.global_baseline.write() = snapshot.global;
        self.cohort_baselines.clear();
        for (key, matrix) in snapshot.cohorts {
            self.cohort_baselines
                .insert(key, Arc::new(RwLock::new(matrix)));
        }
    }
}

/// Self-consistent baseline snapshot; opaque to the store that persists it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkovSnapshot {
    pub taken_at: DateTime<Utc>,
    global:       DecayingTransitionMatrix,
    cohorts:      Vec<(String, DecayingTransitionMatrix)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(min_transitions: usize) -> MarkovTracker {
        let mut config = MarkovConfig::default();
        config.min_transitions_for_drift = min_transitions;
        MarkovTracker::new(config)
    }

    #[test]
    fn unknown_signature_yields_empty_drift() {
        let t = tracker(3);
        let drift = t.get_drift_signals("nobody", false, false, None, Utc::now());
        assert!(drift.is_empty());
    }

    #[test]
    fn repeated_path_records_no_transition() {
        let t = tracker(3);
        let now = Utc::now();
        for _ in 0..5 {
            t.record_transition("sig", "/same", now, false, false, false, None);
        }
        let (_, transitions) = t.signature_chain_info("sig").unwrap();
        assert_eq!(transitions, 0);
    }

    #[test]
    fn bot_traffic_never_reaches_baselines() {
        let t = tracker(3);
        let now = Utc::now();
        t.record_transition("bot", "/a", now, true, true, false, None);
        t.record_transition("bot", "/b", now, true, true, false, None);
        assert_eq!(t.flush_cohort_updates(), 0);
    }

    #[test]
    fn flush_applies_exactly_once_in_fifo_order() {
        let t = tracker(3);
        let now = Utc::now();
        t.record_transition("human", "/a", now, false, false, false, None);
        t.record_transition("human", "/b", now, false, false, false, None);
        t.record_transition("human", "/c", now, false, false, false, None);

        assert_eq!(t.flush_cohort_updates(), 2);
        assert_eq!(t.stats().pending_updates, 0);
        // Re-flushing drained items is a no-op.
        assert_eq!(t.flush_cohort_updates(), 0);
        assert_eq!(t.stats().flushed_updates, 2);
    }

    #[test]
    fn drift_appears_after_min_transitions() {
        let t = tracker(3);
        let now = Utc::now();
        let pages = ["/a", "/b", "/a", "/b", "/a", "/b", "/a", "/b"];
        let mut last = DriftSignals::EMPTY;
        for p in pages {
            last = t
                .record_transition("looper", p, now, true, false, false, None)
                .drift;
        }
        assert!(!last.is_empty());
        assert!(last.loop_score > 0.3);
    }

    #[test]
    fn queue_backpressure_drops_oldest() {
        let mut config = MarkovConfig::default();
        config.cohort_queue_cap = 4;
        config.min_transitions_for_drift = 100;
        let t = MarkovTracker::new(config);
        let now = Utc::now();
        for i in 0..10 {
            t.record_transition("h", &format!("/p{i}"), now, false, false, false, None);
        }
        let stats = t.stats();
        assert_eq!(stats.pending_updates, 4);
        assert_eq!(stats.dropped_updates, 5); // 9 transitions, cap 4
    }

    #[test]
    fn snapshot_roundtrip_preserves_baselines() {
        let t = tracker(3);
        let now = Utc::now();
        for p in ["/a", "/b", "/c"] {
            t.record_transition("h", p, now, false, false, false, None);
        }
        t.flush_cohort_updates();
        let snap = t.snapshot();

        let t2 = tracker(3);
        t2.restore(snap);
        assert_eq!(t2.stats().cohort_count, 1);
    }
}
