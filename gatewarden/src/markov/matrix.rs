// gatewarden/src/markov/matrix.rs
//
// Time-decayed weighted digraph over path templates. Edge weights are
// DecayingCounters; outgoing edges per source are pruned back to max_k once
// they exceed 2*max_k, keeping the heaviest survivors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::decay::DecayingCounter;

const EDGE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecayingTransitionMatrix {
    half_life_secs: f64,
    max_k:          usize,
    /// from → (to → weight)
    edges:          HashMap<String, HashMap<String, DecayingCounter>>,
    total_transitions: u64,
}

impl DecayingTransitionMatrix {
    pub fn new(half_life_secs: f64, max_k: usize) -> Self {
        Self {
            half_life_secs,
            max_k: max_k.max(1),
            edges: HashMap::new(),
            total_transitions: 0,
        }
    }

    /// Register a node with no outgoing edges yet.
    pub fn ensure_node(&mut self, node: &str) {
        self.edges.entry(node.to_string()).or_default();
    }

    pub fn record_transition(&mut self, from: &str, to: &str, now: DateTime<Utc>) {
        let hl = self.half_life_secs;
        let outgoing = self.edges.entry(from.to_string()).or_default();
        outgoing
            .entry(to.to_string())
            .or_insert_with(|| DecayingCounter::new(now))
            .increment_with_decay(1.0, now, hl);
        self.total_transitions += 1;

        if outgoing.len() > 2 * self.max_k {
            Self::prune(outgoing, self.max_k, now, hl);
        }
    }

    /// Keep the max_k heaviest outgoing edges; ties break by destination so
    /// pruning is deterministic.
    fn prune(
        outgoing: &mut HashMap<String, DecayingCounter>,
        max_k: usize,
        now: DateTime<Utc>,
        hl: f64,
    ) {
        let mut ranked: Vec<(String, f64)> = outgoing
            .iter()
            .map(|(to, c)| (to.clone(), c.decayed(now, hl)))
            .collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        let keep: std::collections::HashSet<String> =
            ranked.into_iter().take(max_k).map(|(to, _)| to).collect();
        outgoing.retain(|to, _| keep.contains(to));
    }

    pub fn get_transition_probability(&self, from: &str, to: &str, now: DateTime<Utc>) -> f64 {
        let Some(outgoing) = self.edges.get(from) else { return 0.0 };
        let total: f64 = outgoing
            .values()
            .map(|c| c.decayed(now, self.half_life_secs))
            .sum();
        if total <= 0.0 {
            return 0.0;
        }
        outgoing
            .get(to)
            .map(|c| c.decayed(now, self.half_life_secs) / total)
            .unwrap_or(0.0)
    }

    /// Probability mapping over outgoing edges, summing to 1 (or empty when
    /// the source has no surviving weight).
    pub fn get_distribution(&self, from: &str, now: DateTime<Utc>) -> HashMap<String, f64> {
        let Some(outgoing) = self.edges.get(from) else { return HashMap::new() };
        let decayed: Vec<(&String, f64)> = outgoing
            .iter()
            .map(|(to, c)| (to, c.decayed(now, self.half_life_secs)))
            .collect();
        let total: f64 = decayed.iter().map(|(_, w)| w).sum();
        if total <= 0.0 {
            return HashMap::new();
        }
        decayed
            .into_iter()
            .map(|(to, w)| (to.clone(), w / total))
            .collect()
    }

    /// Aggregate outgoing-weight distribution across every edge, as a
    /// probability map keyed by destination template.
    pub fn aggregate_distribution(&self, now: DateTime<Utc>) -> HashMap<String, f64> {
        let mut weights: HashMap<String, f64> = HashMap::new();
        for outgoing in self.edges.values() {
            for (to, c) in outgoing {
                *weights.entry(to.clone()).or_insert(0.0) += c.decayed(now, self.half_life_secs);
            }
        }
        let total: f64 = weights.values().sum();
        if total <= 0.0 {
            return HashMap::new();
        }
        for w in weights.values_mut() {
            *w /= total;
        }
        weights
    }

    /// Shannon entropy (bits) of the aggregated outgoing-weight distribution.
    pub fn get_path_entropy(&self, now: DateTime<Utc>) -> f64 {
        let dist = self.aggregate_distribution(now);
        super::divergence::shannon_entropy(&dist)
    }

    pub fn has_edge(&self, from: &str, to: &str, now: DateTime<Utc>) -> bool {
        self.edges
            .get(from)
            .and_then(|o| o.get(to))
            .map(|c| c.decayed(now, self.half_life_secs) > EDGE_EPSILON)
            .unwrap_or(false)
    }

    /// Fold another matrix into this one at its decayed weights.
    pub fn merge_from(&mut self, other: &DecayingTransitionMatrix, now: DateTime<Utc>) {
        let hl = self.half_life_secs;
        for (from, outgoing) in &other.edges {
            let self_outgoing = self.edges.entry(from.clone()).or_default();
            for (to, counter) in outgoing {
                let w = counter.decayed(now, other.half_life_secs);
                if w <= EDGE_EPSILON {
                    continue;
                }
                self_outgoing
                    .entry(to.clone())
                    .or_insert_with(|| DecayingCounter::new(now))
                    .increment_with_decay(w, now, hl);
            }
        }
        self.total_transitions += other.total_transitions;
    }

    pub fn total_transitions(&self) -> u64 {
        self.total_transitions
    }

    pub fn node_count(&self) -> usize {
        let mut nodes: std::collections::HashSet<&str> =
            self.edges.keys().map(|s| s.as_str()).collect();
        for outgoing in self.edges.values() {
            nodes.extend(outgoing.keys().map(|s| s.as_str()));
        }
        nodes.len()
    }

    pub fn out_degree(&self, from: &str) -> usize {
        self.edges.get(from).map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn distribution_sums_to_one() {
        let now = Utc::now();
        let mut m = DecayingTransitionMatrix::new(3600.0, 8);
        m.record_transition("/a", "/b", now);
        m.record_transition("/a", "/c", now);
        m.record_transition("/a", "/b", now);
        let dist = m.get_distribution("/a", now);
        let sum: f64 = dist.values().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert!((m.get_transition_probability("/a", "/b", now) - 2.0 / 3.0).abs() < 1e-9);
        // Unknown source → empty distribution, zero probability.
        assert!(m.get_distribution("/zzz", now).is_empty());
        assert_eq!(m.get_transition_probability("/zzz", "/b", now), 0.0);
    }

    #[test]
    fn prunes_to_max_k_keeping_heaviest() {
        let now = Utc::now();
        let mut m = DecayingTransitionMatrix::new(3600.0, 2);
        // Heavy edges first.
        for _ in 0..5 {
            m.record_transition("/a", "/heavy1", now);
            m.record_transition("/a", "/heavy2", now);
        }
        for i in 0..3 {
            m.record_transition("/a", &format!("/light{i}"), now);
        }
        // 5 outgoing > 2*max_k=4 → pruned to 2.
        assert_eq!(m.out_degree("/a"), 2);
        assert!(m.has_edge("/a", "/heavy1", now));
        assert!(m.has_edge("/a", "/heavy2", now));
        assert!(!m.has_edge("/a", "/light0", now));
    }

    #[test]
    fn total_transitions_is_monotonic() {
        let now = Utc::now();
        let mut m = DecayingTransitionMatrix::new(3600.0, 2);
        let mut prev = 0;
        for i in 0..20 {
            m.record_transition("/a", &format!("/t{i}"), now);
            assert!(m.total_transitions() > prev);
            prev = m.total_transitions();
        }
    }

    #[test]
    fn decayed_edges_disappear_from_has_edge() {
        let t0 = Utc::now();
        let mut m = DecayingTransitionMatrix::new(1.0, 8);
        m.record_transition("/a", "/b", t0);
        assert!(m.has_edge("/a", "/b", t0));
        // ~60 half-lives → weight below epsilon.
        assert!(!m.has_edge("/a", "/b", t0 + Duration::seconds(60)));
    }

    #[test]
    fn merge_folds_decayed_weights() {
        let now = Utc::now();
        let mut a = DecayingTransitionMatrix::new(3600.0, 8);
        let mut b = DecayingTransitionMatrix::new(3600.0, 8);
        a.record_transition("/x", "/y", now);
        b.record_transition("/x", "/y", now);
        b.record_transition("/x", "/z", now);
        a.merge_from(&b, now);
        assert_eq!(a.total_transitions(), 3);
        assert!((a.get_transition_probability("/x", "/y", now) - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn entropy_of_uniform_distribution() {
        let now = Utc::now();
        let mut m = DecayingTransitionMatrix::new(3600.0, 8);
        m.record_transition("/a", "/b", now);
        m.record_transition("/a", "/c", now);
        m.record_transition("/a", "/d", now);
        m.record_transition("/a", "/e", now);
        // 4 equally-weighted destinations → 2 bits.
        assert!((m.get_path_entropy(now) - 2.0).abs() < 1e-9);
    }
}
