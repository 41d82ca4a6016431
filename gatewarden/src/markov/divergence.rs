// gatewarden/src/markov/divergence.rs
//
// Pure divergence metrics over transition distributions and sequences.
// All entropy math is in bits (log base 2).

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::matrix::DecayingTransitionMatrix;

/// Surprise cap for transitions the baseline has never seen (P = 0).
const SURPRISE_CAP_BITS: f64 = 10.0;

/// Jensen-Shannon divergence between two probability maps, normalized to
/// [0,1]. Symmetric. Two empty distributions diverge by 0; one empty side
/// diverges maximally.
pub fn jensen_shannon_divergence(p: &HashMap<String, f64>, q: &HashMap<String, f64>) -> f64 {
    if p.is_empty() && q.is_empty() {
        return 0.0;
    }
    if p.is_empty() || q.is_empty() {
        return 1.0;
    }

    let mut keys: Vec<&String> = p.keys().chain(q.keys()).collect();
    keys.sort();
    keys.dedup();

    let mut kl_pm = 0.0;
    let mut kl_qm = 0.0;
    for k in keys {
        let pi = p.get(k).copied().unwrap_or(0.0);
        let qi = q.get(k).copied().unwrap_or(0.0);
        let mi = 0.5 * (pi + qi);
        if pi > 0.0 && mi > 0.0 {
            kl_pm += pi * (pi / mi).log2();
        }
        if qi > 0.0 && mi > 0.0 {
            kl_qm += qi * (qi / mi).log2();
        }
    }
    // JSD with log2 is bounded by 1 bit; clamp against float dust.
    (0.5 * (kl_pm + kl_qm)).clamp(0.0, 1.0)
}

/// Fraction of positions i ≥ 2 revisiting the state from two steps back.
/// Tight A→B→A→B loops score near 1. Sequences shorter than 4 score 0.
pub fn loop_score(seq: &[(String, String)]) -> f64 {
    if seq.len() < 4 {
        return 0.0;
    }
    let states: Vec<&str> = seq.iter().map(|(_, to)| to.as_str()).collect();
    let eligible = states.len() - 2;
    let repeats = (2..states.len())
        .filter(|&i| states[i] == states[i - 2])
        .count();
    (repeats as f64 / eligible as f64).clamp(0.0, 1.0)
}

/// Fraction of sequence edges absent from the baseline matrix.
pub fn transition_novelty(
    seq: &[(String, String)],
    baseline: &DecayingTransitionMatrix,
    now: DateTime<Utc>,
) -> f64 {
    if seq.is_empty() {
        return 0.0;
    }
    let novel = seq
        .iter()
        .filter(|(from, to)| !baseline.has_edge(from, to, now))
        .count();
    novel as f64 / seq.len() as f64
}

/// Mean −log₂ P(to|from) across the sequence; zero-probability transitions
/// contribute the cap.
pub fn average_transition_surprise(
    seq: &[(String, String)],
    baseline: &DecayingTransitionMatrix,
    now: DateTime<Utc>,
) -> f64 {
    if seq.is_empty() {
        return 0.0;
    }
    let total: f64 = seq
        .iter()
        .map(|(from, to)| {
            let p = baseline.get_transition_probability(from, to, now);
            if p > 0.0 {
                (-p.log2()).min(SURPRISE_CAP_BITS)
            } else {
                SURPRISE_CAP_BITS
            }
        })
        .sum();
    total / seq.len() as f64
}

/// Shannon entropy in bits of a probability map.
pub fn shannon_entropy(dist: &HashMap<String, f64>) -> f64 {
    dist.values()
        .filter(|&&p| p > 0.0)
        .map(|&p| -p * p.log2())
        .sum()
}
