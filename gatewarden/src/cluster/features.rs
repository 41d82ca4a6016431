// gatewarden/src/cluster/features.rs
//
// Feature vectorization for population clustering, plus the adaptive
// similarity weighter. Weights are proportional to observed per-feature
// variance — features that actually separate the population dominate the
// similarity — floored so no feature ever vanishes, then sum-normalized.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::{AggregateBehavior, DriftSignals};

/// Range used to fold the signed entropy delta into [0,1].
const ENTROPY_DELTA_SPAN_BITS: f64 = 4.0;
/// Surprise cap mirrors the divergence metric cap.
const SURPRISE_SPAN_BITS: f64 = 10.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureVector {
    pub signature:          String,
    // Scalars, all pre-normalized to [0,1].
    pub timing_regularity:  f64,
    pub request_rate:       f64,
    pub path_diversity:     f64,
    pub path_entropy:       f64,
    pub avg_bot_probability: f64,
    pub self_drift:         f64,
    pub human_drift:        f64,
    pub loop_score:         f64,
    pub surprise:           f64,
    pub novelty:            f64,
    pub entropy_delta:      f64,
    // Categoricals.
    pub country_code:       Option<String>,
    pub is_datacenter:      bool,
    pub asn:                Option<u32>,
    // Geo.
    pub latitude:           Option<f64>,
    pub longitude:          Option<f64>,
    pub continent:          Option<String>,
    pub region:             Option<String>,
    // Temporal extent.
    pub first_seen:         DateTime<Utc>,
    pub last_seen:          DateTime<Utc>,
}

impl FeatureVector {
    pub fn from_behavior(
        behavior: &AggregateBehavior,
        drift: &DriftSignals,
        latitude: Option<f64>,
        longitude: Option<f64>,
        continent: Option<String>,
        region: Option<String>,
    ) -> Self {
        let span_secs = (behavior.last_seen - behavior.first_seen)
            .num_milliseconds()
            .max(0) as f64
            / 1000.0;
        let per_minute = if span_secs > 0.0 {
            behavior.request_count as f64 / (span_secs / 60.0)
        } else {
            behavior.request_count as f64
        };

        Self {
            signature: behavior.signature_id.clone(),
            // Low interval CV = scripted regularity.
            timing_regularity: (1.0 - behavior.timing_coefficient).clamp(0.0, 1.0),
            request_rate: (per_minute / (per_minute + 10.0)).clamp(0.0, 1.0),
            path_diversity: if behavior.request_count > 0 {
                (behavior.distinct_paths as f64 / behavior.request_count as f64).clamp(0.0, 1.0)
            } else {
                0.0
            },
            path_entropy: if behavior.distinct_paths > 1 {
                (behavior.path_entropy / (behavior.distinct_paths as f64).log2()).clamp(0.0, 1.0)
            } else {
                0.0
            },
            avg_bot_probability: behavior.average_bot_probability.clamp(0.0, 1.0),
            self_drift: drift.self_drift.clamp(0.0, 1.0),
            human_drift: drift.human_drift.clamp(0.0, 1.0),
            loop_score: drift.loop_score.clamp(0.0, 1.0),
            surprise: (drift.sequence_surprise / SURPRISE_SPAN_BITS).clamp(0.0, 1.0),
            novelty: drift.transition_novelty.clamp(0.0, 1.0),
            entropy_delta: ((drift.entropy_delta / ENTROPY_DELTA_SPAN_BITS) * 0.5 + 0.5)
                .clamp(0.0, 1.0),
            country_code: behavior.country_code.clone(),
            is_datacenter: behavior.is_datacenter,
            asn: behavior.asn,
            latitude,
            longitude,
            continent,
            region,
            first_seen: behavior.first_seen,
            last_seen: behavior.last_seen,
        }
    }
}

// ── Adaptive weights ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureWeights {
    pub timing_regularity:  f64,
    pub request_rate:       f64,
    pub path_diversity:     f64,
    pub path_entropy:       f64,
    pub avg_bot_probability: f64,
    pub country:            f64,
    pub datacenter:         f64,
    pub asn:                f64,
    pub geo:                f64,
    pub self_drift:         f64,
    pub human_drift:        f64,
    pub loop_score:         f64,
    pub surprise:           f64,
    pub novelty:            f64,
    pub entropy_delta:      f64,
}

impl FeatureWeights {
    pub fn uniform() -> Self {
        let w = 1.0 / 15.0;
        Self {
            timing_regularity: w, request_rate: w, path_diversity: w,
            path_entropy: w, avg_bot_probability: w, country: w,
            datacenter: w, asn: w, geo: w, self_drift: w, human_drift: w,
            loop_score: w, surprise: w, novelty: w, entropy_delta: w,
        }
    }

    pub fn sum(&self) -> f64 {
        self.timing_regularity + self.request_rate + self.path_diversity
            + self.path_entropy + self.avg_bot_probability + self.country
            + self.datacenter + self.asn + self.geo + self.self_drift
            + self.human_drift + self.loop_score + self.surprise
            + self.novelty + self.entropy_delta
    }
}

pub struct AdaptiveSimilarityWeighter {
    pub min_weight: f64,
}

impl AdaptiveSimilarityWeighter {
    pub fn new(min_weight: f64) -> Self {
        Self { min_weight }
    }

    /// Variance-proportional weights over the current population.
    pub fn compute_weights(&self, vectors: &[FeatureVector]) -> FeatureWeights {
        if vectors.len() < 2 {
            return FeatureWeights::uniform();
        }

        let scalar = |f: fn(&FeatureVector) -> f64| variance(vectors.iter().map(f));

        let mut w = FeatureWeights {
            timing_regularity:  scalar(|v| v.timing_regularity),
            request_rate:       scalar(|v| v.request_rate),
            path_diversity:     scalar(|v| v.path_diversity),
            path_entropy:       scalar(|v| v.path_entropy),
            avg_bot_probability: scalar(|v| v.avg_bot_probability),
            country:    categorical_variance(vectors.iter().map(|v| v.country_code.clone())),
            datacenter: categorical_variance(vectors.iter().map(|v| Some(v.is_datacenter.to_string()))),
            asn:        categorical_variance(vectors.iter().map(|v| v.asn.map(|a| a.to_string()))),
            geo:        categorical_variance(vectors.iter().map(|v| v.continent.clone())),
            self_drift:    scalar(|v| v.self_drift),
            human_drift:   scalar(|v| v.human_drift),
            loop_score:    scalar(|v| v.loop_score),
            surprise:      scalar(|v| v.surprise),
            novelty:       scalar(|v| v.novelty),
            entropy_delta: scalar(|v| v.entropy_delta),
        };

        // Floor, then normalize so the weighted similarity stays in [0,1].
        for field in [
            &mut w.timing_regularity, &mut w.request_rate, &mut w.path_diversity,
            &mut w.path_entropy, &mut w.avg_bot_probability, &mut w.country,
            &mut w.datacenter, &mut w.asn, &mut w.geo, &mut w.self_drift,
            &mut w.human_drift, &mut w.loop_score, &mut w.surprise,
            &mut w.novelty, &mut w.entropy_delta,
        ] {
            *field = field.max(self.min_weight);
        }
        let total = w.sum();
        for field in [
            &mut w.timing_regularity, &mut w.request_rate, &mut w.path_diversity,
            &mut w.path_entropy, &mut w.avg_bot_probability, &mut w.country,
            &mut w.datacenter, &mut w.asn, &mut w.geo, &mut w.self_drift,
            &mut w.human_drift, &mut w.loop_score, &mut w.surprise,
            &mut w.novelty, &mut w.entropy_delta,
        ] {
            *field /= total;
        }
        w
    }
}

fn variance(values: impl Iterator<Item = f64>) -> f64 {
    let values: Vec<f64> = values.collect();
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64
}

/// Bernoulli variance of "matches the modal value" — a categorical feature
/// that never varies contributes nothing beyond the floor.
fn categorical_variance(values: impl Iterator<Item = Option<String>>) -> f64 {
    let values: Vec<Option<String>> = values.collect();
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let mut counts: std::collections::HashMap<&Option<String>, usize> =
        std::collections::HashMap::new();
    for v in &values {
        *counts.entry(v).or_insert(0) += 1;
    }
    let modal = counts.values().copied().max().unwrap_or(0);
    let p = modal as f64 / n as f64;
    p * (1.0 - p)
}
