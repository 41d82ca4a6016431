// gatewarden/src/config.rs
//
// ConfigProvider — every tunable in one serde-loadable structure with
// explicit defaults. The engine holds an Arc snapshot; a reload swaps the
// Arc so new requests see the new epoch while in-flight requests finish on
// the old one.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::events::{Action, ChallengeMechanism, RiskBand};

// ── Top-level config ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// HMAC secret for signature derivation. Rotating it invalidates all
    /// prior signatures.
    pub signature_secret: String,

    pub markov:     MarkovConfig,
    pub coordinator: CoordinatorConfig,
    pub spectral:   SpectralConfig,
    pub scheduler:  SchedulerConfig,
    pub ledger:     LedgerConfig,
    pub clustering: ClusteringConfig,
    pub reputation: ReputationConfig,
    pub policies:   PolicyConfig,

    /// Per-detector parameter dictionaries; missing keys fall back to the
    /// detector's compiled-in defaults.
    pub detector_params: HashMap<String, DetectorParams>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            signature_secret: "change-me-at-deploy".to_string(),
            markov:          MarkovConfig::default(),
            coordinator:     CoordinatorConfig::default(),
            spectral:        SpectralConfig::default(),
            scheduler:       SchedulerConfig::default(),
            ledger:          LedgerConfig::default(),
            clustering:      ClusteringConfig::default(),
            reputation:      ReputationConfig::default(),
            policies:        PolicyConfig::default(),
            detector_params: HashMap::new(),
        }
    }
}

// ── Markov / drift ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkovConfig {
    /// Half-life for transition edge weights, seconds.
    pub half_life_secs:            f64,
    /// Keep at most this many outgoing edges per node after pruning.
    pub max_edges_per_node:        usize,
    pub recent_buffer_capacity:    usize,
    pub min_transitions_for_drift: usize,
    /// Pending cohort update queue bound; oldest dropped when full.
    pub cohort_queue_cap:          usize,
    pub drift_thresholds:          DriftThresholds,
}

impl Default for MarkovConfig {
    fn default() -> Self {
        Self {
            half_life_secs:            3600.0,
            max_edges_per_node:        32,
            recent_buffer_capacity:    64,
            min_transitions_for_drift: 5,
            cohort_queue_cap:          65536,
            drift_thresholds:          DriftThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftThresholds {
    pub self_drift:         f64,
    pub human_drift:        f64,
    pub loop_score:         f64,
    pub sequence_surprise:  f64,
    pub transition_novelty: f64,
    pub entropy_delta:      f64,
}

impl Default for DriftThresholds {
    fn default() -> Self {
        Self {
            self_drift:         0.45,
            human_drift:        0.50,
            loop_score:         0.30,
            sequence_surprise:  4.0,
            transition_novelty: 0.60,
            entropy_delta:      1.5,
        }
    }
}

// ── Signature coordinator ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// FIFO cap on retained records per signature.
    pub max_records_per_signature: usize,
    /// Idle signatures older than this are purged by the sweeper.
    pub signature_ttl_secs: i64,
    pub sweep_interval_secs: u64,
    pub aberration_threshold: f64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_records_per_signature: 200,
            signature_ttl_secs:        30 * 60,
            sweep_interval_secs:       60,
            aberration_threshold:      0.7,
        }
    }
}

// ── Spectral ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectralConfig {
    pub min_intervals: usize,
    pub correlation_max_samples: usize,
}

impl Default for SpectralConfig {
    fn default() -> Self {
        Self { min_intervals: 8, correlation_max_samples: 128 }
    }
}

// ── Scheduler ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub detector_timeout_ms: u64,
    pub request_timeout_ms:  u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { detector_timeout_ms: 100, request_timeout_ms: 500 }
    }
}

// ── Ledger / calibration ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Logistic slope for raw→probability calibration; raw=0 maps to 0.5.
    pub sigmoid_slope: f64,
    /// RiskBand lower thresholds: [low, elevated, medium, high, very_high].
    pub band_thresholds: [f64; 5],
    pub min_category_confidence: f64,
    /// Coverage weights per detector name; the divisor is their sum.
    pub coverage_weights: HashMap<String, f64>,
}

impl LedgerConfig {
    pub fn coverage_divisor(&self) -> f64 {
        self.coverage_weights.values().sum()
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        let coverage_weights = [
            ("user_agent",   1.0),
            ("ip",           0.5),
            ("header",       1.0),
            ("client_side",  1.0),
            ("behavioral",   1.0),
            ("version_age",  0.8),
            ("inconsistency", 0.8),
            ("heuristic",    2.0),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            sigmoid_slope:   2.0,
            band_thresholds: [0.15, 0.35, 0.55, 0.70, 0.85],
            min_category_confidence: 0.3,
            coverage_weights,
        }
    }
}

// ── Clustering ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    pub min_requests_for_feature:    usize,
    pub min_bot_detections_to_trigger: usize,
    pub min_cluster_size:            usize,
    pub similarity_threshold:        f64,
    pub product_similarity_threshold: f64,
    pub min_bot_prob_for_clustering: f64,
    pub network_temporal_density_threshold: f64,
    /// Community-detection refinement passes.
    pub max_iterations:              usize,
    /// Variance floor for adaptive feature weights.
    pub min_weight:                  f64,
    pub run_interval_secs:           u64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            min_requests_for_feature:    5,
            min_bot_detections_to_trigger: 3,
            min_cluster_size:            3,
            similarity_threshold:        0.72,
            product_similarity_threshold: 0.85,
            min_bot_prob_for_clustering: 0.6,
            network_temporal_density_threshold: 0.6,
            max_iterations:              10,
            min_weight:                  0.01,
            run_interval_secs:           120,
        }
    }
}

// ── Country reputation ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ReputationConfig {
    /// Shared half-life for {total, bots} counters, hours. The default is
    /// effectively slow — reputation drifts over weeks, not minutes.
    pub decay_tau_hours:         f64,
    pub min_sample_size:         f64,
    pub high_rate_threshold:     f64,
    pub very_high_rate_threshold: f64,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            decay_tau_hours:          100_000.0,
            min_sample_size:          5.0,
            high_rate_threshold:      0.7,
            very_high_rate_threshold: 0.9,
        }
    }
}

// ── Action policies ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Named policies; "default" always exists.
    pub policies: HashMap<String, BandPolicy>,
    /// Longest-prefix path overrides selecting a named policy.
    pub path_overrides: Vec<PathOverride>,
    pub reveal_detection_headers: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathOverride {
    pub path_prefix: String,
    pub policy:      String,
}

/// One named policy: a full band → action table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandPolicy {
    pub bands: HashMap<RiskBand, Action>,
}

impl BandPolicy {
    pub fn action_for(&self, band: RiskBand) -> Action {
        self.bands.get(&band).cloned().unwrap_or(Action::Allow)
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        let default_policy = BandPolicy {
            bands: [
                (RiskBand::VeryLow,  Action::Allow),
                (RiskBand::Low,      Action::Allow),
                (RiskBand::Elevated, Action::LogOnly),
                (RiskBand::Medium,   Action::Throttle { min_delay_ms: 200, max_delay_ms: 800 }),
                (RiskBand::High,     Action::Challenge { mechanism: ChallengeMechanism::Captcha }),
                (RiskBand::VeryHigh, Action::Block403),
            ]
            .into_iter()
            .collect(),
        };
        Self {
            policies: [("default".to_string(), default_policy)].into_iter().collect(),
            path_overrides: Vec::new(),
            reveal_detection_headers: true,
        }
    }
}

// ── Per-detector parameters ───────────────────────────────────────────────────

/// Loose parameter bag with typed fallback lookups, so detector tunables do
/// not scatter defaults across call sites.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectorParams {
    #[serde(flatten)]
    values: HashMap<String, serde_json::Value>,
}

impl DetectorParams {
    pub fn f64_or(&self, key: &str, default: f64) -> f64 {
        self.values.get(key).and_then(|v| v.as_f64()).unwrap_or(default)
    }

    pub fn u64_or(&self, key: &str, default: u64) -> u64 {
        self.values.get(key).and_then(|v| v.as_u64()).unwrap_or(default)
    }

    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        self.values.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    pub fn str_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.values.get(key).and_then(|v| v.as_str()).unwrap_or(default)
    }
}

impl EngineConfig {
    pub fn detector_params(&self, detector: &str) -> DetectorParams {
        self.detector_params.get(detector).cloned().unwrap_or_default()
    }
}

// ── Epoch-based provider ──────────────────────────────────────────────────────

/// Holds the current config epoch. `snapshot()` is taken once per request;
/// `reload()` swaps the epoch for requests that start afterwards.
pub struct ConfigProvider {
    current: RwLock<Arc<EngineConfig>>,
}

impl ConfigProvider {
    pub fn new(config: EngineConfig) -> Self {
        Self { current: RwLock::new(Arc::new(config)) }
    }

    pub fn snapshot(&self) -> Arc<EngineConfig> {
        self.current.read().clone()
    }

    pub fn reload(&self, config: EngineConfig) {
        *self.current.write() = Arc::new(config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coverage_divisor_matches_default_weights() {
        let cfg = LedgerConfig::default();
        assert!((cfg.coverage_divisor() - 8.1).abs() < 1e-9);
    }

    #[test]
    fn reload_is_epoch_based() {
        let provider = ConfigProvider::new(EngineConfig::default());
        let before = provider.snapshot();
        let mut next = EngineConfig::default();
        next.scheduler.detector_timeout_ms = 250;
        provider.reload(next);
        // The old snapshot is untouched; new snapshots see the new epoch.
        assert_eq!(before.scheduler.detector_timeout_ms, 100);
        assert_eq!(provider.snapshot().scheduler.detector_timeout_ms, 250);
    }

    #[test]
    fn detector_params_fall_back_to_defaults() {
        let params = DetectorParams::default();
        assert_eq!(params.f64_or("missing", 0.25), 0.25);
        assert!(params.bool_or("missing", true));
    }
}
