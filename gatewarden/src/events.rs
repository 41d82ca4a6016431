// gatewarden/src/events.rs
//
// Shared domain types flowing through Gatewarden.
// The HTTP adapter hands the engine a RequestSnapshot; the engine hands back
// an EvaluationResult. Everything in between (records, contributions,
// evidence) lives here too.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::IpAddr;

// ── Inbound request snapshot ──────────────────────────────────────────────────

/// Value snapshot of one HTTP request, assembled by the host adapter.
/// The engine never touches the live connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSnapshot {
    pub request_id:      String,
    pub method:          String,
    pub path:            String,
    /// Multi-map of header name → values, names lowercased by the adapter.
    pub headers:         Vec<(String, String)>,
    pub remote_ip:       IpAddr,
    pub remote_port:     u16,
    /// "1.1", "2", "3"
    pub protocol:        String,
    pub tls_fingerprint: Option<String>,   // ja4 when TLS terminated upstream
    pub h2_settings_hash: Option<String>,
    pub geo:             Option<GeoInfo>,
    pub client_hint_platform: Option<String>,
    /// Wall-clock receive time; all decay math keys off this so replay works.
    pub received_at:     DateTime<Utc>,
    /// Optional ground-truth label for eval datasets (never set in production).
    pub bot_label:       Option<bool>,
}

impl RequestSnapshot {
    /// Find a header value (first occurrence, case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        let name_lower = name.to_lowercase();
        self.headers.iter()
            .find(|(k, _)| k.to_lowercase() == name_lower)
            .map(|(_, v)| v.as_str())
    }

    pub fn user_agent(&self) -> &str {
        self.header("user-agent").unwrap_or("")
    }

    pub fn header_names_in_order(&self) -> Vec<String> {
        self.headers.iter().map(|(k, _)| k.to_lowercase()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoInfo {
    pub country_code: Option<String>,
    pub continent:    Option<String>,
    pub region:       Option<String>,
    pub latitude:     Option<f64>,
    pub longitude:    Option<f64>,
    pub asn:          Option<u32>,
    pub is_datacenter: bool,
}

// ── Per-request record (owned by SignatureCoordinator) ────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    pub request_id:      String,
    pub signature_id:    String,
    pub timestamp:       DateTime<Utc>,
    pub raw_path:        String,
    pub normalized_path: String,
    pub method:          String,
    pub remote_ip:       IpAddr,
    pub country_code:    Option<String>,
    pub asn:             Option<u32>,
    pub is_datacenter:   bool,
    pub user_agent:      String,
    pub bot_probability: f64,
    pub detectors_ran:   HashSet<String>,
    pub signals:         HashMap<String, serde_json::Value>,
    pub was_escalated:   bool,
}

/// Aggregate view over a signature's surviving record window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateBehavior {
    pub signature_id:        String,
    pub request_count:       usize,
    pub first_seen:          DateTime<Utc>,
    pub last_seen:           DateTime<Utc>,
    pub average_interval:    f64,
    pub timing_coefficient:  f64,
    pub path_entropy:        f64,
    pub distinct_paths:      usize,
    pub average_bot_probability: f64,
    pub aberration_score:    f64,
    pub is_aberrant:         bool,
    pub country_code:        Option<String>,
    pub asn:                 Option<u32>,
    pub is_datacenter:       bool,
    pub escalated_count:     usize,
}

// ── Behavioral signal bundles ─────────────────────────────────────────────────

/// Output of the Markov drift computation. All fields except entropy_delta
/// and sequence_surprise are in [0,1]; entropy_delta is a signed bit delta
/// and sequence_surprise is nonnegative bits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct DriftSignals {
    pub self_drift:         f64,
    pub human_drift:        f64,
    pub transition_novelty: f64,
    pub entropy_delta:      f64,
    pub loop_score:         f64,
    pub sequence_surprise:  f64,
}

impl DriftSignals {
    pub const EMPTY: DriftSignals = DriftSignals {
        self_drift:         0.0,
        human_drift:        0.0,
        transition_novelty: 0.0,
        entropy_delta:      0.0,
        loop_score:         0.0,
        sequence_surprise:  0.0,
    };

    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }
}

/// FFT-derived timing features. Scalar fields are clamped to [0,1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectralFeatures {
    pub dominant_frequency: f64,
    pub spectral_entropy:   f64,
    pub harmonic_ratio:     f64,
    pub spectral_centroid:  f64,
    pub peak_to_avg_ratio:  f64,
    pub has_sufficient_data: bool,
}

impl Default for SpectralFeatures {
    fn default() -> Self {
        // Constant/unknown signals read as maximally entropic — downstream
        // scoring keys on low entropy, so the default contributes nothing.
        Self {
            dominant_frequency: 0.0,
            spectral_entropy:   1.0,
            harmonic_ratio:     0.0,
            spectral_centroid:  0.5,
            peak_to_avg_ratio:  0.0,
            has_sufficient_data: false,
        }
    }
}

// ── Detection output types ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DetectorCategory {
    Client,
    Network,
    Behavioral,
    Protocol,
    Reputation,
    Learning,
}

impl std::fmt::Display for DetectorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Client     => write!(f, "client"),
            Self::Network    => write!(f, "network"),
            Self::Behavioral => write!(f, "behavioral"),
            Self::Protocol   => write!(f, "protocol"),
            Self::Reputation => write!(f, "reputation"),
            Self::Learning   => write!(f, "learning"),
        }
    }
}

/// One detector's verdict for one request. `confidence_delta` pushes the
/// aggregate toward bot (+) or human (−); `weight` scales its influence.
/// Signal maps are ordered so serialized evidence is reproducible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionContribution {
    pub detector_name:    String,
    pub category:         DetectorCategory,
    pub confidence_delta: f64,
    pub weight:           f64,
    pub reason:           String,
    pub signals:          BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RiskBand { VeryLow, Low, Elevated, Medium, High, VeryHigh }

impl std::fmt::Display for RiskBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::VeryLow  => write!(f, "VERY_LOW"),
            Self::Low      => write!(f, "LOW"),
            Self::Elevated => write!(f, "ELEVATED"),
            Self::Medium   => write!(f, "MEDIUM"),
            Self::High     => write!(f, "HIGH"),
            Self::VeryHigh => write!(f, "VERY_HIGH"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum BotType {
    Scraper,
    Crawler,
    SecurityScanner,
    CredentialStuffer,
    AiAgent,
    Unknown,
}

impl std::fmt::Display for BotType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scraper           => write!(f, "scraper"),
            Self::Crawler           => write!(f, "crawler"),
            Self::SecurityScanner   => write!(f, "security_scanner"),
            Self::CredentialStuffer => write!(f, "credential_stuffer"),
            Self::AiAgent           => write!(f, "ai_agent"),
            Self::Unknown           => write!(f, "unknown"),
        }
    }
}

/// Final per-request decision record produced by the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedEvidence {
    pub bot_probability:  f64,
    pub confidence:       f64,
    pub risk_band:        RiskBand,
    pub primary_bot_type: Option<BotType>,
    pub contributions:    Vec<DetectionContribution>,
    pub category_breakdown: BTreeMap<String, f64>,
    pub failed_detectors: Vec<String>,
    pub total_processing_ms: f64,
    pub ai_ran:           bool,
}

// ── Enforcement ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    Allow,
    LogOnly,
    Block403,
    Throttle { min_delay_ms: u64, max_delay_ms: u64 },
    Challenge { mechanism: ChallengeMechanism },
    RedirectHoneypot { location: String },
    Tarpit { delay_ms: u64 },
}

impl Action {
    /// Stealth actions never reveal detection in response headers.
    pub fn is_stealth(&self) -> bool {
        matches!(self, Self::Throttle { .. } | Self::RedirectHoneypot { .. } | Self::Tarpit { .. })
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Allow                 => write!(f, "ALLOW"),
            Self::LogOnly               => write!(f, "LOG_ONLY"),
            Self::Block403              => write!(f, "BLOCK_403"),
            Self::Throttle { .. }       => write!(f, "THROTTLE"),
            Self::Challenge { .. }      => write!(f, "CHALLENGE"),
            Self::RedirectHoneypot { .. } => write!(f, "REDIRECT_HONEYPOT"),
            Self::Tarpit { .. }         => write!(f, "TARPIT"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeMechanism { Captcha, ProofOfWork }

/// What the middleware hands back to the host adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub request_id:       String,
    pub signature_id:     String,
    pub evidence:         AggregatedEvidence,
    pub action:           Action,
    pub policy_name:      String,
    /// Header additions; empty under stealth policies.
    pub response_headers: Vec<(String, String)>,
    pub timestamp:        DateTime<Utc>,
}

impl EvaluationResult {
    pub fn to_jsonl(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

// ── Client-side fingerprint intake ────────────────────────────────────────────

/// Stored result of a client-side fingerprint submission, keyed by IP-hash.
/// Only the server-side consumption matters to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserFingerprintResult {
    pub ip_hash:          String,
    pub webdriver:        bool,
    pub headless_hints:   u32,
    pub canvas_entropy:   f64,
    pub plugin_count:     u32,
    pub reported_platform: Option<String>,
    pub collected_at:     DateTime<Utc>,
}
