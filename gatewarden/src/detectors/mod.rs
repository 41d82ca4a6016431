// gatewarden/src/detectors/mod.rs
//
// Detector registry. Each detector is a free async fn in its own module;
// DetectorKind is the tagged dispatch over them — name, wave, category,
// coverage triggers, and the run() match. No inheritance, no dyn.

pub mod account_takeover;
pub mod ai_scraper;
pub mod behavioral;
pub mod cache_behavior;
pub mod client_side;
pub mod cluster_membership;
pub mod country_reputation;
pub mod geo_change;
pub mod header;
pub mod heuristic;
pub mod http2_fingerprint;
pub mod inconsistency;
pub mod ip;
pub mod markov_drift;
pub mod response_behavior;
pub mod security_tool;
pub mod tls_fingerprint;
pub mod user_agent;
pub mod version_age;
pub mod waveform;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::blackboard::{BlackboardState, Trigger};
use crate::cluster::BotClusterService;
use crate::config::EngineConfig;
use crate::coordinator::SignatureCoordinator;
use crate::error::DetectorError;
use crate::events::{BrowserFingerprintResult, DetectionContribution, DetectorCategory};
use crate::fingerprints::FingerprintStore;
use crate::markov::MarkovTracker;
use crate::reputation::CountryReputationTracker;

// ── Shared services (arena-owned by the Engine, handles here) ─────────────────

pub struct Services {
    pub coordinator: Arc<SignatureCoordinator>,
    pub markov:      Arc<MarkovTracker>,
    pub clusters:    Arc<BotClusterService>,
    pub reputation:  Arc<CountryReputationTracker>,
    pub fingerprints: Arc<FingerprintStore>,
}

#[derive(Clone)]
pub struct DetectorContext {
    pub state:    BlackboardState,
    pub services: Arc<Services>,
    pub config:   Arc<EngineConfig>,
    pub now:      DateTime<Utc>,
}

impl DetectorContext {
    pub fn fingerprint_for_ip(&self) -> Option<BrowserFingerprintResult> {
        self.services
            .fingerprints
            .lookup_ip(self.state.request.remote_ip)
    }
}

// ── Detector output ───────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct DetectorOutput {
    pub contributions: Vec<DetectionContribution>,
    pub signals:       Vec<(String, Value)>,
}

impl DetectorOutput {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn signal(mut self, key: &str, value: Value) -> Self {
        self.signals.push((key.to_string(), value));
        self
    }

    pub fn contribute(
        mut self,
        kind: DetectorKind,
        delta: f64,
        weight: f64,
        reason: impl Into<String>,
        signals: &[(&str, Value)],
    ) -> Self {
        self.contributions.push(DetectionContribution {
            detector_name: kind.name().to_string(),
            category: kind.category(),
            confidence_delta: delta.clamp(-1.0, 1.0),
            weight: weight.max(0.0),
            reason: reason.into(),
            signals: signals
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        });
        self
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectorKind {
    // Wave 0 — fast, stateless.
    UserAgent,
    Header,
    Ip,
    SecurityTool,
    CacheBehavior,
    VersionAge,
    AiScraper,
    CountryReputation,
    // Wave 1 — behavioral, stateful.
    MarkovDrift,
    BehavioralWaveform,
    Behavioral,
    ClientSide,
    GeoChange,
    AccountTakeover,
    ResponseBehavior,
    // Wave 2 — protocol fingerprints.
    TlsFingerprint,
    Http2Fingerprint,
    Inconsistency,
    // Wave 3 — learning layer.
    Heuristic,
    ClusterMembership,
}

impl DetectorKind {
    pub const ALL: &'static [DetectorKind] = &[
        Self::UserAgent,
        Self::Header,
        Self::Ip,
        Self::SecurityTool,
        Self::CacheBehavior,
        Self::VersionAge,
        Self::AiScraper,
        Self::CountryReputation,
        Self::MarkovDrift,
        Self::BehavioralWaveform,
        Self::Behavioral,
        Self::ClientSide,
        Self::GeoChange,
        Self::AccountTakeover,
        Self::ResponseBehavior,
        Self::TlsFingerprint,
        Self::Http2Fingerprint,
        Self::Inconsistency,
        Self::Heuristic,
        Self::ClusterMembership,
    ];

    pub const WAVE_COUNT: usize = 4;

    pub fn name(&self) -> &'static str {
        match self {
            Self::UserAgent          => "user_agent",
            Self::Header             => "header",
            Self::Ip                 => "ip",
            Self::SecurityTool       => "security_tool",
            Self::CacheBehavior      => "cache_behavior",
            Self::VersionAge         => "version_age",
            Self::AiScraper          => "ai_scraper",
            Self::CountryReputation  => "country_reputation",
            Self::MarkovDrift        => "markov_drift",
            Self::BehavioralWaveform => "behavioral_waveform",
            Self::Behavioral         => "behavioral",
            Self::ClientSide         => "client_side",
            Self::GeoChange          => "geo_change",
            Self::AccountTakeover    => "account_takeover",
            Self::ResponseBehavior   => "response_behavior",
            Self::TlsFingerprint     => "tls_fingerprint",
            Self::Http2Fingerprint   => "http2_fingerprint",
            Self::Inconsistency      => "inconsistency",
            Self::Heuristic          => "heuristic",
            Self::ClusterMembership  => "cluster_membership",
        }
    }

    pub fn wave(&self) -> usize {
        match self {
            Self::UserAgent | Self::Header | Self::Ip | Self::SecurityTool
            | Self::CacheBehavior | Self::VersionAge | Self::AiScraper
            | Self::CountryReputation => 0,
            Self::MarkovDrift | Self::BehavioralWaveform | Self::Behavioral
            | Self::ClientSide | Self::GeoChange | Self::AccountTakeover
            | Self::ResponseBehavior => 1,
            Self::TlsFingerprint | Self::Http2Fingerprint | Self::Inconsistency => 2,
            Self::Heuristic | Self::ClusterMembership => 3,
        }
    }

    pub fn category(&self) -> DetectorCategory {
        match self {
            Self::UserAgent | Self::Header | Self::SecurityTool | Self::CacheBehavior
            | Self::VersionAge | Self::AiScraper | Self::ClientSide => DetectorCategory::Client,
            Self::Ip | Self::GeoChange => DetectorCategory::Network,
            Self::CountryReputation => DetectorCategory::Reputation,
            Self::MarkovDrift | Self::BehavioralWaveform | Self::Behavioral
            | Self::AccountTakeover | Self::ResponseBehavior => DetectorCategory::Behavioral,
            Self::TlsFingerprint | Self::Http2Fingerprint | Self::Inconsistency => {
                DetectorCategory::Protocol
            }
            Self::Heuristic | Self::ClusterMembership => DetectorCategory::Learning,
        }
    }

    /// Minimum signals required on the blackboard before the detector may
    /// run. Wave 0 detectors are unconditionally eligible.
    pub fn triggers(&self) -> Vec<Trigger> {
        match self {
            Self::UserAgent | Self::Header | Self::Ip | Self::SecurityTool
            | Self::CacheBehavior | Self::VersionAge | Self::AiScraper
            | Self::CountryReputation | Self::Heuristic => vec![],
            Self::MarkovDrift => vec![Trigger::SignalAtLeast("sig.request_count", 2.0)],
            Self::BehavioralWaveform => vec![Trigger::SignalAtLeast("sig.request_count", 9.0)],
            Self::Behavioral => vec![Trigger::SignalAtLeast("sig.request_count", 3.0)],
            Self::ClientSide => vec![Trigger::SignalEquals("client_fp.present", json!(true))],
            Self::GeoChange => vec![
                Trigger::SignalExists("geo.country"),
                Trigger::SignalAtLeast("sig.request_count", 2.0),
            ],
            Self::AccountTakeover => vec![Trigger::SignalEquals("route.bucket", json!("auth"))],
            Self::ResponseBehavior => vec![Trigger::SignalAtLeast("sig.request_count", 5.0)],
            Self::TlsFingerprint => vec![Trigger::SignalExists("tls.ja4")],
            Self::Http2Fingerprint => vec![Trigger::SignalExists("http.version")],
            Self::Inconsistency => vec![Trigger::SignalExists("ua.raw")],
            Self::ClusterMembership => vec![Trigger::SignalAtLeast("sig.request_count", 1.0)],
        }
    }

    pub async fn run(&self, ctx: &DetectorContext) -> Result<DetectorOutput, DetectorError> {
        match self {
            Self::UserAgent          => user_agent::analyze(ctx).await,
            Self::Header             => header::analyze(ctx).await,
            Self::Ip                 => ip::analyze(ctx).await,
            Self::SecurityTool       => security_tool::analyze(ctx).await,
            Self::CacheBehavior      => cache_behavior::analyze(ctx).await,
            Self::VersionAge         => version_age::analyze(ctx).await,
            Self::AiScraper          => ai_scraper::analyze(ctx).await,
            Self::CountryReputation  => country_reputation::analyze(ctx).await,
            Self::MarkovDrift        => markov_drift::analyze(ctx).await,
            Self::BehavioralWaveform => waveform::analyze(ctx).await,
            Self::Behavioral         => behavioral::analyze(ctx).await,
            Self::ClientSide         => client_side::analyze(ctx).await,
            Self::GeoChange          => geo_change::analyze(ctx).await,
            Self::AccountTakeover    => account_takeover::analyze(ctx).await,
            Self::ResponseBehavior   => response_behavior::analyze(ctx).await,
            Self::TlsFingerprint     => tls_fingerprint::analyze(ctx).await,
            Self::Http2Fingerprint   => http2_fingerprint::analyze(ctx).await,
            Self::Inconsistency      => inconsistency::analyze(ctx).await,
            Self::Heuristic          => heuristic::analyze(ctx).await,
            Self::ClusterMembership  => cluster_membership::analyze(ctx).await,
        }
    }
}

impl std::fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;
    use crate::blackboard::SignalMap;
    use crate::config::EngineConfig;
    use crate::events::RequestSnapshot;

    pub fn snapshot(method: &str, path: &str, headers: &[(&str, &str)]) -> RequestSnapshot {
        RequestSnapshot {
            request_id: "req-test".into(),
            method: method.to_string(),
            path: path.to_string(),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            remote_ip: "203.0.113.10".parse().unwrap(),
            remote_port: 443,
            protocol: "1.1".into(),
            tls_fingerprint: None,
            h2_settings_hash: None,
            geo: None,
            client_hint_platform: None,
            received_at: Utc::now(),
            bot_label: None,
        }
    }

    pub fn services() -> Arc<Services> {
        let config = EngineConfig::default();
        let coordinator = Arc::new(SignatureCoordinator::new(config.coordinator));
        let markov = Arc::new(MarkovTracker::new(config.markov.clone()));
        let clusters = Arc::new(BotClusterService::new(
            config.clustering,
            config.spectral,
            Arc::clone(&coordinator),
            Arc::clone(&markov),
        ));
        Arc::new(Services {
            coordinator,
            markov,
            clusters,
            reputation: Arc::new(CountryReputationTracker::new(config.reputation)),
            fingerprints: Arc::new(FingerprintStore::new()),
        })
    }

    pub fn context_from(snapshot: RequestSnapshot, seed: SignalMap) -> DetectorContext {
        let request = Arc::new(snapshot);
        let state = BlackboardState::initial(Arc::clone(&request), "sig-test".into(), seed);
        DetectorContext {
            state,
            services: services(),
            config: Arc::new(EngineConfig::default()),
            now: Utc::now(),
        }
    }

    pub fn context_for(method: &str, path: &str, headers: &[(&str, &str)]) -> DetectorContext {
        context_from(snapshot(method, path, headers), SignalMap::new())
    }
}
