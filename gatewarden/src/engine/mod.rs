// gatewarden/src/engine/mod.rs
//
// The Engine — arena owner of every process-wide service. init(config)
// builds the coordinator, tracker, cluster service, reputation tracker and
// fingerprint store as siblings and hands detectors a locator; shutdown
// stops the background loops. evaluate() is the host adapter's single
// entry point and never surfaces an error — a failing pipeline degrades to
// Allow.

pub mod ledger;
pub mod policy;
pub mod scheduler;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::blackboard::{BlackboardState, SignalMap};
use crate::cluster::BotClusterService;
use crate::config::{ConfigProvider, EngineConfig};
use crate::coordinator::SignatureCoordinator;
use crate::detectors::Services;
use crate::events::{
    Action, AggregateBehavior, BrowserFingerprintResult, EvaluationResult, RequestRecord,
    RequestSnapshot, RiskBand,
};
use crate::fingerprints::FingerprintStore;
use crate::markov::MarkovTracker;
use crate::normalize;
use crate::reputation::CountryReputationTracker;
use crate::signature::SignatureDeriver;

use ledger::DetectionLedger;
use policy::ActionPolicyRegistry;
use scheduler::DetectorWaveScheduler;

#[derive(Debug, Clone, Copy, Default)]
pub struct EngineStats {
    pub total_requests:    u64,
    pub active_signatures: usize,
    pub cluster_count:     usize,
    pub tracked_countries: usize,
    pub fatal_errors:      u64,
}

pub struct Engine {
    provider:  ConfigProvider,
    deriver:   SignatureDeriver,
    services:  Arc<Services>,
    scheduler: DetectorWaveScheduler,
    background: Mutex<Vec<JoinHandle<()>>>,
    fatal_errors: AtomicU64,
}

impl Engine {
    /// Build the engine and all its services. No hidden globals: everything
    /// hangs off the returned value.
    pub fn init(config: EngineConfig) -> Arc<Engine> {
        let deriver = SignatureDeriver::new(&config.signature_secret);

        let coordinator = Arc::new(SignatureCoordinator::new(config.coordinator));
        let markov = Arc::new(MarkovTracker::new(config.markov.clone()));
        let clusters = Arc::new(BotClusterService::new(
            config.clustering,
            config.spectral,
            Arc::clone(&coordinator),
            Arc::clone(&markov),
        ));
        let reputation = Arc::new(CountryReputationTracker::new(config.reputation));
        let fingerprints = Arc::new(FingerprintStore::new());

        let services = Arc::new(Services {
            coordinator,
            markov,
            clusters,
            reputation,
            fingerprints,
        });

        Arc::new(Engine {
            provider: ConfigProvider::new(config),
            deriver,
            scheduler: DetectorWaveScheduler::new(Arc::clone(&services)),
            services,
            background: Mutex::new(Vec::new()),
            fatal_errors: AtomicU64::new(0),
        })
    }

    /// Spawn the cohort-flush, clustering, and TTL-sweep loops.
    pub fn spawn_background(self: &Arc<Self>) {
        let mut handles = self.background.lock();

        let engine = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            loop {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                engine.services.markov.flush_cohort_updates();
            }
        }));

        let engine = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let interval = engine.provider.snapshot().clustering.run_interval_secs;
            loop {
                tokio::time::sleep(std::time::Duration::from_secs(interval)).await;
                engine.services.clusters.run_clustering(Utc::now());
            }
        }));

        let engine = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let interval = engine.provider.snapshot().coordinator.sweep_interval_secs;
            loop {
                tokio::time::sleep(std::time::Duration::from_secs(interval)).await;
                let now = Utc::now();
                engine.services.coordinator.sweep(now);
                let ttl = engine.provider.snapshot().coordinator.signature_ttl_secs;
                engine
                    .services
                    .markov
                    .purge_idle(now - chrono::Duration::seconds(ttl));
                engine.services.fingerprints.sweep(now);
            }
        }));
    }

    /// Stop background loops. In-flight evaluations finish on their own.
    pub fn shutdown(&self) {
        for handle in self.background.lock().drain(..) {
            handle.abort();
        }
        info!("engine shut down");
    }

    /// Swap the config epoch; new requests see the new snapshot.
    pub fn reload_config(&self, config: EngineConfig) {
        self.provider.reload(config);
    }

    // ── The host contract ─────────────────────────────────────────────────────

    pub async fn evaluate(&self, snapshot: RequestSnapshot) -> EvaluationResult {
        let config = self.provider.snapshot();
        let now = snapshot.received_at;
        let request = Arc::new(snapshot);
        let signature_id = self.deriver.derive(&request);

        let seed = self.seed_signals(&request, &signature_id);
        let state = BlackboardState::initial(Arc::clone(&request), signature_id.clone(), seed);
        let ledger = DetectionLedger::new(config.ledger.clone());

        let outcome = self
            .scheduler
            .run(state, Arc::clone(&config), now, ledger)
            .await;

        let evidence = outcome
            .ledger
            .to_aggregated_evidence(outcome.ai_ran, outcome.elapsed_ms);

        let registry = ActionPolicyRegistry::new(config.policies.clone());
        let decision = registry.decide(&request.path, evidence.risk_band);
        let response_headers = registry.response_headers(
            &evidence,
            &decision.action,
            &signature_id,
            outcome.early_exit,
        );

        let detectors_ran: std::collections::HashSet<String> = outcome
            .state
            .completed_detectors
            .iter()
            .cloned()
            .collect();
        self.record_completed_request(
            &request,
            &signature_id,
            &evidence,
            &decision.action,
            detectors_ran,
            now,
        );

        EvaluationResult {
            request_id: request.request_id.clone(),
            signature_id,
            evidence,
            action: decision.action,
            policy_name: decision.policy_name,
            response_headers,
            timestamp: now,
        }
    }

    /// Degraded entry point for hosts that must never observe a panic:
    /// catches pipeline task failures and falls back to Allow + LogOnly.
    pub async fn evaluate_or_allow(self: &Arc<Self>, snapshot: RequestSnapshot) -> EvaluationResult {
        let request_id = snapshot.request_id.clone();
        let received_at = snapshot.received_at;
        let engine = Arc::clone(self);
        match tokio::spawn(async move { engine.evaluate(snapshot).await }).await {
            Ok(result) => result,
            Err(join_err) => {
                self.fatal_errors.fetch_add(1, Ordering::Relaxed);
                error!(%join_err, "pipeline task failed; short-circuiting to allow");
                EvaluationResult {
                    request_id,
                    signature_id: String::new(),
                    evidence: DetectionLedger::new(
                        self.provider.snapshot().ledger.clone(),
                    )
                    .to_aggregated_evidence(false, 0.0),
                    action: Action::Allow,
                    policy_name: "default".into(),
                    response_headers: Vec::new(),
                    timestamp: received_at,
                }
            }
        }
    }

    fn seed_signals(&self, request: &RequestSnapshot, signature_id: &str) -> SignalMap {
        let mut seed = SignalMap::new();
        let template = normalize::normalize(&request.path);
        seed.insert(
            "route.bucket".into(),
            json!(normalize::classify(&template).to_string()),
        );
        seed.insert("http.version".into(), json!(request.protocol.clone()));

        let request_count = self.services.coordinator.request_count(signature_id);
        seed.insert("sig.request_count".into(), json!(request_count as f64));
        seed.insert(
            "sig.returning".into(),
            json!(self.services.coordinator.is_returning(signature_id)),
        );

        if let Some(geo) = &request.geo {
            if let Some(cc) = &geo.country_code {
                seed.insert("geo.country".into(), json!(cc.clone()));
            }
            seed.insert("ip.datacenter".into(), json!(geo.is_datacenter));
        }
        if let Some(ja4) = &request.tls_fingerprint {
            seed.insert("tls.ja4".into(), json!(ja4.clone()));
        }
        if self.services.fingerprints.has_fingerprint(request.remote_ip) {
            seed.insert("client_fp.present".into(), json!(true));
        }
        seed
    }

    fn record_completed_request(
        &self,
        request: &RequestSnapshot,
        signature_id: &str,
        evidence: &crate::events::AggregatedEvidence,
        action: &Action,
        detectors_ran: std::collections::HashSet<String>,
        now: chrono::DateTime<Utc>,
    ) {
        let is_bot = evidence.bot_probability > 0.5;
        let was_escalated = !matches!(action, Action::Allow | Action::LogOnly);
        let geo = request.geo.as_ref();
        let is_datacenter = geo.map(|g| g.is_datacenter).unwrap_or(false);
        let is_returning = self.services.coordinator.is_returning(signature_id);
        let cluster_id = self.services.clusters.cluster_of(signature_id);

        // Behavioral state advances only after the verdict so detectors in
        // this request never observed their own transition.
        self.services.markov.record_transition(
            signature_id,
            &request.path,
            now,
            is_bot,
            is_datacenter,
            is_returning,
            cluster_id,
        );

        if let Some(country) = geo.and_then(|g| g.country_code.as_deref()) {
            self.services.reputation.record_detection(country, is_bot, now);
        }
        if let Some(geo) = geo {
            self.services.clusters.note_geo(signature_id, geo);
        }

        let record = RequestRecord {
            request_id: request.request_id.clone(),
            signature_id: signature_id.to_string(),
            timestamp: now,
            raw_path: request.path.clone(),
            normalized_path: normalize::normalize(&request.path),
            method: request.method.clone(),
            remote_ip: request.remote_ip,
            country_code: geo.and_then(|g| g.country_code.clone()),
            asn: geo.and_then(|g| g.asn),
            is_datacenter,
            user_agent: request.user_agent().to_string(),
            bot_probability: evidence.bot_probability,
            detectors_ran,
            signals: evidence
                .contributions
                .iter()
                .flat_map(|c| c.signals.clone())
                .collect(),
            was_escalated,
        };
        self.services.coordinator.record_request(record);
    }

    // ── Lookups & intake ──────────────────────────────────────────────────────

    /// Signature lookup for the GET /signature/{id} host route. None after
    /// TTL expiry — the adapter's 404.
    pub fn signature_behavior(&self, signature_id: &str) -> Option<AggregateBehavior> {
        self.services.coordinator.signature_behavior(signature_id)
    }

    /// Client-side fingerprint intake (already token-verified by the host).
    pub fn ingest_fingerprint(&self, ip: std::net::IpAddr, result: BrowserFingerprintResult) {
        self.services.fingerprints.ingest(ip, result);
    }

    pub fn risk_band_of(&self, probability: f64) -> RiskBand {
        DetectionLedger::new(self.provider.snapshot().ledger.clone()).band_for(probability)
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            total_requests: self
                .services
                .coordinator
                .total_requests
                .load(Ordering::Relaxed),
            active_signatures: self.services.coordinator.active_signatures(),
            cluster_count: self.services.clusters.cluster_count(),
            tracked_countries: self.services.reputation.tracked_countries(),
            fatal_errors: self.fatal_errors.load(Ordering::Relaxed),
        }
    }
}
