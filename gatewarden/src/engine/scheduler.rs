// gatewarden/src/engine/scheduler.rs
//
// DetectorWaveScheduler — runs the registry wave by wave. Within a wave,
// eligible detectors run as concurrent tasks under a per-detector timeout;
// between waves the blackboard state is folded functionally. The scheduler
// itself is single-threaded — only detector bodies run in parallel.
//
// Determinism: wave results are sorted by detector name before they touch
// the ledger, so intra-wave completion order can never change the final
// evidence.

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::blackboard::{all_triggers_satisfied, BlackboardState, SignalBus};
use crate::detectors::{DetectorContext, DetectorKind, DetectorOutput, Services};
use crate::engine::ledger::DetectionLedger;
use crate::error::DetectorError;

pub struct WaveOutcome {
    pub state:      BlackboardState,
    pub ledger:     DetectionLedger,
    pub ai_ran:     bool,
    pub early_exit: bool,
    pub elapsed_ms: f64,
}

pub struct DetectorWaveScheduler {
    services: Arc<Services>,
}

impl DetectorWaveScheduler {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    pub async fn run(
        &self,
        initial: BlackboardState,
        config: Arc<crate::config::EngineConfig>,
        now: chrono::DateTime<chrono::Utc>,
        mut ledger: DetectionLedger,
    ) -> WaveOutcome {
        let started = Instant::now();
        let detector_timeout =
            std::time::Duration::from_millis(config.scheduler.detector_timeout_ms);
        let request_timeout =
            std::time::Duration::from_millis(config.scheduler.request_timeout_ms);

        let mut state = initial;
        let mut ai_ran = false;
        let mut early_exit = false;

        for wave in 0..DetectorKind::WAVE_COUNT {
            let eligible: Vec<DetectorKind> = DetectorKind::ALL
                .iter()
                .copied()
                .filter(|k| k.wave() == wave)
                .filter(|k| all_triggers_satisfied(&k.triggers(), &state))
                .collect();
            if eligible.is_empty() {
                continue;
            }

            // Request-level deadline check before committing to a wave.
            if started.elapsed() >= request_timeout {
                warn!(wave, "request timeout before wave start; finalizing partial evidence");
                for kind in DetectorKind::ALL.iter().filter(|k| k.wave() >= wave) {
                    ledger.record_failure(kind.name());
                }
                early_exit = true;
                break;
            }

            let handles: Vec<(DetectorKind, JoinHandle<Result<DetectorOutput, DetectorError>>)> =
                eligible
                    .iter()
                    .map(|&kind| {
                        let ctx = DetectorContext {
                            state: state.clone(),
                            services: Arc::clone(&self.services),
                            config: Arc::clone(&config),
                            now,
                        };
                        let handle = tokio::spawn(async move {
                            match tokio::time::timeout(detector_timeout, kind.run(&ctx)).await {
                                Ok(result) => result,
                                Err(_) => Err(DetectorError::Timeout),
                            }
                        });
                        (kind, handle)
                    })
                    .collect();

            let mut results: Vec<(DetectorKind, Result<DetectorOutput, DetectorError>)> =
                Vec::with_capacity(handles.len());
            for (kind, handle) in handles {
                let result = match handle.await {
                    Ok(r) => r,
                    // A panicking detector body is a transient failure, not
                    // a pipeline failure.
                    Err(join_err) => {
                        warn!(detector = kind.name(), error = %join_err, "detector task died");
                        Err(DetectorError::Transient)
                    }
                };
                results.push((kind, result));
            }

            // Name-sorted fold keeps the ledger order independent of
            // completion order.
            results.sort_by_key(|(kind, _)| kind.name());

            let mut completed = Vec::new();
            let mut failed = Vec::new();
            let mut bus = SignalBus::new();
            let mut contributions = Vec::new();
            for (kind, result) in results {
                match result {
                    Ok(output) => {
                        completed.push(kind.name().to_string());
                        bus.publish_all(output.signals);
                        contributions.extend(output.contributions);
                        if wave == 3 {
                            ai_ran = true;
                        }
                    }
                    Err(err) => {
                        debug!(detector = kind.name(), %err, "detector failed");
                        failed.push(kind.name().to_string());
                        ledger.record_failure(kind.name());
                    }
                }
            }

            for c in &contributions {
                ledger.add_contribution(c.clone());
            }
            let risk = ledger.current_risk_score();
            state = state.merged(
                completed,
                failed,
                bus.drain(),
                contributions,
                risk,
                started.elapsed().as_secs_f64() * 1000.0,
            );
        }

        WaveOutcome {
            state,
            ledger,
            ai_ran,
            early_exit,
            elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blackboard::SignalMap;
    use crate::config::EngineConfig;
    use crate::detectors::tests_support;
    use serde_json::json;

    async fn run_pipeline(snapshot: crate::events::RequestSnapshot) -> WaveOutcome {
        let services = tests_support::services();
        let config = Arc::new(EngineConfig::default());
        let scheduler = DetectorWaveScheduler::new(Arc::clone(&services));
        let request = Arc::new(snapshot);
        let mut seed = SignalMap::new();
        seed.insert("http.version".into(), json!(request.protocol.clone()));
        seed.insert("sig.request_count".into(), json!(0.0));
        let state = BlackboardState::initial(request, "sig-test".into(), seed);
        let ledger = DetectionLedger::new(config.ledger.clone());
        scheduler
            .run(state, config, chrono::Utc::now(), ledger)
            .await
    }

    #[tokio::test]
    async fn wave_zero_always_runs() {
        let outcome =
            run_pipeline(tests_support::snapshot("GET", "/", &[("user-agent", "curl/8.4")])).await;
        assert!(outcome.state.completed_detectors.contains("user_agent"));
        assert!(outcome.state.completed_detectors.contains("header"));
        assert!(!outcome.early_exit);
        // curl gets flagged by wave 0 and refined by the heuristic.
        assert!(outcome.state.current_risk_score > 0.5);
        assert!(outcome.ai_ran);
    }

    #[tokio::test]
    async fn ungated_waves_skip_triggered_detectors() {
        let outcome =
            run_pipeline(tests_support::snapshot("GET", "/", &[("user-agent", "curl/8.4")])).await;
        // No TLS fingerprint signal → wave 2 TLS detector never ran.
        assert!(!outcome.state.completed_detectors.contains("tls_fingerprint"));
        assert!(!outcome.state.failed_detectors.contains("tls_fingerprint"));
    }

    #[tokio::test]
    async fn evidence_is_deterministic_across_runs() {
        let snap = tests_support::snapshot(
            "GET",
            "/products",
            &[("user-agent", "python-requests/2.31"), ("accept", "*/*")],
        );
        let a = run_pipeline(snap.clone()).await;
        let b = run_pipeline(snap).await;
        let ev_a = a.ledger.to_aggregated_evidence(a.ai_ran, 0.0);
        let ev_b = b.ledger.to_aggregated_evidence(b.ai_ran, 0.0);
        assert_eq!(ev_a.bot_probability, ev_b.bot_probability);
        assert_eq!(ev_a.confidence, ev_b.confidence);
        let names_a: Vec<&str> = ev_a.contributions.iter().map(|c| c.detector_name.as_str()).collect();
        let names_b: Vec<&str> = ev_b.contributions.iter().map(|c| c.detector_name.as_str()).collect();
        assert_eq!(names_a, names_b);
    }
}
