// gatewarden/src/blackboard.rs
//
// BlackboardState — the immutable per-request view detectors read from.
// Detectors never mutate shared state: each returns signals and
// contributions, and the scheduler folds them into the next snapshot
// between waves. Trigger predicates gate detector eligibility against the
// accumulated signal map.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::Value;

use crate::events::{DetectionContribution, RequestSnapshot};

/// Signal keys are plain strings; values are JSON so evidence survives into
/// records and audit lines untouched.
pub type SignalMap = BTreeMap<String, Value>;

#[derive(Debug, Clone)]
pub struct BlackboardState {
    pub request:            Arc<RequestSnapshot>,
    pub signature_id:       String,
    pub current_risk_score: f64,
    pub signals:            Arc<SignalMap>,
    pub completed_detectors: Arc<BTreeSet<String>>,
    pub failed_detectors:   Arc<BTreeSet<String>>,
    pub contributions:      Arc<Vec<DetectionContribution>>,
    pub elapsed_ms:         f64,
}

impl BlackboardState {
    pub fn initial(request: Arc<RequestSnapshot>, signature_id: String, seed: SignalMap) -> Self {
        Self {
            request,
            signature_id,
            current_risk_score: 0.0,
            signals: Arc::new(seed),
            completed_detectors: Arc::new(BTreeSet::new()),
            failed_detectors: Arc::new(BTreeSet::new()),
            contributions: Arc::new(Vec::new()),
            elapsed_ms: 0.0,
        }
    }

    pub fn signal(&self, key: &str) -> Option<&Value> {
        self.signals.get(key)
    }

    pub fn signal_f64(&self, key: &str) -> Option<f64> {
        self.signals.get(key).and_then(|v| v.as_f64())
    }

    pub fn signal_str(&self, key: &str) -> Option<&str> {
        self.signals.get(key).and_then(|v| v.as_str())
    }

    pub fn signal_bool(&self, key: &str) -> bool {
        self.signals
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Functional evolution between waves: fold completed/failed detector
    /// names, published signals, and appended contributions into a fresh
    /// snapshot. The previous state is untouched.
    pub fn merged(
        &self,
        completed: impl IntoIterator<Item = String>,
        failed: impl IntoIterator<Item = String>,
        published: impl IntoIterator<Item = (String, Value)>,
        contributions: impl IntoIterator<Item = DetectionContribution>,
        current_risk_score: f64,
        elapsed_ms: f64,
    ) -> Self {
        let mut signals = (*self.signals).clone();
        signals.extend(published);

        let mut completed_set = (*self.completed_detectors).clone();
        completed_set.extend(completed);

        let mut failed_set = (*self.failed_detectors).clone();
        failed_set.extend(failed);

        let mut all_contributions = (*self.contributions).clone();
        all_contributions.extend(contributions);

        Self {
            request: Arc::clone(&self.request),
            signature_id: self.signature_id.clone(),
            current_risk_score,
            signals: Arc::new(signals),
            completed_detectors: Arc::new(completed_set),
            failed_detectors: Arc::new(failed_set),
            contributions: Arc::new(all_contributions),
            elapsed_ms,
        }
    }
}

// ── Signal bus ────────────────────────────────────────────────────────────────

/// Append-only collector for the signals one wave publishes. Detectors
/// return their publications; the scheduler drains the bus into the next
/// state snapshot. Nothing reads a signal mid-wave.
#[derive(Debug, Default)]
pub struct SignalBus {
    published: Vec<(String, Value)>,
}

impl SignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&mut self, key: String, value: Value) {
        self.published.push((key, value));
    }

    pub fn publish_all(&mut self, signals: impl IntoIterator<Item = (String, Value)>) {
        self.published.extend(signals);
    }

    pub fn drain(self) -> Vec<(String, Value)> {
        self.published
    }

    pub fn len(&self) -> usize {
        self.published.len()
    }

    pub fn is_empty(&self) -> bool {
        self.published.is_empty()
    }
}

// ── Trigger predicates ────────────────────────────────────────────────────────

/// Minimum signal conditions a detector needs before it may run. A detector
/// with no triggers is always eligible.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    SignalExists(&'static str),
    SignalEquals(&'static str, Value),
    SignalAtLeast(&'static str, f64),
}

impl Trigger {
    pub fn is_satisfied(&self, state: &BlackboardState) -> bool {
        match self {
            Self::SignalExists(key) => state.signal(key).is_some(),
            Self::SignalEquals(key, expected) => state.signal(key) == Some(expected),
            Self::SignalAtLeast(key, min) => {
                state.signal_f64(key).map(|v| v >= *min).unwrap_or(false)
            }
        }
    }
}

pub fn all_triggers_satisfied(triggers: &[Trigger], state: &BlackboardState) -> bool {
    triggers.iter().all(|t| t.is_satisfied(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn state(seed: SignalMap) -> BlackboardState {
        let request = Arc::new(RequestSnapshot {
            request_id:  "r".into(),
            method:      "GET".into(),
            path:        "/".into(),
            headers:     vec![],
            remote_ip:   "192.0.2.1".parse().unwrap(),
            remote_port: 443,
            protocol:    "1.1".into(),
            tls_fingerprint: None,
            h2_settings_hash: None,
            geo:         None,
            client_hint_platform: None,
            received_at: Utc::now(),
            bot_label:   None,
        });
        BlackboardState::initial(request, "sig".into(), seed)
    }

    #[test]
    fn triggers_gate_on_signal_map() {
        let mut seed = SignalMap::new();
        seed.insert("ua.present".into(), json!(true));
        seed.insert("sig.request_count".into(), json!(7.0));
        let s = state(seed);

        assert!(Trigger::SignalExists("ua.present").is_satisfied(&s));
        assert!(!Trigger::SignalExists("tls.ja4").is_satisfied(&s));
        assert!(Trigger::SignalAtLeast("sig.request_count", 5.0).is_satisfied(&s));
        assert!(!Trigger::SignalAtLeast("sig.request_count", 8.0).is_satisfied(&s));
        assert!(Trigger::SignalEquals("ua.present", json!(true)).is_satisfied(&s));
    }

    #[test]
    fn merged_is_functional() {
        let s0 = state(SignalMap::new());
        let s1 = s0.merged(
            ["user_agent".to_string()],
            [],
            [("ua.bot_keyword".to_string(), json!(true))],
            [],
            0.3,
            1.5,
        );
        // Old snapshot untouched.
        assert!(s0.signal("ua.bot_keyword").is_none());
        assert!(s0.completed_detectors.is_empty());
        // New snapshot folded.
        assert!(s1.signal_bool("ua.bot_keyword"));
        assert!(s1.completed_detectors.contains("user_agent"));
        assert_eq!(s1.current_risk_score, 0.3);
    }
}
