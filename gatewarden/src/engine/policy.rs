// gatewarden/src/engine/policy.rs
//
// ActionPolicyRegistry — risk band → enforcement action. Policies are
// configuration, not code: a named policy enumerates the full band table,
// and per-path overrides select a different named policy by longest
// matching prefix. Stealth actions suppress every detection header.

use crate::config::PolicyConfig;
use crate::events::{Action, AggregatedEvidence, RiskBand};

pub struct ActionPolicyRegistry {
    config: PolicyConfig,
}

pub struct PolicyDecision {
    pub action:      Action,
    pub policy_name: String,
}

impl ActionPolicyRegistry {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    /// Resolve the policy for a path: the longest matching override prefix
    /// wins, otherwise "default".
    fn policy_name_for(&self, path: &str) -> &str {
        self.config
            .path_overrides
            .iter()
            .filter(|o| path.starts_with(&o.path_prefix))
            .max_by_key(|o| o.path_prefix.len())
            .map(|o| o.policy.as_str())
            .unwrap_or("default")
    }

    pub fn decide(&self, path: &str, band: RiskBand) -> PolicyDecision {
        let name = self.policy_name_for(path);
        let action = self
            .config
            .policies
            .get(name)
            .or_else(|| self.config.policies.get("default"))
            .map(|p| p.action_for(band))
            // No policy table at all: fail open.
            .unwrap_or(Action::Allow);
        PolicyDecision { action, policy_name: name.to_string() }
    }

    /// Response-header additions for the host adapter. Stealth actions and
    /// the reveal toggle both suppress them entirely.
    pub fn response_headers(
        &self,
        evidence: &AggregatedEvidence,
        action: &Action,
        signature_id: &str,
        early_exit: bool,
    ) -> Vec<(String, String)> {
        if !self.config.reveal_detection_headers || action.is_stealth() {
            return Vec::new();
        }
        let detectors = evidence
            .contributions
            .iter()
            .map(|c| c.detector_name.as_str())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>()
            .join(",");
        vec![
            ("X-Bot-Detection".into(), evidence.risk_band.to_string()),
            ("X-Bot-Risk-Score".into(), format!("{:.4}", evidence.bot_probability)),
            ("X-Bot-Detectors".into(), detectors),
            ("X-Bot-Processing-Ms".into(), format!("{:.2}", evidence.total_processing_ms)),
            ("X-Bot-Early-Exit".into(), early_exit.to_string()),
            ("X-Signature-ID".into(), signature_id.to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BandPolicy, PathOverride};
    use crate::events::DetectorCategory;

    #[test]
    fn default_policy_table() {
        let registry = ActionPolicyRegistry::new(PolicyConfig::default());
        assert_eq!(registry.decide("/", RiskBand::VeryLow).action, Action::Allow);
        assert_eq!(registry.decide("/", RiskBand::Low).action, Action::Allow);
        assert_eq!(registry.decide("/", RiskBand::Elevated).action, Action::LogOnly);
        assert_eq!(
            registry.decide("/", RiskBand::Medium).action,
            Action::Throttle { min_delay_ms: 200, max_delay_ms: 800 }
        );
        assert!(matches!(registry.decide("/", RiskBand::High).action, Action::Challenge { .. }));
        assert_eq!(registry.decide("/", RiskBand::VeryHigh).action, Action::Block403);
    }

    #[test]
    fn longest_prefix_override_wins() {
        let mut config = PolicyConfig::default();
        let strict = BandPolicy {
            bands: [(RiskBand::Elevated, Action::Block403)].into_iter().collect(),
        };
        config.policies.insert("strict".into(), strict);
        config.path_overrides = vec![
            PathOverride { path_prefix: "/api".into(), policy: "default".into() },
            PathOverride { path_prefix: "/api/admin".into(), policy: "strict".into() },
        ];
        let registry = ActionPolicyRegistry::new(config);
        assert_eq!(
            registry.decide("/api/admin/users", RiskBand::Elevated).action,
            Action::Block403
        );
        assert_eq!(registry.decide("/api/public", RiskBand::Elevated).action, Action::LogOnly);
    }

    #[test]
    fn stealth_actions_suppress_headers() {
        let registry = ActionPolicyRegistry::new(PolicyConfig::default());
        let evidence = AggregatedEvidence {
            bot_probability: 0.6,
            confidence: 0.5,
            risk_band: RiskBand::Medium,
            primary_bot_type: None,
            contributions: vec![crate::events::DetectionContribution {
                detector_name: "user_agent".into(),
                category: DetectorCategory::Client,
                confidence_delta: 0.5,
                weight: 1.0,
                reason: "test".into(),
                signals: Default::default(),
            }],
            category_breakdown: Default::default(),
            failed_detectors: vec![],
            total_processing_ms: 3.0,
            ai_ran: false,
        };
        let throttle = Action::Throttle { min_delay_ms: 200, max_delay_ms: 800 };
        assert!(registry.response_headers(&evidence, &throttle, "sig", false).is_empty());

        let headers = registry.response_headers(&evidence, &Action::Block403, "sig", false);
        assert!(headers.iter().any(|(k, _)| k == "X-Bot-Risk-Score"));
        assert!(headers.iter().any(|(k, v)| k == "X-Signature-ID" && v == "sig"));
    }

    #[test]
    fn reveal_toggle_suppresses_all_headers() {
        let mut config = PolicyConfig::default();
        config.reveal_detection_headers = false;
        let registry = ActionPolicyRegistry::new(config);
        let evidence = AggregatedEvidence {
            bot_probability: 0.95,
            confidence: 0.9,
            risk_band: RiskBand::VeryHigh,
            primary_bot_type: None,
            contributions: vec![],
            category_breakdown: Default::default(),
            failed_detectors: vec![],
            total_processing_ms: 1.0,
            ai_ran: false,
        };
        assert!(registry.response_headers(&evidence, &Action::Block403, "sig", false).is_empty());
    }
}
