// gatewarden/src/engine/ledger.rs
//
// DetectionLedger — the per-request accumulator. Detectors feed it
// contributions; finalization fuses them into a calibrated probability,
// a coverage-bounded confidence, a risk band, and the dominant bot type.
// Aggregation is commutative: intra-wave completion order never changes
// the result.

use std::collections::HashMap;

use crate::config::LedgerConfig;
use crate::events::{
    AggregatedEvidence, BotType, DetectionContribution, DetectorCategory, RiskBand,
};

const WEIGHT_EPSILON: f64 = 1e-9;

pub struct DetectionLedger {
    config:        LedgerConfig,
    contributions: Vec<DetectionContribution>,
    failed:        Vec<String>,
}

impl DetectionLedger {
    pub fn new(config: LedgerConfig) -> Self {
        Self { config, contributions: Vec::new(), failed: Vec::new() }
    }

    pub fn add_contribution(&mut self, contribution: DetectionContribution) {
        self.contributions.push(contribution);
    }

    pub fn record_failure(&mut self, detector_name: &str) {
        self.failed.push(detector_name.to_string());
    }

    pub fn contributions(&self) -> &[DetectionContribution] {
        &self.contributions
    }

    /// Interim risk score between waves — same fusion as finalization, on
    /// whatever has accumulated so far.
    pub fn current_risk_score(&self) -> f64 {
        self.calibrated_probability()
    }

    fn calibrated_probability(&self) -> f64 {
        let mut weighted_delta = 0.0;
        let mut weight_sum = 0.0;
        for c in &self.contributions {
            if c.weight > 0.0 {
                weighted_delta += c.confidence_delta * c.weight;
                weight_sum += c.weight;
            }
        }
        let raw = weighted_delta / weight_sum.max(WEIGHT_EPSILON);
        sigmoid(raw, self.config.sigmoid_slope)
    }

    pub fn to_aggregated_evidence(&self, ai_ran: bool, elapsed_ms: f64) -> AggregatedEvidence {
        let bot_probability = self.calibrated_probability();

        // Coverage: how much of the fixed detector set actually ran.
        let divisor = self.config.coverage_divisor().max(WEIGHT_EPSILON);
        let mut covered = 0.0;
        let mut seen: std::collections::HashSet<&str> = std::collections::HashSet::new();
        for c in &self.contributions {
            if seen.insert(c.detector_name.as_str()) {
                if let Some(w) = self.config.coverage_weights.get(&c.detector_name) {
                    covered += w;
                }
            }
        }
        let coverage_confidence = (covered / divisor).clamp(0.0, 1.0);

        // Decisiveness: weight-normalized mean |delta|.
        let mut decisive = 0.0;
        let mut weight_sum = 0.0;
        for c in &self.contributions {
            if c.weight > 0.0 {
                decisive += c.confidence_delta.abs() * c.weight;
                weight_sum += c.weight;
            }
        }
        let ledger_confidence = if weight_sum > 0.0 {
            (decisive / weight_sum).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let confidence = ledger_confidence.min(coverage_confidence);

        // Category breakdown: positive-weight bot-leaning evidence per
        // category, weight-normalized within the category.
        let mut category_delta: HashMap<DetectorCategory, (f64, f64)> = HashMap::new();
        for c in &self.contributions {
            if c.weight > 0.0 {
                let entry = category_delta.entry(c.category).or_insert((0.0, 0.0));
                entry.0 += c.confidence_delta * c.weight;
                entry.1 += c.weight;
            }
        }
        let category_breakdown: std::collections::BTreeMap<String, f64> = category_delta
            .iter()
            .map(|(cat, (delta, weight))| (cat.to_string(), (delta / weight).clamp(-1.0, 1.0)))
            .collect();

        let primary_bot_type = self.primary_bot_type(&category_breakdown);

        AggregatedEvidence {
            bot_probability,
            confidence,
            risk_band: self.band_for(bot_probability),
            primary_bot_type,
            contributions: self.contributions.clone(),
            category_breakdown,
            failed_detectors: self.failed.clone(),
            total_processing_ms: elapsed_ms,
            ai_ran,
        }
    }

    pub fn band_for(&self, probability: f64) -> RiskBand {
        let [low, elevated, medium, high, very_high] = self.config.band_thresholds;
        if probability < low {
            RiskBand::VeryLow
        } else if probability < elevated {
            RiskBand::Low
        } else if probability < medium {
            RiskBand::Elevated
        } else if probability < high {
            RiskBand::Medium
        } else if probability < very_high {
            RiskBand::High
        } else {
            RiskBand::VeryHigh
        }
    }

    /// Argmax over categories whose normalized delta clears the bar, mapped
    /// to the bot type that category most plausibly indicates.
    fn primary_bot_type(
        &self,
        breakdown: &std::collections::BTreeMap<String, f64>,
    ) -> Option<BotType> {
        let (category, confidence) = breakdown
            .iter()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.0.cmp(a.0)))?;
        if *confidence < self.config.min_category_confidence {
            return None;
        }
        // A bot-type signal published by a detector wins over the category
        // heuristic.
        for c in &self.contributions {
            if let Some(bt) = c.signals.get("bot_type").and_then(|v| v.as_str()) {
                return Some(match bt {
                    "scraper"           => BotType::Scraper,
                    "crawler"           => BotType::Crawler,
                    "security_scanner"  => BotType::SecurityScanner,
                    "credential_stuffer" => BotType::CredentialStuffer,
                    "ai_agent"          => BotType::AiAgent,
                    _ => BotType::Unknown,
                });
            }
        }
        Some(match category.as_str() {
            "behavioral" => BotType::Scraper,
            "client"     => BotType::Crawler,
            "protocol"   => BotType::Scraper,
            "network"    => BotType::Unknown,
            "reputation" => BotType::Unknown,
            "learning"   => BotType::Unknown,
            _ => BotType::Unknown,
        })
    }
}

fn sigmoid(raw: f64, slope: f64) -> f64 {
    1.0 / (1.0 + (-slope * raw).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contribution(name: &str, delta: f64, weight: f64) -> DetectionContribution {
        DetectionContribution {
            detector_name: name.to_string(),
            category: DetectorCategory::Client,
            confidence_delta: delta,
            weight,
            reason: String::new(),
            signals: Default::default(),
        }
    }

    #[test]
    fn empty_ledger_sits_at_midpoint() {
        let ledger = DetectionLedger::new(LedgerConfig::default());
        let ev = ledger.to_aggregated_evidence(false, 1.0);
        assert!((ev.bot_probability - 0.5).abs() < 1e-9);
        assert_eq!(ev.confidence, 0.0);
    }

    #[test]
    fn aggregation_is_commutative() {
        let contributions = vec![
            contribution("user_agent", 0.8, 1.0),
            contribution("ip", -0.2, 0.5),
            contribution("header", 0.4, 1.0),
        ];
        let mut forward = DetectionLedger::new(LedgerConfig::default());
        for c in contributions.clone() {
            forward.add_contribution(c);
        }
        let mut reverse = DetectionLedger::new(LedgerConfig::default());
        for c in contributions.into_iter().rev() {
            reverse.add_contribution(c);
        }
        let a = forward.to_aggregated_evidence(false, 0.0);
        let b = reverse.to_aggregated_evidence(false, 0.0);
        assert_eq!(a.bot_probability, b.bot_probability);
        assert_eq!(a.confidence, b.confidence);
        assert_eq!(a.risk_band, b.risk_band);
    }

    #[test]
    fn coverage_confidence_uses_fixed_weight_set() {
        let mut ledger = DetectionLedger::new(LedgerConfig::default());
        for name in ["user_agent", "ip", "header", "behavioral"] {
            ledger.add_contribution(contribution(name, 1.0, 1.0));
        }
        let ev = ledger.to_aggregated_evidence(false, 0.0);
        assert!((ev.confidence - 3.5 / 8.1).abs() < 1e-6);

        ledger.add_contribution(contribution("heuristic", 1.0, 2.0));
        let ev = ledger.to_aggregated_evidence(true, 0.0);
        assert!((ev.confidence - 5.5 / 8.1).abs() < 1e-6);

        // Detectors outside the coverage set do not raise confidence.
        ledger.add_contribution(contribution("country_reputation", 1.0, 1.0));
        let ev = ledger.to_aggregated_evidence(true, 0.0);
        assert!((ev.confidence - 5.5 / 8.1).abs() < 1e-6);
    }

    #[test]
    fn zero_weight_contributions_are_ignored_in_fusion() {
        let mut ledger = DetectionLedger::new(LedgerConfig::default());
        ledger.add_contribution(contribution("user_agent", 1.0, 0.0));
        let ev = ledger.to_aggregated_evidence(false, 0.0);
        assert!((ev.bot_probability - 0.5).abs() < 1e-9);
    }

    #[test]
    fn band_thresholds_are_half_open() {
        let ledger = DetectionLedger::new(LedgerConfig::default());
        assert_eq!(ledger.band_for(0.0), RiskBand::VeryLow);
        assert_eq!(ledger.band_for(0.15), RiskBand::Low);
        assert_eq!(ledger.band_for(0.35), RiskBand::Elevated);
        assert_eq!(ledger.band_for(0.55), RiskBand::Medium);
        assert_eq!(ledger.band_for(0.70), RiskBand::High);
        assert_eq!(ledger.band_for(0.85), RiskBand::VeryHigh);
        assert_eq!(ledger.band_for(1.0), RiskBand::VeryHigh);
    }

    #[test]
    fn strong_positive_evidence_lands_high_band() {
        let mut ledger = DetectionLedger::new(LedgerConfig::default());
        ledger.add_contribution(contribution("user_agent", 0.9, 1.0));
        ledger.add_contribution(contribution("behavioral", 0.95, 1.5));
        let ev = ledger.to_aggregated_evidence(false, 0.0);
        assert!(ev.bot_probability > 0.85);
        assert_eq!(ev.risk_band, RiskBand::VeryHigh);
    }
}
