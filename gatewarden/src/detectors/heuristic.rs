// gatewarden/src/detectors/heuristic.rs
//
// Late-wave heuristic refinement — a weighted read over everything the
// earlier waves published. This is where a learned model would plug in;
// the shipped weights are hand-calibrated and configurable per
// deployment.

use serde_json::json;

use super::{DetectorContext, DetectorKind, DetectorOutput};
use crate::error::DetectorError;

pub async fn analyze(ctx: &DetectorContext) -> Result<DetectorOutput, DetectorError> {
    let state = &ctx.state;
    let params = ctx.config.detector_params(DetectorKind::Heuristic.name());
    let weight = params.f64_or("weight", 2.0);

    let mut score = 0.0f64;
    let mut terms: Vec<String> = Vec::new();

    if state.signal_bool("ua.bot_keyword") || state.signal_bool("ua.missing") {
        score += params.f64_or("w_ua", 0.30);
        terms.push("ua".into());
    }
    if state.signal_bool("ip.datacenter") {
        score += params.f64_or("w_datacenter", 0.15);
        terms.push("datacenter".into());
    }
    if let Some(loop_score) = state.signal_f64("drift.loop_score") {
        if loop_score > 0.3 {
            score += params.f64_or("w_loop", 0.20) * loop_score;
            terms.push("loop".into());
        }
    }
    if let Some(entropy) = state.signal_f64("spectral.entropy") {
        if entropy < 0.55 {
            score += params.f64_or("w_spectral", 0.20) * (1.0 - entropy);
            terms.push("spectral".into());
        }
    }
    if let Some(aberration) = state.signal_f64("behavior.aberration") {
        if aberration > 0.5 {
            score += params.f64_or("w_aberration", 0.15) * aberration;
            terms.push("aberration".into());
        }
    }
    if state.signal_bool("tls.ja4_library") {
        score += params.f64_or("w_tls", 0.15);
        terms.push("tls".into());
    }
    if state.signal_bool("security_tool.detected") {
        score += params.f64_or("w_security_tool", 0.25);
        terms.push("security_tool".into());
    }
    if let Some(rate) = state.signal_f64("geo.country_bot_rate") {
        score += params.f64_or("w_reputation", 0.10) * rate;
        terms.push("reputation".into());
    }

    // Human-leaning counterweights.
    if state.signal_bool("cache.conditional") {
        score -= params.f64_or("w_conditional", 0.10);
    }
    if state.signal_bool("header.sec_fetch") {
        score -= params.f64_or("w_sec_fetch", 0.10);
    }

    if terms.is_empty() && score.abs() < 0.05 {
        return Ok(DetectorOutput::none());
    }

    let delta = score.clamp(-1.0, 1.0);
    Ok(DetectorOutput::none()
        .signal("heuristic.score", json!(delta))
        .contribute(
            DetectorKind::Heuristic,
            delta,
            weight,
            if terms.is_empty() {
                "human-leaning signal mix".to_string()
            } else {
                format!("signal mix: {}", terms.join("+"))
            },
            &[],
        ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blackboard::SignalMap;
    use crate::detectors::tests_support::{context_from, snapshot};

    #[tokio::test]
    async fn stacks_bot_signals() {
        let mut seed = SignalMap::new();
        seed.insert("ua.bot_keyword".into(), json!(true));
        seed.insert("ip.datacenter".into(), json!(true));
        seed.insert("drift.loop_score".into(), json!(0.9));
        let ctx = context_from(snapshot("GET", "/", &[]), seed);
        let out = analyze(&ctx).await.unwrap();
        assert!(out.contributions[0].confidence_delta > 0.5);
        assert_eq!(out.contributions[0].weight, 2.0);
    }

    #[tokio::test]
    async fn human_envelope_scores_negative() {
        let mut seed = SignalMap::new();
        seed.insert("cache.conditional".into(), json!(true));
        seed.insert("header.sec_fetch".into(), json!(true));
        let ctx = context_from(snapshot("GET", "/", &[]), seed);
        let out = analyze(&ctx).await.unwrap();
        assert!(out.contributions[0].confidence_delta < 0.0);
    }

    #[tokio::test]
    async fn silent_with_no_signals() {
        let ctx = context_from(snapshot("GET", "/", &[]), SignalMap::new());
        let out = analyze(&ctx).await.unwrap();
        assert!(out.contributions.is_empty());
    }
}
