// gatewarden/src/detectors/response_behavior.rs
//
// How the client behaved after prior enforcement. A flow that keeps
// returning at full cadence through repeated escalations is a retrying
// script; humans either solve the challenge or leave.

use serde_json::json;

use super::{DetectorContext, DetectorKind, DetectorOutput};
use crate::error::DetectorError;

pub async fn analyze(ctx: &DetectorContext) -> Result<DetectorOutput, DetectorError> {
    let params = ctx.config.detector_params(DetectorKind::ResponseBehavior.name());
    let weight = params.f64_or("weight", 1.0);

    let Some(behavior) = ctx
        .services
        .coordinator
        .signature_behavior(&ctx.state.signature_id)
    else {
        return Ok(DetectorOutput::none());
    };
    if behavior.request_count < 5 || behavior.escalated_count == 0 {
        return Ok(DetectorOutput::none());
    }

    let escalated_share = behavior.escalated_count as f64 / behavior.request_count as f64;
    let mut out = DetectorOutput::none()
        .signal("response.escalated_count", json!(behavior.escalated_count));

    if escalated_share >= params.f64_or("persistent_share", 0.5) {
        out = out.contribute(
            DetectorKind::ResponseBehavior,
            params.f64_or("persistent_delta", 0.8),
            weight,
            format!(
                "persists through enforcement: {}/{} escalated",
                behavior.escalated_count, behavior.request_count
            ),
            &[],
        );
    } else if escalated_share >= params.f64_or("repeat_share", 0.2) {
        out = out.contribute(
            DetectorKind::ResponseBehavior,
            params.f64_or("repeat_delta", 0.4),
            weight,
            format!("repeat escalations: {}", behavior.escalated_count),
            &[],
        );
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blackboard::SignalMap;
    use crate::detectors::tests_support::{context_from, snapshot};
    use crate::events::RequestRecord;
    use crate::normalize;
    use std::collections::{HashMap, HashSet};

    fn feed(ctx: &super::super::DetectorContext, n: usize, escalated: usize) {
        for i in 0..n {
            ctx.services.coordinator.record_request(RequestRecord {
                request_id: format!("r-{i}"),
                signature_id: "sig-test".into(),
                timestamp: ctx.now,
                raw_path: "/data".into(),
                normalized_path: normalize::normalize("/data"),
                method: "GET".into(),
                remote_ip: "203.0.113.10".parse().unwrap(),
                country_code: None,
                asn: None,
                is_datacenter: false,
                user_agent: "x".into(),
                bot_probability: 0.6,
                detectors_ran: HashSet::new(),
                signals: HashMap::new(),
                was_escalated: i < escalated,
            });
        }
    }

    #[tokio::test]
    async fn persistence_through_enforcement_scores_high() {
        let ctx = context_from(snapshot("GET", "/data", &[]), SignalMap::new());
        feed(&ctx, 10, 7);
        let out = analyze(&ctx).await.unwrap();
        assert!(out.contributions[0].confidence_delta > 0.7);
    }

    #[tokio::test]
    async fn silent_without_prior_escalation() {
        let ctx = context_from(snapshot("GET", "/data", &[]), SignalMap::new());
        feed(&ctx, 10, 0);
        let out = analyze(&ctx).await.unwrap();
        assert!(out.contributions.is_empty());
    }
}
