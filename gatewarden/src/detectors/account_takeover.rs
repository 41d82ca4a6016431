// gatewarden/src/detectors/account_takeover.rs
//
// Credential-stuffing shape: one flow hammering auth routes. Triggered
// only when the current request lands in the auth bucket; history depth
// comes from the coordinator.

use serde_json::json;

use super::{DetectorContext, DetectorKind, DetectorOutput};
use crate::error::DetectorError;

pub async fn analyze(ctx: &DetectorContext) -> Result<DetectorOutput, DetectorError> {
    let params = ctx.config.detector_params(DetectorKind::AccountTakeover.name());
    let weight = params.f64_or("weight", 1.1);

    let auth_hits = ctx.services.coordinator.auth_route_count(&ctx.state.signature_id);
    let total = ctx.services.coordinator.request_count(&ctx.state.signature_id).max(1);
    let auth_share = auth_hits as f64 / total as f64;

    let mut out = DetectorOutput::none().signal("auth.hits", json!(auth_hits));

    let burst = params.u64_or("burst_threshold", 8) as usize;
    let focus = params.f64_or("focus_share", 0.6);

    if auth_hits >= burst && auth_share >= focus {
        out = out.contribute(
            DetectorKind::AccountTakeover,
            params.f64_or("stuffing_delta", 0.9),
            weight,
            format!("{auth_hits} auth attempts, {:.0}% of window", auth_share * 100.0),
            &[("bot_type", json!("credential_stuffer"))],
        );
    } else if auth_hits >= burst / 2 {
        out = out.contribute(
            DetectorKind::AccountTakeover,
            params.f64_or("elevated_delta", 0.4),
            weight,
            format!("{auth_hits} auth attempts in window"),
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

    fn feed_auth(ctx: &super::super::DetectorContext, n: usize) {
        for i in 0..n {
            ctx.services.coordinator.record_request(RequestRecord {
                request_id: format!("r-{i}"),
                signature_id: "sig-test".into(),
                timestamp: ctx.now,
                raw_path: "/login".into(),
                normalized_path: normalize::normalize("/login"),
                method: "POST".into(),
                remote_ip: "203.0.113.10".parse().unwrap(),
                country_code: None,
                asn: None,
                is_datacenter: false,
                user_agent: "x".into(),
                bot_probability: 0.5,
                detectors_ran: HashSet::new(),
                signals: HashMap::new(),
                was_escalated: false,
            });
        }
    }

    #[tokio::test]
    async fn auth_hammering_tags_credential_stuffer() {
        let ctx = context_from(snapshot("POST", "/login", &[]), SignalMap::new());
        feed_auth(&ctx, 10);
        let out = analyze(&ctx).await.unwrap();
        assert!(out.contributions[0].confidence_delta > 0.8);
        assert_eq!(
            out.contributions[0].signals.get("bot_type").unwrap(),
            &json!("credential_stuffer")
        );
    }

    #[tokio::test]
    async fn single_login_is_silent() {
        let ctx = context_from(snapshot("POST", "/login", &[]), SignalMap::new());
        feed_auth(&ctx, 1);
        let out = analyze(&ctx).await.unwrap();
        assert!(out.contributions.is_empty());
    }
}
