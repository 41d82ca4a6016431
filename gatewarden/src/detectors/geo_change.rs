// gatewarden/src/detectors/geo_change.rs
//
// Country churn within one signature's window. A signature is already
// pinned to a /24-or-/64 flow, so country changes mean rotating proxy
// exits, not travel.

use serde_json::json;

use super::{DetectorContext, DetectorKind, DetectorOutput};
use crate::error::DetectorError;

pub async fn analyze(ctx: &DetectorContext) -> Result<DetectorOutput, DetectorError> {
    let params = ctx.config.detector_params(DetectorKind::GeoChange.name());
    let weight = params.f64_or("weight", 0.9);

    let Some(current) = ctx
        .state
        .request
        .geo
        .as_ref()
        .and_then(|g| g.country_code.clone())
    else {
        return Ok(DetectorOutput::none());
    };

    let seen = ctx.services.coordinator.countries_seen(&ctx.state.signature_id);
    if seen.is_empty() {
        return Ok(DetectorOutput::none());
    }

    let changed = seen
        .last()
        .map(|last| !last.eq_ignore_ascii_case(&current))
        .unwrap_or(false);
    let distinct = {
        let mut all = seen.clone();
        if !all.iter().any(|c| c.eq_ignore_ascii_case(&current)) {
            all.push(current.clone());
        }
        all.len()
    };

    let mut out = DetectorOutput::none().signal("geo.distinct_countries", json!(distinct));

    if distinct >= params.u64_or("rotation_threshold", 3) as usize {
        out = out.contribute(
            DetectorKind::GeoChange,
            params.f64_or("rotation_delta", 0.7),
            weight,
            format!("{distinct} exit countries in one flow"),
            &[("countries", json!(distinct))],
        );
    } else if changed {
        out = out.contribute(
            DetectorKind::GeoChange,
            params.f64_or("change_delta", 0.35),
            weight,
            format!("country changed to {current}"),
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
    use crate::events::{GeoInfo, RequestRecord};
    use crate::normalize;
    use std::collections::{HashMap, HashSet};

    fn record_with_country(ctx: &super::super::DetectorContext, i: usize, country: &str) {
        ctx.services.coordinator.record_request(RequestRecord {
            request_id: format!("r-{i}"),
            signature_id: "sig-test".into(),
            timestamp: ctx.now,
            raw_path: "/x".into(),
            normalized_path: normalize::normalize("/x"),
            method: "GET".into(),
            remote_ip: "203.0.113.10".parse().unwrap(),
            country_code: Some(country.into()),
            asn: None,
            is_datacenter: false,
            user_agent: "x".into(),
            bot_probability: 0.5,
            detectors_ran: HashSet::new(),
            signals: HashMap::new(),
            was_escalated: false,
        });
    }

    fn ctx_with_country(country: &str) -> super::super::DetectorContext {
        let mut snap = snapshot("GET", "/x", &[]);
        snap.geo = Some(GeoInfo {
            country_code: Some(country.into()),
            continent: None,
            region: None,
            latitude: None,
            longitude: None,
            asn: None,
            is_datacenter: false,
        });
        context_from(snap, SignalMap::new())
    }

    #[tokio::test]
    async fn proxy_rotation_scores_high() {
        let ctx = ctx_with_country("BR");
        for (i, c) in ["DE", "NL", "US"].iter().enumerate() {
            record_with_country(&ctx, i, c);
        }
        let out = analyze(&ctx).await.unwrap();
        assert!(out.contributions[0].confidence_delta > 0.5);
    }

    #[tokio::test]
    async fn stable_country_is_silent() {
        let ctx = ctx_with_country("DE");
        record_with_country(&ctx, 0, "DE");
        let out = analyze(&ctx).await.unwrap();
        assert!(out.contributions.is_empty());
    }
}
