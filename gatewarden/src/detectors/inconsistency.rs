// gatewarden/src/detectors/inconsistency.rs
//
// Multi-layer correlation over signals the earlier waves published.
// Individual layers can each look plausible while the combination is
// impossible; this detector only fires on the combinations.

use serde_json::json;

use super::{DetectorContext, DetectorKind, DetectorOutput};
use crate::error::DetectorError;

pub async fn analyze(ctx: &DetectorContext) -> Result<DetectorOutput, DetectorError> {
    let state = &ctx.state;
    let params = ctx.config.detector_params(DetectorKind::Inconsistency.name());
    let weight = params.f64_or("weight", 1.0);

    let ua = state.request.user_agent().to_lowercase();
    let claims_browser = ua.starts_with("mozilla/");

    let mut score = 0.0f64;
    let mut reasons: Vec<String> = Vec::new();

    // Browser claim with neither sec-fetch metadata nor an accept header.
    if claims_browser && !state.signal_bool("header.sec_fetch") {
        if state
            .signal_f64("header.count")
            .map(|c| c <= 3.0)
            .unwrap_or(false)
        {
            score += 0.4;
            reasons.push("browser_claim_minimal_headers".into());
        }
    }

    // UA platform vs client-hint platform.
    if let Some(hint) = &state.request.client_hint_platform {
        let hint = hint.to_lowercase();
        let ua_platform = if ua.contains("windows") {
            Some("windows")
        } else if ua.contains("mac os") || ua.contains("macintosh") {
            Some("macos")
        } else if ua.contains("linux") || ua.contains("x11") {
            Some("linux")
        } else if ua.contains("android") {
            Some("android")
        } else {
            None
        };
        if let Some(p) = ua_platform {
            if !hint.contains(p) && !(p == "macos" && hint.contains("mac")) {
                score += 0.4;
                reasons.push(format!("platform_mismatch:ua={p}:hint={hint}"));
            }
        }
    }

    // Library TLS under a browser claim was published by wave 2.
    if claims_browser && state.signal_bool("tls.ja4_library") {
        score += 0.3;
        reasons.push("tls_layer_contradiction".into());
    }

    // Declared AI crawler hammering auth routes does not add up.
    if state.signal("ua.ai_crawler").is_some()
        && state.signal_str("route.bucket") == Some("auth")
    {
        score += 0.3;
        reasons.push("ai_crawler_on_auth_route".into());
    }

    if reasons.is_empty() {
        return Ok(DetectorOutput::none());
    }

    Ok(DetectorOutput::none()
        .signal("inconsistency.count", json!(reasons.len()))
        .contribute(
            DetectorKind::Inconsistency,
            score.min(1.0),
            weight,
            reasons.join(" "),
            &[],
        ))
}
