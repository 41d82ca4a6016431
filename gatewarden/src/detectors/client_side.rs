// gatewarden/src/detectors/client_side.rs
//
// Consumes the stored client-side fingerprint for this request's IP.
// Webdriver flags and headless hints are near-conclusive; a clean
// fingerprint with real canvas entropy is solid human evidence — it means
// the client actually executed the probe.

use serde_json::json;

use super::{DetectorContext, DetectorKind, DetectorOutput};
use crate::error::DetectorError;

pub async fn analyze(ctx: &DetectorContext) -> Result<DetectorOutput, DetectorError> {
    let params = ctx.config.detector_params(DetectorKind::ClientSide.name());
    let weight = params.f64_or("weight", 1.3);

    let Some(fp) = ctx.fingerprint_for_ip() else {
        return Ok(DetectorOutput::none());
    };

    let mut out = DetectorOutput::none()
        .signal("client_fp.webdriver", json!(fp.webdriver))
        .signal("client_fp.headless_hints", json!(fp.headless_hints));

    if fp.webdriver {
        return Ok(out.contribute(
            DetectorKind::ClientSide,
            params.f64_or("webdriver_delta", 0.95),
            weight,
            "navigator.webdriver set",
            &[("bot_type", json!("scraper"))],
        ));
    }

    if fp.headless_hints >= params.u64_or("headless_hint_threshold", 2) as u32 {
        return Ok(out.contribute(
            DetectorKind::ClientSide,
            params.f64_or("headless_delta", 0.7),
            weight,
            format!("{} headless environment hints", fp.headless_hints),
            &[],
        ));
    }

    // Platform reported by JS vs the client-hint header.
    if let (Some(reported), Some(hinted)) =
        (&fp.reported_platform, &ctx.state.request.client_hint_platform)
    {
        if !reported.eq_ignore_ascii_case(hinted) {
            out = out.contribute(
                DetectorKind::ClientSide,
                params.f64_or("platform_mismatch_delta", 0.5),
                weight,
                format!("platform mismatch: js={reported} hint={hinted}"),
                &[],
            );
            return Ok(out);
        }
    }

    if fp.canvas_entropy > params.f64_or("min_canvas_entropy", 0.3) {
        out = out.contribute(
            DetectorKind::ClientSide,
            params.f64_or("clean_delta", -0.5),
            weight,
            "fingerprint probe executed cleanly",
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
    use crate::events::BrowserFingerprintResult;
    use chrono::Utc;

    fn fp(webdriver: bool, hints: u32, canvas: f64) -> BrowserFingerprintResult {
        BrowserFingerprintResult {
            ip_hash: String::new(),
            webdriver,
            headless_hints: hints,
            canvas_entropy: canvas,
            plugin_count: 4,
            reported_platform: None,
            collected_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn webdriver_is_near_conclusive() {
        let ctx = context_from(snapshot("GET", "/", &[]), SignalMap::new());
        ctx.services.fingerprints.ingest("203.0.113.10".parse().unwrap(), fp(true, 0, 0.0));
        let out = analyze(&ctx).await.unwrap();
        assert!(out.contributions[0].confidence_delta > 0.9);
    }

    #[tokio::test]
    async fn clean_probe_is_human_evidence() {
        let ctx = context_from(snapshot("GET", "/", &[]), SignalMap::new());
        ctx.services.fingerprints.ingest("203.0.113.10".parse().unwrap(), fp(false, 0, 0.8));
        let out = analyze(&ctx).await.unwrap();
        assert!(out.contributions[0].confidence_delta < 0.0);
    }

    #[tokio::test]
    async fn silent_without_stored_fingerprint() {
        let ctx = context_from(snapshot("GET", "/", &[]), SignalMap::new());
        let out = analyze(&ctx).await.unwrap();
        assert!(out.contributions.is_empty());
    }
}
