// gatewarden/src/detectors/http2_fingerprint.rs
//
// Protocol-version plausibility plus HTTP/2 SETTINGS shape. Modern
// browsers negotiate h2/h3; a "browser" arriving over HTTP/1.1 with no
// settings hash is usually a library. Well-known library settings hashes
// score directly.

use serde_json::json;

use super::{DetectorContext, DetectorKind, DetectorOutput};
use crate::error::DetectorError;

const LIBRARY_H2_HASHES: &[&str] = &["2:0;4:65535;6:262144", "1:4096;2:0;4:65535"];

pub async fn analyze(ctx: &DetectorContext) -> Result<DetectorOutput, DetectorError> {
    let params = ctx.config.detector_params(DetectorKind::Http2Fingerprint.name());
    let weight = params.f64_or("weight", 0.9);

    let request = &ctx.state.request;
    let ua = request.user_agent().to_lowercase();
    let claims_browser = ua.starts_with("mozilla/");
    let version = request.protocol.as_str();

    let mut out = DetectorOutput::none().signal("h2.version", json!(version));

    if let Some(settings) = &request.h2_settings_hash {
        if LIBRARY_H2_HASHES.contains(&settings.as_str()) {
            return Ok(out.contribute(
                DetectorKind::Http2Fingerprint,
                params.f64_or("library_settings_delta", 0.6),
                weight,
                "HTTP/2 SETTINGS matches known library profile",
                &[("h2_settings", json!(settings))],
            ));
        }
    }

    if claims_browser && version == "1.1" {
        out = out.contribute(
            DetectorKind::Http2Fingerprint,
            params.f64_or("downgrade_delta", 0.35),
            weight,
            "browser claim over HTTP/1.1",
            &[],
        );
    } else if claims_browser && (version == "2" || version == "3") {
        out = out.contribute(
            DetectorKind::Http2Fingerprint,
            params.f64_or("consistent_delta", -0.1),
            weight,
            "protocol version consistent with browser claim",
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

    #[tokio::test]
    async fn browser_over_http11_is_suspicious() {
        let snap = snapshot("GET", "/", &[("user-agent", "Mozilla/5.0 Chrome/126.0")]);
        let ctx = context_from(snap, SignalMap::new());
        let out = analyze(&ctx).await.unwrap();
        assert!(out.contributions[0].confidence_delta > 0.0);
    }

    #[tokio::test]
    async fn library_settings_hash_scores_directly() {
        let mut snap = snapshot("GET", "/", &[("user-agent", "Mozilla/5.0 Chrome/126.0")]);
        snap.protocol = "2".into();
        snap.h2_settings_hash = Some("2:0;4:65535;6:262144".into());
        let ctx = context_from(snap, SignalMap::new());
        let out = analyze(&ctx).await.unwrap();
        assert!(out.contributions[0].confidence_delta >= 0.6);
    }

    #[tokio::test]
    async fn h2_browser_is_consistent() {
        let mut snap = snapshot("GET", "/", &[("user-agent", "Mozilla/5.0 Chrome/126.0")]);
        snap.protocol = "2".into();
        let ctx = context_from(snap, SignalMap::new());
        let out = analyze(&ctx).await.unwrap();
        assert!(out.contributions[0].confidence_delta < 0.0);
    }
}
