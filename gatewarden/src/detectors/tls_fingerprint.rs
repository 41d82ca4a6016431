// gatewarden/src/detectors/tls_fingerprint.rs
//
// JA4 consistency. A browser UA presenting a known HTTP-library TLS
// fingerprint is a forgery; a matching pair is mild human evidence. The
// known-library prefixes are config so deployments can extend them from
// threat intel.

use serde_json::json;

use super::{DetectorContext, DetectorKind, DetectorOutput};
use crate::error::DetectorError;

// JA4 leading-token shapes commonly emitted by non-browser stacks.
const LIBRARY_JA4_MARKERS: &[&str] = &["t13d190900", "t12d1908", "t13d1516h2_8daaf6152771"];

pub async fn analyze(ctx: &DetectorContext) -> Result<DetectorOutput, DetectorError> {
    let params = ctx.config.detector_params(DetectorKind::TlsFingerprint.name());
    let weight = params.f64_or("weight", 1.0);

    let Some(ja4) = ctx.state.request.tls_fingerprint.clone() else {
        return Ok(DetectorOutput::none());
    };
    let ja4_lower = ja4.to_lowercase();
    let ua = ctx.state.request.user_agent().to_lowercase();
    let claims_browser = ua.starts_with("mozilla/");

    let looks_library = LIBRARY_JA4_MARKERS.iter().any(|m| ja4_lower.starts_with(m));

    let mut out = DetectorOutput::none().signal("tls.ja4_library", json!(looks_library));

    if claims_browser && looks_library {
        out = out.contribute(
            DetectorKind::TlsFingerprint,
            params.f64_or("mismatch_delta", 0.85),
            weight,
            "browser UA over library TLS stack",
            &[("ja4", json!(ja4))],
        );
    } else if looks_library {
        out = out.contribute(
            DetectorKind::TlsFingerprint,
            params.f64_or("library_delta", 0.4),
            weight,
            "library TLS fingerprint",
            &[("ja4", json!(ja4))],
        );
    } else if claims_browser {
        out = out.contribute(
            DetectorKind::TlsFingerprint,
            params.f64_or("consistent_delta", -0.2),
            weight,
            "TLS stack consistent with browser claim",
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
    async fn browser_ua_over_library_tls_is_forgery() {
        let mut snap = snapshot("GET", "/", &[("user-agent", "Mozilla/5.0 Chrome/126.0")]);
        snap.tls_fingerprint = Some("t13d190900_9dc949149365_97f8aa674fd9".into());
        let ctx = context_from(snap, SignalMap::new());
        let out = analyze(&ctx).await.unwrap();
        assert!(out.contributions[0].confidence_delta > 0.8);
    }

    #[tokio::test]
    async fn consistent_browser_pair_leans_human() {
        let mut snap = snapshot("GET", "/", &[("user-agent", "Mozilla/5.0 Chrome/126.0")]);
        snap.tls_fingerprint = Some("t13d1517h2_salt_browserish".into());
        let ctx = context_from(snap, SignalMap::new());
        let out = analyze(&ctx).await.unwrap();
        assert!(out.contributions[0].confidence_delta < 0.0);
    }

    #[tokio::test]
    async fn silent_without_tls_fingerprint() {
        let ctx = context_from(snapshot("GET", "/", &[]), SignalMap::new());
        let out = analyze(&ctx).await.unwrap();
        assert!(out.contributions.is_empty());
    }
}
