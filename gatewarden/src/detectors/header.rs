// gatewarden/src/detectors/header.rs
//
// Header hygiene checks. Real browsers send a predictable envelope
// (Accept, Accept-Language, Accept-Encoding, plus sec-fetch-* on modern
// engines); scripted clients skip most of it or send it in unnatural
// shapes.

use serde_json::json;

use super::{DetectorContext, DetectorKind, DetectorOutput};
use crate::error::DetectorError;

const EXPECTED_BROWSER_HEADERS: &[&str] = &["accept", "accept-language", "accept-encoding"];

pub async fn analyze(ctx: &DetectorContext) -> Result<DetectorOutput, DetectorError> {
    let request = &ctx.state.request;
    let params = ctx.config.detector_params(DetectorKind::Header.name());
    let weight = params.f64_or("weight", 1.0);

    let names = request.header_names_in_order();
    let mut missing: Vec<&str> = Vec::new();
    for expected in EXPECTED_BROWSER_HEADERS {
        if !names.iter().any(|n| n == expected) {
            missing.push(expected);
        }
    }

    let has_sec_fetch = names.iter().any(|n| n.starts_with("sec-fetch-"));
    let claims_browser = request.user_agent().to_lowercase().starts_with("mozilla/");

    let mut score = 0.0f64;
    let mut reasons: Vec<String> = Vec::new();

    if !missing.is_empty() {
        score += 0.25 * missing.len() as f64;
        reasons.push(format!("missing_envelope:{}", missing.join(",")));
    }
    if claims_browser && !has_sec_fetch {
        score += 0.2;
        reasons.push("browser_ua_without_sec_fetch".into());
    }
    if names.len() <= 2 {
        score += 0.3;
        reasons.push(format!("sparse_headers:{}", names.len()));
    }

    let mut out = DetectorOutput::none()
        .signal("header.count", json!(names.len()))
        .signal("header.sec_fetch", json!(has_sec_fetch));

    if reasons.is_empty() {
        out = out.contribute(
            DetectorKind::Header,
            params.f64_or("clean_delta", -0.15),
            weight,
            "complete browser header envelope",
            &[],
        );
    } else {
        out = out.contribute(
            DetectorKind::Header,
            score.min(params.f64_or("max_delta", 0.8)),
            weight,
            reasons.join(" "),
            &[("missing_count", json!(missing.len()))],
        );
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::tests_support::context_for;

    #[tokio::test]
    async fn sparse_headers_score_positive() {
        let ctx = context_for("GET", "/", &[("user-agent", "custom")]);
        let out = analyze(&ctx).await.unwrap();
        assert!(out.contributions[0].confidence_delta > 0.5);
    }

    #[tokio::test]
    async fn full_envelope_scores_negative() {
        let ctx = context_for(
            "GET",
            "/",
            &[
                ("user-agent", "Mozilla/5.0 Chrome/120"),
                ("accept", "text/html"),
                ("accept-language", "en-GB"),
                ("accept-encoding", "gzip, br"),
                ("sec-fetch-mode", "navigate"),
            ],
        );
        let out = analyze(&ctx).await.unwrap();
        assert!(out.contributions[0].confidence_delta < 0.0);
    }
}
