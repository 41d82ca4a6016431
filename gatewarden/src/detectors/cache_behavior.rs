// gatewarden/src/detectors/cache_behavior.rs
//
// Cache-header behavior. Browsers emit conditional revalidation
// (If-None-Match / If-Modified-Since) on repeat visits; scripted fetchers
// either send nothing or force no-cache on every request to defeat CDN
// caching.

use serde_json::json;

use super::{DetectorContext, DetectorKind, DetectorOutput};
use crate::error::DetectorError;

pub async fn analyze(ctx: &DetectorContext) -> Result<DetectorOutput, DetectorError> {
    let request = &ctx.state.request;
    let params = ctx.config.detector_params(DetectorKind::CacheBehavior.name());
    let weight = params.f64_or("weight", 0.6);

    let cache_control = request.header("cache-control").unwrap_or("").to_lowercase();
    let pragma = request.header("pragma").unwrap_or("").to_lowercase();
    let conditional = request.header("if-none-match").is_some()
        || request.header("if-modified-since").is_some();

    let forces_fresh = cache_control.contains("no-cache") || pragma.contains("no-cache");

    let mut out = DetectorOutput::none()
        .signal("cache.conditional", json!(conditional))
        .signal("cache.no_cache", json!(forces_fresh));

    if forces_fresh && !conditional {
        out = out.contribute(
            DetectorKind::CacheBehavior,
            params.f64_or("no_cache_delta", 0.3),
            weight,
            "forces cache bypass without revalidation",
            &[],
        );
    } else if conditional {
        out = out.contribute(
            DetectorKind::CacheBehavior,
            params.f64_or("conditional_delta", -0.2),
            weight,
            "conditional revalidation present",
            &[],
        );
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::tests_support::context_for;

    #[tokio::test]
    async fn cache_bypass_scores_positive() {
        let ctx = context_for("GET", "/", &[("cache-control", "no-cache")]);
        let out = analyze(&ctx).await.unwrap();
        assert!(out.contributions[0].confidence_delta > 0.0);
    }

    #[tokio::test]
    async fn revalidation_scores_negative() {
        let ctx = context_for("GET", "/", &[("if-none-match", "\"abc123\"")]);
        let out = analyze(&ctx).await.unwrap();
        assert!(out.contributions[0].confidence_delta < 0.0);
    }

    #[tokio::test]
    async fn neutral_when_no_cache_headers() {
        let ctx = context_for("GET", "/", &[]);
        let out = analyze(&ctx).await.unwrap();
        assert!(out.contributions.is_empty());
    }
}
