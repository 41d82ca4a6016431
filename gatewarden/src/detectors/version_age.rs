// gatewarden/src/detectors/version_age.rs
//
// Browser major-version age. Scripted stacks pin whatever version their
// automation framework shipped with and fall years behind; real browser
// fleets auto-update within weeks. Baselines are config so they can track
// releases without a rebuild.

use serde_json::json;

use super::{DetectorContext, DetectorKind, DetectorOutput};
use crate::error::DetectorError;

pub async fn analyze(ctx: &DetectorContext) -> Result<DetectorOutput, DetectorError> {
    let ua = ctx.state.request.user_agent().to_string();
    let params = ctx.config.detector_params(DetectorKind::VersionAge.name());
    let weight = params.f64_or("weight", 0.8);

    let Some((family, major)) = browser_major_version(&ua) else {
        return Ok(DetectorOutput::none());
    };

    // Approximate current majors; overridable per deployment.
    let current = match family {
        "chrome"  => params.f64_or("chrome_current", 126.0),
        "firefox" => params.f64_or("firefox_current", 127.0),
        "edg"     => params.f64_or("edge_current", 126.0),
        _ => return Ok(DetectorOutput::none()),
    };

    let behind = (current - major as f64).max(0.0);
    let mut out = DetectorOutput::none()
        .signal("ua.family", json!(family))
        .signal("ua.major", json!(major))
        .signal("ua.versions_behind", json!(behind));

    let stale_majors = params.f64_or("stale_majors", 12.0);
    let ancient_majors = params.f64_or("ancient_majors", 40.0);

    if behind >= ancient_majors {
        out = out.contribute(
            DetectorKind::VersionAge,
            params.f64_or("ancient_delta", 0.7),
            weight,
            format!("{family} {major} is {behind:.0} majors behind"),
            &[],
        );
    } else if behind >= stale_majors {
        out = out.contribute(
            DetectorKind::VersionAge,
            params.f64_or("stale_delta", 0.4),
            weight,
            format!("{family} {major} is {behind:.0} majors behind"),
            &[],
        );
    } else {
        out = out.contribute(
            DetectorKind::VersionAge,
            params.f64_or("fresh_delta", -0.1),
            weight,
            "current browser version",
            &[],
        );
    }
    Ok(out)
}

/// ("chrome"|"firefox"|"edg", major) parsed from the UA, if any.
fn browser_major_version(ua: &str) -> Option<(&'static str, u32)> {
    let lower = ua.to_lowercase();
    for (family, token) in [("edg", "edg/"), ("firefox", "firefox/"), ("chrome", "chrome/")] {
        if let Some(idx) = lower.find(token) {
            let rest = &lower[idx + token.len()..];
            let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
            if let Ok(major) = digits.parse::<u32>() {
                return Some((family, major));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::tests_support::context_for;

    #[tokio::test]
    async fn ancient_chrome_scores_high() {
        let ctx = context_for("GET", "/", &[("user-agent", "Mozilla/5.0 Chrome/71.0.3578.98 Safari/537.36")]);
        let out = analyze(&ctx).await.unwrap();
        assert!(out.contributions[0].confidence_delta >= 0.7);
    }

    #[tokio::test]
    async fn current_version_is_mildly_human() {
        let ctx = context_for("GET", "/", &[("user-agent", "Mozilla/5.0 Chrome/126.0 Safari/537.36")]);
        let out = analyze(&ctx).await.unwrap();
        assert!(out.contributions[0].confidence_delta < 0.0);
    }

    #[tokio::test]
    async fn silent_without_parseable_version() {
        let ctx = context_for("GET", "/", &[("user-agent", "curl/8.4")]);
        let out = analyze(&ctx).await.unwrap();
        assert!(out.contributions.is_empty());
    }

    #[test]
    fn edge_parses_before_chrome() {
        let (family, major) =
            browser_major_version("Mozilla/5.0 Chrome/120.0 Safari/537.36 Edg/120.0.2210").unwrap();
        assert_eq!(family, "edg");
        assert_eq!(major, 120);
    }
}
