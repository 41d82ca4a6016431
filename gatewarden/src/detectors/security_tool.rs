// gatewarden/src/detectors/security_tool.rs
//
// Recognizes offensive-security tooling by UA token or probing path.
// These clients are rarely subtle; the value is in the bot_type tag.

use serde_json::json;

use super::{DetectorContext, DetectorKind, DetectorOutput};
use crate::error::DetectorError;

const TOOL_TOKENS: &[&str] = &[
    "sqlmap", "nikto", "nmap", "masscan", "nuclei", "gobuster", "dirbuster",
    "wpscan", "burp", "zap", "acunetix", "metasploit", "hydra",
];

const PROBE_PATHS: &[&str] = &[
    "/.env", "/.git", "/wp-login.php", "/phpmyadmin", "/config.php",
    "/etc/passwd", "/actuator", "/.aws", "/server-status",
];

pub async fn analyze(ctx: &DetectorContext) -> Result<DetectorOutput, DetectorError> {
    let request = &ctx.state.request;
    let params = ctx.config.detector_params(DetectorKind::SecurityTool.name());
    let weight = params.f64_or("weight", 1.0);

    let ua = request.user_agent().to_lowercase();
    let path = request.path.to_lowercase();

    let tool = TOOL_TOKENS.iter().find(|t| ua.contains(*t));
    let probe = PROBE_PATHS.iter().find(|p| path.starts_with(*p));

    if tool.is_none() && probe.is_none() {
        return Ok(DetectorOutput::none());
    }

    let mut reasons = Vec::new();
    if let Some(t) = tool {
        reasons.push(format!("tool_ua:{t}"));
    }
    if let Some(p) = probe {
        reasons.push(format!("probe_path:{p}"));
    }

    Ok(DetectorOutput::none()
        .signal("security_tool.detected", json!(true))
        .contribute(
            DetectorKind::SecurityTool,
            params.f64_or("delta", 0.95),
            weight,
            reasons.join(" "),
            &[("bot_type", json!("security_scanner"))],
        ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::tests_support::context_for;

    #[tokio::test]
    async fn flags_scanner_ua_and_probe_paths() {
        let ctx = context_for("GET", "/", &[("user-agent", "sqlmap/1.7")]);
        let out = analyze(&ctx).await.unwrap();
        assert!(out.contributions[0].confidence_delta > 0.9);

        let ctx = context_for("GET", "/.env", &[("user-agent", "Mozilla/5.0")]);
        let out = analyze(&ctx).await.unwrap();
        assert_eq!(out.contributions.len(), 1);
    }

    #[tokio::test]
    async fn silent_on_ordinary_traffic() {
        let ctx = context_for("GET", "/products", &[("user-agent", "Mozilla/5.0")]);
        let out = analyze(&ctx).await.unwrap();
        assert!(out.contributions.is_empty());
    }
}
