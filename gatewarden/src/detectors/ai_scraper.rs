// gatewarden/src/detectors/ai_scraper.rs
//
// Known AI crawler / LLM-agent user agents. Declared AI crawlers are not
// hiding — the score is moderate and the bot_type tag does the work so
// policy can treat them separately from hostile scrapers.

use serde_json::json;

use super::{DetectorContext, DetectorKind, DetectorOutput};
use crate::error::DetectorError;

const AI_UA_TOKENS: &[&str] = &[
    "gptbot", "oai-searchbot", "chatgpt-user", "claudebot", "claude-web",
    "anthropic-ai", "perplexitybot", "youbot", "ccbot", "bytespider",
    "amazonbot", "google-extended", "applebot-extended", "meta-externalagent",
    "diffbot", "omgili",
];

pub async fn analyze(ctx: &DetectorContext) -> Result<DetectorOutput, DetectorError> {
    let ua = ctx.state.request.user_agent().to_lowercase();
    if ua.is_empty() {
        return Ok(DetectorOutput::none());
    }
    let params = ctx.config.detector_params(DetectorKind::AiScraper.name());

    let Some(token) = AI_UA_TOKENS.iter().find(|t| ua.contains(*t)) else {
        return Ok(DetectorOutput::none());
    };

    Ok(DetectorOutput::none()
        .signal("ua.ai_crawler", json!(token))
        .contribute(
            DetectorKind::AiScraper,
            params.f64_or("delta", 0.85),
            params.f64_or("weight", 1.0),
            format!("declared AI crawler: {token}"),
            &[("bot_type", json!("ai_agent"))],
        ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::tests_support::context_for;

    #[tokio::test]
    async fn recognizes_declared_ai_crawlers() {
        let ctx = context_for("GET", "/", &[("user-agent", "Mozilla/5.0 (compatible; GPTBot/1.0)")]);
        let out = analyze(&ctx).await.unwrap();
        assert_eq!(out.contributions.len(), 1);
        assert_eq!(
            out.contributions[0].signals.get("bot_type").unwrap(),
            &json!("ai_agent")
        );
    }

    #[tokio::test]
    async fn silent_on_browsers() {
        let ctx = context_for("GET", "/", &[("user-agent", "Mozilla/5.0 Chrome/126.0")]);
        let out = analyze(&ctx).await.unwrap();
        assert!(out.contributions.is_empty());
    }
}
