// gatewarden/src/detectors/user_agent.rs
//
// User-Agent scanner — the cheapest, highest-yield wave 0 check.
// Aho-Corasick over known automation keywords, plus structural checks
// (missing UA, bare library defaults, impossible version strings).

use aho_corasick::AhoCorasick;
use serde_json::json;
use std::sync::OnceLock;

use super::{DetectorContext, DetectorKind, DetectorOutput};
use crate::error::DetectorError;

const BOT_KEYWORDS: &[&str] = &[
    "bot", "spider", "crawl", "scrape", "curl", "wget", "python-requests",
    "python-urllib", "go-http-client", "okhttp", "java/", "libwww", "httpx",
    "aiohttp", "phantomjs", "headless", "selenium", "playwright", "puppeteer",
];

const LIBRARY_DEFAULTS: &[&str] = &[
    "curl/", "wget/", "python-requests/", "go-http-client/", "okhttp/", "axios/",
];

fn keyword_matcher() -> &'static AhoCorasick {
    static MATCHER: OnceLock<AhoCorasick> = OnceLock::new();
    MATCHER.get_or_init(|| {
        AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(BOT_KEYWORDS)
            .expect("static pattern set compiles")
    })
}

pub async fn analyze(ctx: &DetectorContext) -> Result<DetectorOutput, DetectorError> {
    let ua = ctx.state.request.user_agent().to_string();
    let params = ctx.config.detector_params(DetectorKind::UserAgent.name());
    let weight = params.f64_or("weight", 1.0);

    if ua.is_empty() {
        return Ok(DetectorOutput::none()
            .signal("ua.missing", json!(true))
            .contribute(
                DetectorKind::UserAgent,
                params.f64_or("missing_ua_delta", 0.6),
                weight,
                "no user-agent header",
                &[("ua.missing", json!(true))],
            ));
    }

    let matcher = keyword_matcher();
    let mut matched: Vec<String> = matcher
        .find_iter(&ua)
        .map(|m| BOT_KEYWORDS[m.pattern().as_usize()].to_string())
        .collect();
    matched.dedup();

    let mut out = DetectorOutput::none().signal("ua.raw", json!(ua.clone()));

    if !matched.is_empty() {
        let delta = params.f64_or("keyword_delta", 0.8);
        out = out
            .signal("ua.bot_keyword", json!(true))
            .contribute(
                DetectorKind::UserAgent,
                delta,
                weight,
                format!("automation keywords: {}", matched.join(",")),
                &[("matched", json!(matched))],
            );
        return Ok(out);
    }

    let lower = ua.to_lowercase();
    if LIBRARY_DEFAULTS.iter().any(|d| lower.starts_with(d)) {
        let delta = params.f64_or("library_delta", 0.7);
        out = out
            .signal("ua.library_default", json!(true))
            .contribute(
                DetectorKind::UserAgent,
                delta,
                weight,
                "bare HTTP library default UA",
                &[],
            );
        return Ok(out);
    }

    // Browser-shaped UA without the Mozilla prelude is a lazy forgery.
    if (lower.contains("chrome") || lower.contains("safari") || lower.contains("firefox"))
        && !lower.starts_with("mozilla/")
    {
        out = out.contribute(
            DetectorKind::UserAgent,
            params.f64_or("malformed_delta", 0.5),
            weight,
            "browser tokens without Mozilla prelude",
            &[],
        );
        return Ok(out);
    }

    // Plausible browser UA — mild human evidence.
    Ok(out.contribute(
        DetectorKind::UserAgent,
        params.f64_or("clean_delta", -0.2),
        weight,
        "plausible browser user-agent",
        &[],
    ))
}
