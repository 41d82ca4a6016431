// gatewarden/src/detectors/country_reputation.rs
//
// Country bot-rate prior from the CountryReputationTracker. Rates below
// the sample floor are withheld entirely — no evidence either way.

use serde_json::json;

use super::{DetectorContext, DetectorKind, DetectorOutput};
use crate::error::DetectorError;

pub async fn analyze(ctx: &DetectorContext) -> Result<DetectorOutput, DetectorError> {
    let Some(country) = ctx
        .state
        .request
        .geo
        .as_ref()
        .and_then(|g| g.country_code.clone())
    else {
        return Ok(DetectorOutput::none());
    };

    let params = ctx.config.detector_params(DetectorKind::CountryReputation.name());
    let config = &ctx.config.reputation;
    let rate = ctx.services.reputation.country_bot_rate(&country, ctx.now);

    let mut out = DetectorOutput::none().signal("geo.country", json!(country.clone()));

    if rate <= 0.0 {
        // Unsampled country — publish the signal, contribute nothing.
        return Ok(out);
    }

    out = out.signal("geo.country_bot_rate", json!(rate));

    let high = params.f64_or("high_rate_threshold", config.high_rate_threshold);
    let very_high = params.f64_or("very_high_rate_threshold", config.very_high_rate_threshold);
    let weight = params.f64_or("weight", 0.7);

    if rate >= very_high {
        out = out.contribute(
            DetectorKind::CountryReputation,
            params.f64_or("very_high_delta", 0.6),
            weight,
            format!("country {country} bot rate {rate:.2}"),
            &[("geo_country_bot_rate", json!(rate))],
        );
    } else if rate >= high {
        out = out.contribute(
            DetectorKind::CountryReputation,
            params.f64_or("high_delta", 0.35),
            weight,
            format!("country {country} bot rate {rate:.2}"),
            &[("geo_country_bot_rate", json!(rate))],
        );
    }
    Ok(out)
}
