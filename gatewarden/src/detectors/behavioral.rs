// gatewarden/src/detectors/behavioral.rs
//
// Aggregate behavior of the signature's record window: metronomic timing,
// narrow path focus, sustained rate, and the composite aberration score
// from the coordinator.

use serde_json::json;

use super::{DetectorContext, DetectorKind, DetectorOutput};
use crate::error::DetectorError;

pub async fn analyze(ctx: &DetectorContext) -> Result<DetectorOutput, DetectorError> {
    let params = ctx.config.detector_params(DetectorKind::Behavioral.name());
    let weight = params.f64_or("weight", 1.2);

    let Some(behavior) = ctx
        .services
        .coordinator
        .signature_behavior(&ctx.state.signature_id)
    else {
        return Ok(DetectorOutput::none());
    };
    if behavior.request_count < 3 {
        return Ok(DetectorOutput::none());
    }

    let mut score = 0.0f64;
    let mut reasons: Vec<String> = Vec::new();

    // Interval CV under 0.1 at sub-10s cadence is scheduler territory.
    if behavior.timing_coefficient < params.f64_or("metronome_cv", 0.1)
        && behavior.average_interval > 0.0
        && behavior.average_interval < params.f64_or("metronome_max_interval", 10.0)
        && behavior.request_count >= 5
    {
        score += 0.45;
        reasons.push(format!(
            "metronomic:cv={:.3}@{:.1}s",
            behavior.timing_coefficient, behavior.average_interval
        ));
    }

    if behavior.distinct_paths == 1 && behavior.request_count >= 10 {
        score += 0.2;
        reasons.push("single_path_hammering".into());
    }

    if behavior.is_aberrant {
        score += 0.3;
        reasons.push(format!("aberrant:{:.2}", behavior.aberration_score));
    }

    let out = DetectorOutput::none()
        .signal("behavior.timing_cv", json!(behavior.timing_coefficient))
        .signal("behavior.path_entropy", json!(behavior.path_entropy))
        .signal("behavior.aberration", json!(behavior.aberration_score));

    if reasons.is_empty() {
        return Ok(out.contribute(
            DetectorKind::Behavioral,
            params.f64_or("normal_delta", -0.15),
            weight,
            "unremarkable aggregate behavior",
            &[],
        ));
    }

    Ok(out.contribute(
        DetectorKind::Behavioral,
        score.min(1.0),
        weight,
        reasons.join(" "),
        &[("aberration_score", json!(behavior.aberration_score))],
    ))
}
