// gatewarden/src/detectors/markov_drift.rs
//
// Markov drift — reads the signature's drift signals against cohort and
// global baselines. Tight loops, novel edges, and high sequence surprise
// all point at mechanical traversal; drift near zero is weak human
// evidence.

use serde_json::json;

use super::{DetectorContext, DetectorKind, DetectorOutput};
use crate::error::DetectorError;

pub async fn analyze(ctx: &DetectorContext) -> Result<DetectorOutput, DetectorError> {
    let state = &ctx.state;
    let params = ctx.config.detector_params(DetectorKind::MarkovDrift.name());
    let weight = params.f64_or("weight", 1.2);

    let is_datacenter = state.signal_bool("ip.datacenter");
    let is_returning = state.signal_bool("sig.returning");
    let cluster_id = ctx.services.clusters.cluster_of(&state.signature_id);

    let drift = ctx.services.markov.get_drift_signals(
        &state.signature_id,
        is_datacenter,
        is_returning,
        cluster_id,
        ctx.now,
    );

    if drift.is_empty() {
        return Ok(DetectorOutput::none());
    }

    let thresholds = &ctx.config.markov.drift_thresholds;
    let mut score = 0.0f64;
    let mut reasons: Vec<String> = Vec::new();

    if drift.loop_score >= thresholds.loop_score {
        score += 0.35;
        reasons.push(format!("tight_loop:{:.2}", drift.loop_score));
    }
    if drift.sequence_surprise >= thresholds.sequence_surprise {
        score += 0.25;
        reasons.push(format!("sequence_surprise:{:.1}bits", drift.sequence_surprise));
    }
    if drift.transition_novelty >= thresholds.transition_novelty {
        score += 0.2;
        reasons.push(format!("novel_transitions:{:.2}", drift.transition_novelty));
    }
    if drift.human_drift >= thresholds.human_drift {
        score += 0.2;
        reasons.push(format!("cohort_drift:{:.2}", drift.human_drift));
    }
    if drift.self_drift >= thresholds.self_drift {
        score += 0.1;
        reasons.push(format!("self_drift:{:.2}", drift.self_drift));
    }
    if drift.entropy_delta.abs() >= thresholds.entropy_delta {
        score += 0.1;
        reasons.push(format!("entropy_delta:{:+.2}bits", drift.entropy_delta));
    }

    let out = DetectorOutput::none()
        .signal("drift.loop_score", json!(drift.loop_score))
        .signal("drift.self", json!(drift.self_drift))
        .signal("drift.human", json!(drift.human_drift))
        .signal("drift.novelty", json!(drift.transition_novelty))
        .signal("drift.surprise", json!(drift.sequence_surprise))
        .signal("drift.entropy_delta", json!(drift.entropy_delta));

    if reasons.is_empty() {
        return Ok(out.contribute(
            DetectorKind::MarkovDrift,
            params.f64_or("no_drift_delta", -0.1),
            weight,
            "navigation consistent with baselines",
            &[],
        ));
    }

    Ok(out.contribute(
        DetectorKind::MarkovDrift,
        score.min(1.0),
        weight,
        reasons.join(" "),
        &[("loop_score", json!(drift.loop_score))],
    ))
}
