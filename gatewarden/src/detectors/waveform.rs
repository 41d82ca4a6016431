// gatewarden/src/detectors/waveform.rs
//
// Behavioral waveform — spectral shape of the signature's inter-arrival
// series. Cron-like schedulers concentrate energy at one frequency: low
// spectral entropy, high peak-to-average, strong harmonics. Human arrival
// spectra are flat.

use serde_json::json;

use super::{DetectorContext, DetectorKind, DetectorOutput};
use crate::error::DetectorError;

pub async fn analyze(ctx: &DetectorContext) -> Result<DetectorOutput, DetectorError> {
    let params = ctx.config.detector_params(DetectorKind::BehavioralWaveform.name());
    let weight = params.f64_or("weight", 1.0);

    let features = ctx.services.clusters.spectral_features(&ctx.state.signature_id);
    if !features.has_sufficient_data {
        return Ok(DetectorOutput::none());
    }

    let low_entropy = params.f64_or("low_entropy_threshold", 0.55);
    let peak_threshold = params.f64_or("peak_threshold", 0.65);
    let harmonic_threshold = params.f64_or("harmonic_threshold", 0.5);

    let mut score = 0.0f64;
    let mut reasons: Vec<String> = Vec::new();

    if features.spectral_entropy <= low_entropy {
        score += 0.4;
        reasons.push(format!("concentrated_spectrum:{:.2}", features.spectral_entropy));
    }
    if features.peak_to_avg_ratio >= peak_threshold {
        score += 0.3;
        reasons.push(format!("dominant_peak:{:.2}", features.peak_to_avg_ratio));
    }
    if features.harmonic_ratio >= harmonic_threshold && features.dominant_frequency > 0.0 {
        score += 0.2;
        reasons.push(format!("harmonic_structure:{:.2}", features.harmonic_ratio));
    }

    let out = DetectorOutput::none()
        .signal("spectral.entropy", json!(features.spectral_entropy))
        .signal("spectral.dominant", json!(features.dominant_frequency))
        .signal("spectral.peak_ratio", json!(features.peak_to_avg_ratio));

    if reasons.is_empty() {
        return Ok(out.contribute(
            DetectorKind::BehavioralWaveform,
            params.f64_or("flat_delta", -0.15),
            weight,
            "flat arrival spectrum",
            &[],
        ));
    }

    Ok(out.contribute(
        DetectorKind::BehavioralWaveform,
        score.min(1.0),
        weight,
        reasons.join(" "),
        &[("spectral_entropy", json!(features.spectral_entropy))],
    ))
}
