// gatewarden/src/detectors/ip.rs
//
// IP provenance — datacenter origin is the single strongest network prior.
// Loopback/private space (health checks, internal probes) leans the other
// way.

use serde_json::json;

use super::{DetectorContext, DetectorKind, DetectorOutput};
use crate::error::DetectorError;

pub async fn analyze(ctx: &DetectorContext) -> Result<DetectorOutput, DetectorError> {
    let request = &ctx.state.request;
    let params = ctx.config.detector_params(DetectorKind::Ip.name());
    let weight = params.f64_or("weight", 1.0);

    let is_datacenter = request.geo.as_ref().map(|g| g.is_datacenter).unwrap_or(false);
    let asn = request.geo.as_ref().and_then(|g| g.asn);

    let mut out = DetectorOutput::none()
        .signal("ip.remote", json!(request.remote_ip.to_string()))
        .signal("ip.datacenter", json!(is_datacenter));
    if let Some(asn) = asn {
        out = out.signal("ip.asn", json!(asn));
    }

    if request.remote_ip.is_loopback() {
        return Ok(out.contribute(
            DetectorKind::Ip,
            params.f64_or("loopback_delta", -0.3),
            weight,
            "loopback source",
            &[],
        ));
    }

    if is_datacenter {
        return Ok(out.contribute(
            DetectorKind::Ip,
            params.f64_or("datacenter_delta", 0.5),
            weight,
            "datacenter-hosted source address",
            &[("asn", json!(asn))],
        ));
    }

    Ok(out.contribute(
        DetectorKind::Ip,
        params.f64_or("residential_delta", -0.1),
        weight,
        "residential source address",
        &[],
    ))
}
