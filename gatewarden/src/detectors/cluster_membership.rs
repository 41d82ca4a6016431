// gatewarden/src/detectors/cluster_membership.rs
//
// Population evidence: membership in a classified cluster, or affinity of
// an unclustered signature to the nearest cluster profile. Affinity is
// deliberately weak evidence — a bounded nudge, never a conviction.

use serde_json::json;

use super::{DetectorContext, DetectorKind, DetectorOutput};
use crate::cluster::ClusterClassification;
use crate::error::DetectorError;

pub async fn analyze(ctx: &DetectorContext) -> Result<DetectorOutput, DetectorError> {
    let params = ctx.config.detector_params(DetectorKind::ClusterMembership.name());
    let weight = params.f64_or("weight", 1.0);
    let state = &ctx.state;

    // Direct membership first.
    if let Some(cluster_id) = ctx.services.clusters.cluster_of(&state.signature_id) {
        let Some(cluster) = ctx
            .services
            .clusters
            .clusters()
            .into_iter()
            .find(|c| c.id == cluster_id)
        else {
            return Ok(DetectorOutput::none());
        };

        let delta = match cluster.classification {
            ClusterClassification::BotProduct => params.f64_or("bot_product_delta", 0.8),
            ClusterClassification::Infrastructure => params.f64_or("infrastructure_delta", 0.6),
            ClusterClassification::GeoDistributed => params.f64_or("geo_distributed_delta", 0.5),
            ClusterClassification::Mixed => params.f64_or("mixed_delta", 0.2),
        };
        return Ok(DetectorOutput::none()
            .signal("cluster.id", json!(cluster_id))
            .signal("cluster.classification", json!(cluster.classification.to_string()))
            .contribute(
                DetectorKind::ClusterMembership,
                delta,
                weight,
                format!(
                    "member of {} cluster ({} signatures, sim {:.2})",
                    cluster.classification,
                    cluster.member_signatures.len(),
                    cluster.avg_similarity
                ),
                &[("cluster_id", json!(cluster_id))],
            ));
    }

    // Affinity query for the unclustered.
    let geo = state.request.geo.as_ref();
    let affinity = ctx.services.clusters.community_affinity(
        geo.map(|g| g.is_datacenter).unwrap_or(false),
        geo.and_then(|g| g.country_code.as_deref()),
        geo.and_then(|g| g.asn),
        geo.and_then(|g| match (g.latitude, g.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }),
    );

    let Some((cluster_id, affinity)) = affinity else {
        return Ok(DetectorOutput::none());
    };
    let min_affinity = params.f64_or("min_affinity", 0.5);
    if affinity < min_affinity {
        return Ok(DetectorOutput::none());
    }

    // Bounded nudge, scaled by affinity beyond the floor.
    let max_delta = params.f64_or("affinity_max_delta", 0.25);
    let delta = max_delta * (affinity - min_affinity) / (1.0 - min_affinity).max(1e-9);
    Ok(DetectorOutput::none()
        .signal("cluster.affinity", json!(affinity))
        .contribute(
            DetectorKind::ClusterMembership,
            delta,
            weight,
            format!("affinity {affinity:.2} to cluster {cluster_id}"),
            &[],
        ))
}
