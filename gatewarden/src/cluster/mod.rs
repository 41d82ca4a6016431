// gatewarden/src/cluster/mod.rs
//
// BotClusterService — population-level grouping of signatures by feature
// similarity. Vectors come from the SignatureCoordinator and MarkovTracker;
// adaptive weights come from population variance; communities come from the
// similarity graph. Results are replaced atomically under one exclusive
// lock; readers clone.

pub mod community;
pub mod features;
pub mod similarity;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{ClusteringConfig, SpectralConfig};
use crate::coordinator::SignatureCoordinator;
use crate::events::{GeoInfo, SpectralFeatures};
use crate::markov::MarkovTracker;
use crate::spectral;

use community::SimilarityGraph;
use features::{AdaptiveSimilarityWeighter, FeatureVector, FeatureWeights};

// ── Cluster types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterClassification {
    BotProduct,
    Infrastructure,
    GeoDistributed,
    Mixed,
}

impl std::fmt::Display for ClusterClassification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BotProduct     => write!(f, "bot_product"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::GeoDistributed => write!(f, "geo_distributed"),
            Self::Mixed          => write!(f, "mixed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id:                  u64,
    pub member_signatures:   Vec<String>,
    pub avg_similarity:      f64,
    pub avg_bot_probability: f64,
    pub temporal_density:    f64,
    pub product_similarity:  f64,
    pub classification:      ClusterClassification,
    // Profile fields used by the affinity query.
    pub modal_country:       Option<String>,
    pub datacenter_share:    f64,
    pub asns:                Vec<u32>,
    pub centroid:            Option<(f64, f64)>,
}

// ── Service ───────────────────────────────────────────────────────────────────

pub struct BotClusterService {
    config:          ClusteringConfig,
    spectral_config: SpectralConfig,
    coordinator:     Arc<SignatureCoordinator>,
    markov:          Arc<MarkovTracker>,
    clusters:        RwLock<Vec<Cluster>>,
    /// signature → cluster id, rebuilt with each clustering run.
    membership:      RwLock<std::collections::HashMap<String, u64>>,
    /// Geo side-table fed per request; records stay geo-free.
    geo:             DashMap<String, GeoInfo>,
    /// signature → (request_count at compute time, features).
    spectral_cache:  DashMap<String, (usize, SpectralFeatures)>,
    next_cluster_id: parking_lot::Mutex<u64>,
}

impl BotClusterService {
    pub fn new(
        config: ClusteringConfig,
        spectral_config: SpectralConfig,
        coordinator: Arc<SignatureCoordinator>,
        markov: Arc<MarkovTracker>,
    ) -> Self {
        Self {
            config,
            spectral_config,
            coordinator,
            markov,
            clusters: RwLock::new(Vec::new()),
            membership: RwLock::new(std::collections::HashMap::new()),
            geo: DashMap::new(),
            spectral_cache: DashMap::new(),
            next_cluster_id: parking_lot::Mutex::new(1),
        }
    }

    /// Remember the latest geo attribution for a signature.
    pub fn note_geo(&self, signature_id: &str, geo: &GeoInfo) {
        self.geo.insert(signature_id.to_string(), geo.clone());
    }

    /// Vectorize every signature with enough history.
    pub fn build_feature_vectors(&self, now: DateTime<Utc>) -> Vec<FeatureVector> {
        let mut vectors = Vec::new();
        for sig in self.coordinator.signature_ids() {
            let Some(behavior) = self.coordinator.signature_behavior(&sig) else { continue };
            if behavior.request_count < self.config.min_requests_for_feature {
                continue;
            }
            let drift = self.markov.get_drift_signals(
                &sig,
                behavior.is_datacenter,
                true,
                self.cluster_of(&sig),
                now,
            );
            let geo = self.geo.get(&sig).map(|g| g.clone());
            let (lat, lon, continent, region) = match geo {
                Some(g) => (g.latitude, g.longitude, g.continent, g.region),
                None => (None, None, None, None),
            };
            vectors.push(FeatureVector::from_behavior(
                &behavior, &drift, lat, lon, continent, region,
            ));
        }
        vectors
    }

    /// One clustering pass: vectors → adaptive weights → similarity graph →
    /// communities → classified clusters, stored atomically.
    pub fn run_clustering(&self, now: DateTime<Utc>) -> usize {
        let vectors = self.build_feature_vectors(now);
        if vectors.len() < self.config.min_bot_detections_to_trigger {
            debug!(count = vectors.len(), "clustering skipped: population too small");
            return 0;
        }

        let weights = AdaptiveSimilarityWeighter::new(self.config.min_weight)
            .compute_weights(&vectors);

        let graph = SimilarityGraph::build(vectors.len(), self.config.similarity_threshold, |i, j| {
            similarity::compute_similarity(&vectors[i], &vectors[j], &weights)
        });

        let communities = graph.communities(self.config.max_iterations);

        let mut clusters = Vec::new();
        let mut membership = std::collections::HashMap::new();
        for members in communities {
            if members.len() < self.config.min_cluster_size {
                continue;
            }
            let cluster = self.classify_community(&members, &vectors, &weights);
            for &i in &members {
                membership.insert(vectors[i].signature.clone(), cluster.id);
            }
            clusters.push(cluster);
        }

        let n = clusters.len();
        info!(
            clusters = n,
            population = vectors.len(),
            edges = graph.edge_count(),
            "clustering run complete"
        );
        // Replace previous results atomically.
        *self.clusters.write() = clusters;
        *self.membership.write() = membership;
        n
    }

    fn classify_community(
        &self,
        members: &[usize],
        vectors: &[FeatureVector],
        weights: &FeatureWeights,
    ) -> Cluster {
        let n = members.len();

        // Mean pairwise similarity doubles as product similarity.
        let mut sim_sum = 0.0;
        let mut pairs = 0usize;
        for (ai, &i) in members.iter().enumerate() {
            for &j in &members[ai + 1..] {
                sim_sum += similarity::compute_similarity(&vectors[i], &vectors[j], weights);
                pairs += 1;
            }
        }
        let avg_similarity = if pairs > 0 { sim_sum / pairs as f64 } else { 1.0 };

        let avg_bot_probability =
            members.iter().map(|&i| vectors[i].avg_bot_probability).sum::<f64>() / n as f64;

        let temporal_density = temporal_density(members, vectors);

        // Profile.
        let mut country_counts: std::collections::HashMap<String, usize> =
            std::collections::HashMap::new();
        let mut continents: std::collections::HashSet<String> = std::collections::HashSet::new();
        let mut asns: std::collections::HashSet<u32> = std::collections::HashSet::new();
        let mut dc = 0usize;
        let mut lat_sum = 0.0;
        let mut lon_sum = 0.0;
        let mut coords = 0usize;
        for &i in members {
            let v = &vectors[i];
            if let Some(cc) = &v.country_code {
                *country_counts.entry(cc.to_uppercase()).or_insert(0) += 1;
            }
            if let Some(ct) = &v.continent {
                continents.insert(ct.to_uppercase());
            }
            if let Some(asn) = v.asn {
                asns.insert(asn);
            }
            if v.is_datacenter {
                dc += 1;
            }
            if let (Some(lat), Some(lon)) = (v.latitude, v.longitude) {
                lat_sum += lat;
                lon_sum += lon;
                coords += 1;
            }
        }
        let modal_country = country_counts
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
            .map(|(cc, _)| cc);

        // Geo dispersion: many continents, or low mean pairwise geo
        // proximity.
        let mut geo_sum = 0.0;
        let mut geo_pairs = 0usize;
        for (ai, &i) in members.iter().enumerate() {
            for &j in &members[ai + 1..] {
                geo_sum += similarity::geo_similarity(&vectors[i], &vectors[j]);
                geo_pairs += 1;
            }
        }
        let mean_geo = if geo_pairs > 0 { geo_sum / geo_pairs as f64 } else { 1.0 };
        let geo_dispersed = continents.len() >= 3 || mean_geo < 0.3;

        let classification = if avg_similarity >= self.config.product_similarity_threshold
            && avg_bot_probability >= self.config.min_bot_prob_for_clustering
        {
            ClusterClassification::BotProduct
        } else if temporal_density >= self.config.network_temporal_density_threshold {
            ClusterClassification::Infrastructure
        } else if geo_dispersed {
            ClusterClassification::GeoDistributed
        } else {
            ClusterClassification::Mixed
        };

        let id = {
            let mut next = self.next_cluster_id.lock();
            let id = *next;
            *next += 1;
            id
        };

        Cluster {
            id,
            member_signatures: members.iter().map(|&i| vectors[i].signature.clone()).collect(),
            avg_similarity,
            avg_bot_probability,
            temporal_density,
            product_similarity: avg_similarity,
            classification,
            modal_country,
            datacenter_share: dc as f64 / n as f64,
            asns: asns.into_iter().collect(),
            centroid: if coords > 0 {
                Some((lat_sum / coords as f64, lon_sum / coords as f64))
            } else {
                None
            },
        }
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    pub fn clusters(&self) -> Vec<Cluster> {
        self.clusters.read().clone()
    }

    pub fn cluster_of(&self, signature_id: &str) -> Option<u64> {
        self.membership.read().get(signature_id).copied()
    }

    /// Affinity of a non-clustered signature to the best-matching cluster:
    /// infra match, country match, shared ASN, geo proximity — each worth a
    /// quarter. Returns (cluster id, affinity ∈ [0,1]).
    pub fn community_affinity(
        &self,
        is_datacenter: bool,
        country: Option<&str>,
        asn: Option<u32>,
        coords: Option<(f64, f64)>,
    ) -> Option<(u64, f64)> {
        let clusters = self.clusters.read();
        let mut best: Option<(u64, f64)> = None;
        for cluster in clusters.iter() {
            let mut score = 0.0;
            let infra_match = if is_datacenter {
                cluster.datacenter_share >= 0.5
            } else {
                cluster.datacenter_share < 0.5
            };
            if infra_match {
                score += 0.25;
            }
            if let (Some(cc), Some(modal)) = (country, &cluster.modal_country) {
                if cc.eq_ignore_ascii_case(modal) {
                    score += 0.25;
                }
            }
            if let Some(asn) = asn {
                if cluster.asns.contains(&asn) {
                    score += 0.25;
                }
            }
            if let (Some((lat, lon)), Some((clat, clon))) = (coords, cluster.centroid) {
                let d = similarity::haversine_km(lat, lon, clat, clon);
                score += 0.25 * similarity::distance_similarity(d);
            }
            if best.map(|(_, b)| score > b).unwrap_or(true) {
                best = Some((cluster.id, score));
            }
        }
        best.filter(|(_, score)| *score > 0.0)
    }

    /// Spectral features for a signature's interval series, cached until the
    /// record count changes.
    pub fn spectral_features(&self, signature_id: &str) -> SpectralFeatures {
        let count = self.coordinator.request_count(signature_id);
        if let Some(cached) = self.spectral_cache.get(signature_id) {
            if cached.0 == count {
                return cached.1;
            }
        }
        let intervals = self.coordinator.intervals(signature_id);
        let features = spectral::extract(&intervals, &self.spectral_config);
        self.spectral_cache
            .insert(signature_id.to_string(), (count, features));
        features
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters.read().len()
    }
}

fn temporal_density(members: &[usize], vectors: &[FeatureVector]) -> f64 {
    if members.is_empty() {
        return 0.0;
    }
    // Common window: median first_seen .. median last_seen.
    let mut firsts: Vec<i64> = members
        .iter()
        .map(|&i| vectors[i].first_seen.timestamp())
        .collect();
    let mut lasts: Vec<i64> = members
        .iter()
        .map(|&i| vectors[i].last_seen.timestamp())
        .collect();
    firsts.sort_unstable();
    lasts.sort_unstable();
    let window_start = firsts[firsts.len() / 2];
    let window_end = lasts[lasts.len() / 2];
    if window_end <= window_start {
        return 0.0;
    }

    let overlapping = members
        .iter()
        .filter(|&&i| {
            let start = vectors[i].first_seen.timestamp();
            let end = vectors[i].last_seen.timestamp();
            let span = (end - start).max(1) as f64;
            let overlap = (end.min(window_end) - start.max(window_start)).max(0) as f64;
            overlap / span >= 0.5
        })
        .count();
    overlapping as f64 / members.len() as f64
}
