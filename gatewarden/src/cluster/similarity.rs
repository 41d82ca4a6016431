// gatewarden/src/cluster/similarity.rs
//
// Weighted pairwise similarity between feature vectors: scalar distance on
// the normalized features, exact-match on categoricals, Haversine buckets
// on geo. Returns [0,1].

use super::features::{FeatureVector, FeatureWeights};

const EARTH_RADIUS_KM: f64 = 6371.0;

// Geo bucket boundaries, km.
const CITY_KM:       f64 = 15.0;
const METRO_KM:      f64 = 85.0;
const COUNTRY_KM:    f64 = 600.0;
const CONTINENT_KM:  f64 = 1300.0;
const ANTIPODAL_KM:  f64 = 19000.0;

pub fn compute_similarity(a: &FeatureVector, b: &FeatureVector, weights: &FeatureWeights) -> f64 {
    let scalar = |x: f64, y: f64| 1.0 - (x - y).abs().clamp(0.0, 1.0);
    let exact = |m: bool| if m { 1.0 } else { 0.0 };

    let mut sim = 0.0;
    sim += weights.timing_regularity * scalar(a.timing_regularity, b.timing_regularity);
    sim += weights.request_rate * scalar(a.request_rate, b.request_rate);
    sim += weights.path_diversity * scalar(a.path_diversity, b.path_diversity);
    sim += weights.path_entropy * scalar(a.path_entropy, b.path_entropy);
    sim += weights.avg_bot_probability * scalar(a.avg_bot_probability, b.avg_bot_probability);
    sim += weights.self_drift * scalar(a.self_drift, b.self_drift);
    sim += weights.human_drift * scalar(a.human_drift, b.human_drift);
    sim += weights.loop_score * scalar(a.loop_score, b.loop_score);
    sim += weights.surprise * scalar(a.surprise, b.surprise);
    sim += weights.novelty * scalar(a.novelty, b.novelty);
    sim += weights.entropy_delta * scalar(a.entropy_delta, b.entropy_delta);

    sim += weights.country * exact(eq_ci(&a.country_code, &b.country_code));
    sim += weights.datacenter * exact(a.is_datacenter == b.is_datacenter);
    sim += weights.asn * exact(a.asn.is_some() && a.asn == b.asn);

    sim += weights.geo * geo_similarity(a, b);

    let total = weights.sum();
    if total <= 0.0 {
        return 0.0;
    }
    (sim / total).clamp(0.0, 1.0)
}

/// Geo proximity in [0,1]. With coordinates on both sides the Haversine
/// distance maps through piecewise buckets (same city ≥ 0.9, metro ≥ 0.85,
/// same country 0.5–0.85, same continent 0.3–0.7, intercontinental ≤ 0.3,
/// near-antipodal 0.1). Without coordinates, country/continent fields
/// decide; two unknowns carry no penalty.
pub fn geo_similarity(a: &FeatureVector, b: &FeatureVector) -> f64 {
    match (a.latitude, a.longitude, b.latitude, b.longitude) {
        (Some(lat_a), Some(lon_a), Some(lat_b), Some(lon_b)) => {
            distance_similarity(haversine_km(lat_a, lon_a, lat_b, lon_b))
        }
        _ => {
            let same_country = eq_ci(&a.country_code, &b.country_code)
                && a.country_code.is_some();
            let same_continent = eq_ci(&a.continent, &b.continent) && a.continent.is_some();
            let a_known = a.country_code.is_some() || a.continent.is_some();
            let b_known = b.country_code.is_some() || b.continent.is_some();
            if !a_known && !b_known {
                1.0
            } else if !a_known || !b_known {
                0.3
            } else if same_country {
                1.0
            } else if same_continent {
                0.4
            } else {
                0.0
            }
        }
    }
}

/// Piecewise distance → similarity mapping implementing the bucket
/// guarantees.
pub fn distance_similarity(d_km: f64) -> f64 {
    if d_km <= CITY_KM {
        lerp(d_km, 0.0, CITY_KM, 1.0, 0.9)
    } else if d_km <= METRO_KM {
        lerp(d_km, CITY_KM, METRO_KM, 0.9, 0.86)
    } else if d_km <= COUNTRY_KM {
        lerp(d_km, METRO_KM, COUNTRY_KM, 0.86, 0.5)
    } else if d_km <= CONTINENT_KM {
        lerp(d_km, COUNTRY_KM, CONTINENT_KM, 0.5, 0.3)
    } else if d_km < ANTIPODAL_KM {
        lerp(d_km, CONTINENT_KM, ANTIPODAL_KM, 0.3, 0.1)
    } else {
        0.1
    }
}

pub fn haversine_km(lat_a: f64, lon_a: f64, lat_b: f64, lon_b: f64) -> f64 {
    let phi_a = lat_a.to_radians();
    let phi_b = lat_b.to_radians();
    let d_phi = (lat_b - lat_a).to_radians();
    let d_lambda = (lon_b - lon_a).to_radians();

    let h = (d_phi / 2.0).sin().powi(2)
        + phi_a.cos() * phi_b.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

fn lerp(x: f64, x0: f64, x1: f64, y0: f64, y1: f64) -> f64 {
    if x1 <= x0 {
        return y1;
    }
    y0 + (x - x0) / (x1 - x0) * (y1 - y0)
}

fn eq_ci(a: &Option<String>, b: &Option<String>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LONDON:    (f64, f64) = (51.5074, -0.1278);
    const OXFORD:    (f64, f64) = (51.7520, -1.2577);
    const EDINBURGH: (f64, f64) = (55.9533, -3.1883);
    const MADRID:    (f64, f64) = (40.4168, -3.7038);
    const TOKYO:     (f64, f64) = (35.6762, 139.6503);

    fn sim(a: (f64, f64), b: (f64, f64)) -> f64 {
        distance_similarity(haversine_km(a.0, a.1, b.0, b.1))
    }

    #[test]
    fn identical_coordinates_are_fully_similar() {
        assert_eq!(sim(LONDON, LONDON), 1.0);
    }

    #[test]
    fn geo_buckets_hold() {
        assert!(sim(LONDON, OXFORD) >= 0.85, "metro");
        let edinburgh = sim(LONDON, EDINBURGH);
        assert!((0.5..=0.85).contains(&edinburgh), "same country: {edinburgh}");
        let madrid = sim(LONDON, MADRID);
        assert!((0.3..=0.7).contains(&madrid), "same continent: {madrid}");
        let tokyo = sim(LONDON, TOKYO);
        assert!((0.0..=0.3).contains(&tokyo), "intercontinental: {tokyo}");
    }

    #[test]
    fn antipodal_is_exactly_point_one() {
        // London and its antipode in the Southern Ocean.
        assert_eq!(sim(LONDON, (-51.5074, 179.8722)), 0.1);
    }

    #[test]
    fn fallback_without_coordinates() {
        let mut a = blank();
        let mut b = blank();
        a.country_code = Some("DE".into());
        b.country_code = Some("de".into());
        assert_eq!(geo_similarity(&a, &b), 1.0);

        b.country_code = Some("FR".into());
        a.continent = Some("EU".into());
        b.continent = Some("EU".into());
        assert_eq!(geo_similarity(&a, &b), 0.4);

        b.country_code = None;
        b.continent = None;
        assert_eq!(geo_similarity(&a, &b), 0.3);

        a.country_code = None;
        a.continent = None;
        assert_eq!(geo_similarity(&a, &b), 1.0);
    }

    fn blank() -> FeatureVector {
        use chrono::Utc;
        FeatureVector {
            signature: "s".into(),
            timing_regularity: 0.0,
            request_rate: 0.0,
            path_diversity: 0.0,
            path_entropy: 0.0,
            avg_bot_probability: 0.0,
            self_drift: 0.0,
            human_drift: 0.0,
            loop_score: 0.0,
            surprise: 0.0,
            novelty: 0.0,
            entropy_delta: 0.5,
            country_code: None,
            is_datacenter: false,
            asn: None,
            latitude: None,
            longitude: None,
            continent: None,
            region: None,
            first_seen: Utc::now(),
            last_seen: Utc::now(),
        }
    }
}
