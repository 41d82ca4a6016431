// gatewarden/src/spectral.rs
//
// FFT-derived features over inter-arrival intervals. Scripted clients show
// up as concentrated spectra: a dominant bin, low spectral entropy, high
// peak-to-average ratio. Humans look like noise.
//
// The transform is an in-place iterative radix-2 FFT; inputs are demeaned
// and zero-padded to the next power of two, and the DC bin is excluded from
// every statistic.

use crate::config::SpectralConfig;
use crate::events::SpectralFeatures;

pub fn extract(intervals: &[f64], config: &SpectralConfig) -> SpectralFeatures {
    if intervals.len() < config.min_intervals.max(2) {
        return SpectralFeatures::default();
    }

    let n = intervals.len();
    let mean = intervals.iter().sum::<f64>() / n as f64;
    let padded_len = n.next_power_of_two();

    let mut re: Vec<f64> = intervals.iter().map(|&x| x - mean).collect();
    re.resize(padded_len, 0.0);
    let mut im = vec![0.0; padded_len];

    fft_in_place(&mut re, &mut im);

    // Magnitudes for bins 1..=N/2; the DC bin carries only the (removed)
    // mean and the residual of zero-padding.
    let half = padded_len / 2;
    let mags: Vec<f64> = (1..=half)
        .map(|k| (re[k] * re[k] + im[k] * im[k]).sqrt())
        .collect();

    let total_energy: f64 = mags.iter().sum();
    if total_energy <= 1e-12 {
        // Perfectly constant signal: nothing but DC.
        return SpectralFeatures {
            spectral_entropy: 1.0,
            has_sufficient_data: true,
            ..SpectralFeatures::default()
        };
    }

    // Dominant bin (1-based within the non-DC range).
    let (peak_idx, peak_mag) = mags
        .iter()
        .enumerate()
        .fold((0usize, 0.0f64), |(bi, bm), (i, &m)| {
            if m > bm { (i, m) } else { (bi, bm) }
        });
    let dominant_bin = peak_idx + 1;
    let dominant_frequency = dominant_bin as f64 / half as f64;

    // Normalized Shannon entropy of the magnitude distribution.
    let spectral_entropy = if mags.len() > 1 {
        let h: f64 = mags
            .iter()
            .filter(|&&m| m > 0.0)
            .map(|&m| {
                let p = m / total_energy;
                -p * p.log2()
            })
            .sum();
        (h / (mags.len() as f64).log2()).clamp(0.0, 1.0)
    } else {
        1.0
    };

    // Energy at integer multiples of the dominant bin.
    let mut harmonic_energy = 0.0;
    let mut k = dominant_bin;
    while k <= half {
        harmonic_energy += mags[k - 1];
        k += dominant_bin;
    }
    let harmonic_ratio = (harmonic_energy / total_energy).clamp(0.0, 1.0);

    let centroid: f64 = mags
        .iter()
        .enumerate()
        .map(|(i, &m)| (i + 1) as f64 * m)
        .sum::<f64>()
        / total_energy;
    let spectral_centroid = (centroid / half as f64).clamp(0.0, 1.0);

    let mean_mag = total_energy / mags.len() as f64;
    let ratio = peak_mag / mean_mag.max(1e-12);
    let peak_to_avg_ratio = (ratio / (ratio + 1.0)).clamp(0.0, 1.0);

    SpectralFeatures {
        dominant_frequency: dominant_frequency.clamp(0.0, 1.0),
        spectral_entropy,
        harmonic_ratio,
        spectral_centroid,
        peak_to_avg_ratio,
        has_sufficient_data: true,
    }
}

/// Absolute normalized cross-correlation at lag 0 between two interval
/// series. Symmetric; identical signals approach 1.
pub fn compute_temporal_correlation(a: &[f64], b: &[f64], config: &SpectralConfig) -> f64 {
    const MIN_SAMPLES: usize = 8;
    if a.len() < MIN_SAMPLES || b.len() < MIN_SAMPLES {
        return 0.0;
    }
    let n = a
        .len()
        .min(b.len())
        .min(config.correlation_max_samples.max(MIN_SAMPLES));
    let a = &a[..n];
    let b = &b[..n];

    let mean_a = a.iter().sum::<f64>() / n as f64;
    let mean_b = b.iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..n {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    if var_a <= 1e-12 && var_b <= 1e-12 {
        // Two constant signals are perfectly aligned.
        return 1.0;
    }
    if var_a <= 1e-12 || var_b <= 1e-12 {
        return 0.0;
    }
    (cov / (var_a.sqrt() * var_b.sqrt())).abs().clamp(0.0, 1.0)
}

/// Iterative radix-2 Cooley-Tukey; lengths are powers of two by
/// construction.
fn fft_in_place(re: &mut [f64], im: &mut [f64]) {
    let n = re.len();
    if n < 2 {
        return;
    }
    debug_assert!(n.is_power_of_two());

    // Bit-reversal permutation.
    let mut j = 0;
    for i in 1..n {
        let mut bit = n >> 1;
        while j & bit != 0 {
            j ^= bit;
            bit >>= 1;
        }
        j |= bit;
        if i < j {
            re.swap(i, j);
            im.swap(i, j);
        }
    }

    let mut len = 2;
    while len <= n {
        let angle = -2.0 * std::f64::consts::PI / len as f64;
        let (w_re, w_im) = (angle.cos(), angle.sin());
        let mut start = 0;
        while start < n {
            let (mut cur_re, mut cur_im) = (1.0f64, 0.0f64);
            for k in 0..len / 2 {
                let even_re = re[start + k];
                let even_im = im[start + k];
                let odd_re = re[start + k + len / 2] * cur_re - im[start + k + len / 2] * cur_im;
                let odd_im = re[start + k + len / 2] * cur_im + im[start + k + len / 2] * cur_re;
                re[start + k] = even_re + odd_re;
                im[start + k] = even_im + odd_im;
                re[start + k + len / 2] = even_re - odd_re;
                im[start + k + len / 2] = even_im - odd_im;
                let next_re = cur_re * w_re - cur_im * w_im;
                cur_im = cur_re * w_im + cur_im * w_re;
                cur_re = next_re;
            }
            start += len;
        }
        len <<= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SpectralConfig {
        SpectralConfig::default()
    }

    #[test]
    fn short_input_reports_insufficient_data() {
        let f = extract(&[1.0, 2.0, 1.0], &config());
        assert!(!f.has_sufficient_data);
        assert_eq!(f.spectral_entropy, 1.0);
        assert_eq!(f.spectral_centroid, 0.5);
    }

    #[test]
    fn constant_signal_is_maximally_entropic() {
        let f = extract(&[2.0; 32], &config());
        assert!(f.has_sufficient_data);
        assert_eq!(f.spectral_entropy, 1.0);
        assert_eq!(f.peak_to_avg_ratio, 0.0);
    }

    #[test]
    fn alternating_intervals_show_dominant_frequency() {
        let intervals: Vec<f64> = (0..32).map(|i| if i % 2 == 0 { 1.0 } else { 3.0 }).collect();
        let f = extract(&intervals, &config());
        assert!(f.has_sufficient_data);
        assert!(f.dominant_frequency > 0.0);
        assert!(f.peak_to_avg_ratio > 0.0);
        // Period-2 alternation concentrates energy at the Nyquist bin.
        assert!((f.dominant_frequency - 1.0).abs() < 1e-9);
    }

    #[test]
    fn periodic_beats_random_on_entropy() {
        let periodic: Vec<f64> = (0..32).map(|i| if i % 2 == 0 { 1.0 } else { 3.0 }).collect();
        // Deterministic LCG — no rand dependency in tests.
        let mut state: u64 = 0x1234_5678;
        let random: Vec<f64> = (0..32)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                1.0 + (state >> 33) as f64 / u32::MAX as f64 * 4.0
            })
            .collect();
        let fp = extract(&periodic, &config());
        let fr = extract(&random, &config());
        assert!(fp.spectral_entropy < fr.spectral_entropy);
    }

    #[test]
    fn correlation_is_symmetric_and_reflexive() {
        let a: Vec<f64> = (0..32).map(|i| (i as f64 * 0.7).sin() + 2.0).collect();
        let b: Vec<f64> = (0..32).map(|i| (i as f64 * 0.3).cos() + 2.0).collect();
        let ab = compute_temporal_correlation(&a, &b, &config());
        let ba = compute_temporal_correlation(&b, &a, &config());
        assert!((ab - ba).abs() < 1e-10);
        assert!(compute_temporal_correlation(&a, &a, &config()) >= 0.8);
    }

    #[test]
    fn correlation_needs_eight_samples() {
        let short = vec![1.0; 7];
        let long = vec![1.0; 32];
        assert_eq!(compute_temporal_correlation(&short, &long, &config()), 0.0);
    }
}
