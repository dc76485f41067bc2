//! Burstiness of per-key inter-arrival processes.
//!
//! Both scores are bounded transforms of the index of dispersion
//! `R = std / mean` of a key's inter-arrival times: `R = 1` for a Poisson
//! process, `R < 1` for more regular arrivals, `R > 1` for burstier ones.

use proj_models::KeyId;
use tracing::{info, warn};

use crate::{
    error::{finite, EstimationError, Result},
    series::{mean, population_std, ArrivalSeries, KeyMap},
};

/// Denominators of the small-sample score closer to zero than this are rejected.
pub const B2_DENOMINATOR_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dispersion {
    /// Number of inter-arrival samples.
    pub samples: usize,
    pub mean: f64,
    pub std: f64,
    pub ratio: f64,
}

/// Index of dispersion of an inter-arrival sequence.
pub fn dispersion(key: KeyId, intervals: &[f64]) -> Result<Dispersion> {
    let (Some(mean), Some(std)) = (mean(intervals), population_std(intervals)) else {
        return Err(EstimationError::empty_series(key));
    };
    if mean <= 0.0 {
        return Err(EstimationError::non_positive_mean(key));
    }
    Ok(Dispersion {
        samples: intervals.len(),
        mean,
        std,
        ratio: std / mean,
    })
}

/// `(R - 1) / (R + 1)`, in `[-1, 1)` for `R >= 0`.
pub fn burstiness(ratio: f64) -> f64 {
    (ratio - 1.0) / (ratio + 1.0)
}

/// Burstiness corrected for a finite number `n` of inter-arrival samples.
pub fn small_sample_burstiness(ratio: f64, n: usize) -> Result<f64> {
    let upper = (n as f64 + 1.0).sqrt();
    let lower = (n as f64 - 1.0).sqrt();
    let denominator = (upper - 2.0) * ratio + lower;
    if denominator.is_nan() || denominator.abs() < B2_DENOMINATOR_EPSILON {
        return Err(EstimationError::NumericalInstability(format!(
            "small-sample burstiness denominator vanishes (R = {ratio}, n = {n})"
        )));
    }
    finite((upper * ratio - lower) / denominator, || {
        format!("small-sample burstiness is not finite (R = {ratio}, n = {n})")
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyBurstiness {
    pub dispersion: Dispersion,
    pub b1: f64,
    /// `None` when the small-sample formula is unstable for this key.
    pub b2: Option<f64>,
}

#[derive(Debug)]
pub struct BurstinessReport {
    pub keys: KeyMap<KeyBurstiness>,
    /// Keys without scores, and keys whose `b2` is undefined.
    pub failures: KeyMap<EstimationError>,
    /// Per-key B1 averaged with weight = number of inter-arrival samples.
    pub weighted_b1: Option<f64>,
    /// Per-key B2 averaged the same way, over keys where B2 is defined.
    pub weighted_b2: Option<f64>,
    /// `sum(m * std) / sum(m * mean)` over all scored keys.
    pub pooled_ratio: Option<f64>,
    /// [`burstiness`] of the pooled ratio.
    pub pooled_b1: Option<f64>,
}

/// Score the given keys of `series`. Keys seen fewer than twice have no
/// inter-arrival process and are skipped.
pub fn analyze<I>(series: &ArrivalSeries, keys: I) -> BurstinessReport
where
    I: IntoIterator<Item = KeyId>,
{
    let mut scored = KeyMap::new();
    let mut failures = KeyMap::new();
    for key in keys {
        let Some(intervals) = series.inter_arrivals(key) else {
            continue;
        };
        let dispersion = match dispersion(key, &intervals) {
            Ok(d) => d,
            Err(e) => {
                warn!("skipping burstiness of key {}: {}", key, e);
                failures.insert(key, e);
                continue;
            }
        };
        let b2 = match small_sample_burstiness(dispersion.ratio, dispersion.samples) {
            Ok(b2) => Some(b2),
            Err(e) => {
                warn!("B2 of key {} is undefined: {}", key, e);
                failures.insert(key, e);
                None
            }
        };
        scored.insert(
            key,
            KeyBurstiness {
                dispersion,
                b1: burstiness(dispersion.ratio),
                b2,
            },
        );
    }

    let weighted_b1 = weighted_mean(scored.values().map(|k| (k.dispersion.samples, Some(k.b1))));
    let weighted_b2 = weighted_mean(scored.values().map(|k| (k.dispersion.samples, k.b2)));

    let (spread, level) = scored.values().fold((0.0, 0.0), |(spread, level), k| {
        let m = k.dispersion.samples as f64;
        (spread + m * k.dispersion.std, level + m * k.dispersion.mean)
    });
    let pooled_ratio = (level > 0.0).then(|| spread / level);
    let pooled_b1 = pooled_ratio.map(burstiness);

    info!(
        "burstiness over {} keys: weighted B1 = {:?}, weighted B2 = {:?}, pooled B1 = {:?}",
        scored.len(),
        weighted_b1,
        weighted_b2,
        pooled_b1
    );

    BurstinessReport {
        keys: scored,
        failures,
        weighted_b1,
        weighted_b2,
        pooled_ratio,
        pooled_b1,
    }
}

/// Score every key of `series`.
pub fn analyze_all(series: &ArrivalSeries) -> BurstinessReport {
    analyze(series, series.keys())
}

/// Weighted mean over the defined values; the weight sum only counts those.
fn weighted_mean<I: Iterator<Item = (usize, Option<f64>)>>(values: I) -> Option<f64> {
    let (total, weights) = values
        .filter_map(|(weight, value)| value.map(|v| (weight as f64, v)))
        .fold((0.0, 0.0), |(total, weights), (w, v)| (total + w * v, weights + w));
    (weights > 0.0).then(|| total / weights)
}

#[cfg(test)]
mod tests {
    use proj_models::{Request, Trace};
    use rand::SeedableRng;
    use rand_distr::{Distribution as _, Exp};
    use rand_xorshift::XorShiftRng;

    use super::*;

    fn series_from_times(per_key: &[(KeyId, Vec<f64>)]) -> ArrivalSeries {
        let mut requests = per_key
            .iter()
            .flat_map(|(key, times)| times.iter().map(|&t| Request::from((t, *key, 1))))
            .collect::<Vec<_>>();
        requests.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        ArrivalSeries::from_trace(&Trace::new(requests))
    }

    #[test]
    fn test_regular_arrivals() {
        let times = (0..50).map(|i| i as f64 * 2.0).collect::<Vec<_>>();
        let report = analyze_all(&series_from_times(&[(1, times)]));
        let key = report.keys[&1];
        assert_eq!(key.dispersion.ratio, 0.0);
        assert_eq!(key.b1, -1.0);
        assert!((key.b2.unwrap() + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_bursty_arrivals() {
        // long silences between tight bursts
        let mut times = Vec::new();
        for burst in 0..5 {
            let start = burst as f64 * 1e6;
            times.extend((0..100).map(|i| start + i as f64 * 1e-3));
        }
        let report = analyze_all(&series_from_times(&[(7, times)]));
        let key = report.keys[&7];
        assert!(key.dispersion.ratio > 5.0);
        assert!(key.b1 > 0.7 && key.b1 < 1.0);
    }

    #[test]
    fn test_poisson_arrivals_are_near_zero() {
        let mut rng = XorShiftRng::seed_from_u64(244);
        let exp = Exp::new(0.5).unwrap();
        let mut now = 0.0;
        let times = (0..20000)
            .map(|_| {
                now += exp.sample(&mut rng);
                now
            })
            .collect::<Vec<_>>();
        let report = analyze_all(&series_from_times(&[(1, times)]));
        let key = report.keys[&1];
        assert!(key.b1.abs() < 0.02, "b1 = {}", key.b1);
        assert!(key.b1 > -1.0 && key.b1 < 1.0);
        assert!(key.b2.unwrap().abs() < 0.05);
    }

    #[test]
    fn test_single_sample_b2_is_unstable() {
        // two requests: one inter-arrival, R = 0, both B2 terms vanish
        assert!(matches!(
            small_sample_burstiness(0.0, 1),
            Err(EstimationError::NumericalInstability(_))
        ));
        let report = analyze_all(&series_from_times(&[
            (1, vec![0.0, 3.0]),
            (2, vec![1.0, 2.0, 4.0]),
        ]));
        assert_eq!(report.keys[&1].b2, None);
        assert!(report.failures.contains_key(&1));
        // key 1 still counts toward B1 but not toward B2
        let k2 = report.keys[&2];
        assert!((report.weighted_b2.unwrap() - k2.b2.unwrap()).abs() < 1e-12);
        let expected_b1 = (1.0 * -1.0 + 2.0 * k2.b1) / 3.0;
        assert!((report.weighted_b1.unwrap() - expected_b1).abs() < 1e-12);
    }

    #[test]
    fn test_empty_series_is_a_domain_error() {
        assert!(matches!(dispersion(3, &[]), Err(EstimationError::Domain(_))));
        assert!(matches!(
            dispersion(3, &[0.0, 0.0]),
            Err(EstimationError::NumericalInstability(_))
        ));
    }

    #[test]
    fn test_non_positive_mean_is_unstable() {
        let err = dispersion(7, &[-1.0, -2.0]).unwrap_err();
        assert!(matches!(err, EstimationError::NumericalInstability(_)));
        assert!(err.to_string().contains("key 7 has a non-positive mean"));
        assert!(dispersion(7, &[0.0, 0.0]).is_err());
    }

    #[test]
    fn test_pooled_ratio_differs_from_weighted_mean() {
        let report = analyze_all(&series_from_times(&[
            (1, vec![0.0, 1.0, 2.0, 3.0, 4.0]),
            (2, vec![0.5, 0.6, 10.0, 10.1, 30.0]),
            (3, vec![5.0]),
        ]));
        assert_eq!(report.keys.len(), 2);
        assert!(!report.keys.contains_key(&3));

        let k1 = report.keys[&1].dispersion;
        let k2 = report.keys[&2].dispersion;
        let pooled = (4.0 * k1.std + 4.0 * k2.std) / (4.0 * k1.mean + 4.0 * k2.mean);
        assert!((report.pooled_ratio.unwrap() - pooled).abs() < 1e-12);
        assert!((report.pooled_b1.unwrap() - burstiness(pooled)).abs() < 1e-12);
        assert!((report.pooled_b1.unwrap() - report.weighted_b1.unwrap()).abs() > 1e-3);
    }

    #[test]
    fn test_restricted_keys_and_idempotence() {
        let series = series_from_times(&[
            (1, vec![0.0, 1.0, 3.0]),
            (2, vec![0.5, 0.7, 4.0, 4.1]),
            (3, vec![0.2, 9.0]),
        ]);
        let first = analyze(&series, [1, 2]);
        let second = analyze(&series, [1, 2]);
        assert_eq!(first.keys, second.keys);
        assert_eq!(first.weighted_b1, second.weighted_b1);
        assert_eq!(first.weighted_b2, second.weighted_b2);
        assert_eq!(first.keys.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
    }
}
