//! Fit the Zipf skew exponent from the rank-frequency distribution of a trace.

use std::cmp::Reverse;

use ahash::AHashMap;
use proj_models::Trace;
use tracing::info;

use crate::error::{EstimationError, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkewFit {
    /// The negated slope of the log-log fit.
    pub alpha: f64,
    pub intercept: f64,
    /// Coefficient of determination of the fit.
    pub r_squared: f64,
    pub num_keys: usize,
}

/// Rank keys by descending frequency and regress `ln(freq / total)` on `ln(rank)`
/// by ordinary least squares. Keys seen once take part like any other key.
pub fn fit_skew(trace: &Trace) -> Result<SkewFit> {
    let mut counts: AHashMap<u64, usize> = AHashMap::new();
    for request in trace.iter() {
        *counts.entry(request.key).or_default() += 1;
    }
    let mut frequencies = counts.values().copied().collect::<Vec<_>>();
    frequencies.sort_unstable_by_key(|&count| Reverse(count));

    let total = trace.len() as f64;
    let points = frequencies
        .iter()
        .enumerate()
        .map(|(idx, &count)| (((idx + 1) as f64).ln(), (count as f64 / total).ln()))
        .collect::<Vec<_>>();
    let (slope, intercept, r_squared) = least_squares(&points)?;
    let fit = SkewFit {
        alpha: -slope,
        intercept,
        r_squared,
        num_keys: points.len(),
    };
    info!(
        "fitted Zipf exponent {} over {} keys (r^2 = {})",
        fit.alpha, fit.num_keys, fit.r_squared
    );
    Ok(fit)
}

/// Returns `(slope, intercept, r_squared)`.
fn least_squares(points: &[(f64, f64)]) -> Result<(f64, f64, f64)> {
    let n = points.len() as f64;
    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;
    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    for (x, y) in points {
        sxx += (x - mean_x) * (x - mean_x);
        sxy += (x - mean_x) * (y - mean_y);
        syy += (y - mean_y) * (y - mean_y);
    }
    if points.len() < 2 || sxx <= f64::EPSILON {
        return Err(EstimationError::NumericalInstability(format!(
            "cannot fit a slope through {} rank(s)",
            points.len()
        )));
    }
    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;
    // all keys equally popular: the fit is exact
    let r_squared = if syy <= f64::EPSILON {
        1.0
    } else {
        sxy * sxy / (sxx * syy)
    };
    Ok((slope, intercept, r_squared))
}

#[cfg(test)]
mod tests {
    use proj_models::Request;

    use super::*;

    /// `counts[i]` requests for key `i + 1`, interleaved round-robin.
    fn trace_with_counts(counts: &[usize]) -> Trace {
        let mut requests = Vec::new();
        let mut remaining = counts.to_vec();
        let mut now = 0.0;
        while remaining.iter().any(|&c| c > 0) {
            for (idx, count) in remaining.iter_mut().enumerate() {
                if *count > 0 {
                    *count -= 1;
                    requests.push(Request::from((now, idx as u64 + 1, 1)));
                    now += 1.0;
                }
            }
        }
        Trace::new(requests)
    }

    #[test]
    fn test_exact_power_law() {
        // frequency proportional to rank^-1
        let fit = fit_skew(&trace_with_counts(&[840, 420, 280, 210, 168, 140, 120, 105])).unwrap();
        assert!((fit.alpha - 1.0).abs() < 1e-9, "alpha = {}", fit.alpha);
        assert!((fit.r_squared - 1.0).abs() < 1e-9);
        assert_eq!(fit.num_keys, 8);
    }

    #[test]
    fn test_ranks_follow_frequency_not_id() {
        // same distribution, ids shuffled
        let fit = fit_skew(&trace_with_counts(&[105, 420, 168, 840, 120, 280, 210, 140])).unwrap();
        assert!((fit.alpha - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_singletons_participate() {
        let fit = fit_skew(&trace_with_counts(&[4, 2, 1, 1])).unwrap();
        assert_eq!(fit.num_keys, 4);
        assert!(fit.alpha > 0.0);
    }

    #[test]
    fn test_uniform_popularity() {
        let fit = fit_skew(&trace_with_counts(&[3, 3, 3])).unwrap();
        assert!(fit.alpha.abs() < 1e-12);
    }

    #[test]
    fn test_single_key_cannot_be_fitted() {
        assert!(matches!(
            fit_skew(&trace_with_counts(&[5])),
            Err(EstimationError::NumericalInstability(_))
        ));
        assert!(fit_skew(&Trace::default()).is_err());
    }
}
