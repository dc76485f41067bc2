//! Per-key arrival intensities: the closed-form Zipf rate and the empirical rate,
//! both raw and normalized over the restricted key universe.
//!
//! The closed-form branch uses a key's id as its popularity rank, so ids must be
//! assigned in popularity order before a trace reaches this module.

use proj_models::KeyId;
use tracing::{info, warn};

use crate::{
    error::{finite, EstimationError, Result},
    series::{inter_arrivals, mean, ArrivalSeries, KeyMap},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntensityEstimate {
    pub lambda_zipf: f64,
    pub lambda_empirical: Option<f64>,
    /// `None` outside the restricted universe.
    pub p_zipf: Option<f64>,
    /// `None` outside the restricted universe or without an empirical rate.
    pub p_empirical: Option<f64>,
}

#[derive(Debug)]
pub struct Intensities {
    pub alpha: f64,
    /// The first `population_size` distinct key ids, ascending.
    pub universe: Vec<KeyId>,
    pub lambda_zipf: KeyMap<f64>,
    pub lambda_empirical: KeyMap<f64>,
    pub p_zipf: KeyMap<f64>,
    pub p_empirical: KeyMap<f64>,
    /// Keys whose empirical rate could not be computed.
    pub failures: KeyMap<EstimationError>,
}

impl Intensities {
    pub fn get(&self, key: KeyId) -> Option<IntensityEstimate> {
        Some(IntensityEstimate {
            lambda_zipf: *self.lambda_zipf.get(&key)?,
            lambda_empirical: self.lambda_empirical.get(&key).copied(),
            p_zipf: self.p_zipf.get(&key).copied(),
            p_empirical: self.p_empirical.get(&key).copied(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IntensityEstimator {
    alpha: f64,
    population_size: usize,
}

impl IntensityEstimator {
    /// - `alpha`: the Zipf skew exponent, fixed or fitted by [`crate::skew::fit_skew`].
    /// - `population_size`: size of the restricted key universe for the workload.
    pub fn new(alpha: f64, population_size: usize) -> Self {
        Self {
            alpha,
            population_size,
        }
    }

    pub fn estimate(&self, series: &ArrivalSeries) -> Result<Intensities> {
        let lambda_zipf = zipf_rates(series.keys(), self.alpha)?;
        let (lambda_empirical, failures) = empirical_rates(series);
        let universe = restricted_universe(series.keys(), self.population_size);
        if universe.len() < self.population_size {
            warn!(
                "trace has {} distinct keys, fewer than the configured population of {}",
                universe.len(),
                self.population_size
            );
        }

        let p_zipf = normalize(&lambda_zipf, &universe);
        let p_empirical = normalize(&lambda_empirical, &universe);
        info!(
            "estimated intensities: alpha = {}, {} keys, {} in universe, {} with empirical rates",
            self.alpha,
            lambda_zipf.len(),
            universe.len(),
            p_empirical.len()
        );

        Ok(Intensities {
            alpha: self.alpha,
            universe,
            lambda_zipf,
            lambda_empirical,
            p_zipf,
            p_empirical,
            failures,
        })
    }
}

/// `lambda(I) = C * I^-alpha` with `C = 1 / sum(I^-alpha)` over the distinct ids.
pub fn zipf_rates<I: IntoIterator<Item = KeyId>>(keys: I, alpha: f64) -> Result<KeyMap<f64>> {
    let weights = keys
        .into_iter()
        .map(|key| {
            if key == 0 {
                return Err(EstimationError::invalid_key(key));
            }
            Ok((key, (key as f64).powf(-alpha)))
        })
        .collect::<Result<KeyMap<f64>>>()?;
    let c = finite(1.0 / weights.values().sum::<f64>(), || {
        format!("Zipf normalizing constant diverges for alpha = {alpha}")
    })?;
    Ok(weights
        .into_iter()
        .map(|(key, weight)| (key, c * weight))
        .collect())
}

/// `1 / mean(inter-arrival)` for every key seen at least twice.
pub fn empirical_rates(series: &ArrivalSeries) -> (KeyMap<f64>, KeyMap<EstimationError>) {
    let mut rates = KeyMap::new();
    let mut failures = KeyMap::new();
    for (key, times) in series.iter() {
        if times.len() < 2 {
            continue;
        }
        let intervals = inter_arrivals(times);
        let rate = mean(&intervals)
            .filter(|m| *m > 0.0)
            .map(|m| 1.0 / m)
            .ok_or_else(|| EstimationError::non_positive_mean(key))
            .and_then(|rate| finite(rate, || format!("empirical rate of key {key} overflows")));
        match rate {
            Ok(rate) => {
                rates.insert(key, rate);
            }
            Err(e) => {
                warn!("no empirical rate for key {}: {}", key, e);
                failures.insert(key, e);
            }
        }
    }
    (rates, failures)
}

/// The first `population_size` keys in ascending id order.
pub fn restricted_universe<I: IntoIterator<Item = KeyId>>(
    keys: I,
    population_size: usize,
) -> Vec<KeyId> {
    let mut keys = keys.into_iter().collect::<Vec<_>>();
    keys.sort_unstable();
    keys.dedup();
    keys.truncate(population_size);
    keys
}

/// Scale `rates` so that the universe keys carrying a rate sum to one.
fn normalize(rates: &KeyMap<f64>, universe: &[KeyId]) -> KeyMap<f64> {
    let present = universe
        .iter()
        .filter_map(|key| rates.get(key).map(|rate| (*key, *rate)))
        .collect::<Vec<_>>();
    let total = present.iter().map(|(_, rate)| rate).sum::<f64>();
    present
        .into_iter()
        .map(|(key, rate)| (key, rate / total))
        .collect()
}
