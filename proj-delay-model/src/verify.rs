//! Expected aggregation delay per key and per workload, under four estimators:
//!
//! - the Poisson closed form `E1 = lambda * Z^2 / 2`,
//! - the corrected closed form `E3 = (1 + 1 / (1 + lambda * Z)) * Z / 2`,
//!   both evaluated with the Zipf and with the empirical rate,
//! - a replay of the trace itself ([`crate::replay`]),
//! - the same replay over synthetic Poisson arrivals at the empirical rate.
//!
//! `E2` and `E4` are the population aggregates of `E1` and `E3`, weighted by the
//! normalized intensity matching the estimator.

use std::fmt::Display;

use proj_models::KeyId;
use tracing::{debug, info, warn};

use crate::{
    error::{finite, EstimationError, Result},
    intensity::Intensities,
    replay::replay,
    series::{ArrivalSeries, KeyMap},
    trace_gen::SyntheticArrivals,
};

/// Divisor of the population aggregates. The weights are normalized already, so
/// this stays 1; the request-count total computed next to it is only logged.
// TODO: decide whether aggregates should be normalized by the request share of the universe
pub const AGGREGATE_NORMALIZATION: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Estimator {
    /// Closed forms with the Zipf rate.
    Zipf,
    /// Closed forms with the empirical rate.
    Empirical,
    /// Replay of the trace.
    Replay,
    /// Replay of synthetic Poisson arrivals.
    Synthetic,
}

impl Estimator {
    /// Suffix of the output file holding this estimator's results.
    pub fn file_tag(&self) -> &'static str {
        match self {
            Estimator::Zipf => "zipf",
            Estimator::Empirical => "all",
            Estimator::Replay => "empi",
            Estimator::Synthetic => "genempi",
        }
    }
}

impl Display for Estimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Estimator::Zipf => "Zipf",
            Estimator::Empirical => "Overall",
            Estimator::Replay => "Empirical",
            Estimator::Synthetic => "Gen-Empirical",
        };
        write!(f, "{}", name)
    }
}

/// The intensity the closed forms are evaluated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rate {
    Zipf,
    Empirical,
}

impl Rate {
    pub fn estimator(self) -> Estimator {
        match self {
            Rate::Zipf => Estimator::Zipf,
            Rate::Empirical => Estimator::Empirical,
        }
    }
}

/// Truncate (not round) a non-negative value to 4 decimal digits, given the value
/// already multiplied by 10^4.
fn truncate_scaled(scaled: f64) -> f64 {
    scaled.trunc() / 10000.0
}

/// `lambda * Z^2 / 2`, truncated to 4 decimal digits. The two rates scale by
/// 10^4 at different points of the product, which can move the last digit.
pub fn poisson_delay(rate: Rate, lambda: f64, delay: f64) -> f64 {
    let squared = delay * delay;
    match rate {
        Rate::Zipf => truncate_scaled(10000.0 * lambda * squared / 2.0),
        Rate::Empirical => truncate_scaled(lambda * squared / 2.0 * 10000.0),
    }
}

/// `(1 + 1 / (1 + lambda * Z)) * Z / 2`, truncated to 4 decimal digits.
pub fn corrected_delay(lambda: f64, delay: f64) -> f64 {
    truncate_scaled(10000.0 * (1.0 + 1.0 / (1.0 + lambda * delay)) * delay / 2.0)
}

#[derive(Debug)]
pub struct DelayEstimates {
    pub estimator: Estimator,
    pub delay: f64,
    /// The keys reported, i.e. the restricted universe.
    pub keys: Vec<KeyId>,
    pub e1: KeyMap<f64>,
    pub e3: KeyMap<f64>,
    pub e2: Option<f64>,
    pub e4: Option<f64>,
    pub failures: KeyMap<EstimationError>,
}

impl DelayEstimates {
    fn new(estimator: Estimator, delay: f64, keys: &[KeyId]) -> Self {
        Self {
            estimator,
            delay,
            keys: keys.to_vec(),
            e1: KeyMap::new(),
            e3: KeyMap::new(),
            e2: None,
            e4: None,
            failures: KeyMap::new(),
        }
    }

    /// `e1` is `None` when the estimator is undefined for the key (a single request).
    fn record(&mut self, key: KeyId, e1: Option<f64>, e3: Result<f64>) {
        let e1 = e1.map(|v| finite(v, || format!("E1 of key {key} is not finite")));
        let e3 = e3.and_then(|v| finite(v, || format!("E3 of key {key} is not finite")));
        for (value, values) in [(e1, &mut self.e1), (Some(e3), &mut self.e3)] {
            match value {
                Some(Ok(v)) => {
                    values.insert(key, v);
                }
                Some(Err(e)) => {
                    warn!("{} estimator: key {} skipped: {}", self.estimator, key, e);
                    self.failures.insert(key, e);
                }
                None => {}
            }
        }
    }

    fn aggregate(mut self, weights: &KeyMap<f64>) -> Self {
        self.e2 = aggregate(&self.e1, weights);
        self.e4 = aggregate(&self.e3, weights);
        info!(
            "{} (Z = {}): E2 = {:?}, E4 = {:?}",
            self.estimator, self.delay, self.e2, self.e4
        );
        self
    }
}

/// `sum(w * v) / AGGREGATE_NORMALIZATION` over the weighted keys. Keys without a
/// value are dropped and the sum is rescaled by the weight that is left.
pub fn aggregate(values: &KeyMap<f64>, weights: &KeyMap<f64>) -> Option<f64> {
    let mut total = 0.0;
    let mut surviving = 0.0;
    let mut missing = false;
    for (key, weight) in weights {
        match values.get(key) {
            Some(value) => {
                total += weight * value;
                surviving += weight;
            }
            None => missing = true,
        }
    }
    if surviving <= 0.0 {
        return None;
    }
    if missing {
        total /= surviving;
    }
    Some(total / AGGREGATE_NORMALIZATION)
}

/// All estimates for one delay value.
#[derive(Debug)]
pub struct Verification {
    pub delay: f64,
    pub zipf: DelayEstimates,
    pub empirical: DelayEstimates,
    pub replay: DelayEstimates,
    pub synthetic: Option<DelayEstimates>,
}

impl Verification {
    pub fn estimates(&self) -> impl Iterator<Item = &DelayEstimates> {
        [&self.zipf, &self.empirical, &self.replay]
            .into_iter()
            .chain(self.synthetic.as_ref())
    }
}

/// Evaluates the delay estimators over a trace's arrival series and intensities.
/// Nothing is mutated, so one verifier can serve many delay values at once.
#[derive(Debug, Clone, Copy)]
pub struct DelayVerifier<'a> {
    series: &'a ArrivalSeries,
    intensities: &'a Intensities,
    synthetic: Option<&'a SyntheticArrivals>,
}

impl<'a> DelayVerifier<'a> {
    pub fn new(series: &'a ArrivalSeries, intensities: &'a Intensities) -> Self {
        Self {
            series,
            intensities,
            synthetic: None,
        }
    }

    /// Also evaluate the replay over the given synthetic arrivals.
    pub fn with_synthetic(mut self, synthetic: &'a SyntheticArrivals) -> Self {
        self.synthetic = Some(synthetic);
        self
    }

    /// Evaluate a batch of delays, one [`Verification`] per delay, in order.
    pub fn verify_all(&self, delays: &[f64]) -> Vec<Verification> {
        delays.iter().map(|&delay| self.verify(delay)).collect()
    }

    pub fn verify(&self, delay: f64) -> Verification {
        let counts = self.series.counts();
        let universe_requests = self
            .intensities
            .universe
            .iter()
            .filter_map(|key| counts.get(key))
            .sum::<usize>();
        debug!(
            "{} requests fall into the universe; aggregates are divided by {}",
            universe_requests, AGGREGATE_NORMALIZATION
        );

        Verification {
            delay,
            zipf: self.closed_form(Rate::Zipf, delay),
            empirical: self.closed_form(Rate::Empirical, delay),
            replay: self.replay(delay),
            synthetic: self.synthetic(delay),
        }
    }

    /// The closed forms evaluated with the Zipf or the empirical rate.
    pub fn closed_form(&self, rate: Rate, delay: f64) -> DelayEstimates {
        let (rates, weights) = match rate {
            Rate::Zipf => (&self.intensities.lambda_zipf, &self.intensities.p_zipf),
            Rate::Empirical => (
                &self.intensities.lambda_empirical,
                &self.intensities.p_empirical,
            ),
        };
        let universe = &self.intensities.universe;
        let mut estimates = DelayEstimates::new(rate.estimator(), delay, universe);
        for &key in self.intensities.universe.iter() {
            let Some(&lambda) = rates.get(&key) else {
                continue;
            };
            estimates.record(
                key,
                Some(poisson_delay(rate, lambda, delay)),
                Ok(corrected_delay(lambda, delay)),
            );
        }
        estimates.aggregate(weights)
    }

    /// Replay of each universe key's arrivals in the trace.
    pub fn replay(&self, delay: f64) -> DelayEstimates {
        let universe = &self.intensities.universe;
        let mut estimates = DelayEstimates::new(Estimator::Replay, delay, universe);
        for &key in universe.iter() {
            let Some(times) = self.series.get(key) else {
                continue;
            };
            let result = replay(times, delay);
            estimates.record(key, result.mean_interference(), result.blended_delay());
        }
        estimates.aggregate(&self.intensities.p_empirical)
    }

    /// Replay of the synthetic arrivals, if any were attached.
    pub fn synthetic(&self, delay: f64) -> Option<DelayEstimates> {
        let synthetic = self.synthetic?;
        let universe = &self.intensities.universe;
        let mut estimates = DelayEstimates::new(Estimator::Synthetic, delay, universe);
        let step = (universe.len() / 10).max(1);
        for (idx, &key) in universe.iter().enumerate() {
            if let Some(times) = synthetic.series.get(&key) {
                let result = replay(times, delay);
                estimates.record(key, result.mean_interference(), result.blended_delay());
            }
            if (idx + 1) % step == 0 {
                debug!(
                    "synthetic replay (Z = {}): {:.0}% finished",
                    delay,
                    (idx + 1) as f64 / universe.len() as f64 * 100.0
                );
            }
        }
        Some(estimates.aggregate(&self.intensities.p_empirical))
    }
}

#[cfg(test)]
mod tests {
    use proj_models::{Request, Trace};
    use rand::SeedableRng;
    use rand_xorshift::XorShiftRng;

    use crate::{
        intensity::IntensityEstimator,
        trace_gen::{generate_synthetic_arrivals, poisson_arrivals},
    };

    use super::*;

    fn trace(events: &[(f64, KeyId)]) -> Trace {
        events
            .iter()
            .map(|&(timestamp, key)| Request::from((timestamp, key, 10)))
            .collect()
    }

    #[test]
    fn test_truncation_floors() {
        assert_eq!(poisson_delay(Rate::Zipf, 2.0 / 3.0, 1.0), 0.3333);
        assert_eq!(poisson_delay(Rate::Empirical, 1.0, 0.0), 0.0);
        // 0.99999 would round up to 1.0
        assert_eq!(truncate_scaled(9999.9), 0.9999);
        assert_eq!(corrected_delay(1.0, 1.0), 0.75);
        // no arrivals: half the window plus half the window
        assert_eq!(corrected_delay(0.0, 10.0), 10.0);
    }

    #[test]
    fn test_truncation_follows_the_rate_variant() {
        let lambda = 0.849269798816;
        assert_eq!(poisson_delay(Rate::Zipf, lambda, 5000.0), 10615872.4852);
        assert_eq!(poisson_delay(Rate::Empirical, lambda, 5000.0), 10615872.4851);
        assert_eq!(poisson_delay(Rate::Zipf, lambda, 10000.0), 42463489.9408);
        assert_eq!(poisson_delay(Rate::Empirical, lambda, 10000.0), 42463489.9407);
    }

    #[test]
    fn test_closed_form_is_tagged_with_its_rate() {
        let series = ArrivalSeries::from_trace(&trace(&[(0.0, 1), (1.0, 1), (2.0, 1), (3.0, 1)]));
        let intensities = IntensityEstimator::new(0.8, 1).estimate(&series).unwrap();
        let verifier = DelayVerifier::new(&series, &intensities);

        let empirical = verifier.closed_form(Rate::Empirical, 1.0);
        assert_eq!(empirical.estimator, Estimator::Empirical);
        assert_eq!(empirical.estimator.file_tag(), "all");
        assert_eq!(empirical.e1[&1], 0.5);
        assert_eq!(verifier.closed_form(Rate::Zipf, 1.0).estimator, Estimator::Zipf);

        // the replay of the same key is a different estimate under its own tag
        let replay = verifier.replay(1.0);
        assert_eq!(replay.estimator.file_tag(), "empi");
        assert_eq!(replay.e1[&1], 0.0);
    }

    #[test]
    fn test_closed_form_aggregates() {
        let series = ArrivalSeries::from_trace(&trace(&[
            (0.0, 1),
            (1.0, 2),
            (2.0, 1),
            (4.0, 1),
            (5.0, 2),
        ]));
        let intensities = IntensityEstimator::new(1.0, 2).estimate(&series).unwrap();
        let verification = DelayVerifier::new(&series, &intensities).verify(3.0);

        let zipf = &verification.zipf;
        assert_eq!(zipf.e1[&1], poisson_delay(Rate::Zipf, 2.0 / 3.0, 3.0));
        assert_eq!(zipf.e1[&2], poisson_delay(Rate::Zipf, 1.0 / 3.0, 3.0));
        let p = &intensities.p_zipf;
        let e2 = p[&1] * zipf.e1[&1] + p[&2] * zipf.e1[&2];
        let e4 = p[&1] * zipf.e3[&1] + p[&2] * zipf.e3[&2];
        assert_eq!(zipf.e2, Some(e2));
        assert_eq!(zipf.e4, Some(e4));

        // empirical rates: key 1 -> 1/2, key 2 -> 1/4
        let empirical = &verification.empirical;
        assert_eq!(empirical.e1[&1], poisson_delay(Rate::Empirical, 0.5, 3.0));
        assert_eq!(empirical.e3[&2], corrected_delay(0.25, 3.0));
        assert!(verification.synthetic.is_none());
        assert_eq!(verification.estimates().count(), 3);
    }

    #[test]
    fn test_replay_on_regular_key() {
        let series = ArrivalSeries::from_trace(&trace(&[(0.0, 1), (1.0, 1), (2.0, 1), (3.0, 1)]));
        let intensities = IntensityEstimator::new(0.8, 1).estimate(&series).unwrap();
        let replay = DelayVerifier::new(&series, &intensities).replay(1.0);
        assert_eq!(replay.e1[&1], 0.0);
        assert!((replay.e3[&1] - 4.0 / 7.0).abs() < 1e-12);
        assert_eq!(replay.e2, Some(0.0));
    }

    #[test]
    fn test_singleton_keys_are_excluded_from_empirical_aggregates() {
        let series = ArrivalSeries::from_trace(&trace(&[
            (0.0, 1),
            (0.5, 1),
            (1.0, 2),
            (3.0, 1),
        ]));
        let intensities = IntensityEstimator::new(0.8, 2).estimate(&series).unwrap();
        let verification = DelayVerifier::new(&series, &intensities).verify(1.0);

        assert_eq!(verification.zipf.e1.len(), 2);
        assert!(!verification.empirical.e1.contains_key(&2));
        assert!(!verification.replay.e1.contains_key(&2));
        // a single request still has a blended delay of Z
        assert_eq!(verification.replay.e3[&2], 1.0);
        assert_eq!(verification.replay.keys, vec![1, 2]);

        let replay = &verification.replay;
        assert_eq!(replay.e2, Some(replay.e1[&1]));
        assert_eq!(replay.e4, Some(replay.e3[&1]));
    }

    #[test]
    fn test_aggregate_rescales_over_surviving_keys() {
        let weights = KeyMap::from([(1, 0.25), (2, 0.75)]);
        let values = KeyMap::from([(1, 2.0), (2, 4.0)]);
        assert_eq!(aggregate(&values, &weights), Some(3.5));

        let partial = KeyMap::from([(1, 2.0)]);
        assert_eq!(aggregate(&partial, &weights), Some(2.0));
        assert_eq!(aggregate(&KeyMap::new(), &weights), None);
    }

    #[test]
    fn test_replay_converges_to_poisson_closed_form() {
        let mut rng = XorShiftRng::seed_from_u64(244);
        let rate = 0.5;
        let times = poisson_arrivals(rate, 200_000, &mut rng).unwrap();
        let trace = Trace::new(times.into_iter().map(|t| Request::from((t, 1, 1))));
        let series = ArrivalSeries::from_trace(&trace);
        let intensities = IntensityEstimator::new(1.0, 1).estimate(&series).unwrap();

        for delay in [0.5, 2.0, 4.0, 10.0] {
            let expected = rate * delay * delay / 2.0;
            let replayed = DelayVerifier::new(&series, &intensities).replay(delay).e1[&1];
            let relative_error = (replayed - expected).abs() / expected;
            assert!(
                relative_error < 0.05,
                "Z = {delay}: replay {replayed} vs closed form {expected}"
            );
        }
    }

    #[test]
    fn test_synthetic_estimator_and_idempotence() {
        let mut rng = XorShiftRng::seed_from_u64(11);
        let mut requests = Vec::new();
        for (key, rate) in [(1, 2.0), (2, 1.0), (3, 0.5)] {
            let times = poisson_arrivals(rate, 3000, &mut rng).unwrap();
            requests.extend(times.into_iter().map(|t| Request::from((t, key, 1))));
        }
        requests.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        let series = ArrivalSeries::from_trace(&Trace::new(requests));
        let intensities = IntensityEstimator::new(1.0, 3).estimate(&series).unwrap();
        let mut rng = XorShiftRng::seed_from_u64(5);
        let synthetic = generate_synthetic_arrivals(&intensities, &mut rng);
        let verifier = DelayVerifier::new(&series, &intensities).with_synthetic(&synthetic);

        let first = verifier.verify(1.0);
        let batch = verifier.verify_all(&[0.5, 1.0]);
        assert_eq!(batch[1].delay, 1.0);
        let second = &batch[1];
        for (a, b) in first.estimates().zip(second.estimates()) {
            assert_eq!(a.estimator, b.estimator);
            assert_eq!(a.e1, b.e1);
            assert_eq!(a.e3, b.e3);
            assert_eq!(a.e2, b.e2);
            assert_eq!(a.e4, b.e4);
        }

        // both replays sample Poisson processes at the same rates
        let synthetic = first.synthetic.unwrap();
        let (replayed, generated) = (first.replay.e2.unwrap(), synthetic.e2.unwrap());
        assert!((replayed - generated).abs() / replayed < 0.2);
    }
}
