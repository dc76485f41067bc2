//! Generate synthetic arrivals

use std::{cmp::Ordering, collections::BinaryHeap};

use proj_models::{KeyId, Request, Timestamp, Trace};
use rand::Rng;
use rand_distr::{Distribution as _, Exp};
use tracing::{info, warn};

use crate::{
    error::{EstimationError, Result},
    intensity::Intensities,
    series::KeyMap,
};

/// Number of arrivals drawn per key by the synthetic estimator.
pub const SYNTHETIC_ARRIVALS: usize = 2000;

fn exponential(rate: f64) -> Result<Exp<f64>> {
    if !(rate > 0.0 && rate.is_finite()) {
        return Err(EstimationError::Domain(format!(
            "arrival rate must be positive and finite, got {rate}"
        )));
    }
    Exp::new(rate).map_err(|e| {
        EstimationError::Domain(format!("no exponential distribution with rate {rate}: {e}"))
    })
}

/// `count` arrival timestamps of a Poisson process with the given rate, starting
/// at time zero (the first arrival is one inter-arrival draw after it).
pub fn poisson_arrivals<R: Rng>(rate: f64, count: usize, rng: &mut R) -> Result<Vec<Timestamp>> {
    let exp = exponential(rate)?;
    let mut now = 0.0;
    Ok((0..count)
        .map(|_| {
            now += exp.sample(rng);
            now
        })
        .collect())
}

/// Independent synthetic arrival sequences, one per key, drawn at each key's
/// empirical rate.
#[derive(Debug, Default)]
pub struct SyntheticArrivals {
    pub series: KeyMap<Vec<Timestamp>>,
    pub failures: KeyMap<EstimationError>,
}

/// Draw [`SYNTHETIC_ARRIVALS`] arrivals for every universe key that has an
/// empirical rate. Keys are visited in ascending order, so a seeded `rng` gives
/// reproducible sequences.
pub fn generate_synthetic_arrivals<R: Rng>(
    intensities: &Intensities,
    rng: &mut R,
) -> SyntheticArrivals {
    let mut arrivals = SyntheticArrivals::default();
    for &key in intensities.universe.iter() {
        let Some(&rate) = intensities.lambda_empirical.get(&key) else {
            continue;
        };
        match poisson_arrivals(rate, SYNTHETIC_ARRIVALS, rng) {
            Ok(times) => {
                arrivals.series.insert(key, times);
            }
            Err(e) => {
                warn!("no synthetic arrivals for key {}: {}", key, e);
                arrivals.failures.insert(key, e);
            }
        }
    }
    info!("generated synthetic arrivals for {} keys", arrivals.series.len());
    arrivals
}

#[derive(Debug, PartialEq)]
struct Pending {
    at: Timestamp,
    key: KeyId,
}

impl Eq for Pending {}

impl Ord for Pending {
    // reversed, so that the heap pops the earliest arrival
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .total_cmp(&self.at)
            .then_with(|| other.key.cmp(&self.key))
    }
}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Merge independent Poisson processes, one per key with the given rate, into a
/// single time-ordered trace of `num_requests` requests of `size` bytes.
pub fn generate_poisson_trace<R: Rng>(
    rates: &KeyMap<f64>,
    num_requests: usize,
    size: u64,
    rng: &mut R,
) -> Result<Trace> {
    let processes = rates
        .iter()
        .map(|(key, rate)| Ok((*key, exponential(*rate)?)))
        .collect::<Result<KeyMap<_>>>()?;

    let mut next_arrivals = processes
        .iter()
        .map(|(key, exp)| Pending {
            at: exp.sample(rng),
            key: *key,
        })
        .collect::<BinaryHeap<_>>();

    let mut requests = Vec::with_capacity(num_requests);
    while requests.len() < num_requests {
        let Some(Pending { at, key }) = next_arrivals.pop() else {
            break;
        };
        requests.push(Request {
            timestamp: at,
            key,
            size,
        });
        next_arrivals.push(Pending {
            at: at + processes[&key].sample(rng),
            key,
        });
    }
    Ok(Trace::new(requests))
}
