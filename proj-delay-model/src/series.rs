//! Per-key views of a trace: arrival series, inter-arrival times and the summary
//! statistics computed over them.

use std::collections::BTreeMap;

use ahash::AHashMap;
use proj_models::{KeyId, Timestamp, Trace};
use tracing::warn;

/// Per-key results. Iteration is sorted by key id.
pub type KeyMap<V> = BTreeMap<KeyId, V>;

/// The ordered timestamps at which each key was requested.
///
/// The series are owned copies, so nothing derived from them can alias the trace.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ArrivalSeries {
    series: KeyMap<Vec<Timestamp>>,
}

impl ArrivalSeries {
    pub fn from_trace(trace: &Trace) -> Self {
        let out_of_order = count_out_of_order(trace);
        if out_of_order > 0 {
            warn!(
                "{} requests arrive earlier than their predecessor, per-key order follows the trace",
                out_of_order
            );
        }
        let mut grouped: AHashMap<KeyId, Vec<Timestamp>> = AHashMap::new();
        for request in trace.iter() {
            grouped
                .entry(request.key)
                .or_default()
                .push(request.timestamp);
        }
        Self {
            series: grouped.into_iter().collect(),
        }
    }

    pub fn get(&self, key: KeyId) -> Option<&[Timestamp]> {
        self.series.get(&key).map(Vec::as_slice)
    }

    /// Distinct keys, ascending.
    pub fn keys(&self) -> impl Iterator<Item = KeyId> + '_ {
        self.series.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (KeyId, &[Timestamp])> + '_ {
        self.series.iter().map(|(key, times)| (*key, times.as_slice()))
    }

    pub fn num_keys(&self) -> usize {
        self.series.len()
    }

    /// Number of requests to each key.
    pub fn counts(&self) -> KeyMap<usize> {
        self.series
            .iter()
            .map(|(key, times)| (*key, times.len()))
            .collect()
    }

    /// Inter-arrival times of `key`. `None` for unknown keys and for keys seen only once.
    pub fn inter_arrivals(&self, key: KeyId) -> Option<Vec<f64>> {
        self.get(key)
            .filter(|times| times.len() > 1)
            .map(inter_arrivals)
    }
}

/// Consecutive differences of `times`.
pub fn inter_arrivals(times: &[Timestamp]) -> Vec<f64> {
    times.windows(2).map(|pair| pair[1] - pair[0]).collect()
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Standard deviation with divisor `n`.
pub fn population_std(values: &[f64]) -> Option<f64> {
    let mean = mean(values)?;
    let variance =
        values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

fn count_out_of_order(trace: &Trace) -> usize {
    trace
        .windows(2)
        .filter(|pair| pair[1].timestamp < pair[0].timestamp)
        .count()
}
