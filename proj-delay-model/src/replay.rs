//! Replay one key's arrivals against an aggregation window.
//!
//! A request at `t_i` is held open until `t_i + Z`. Every later request to the same
//! key arriving inside that window is aggregated onto it and experiences
//! `t_i + Z - t_j` of delay.

use proj_models::Timestamp;

use crate::error::{EstimationError, Result};

/// Keeps the blended estimate defined when no request sees interference.
pub const BLEND_EPSILON: f64 = 1e-4;

#[derive(Debug, Clone, PartialEq)]
pub struct Replay {
    pub window: f64,
    /// Interference delay accumulated by each request, in arrival order.
    pub interference: Vec<f64>,
    /// Number of (earlier, later) request pairs that fell inside a window.
    pub samples: usize,
    /// Sum of the delay of all those pairs.
    pub total_delay: f64,
}

/// Replay `times` (ascending) with window `window`.
///
/// The forward scan for a request stops at the first later arrival outside its
/// window: arrivals are ordered, so nothing after it can fall back inside.
pub fn replay(times: &[Timestamp], window: f64) -> Replay {
    let mut interference = Vec::with_capacity(times.len());
    let mut samples = 0;
    let mut total_delay = 0.0;
    for (i, &start) in times.iter().enumerate() {
        let deadline = start + window;
        let mut accumulated = 0.0;
        for &next in &times[i + 1..] {
            if next > deadline {
                break;
            }
            accumulated += deadline - next;
            samples += 1;
        }
        total_delay += accumulated;
        interference.push(accumulated);
    }
    Replay {
        window,
        interference,
        samples,
        total_delay,
    }
}

impl Replay {
    pub fn num_requests(&self) -> usize {
        self.interference.len()
    }

    /// Mean interference per request, leaving out the last request, which has no
    /// later arrivals to observe. `None` with fewer than two requests.
    pub fn mean_interference(&self) -> Option<f64> {
        let observed = self.interference.split_last()?.1;
        if observed.is_empty() {
            return None;
        }
        Some(observed.iter().sum::<f64>() / observed.len() as f64)
    }

    /// Blend of the full window, weighted by the number of requests, and the mean
    /// interference delay, weighted by the number of interference samples.
    pub fn blended_delay(&self) -> Result<f64> {
        let first = self.num_requests() as f64;
        let second = self.samples as f64;
        let total = first + second;
        if total == 0.0 {
            return Err(EstimationError::NumericalInstability(
                "blended delay of an empty arrival sequence".to_string(),
            ));
        }
        Ok(self.window * first / total
            + self.total_delay / (second + BLEND_EPSILON) * second / total)
    }
}
