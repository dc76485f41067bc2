use std::{collections::BTreeMap, path::Path};

use serde_derive::Deserialize;

use crate::error::{EstimationError, Result};

/// Settings of a verification run, usually read from a TOML file:
///
/// ```toml
/// delays = [1.0, 10.0, 100.0]
/// seed = 244
/// synthetic = true
/// # alpha = 0.8   # fitted from the trace when absent
///
/// [workloads]
/// Bilibili = 639
/// ```
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ExperimentConfig {
    /// Aggregation delays to evaluate, in trace time units.
    #[serde(default = "default_delays")]
    pub delays: Vec<f64>,
    /// Seed of the synthetic arrival generator.
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_synthetic")]
    pub synthetic: bool,
    /// Fixed Zipf exponent.
    #[serde(default)]
    pub alpha: Option<f64>,
    /// Size of the restricted key universe of each workload.
    #[serde(default)]
    pub workloads: BTreeMap<String, usize>,
}

fn default_delays() -> Vec<f64> {
    vec![
        1.0, 10.0, 100.0, 200.0, 500.0, 1000.0, 2000.0, 5000.0, 10000.0,
    ]
}

fn default_seed() -> u64 {
    244
}

fn default_synthetic() -> bool {
    true
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            delays: default_delays(),
            seed: default_seed(),
            synthetic: default_synthetic(),
            alpha: None,
            workloads: BTreeMap::new(),
        }
    }
}

impl ExperimentConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(s).map_err(|e| EstimationError::Configuration(e.to_string()))?;
        check_delays(&config.delays)?;
        Ok(config)
    }

    /// Replace the delay sweep, e.g. from the command line.
    pub fn with_delays(mut self, delays: Vec<f64>) -> Result<Self> {
        check_delays(&delays)?;
        self.delays = delays;
        Ok(self)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let toml_str = std::fs::read_to_string(path).map_err(|e| {
            EstimationError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&toml_str)
    }

    /// Size of the restricted key universe of `workload`.
    pub fn population_size(&self, workload: &str) -> Result<usize> {
        self.workloads.get(workload).copied().ok_or_else(|| {
            EstimationError::Configuration(format!("unknown workload {workload:?}"))
        })
    }
}

fn check_delays(delays: &[f64]) -> Result<()> {
    match delays.iter().find(|d| !(d.is_finite() && **d >= 0.0)) {
        Some(delay) => Err(EstimationError::Configuration(format!(
            "delay {delay} is not a non-negative number"
        ))),
        None => Ok(()),
    }
}
