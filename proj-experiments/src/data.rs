use std::path::Path;

use proj_delay_model::{
    config::ExperimentConfig,
    intensity::{Intensities, IntensityEstimator},
    io::load_trace_file,
    series::ArrivalSeries,
    skew::fit_skew,
    Result,
};
use proj_models::Trace;
use tracing::info;

/// A loaded trace together with the per-key views every experiment needs.
pub struct Workload {
    pub name: String,
    pub trace: Trace,
    pub series: ArrivalSeries,
}

/// Load a trace. Without an explicit name, the workload is named after the file
/// stem (`traces/Bilibili.csv` -> `Bilibili`).
pub fn load_workload(path: &str, name: Option<String>) -> Result<Workload> {
    let name = name.unwrap_or_else(|| {
        Path::new(path)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string())
    });
    let trace = load_trace_file(path)?;
    let series = ArrivalSeries::from_trace(&trace);
    info!(
        "workload {}: {} requests over {} keys",
        name,
        trace.len(),
        series.num_keys()
    );
    Ok(Workload {
        name,
        trace,
        series,
    })
}

impl Workload {
    /// The configured exponent, or one fitted from the trace.
    pub fn alpha(&self, config: &ExperimentConfig) -> Result<f64> {
        match config.alpha {
            Some(alpha) => Ok(alpha),
            None => Ok(fit_skew(&self.trace)?.alpha),
        }
    }

    pub fn intensities(&self, config: &ExperimentConfig) -> Result<Intensities> {
        let population = config.population_size(&self.name)?;
        IntensityEstimator::new(self.alpha(config)?, population).estimate(&self.series)
    }
}
