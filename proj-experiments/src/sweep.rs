use std::{
    fs::File,
    io::BufWriter,
    path::{Path, PathBuf},
};

use proj_delay_model::{
    config::ExperimentConfig,
    report::{emit_estimates, LineSink},
    trace_gen::generate_synthetic_arrivals,
    verify::{DelayEstimates, DelayVerifier, Verification},
    Result,
};
use rand::SeedableRng;
use rand_xorshift::XorShiftRng;
use rayon::prelude::*;
use tracing::info;

use crate::data::Workload;

/// `<out_dir>/<workload>_<delay>l_<estimator>.txt`
fn output_path(out_dir: &Path, workload: &str, estimates: &DelayEstimates) -> PathBuf {
    out_dir.join(format!(
        "{}_{}l_{}.txt",
        workload,
        estimates.delay,
        estimates.estimator.file_tag()
    ))
}

fn write_verification(out_dir: &Path, workload: &str, verification: &Verification) -> Result<()> {
    for estimates in verification.estimates() {
        let path = output_path(out_dir, workload, estimates);
        let mut sink = LineSink::new(BufWriter::new(File::create(&path)?));
        emit_estimates(&mut sink, estimates)?;
        sink.finish()?;
    }
    Ok(())
}

/// Evaluate every configured delay. Delays are independent of each other and
/// run in parallel over the same read-only estimates; synthetic arrivals are
/// drawn once from the configured seed and shared by all delays.
pub fn run_verification(
    workload: &Workload,
    config: &ExperimentConfig,
    out_dir: &Path,
) -> Result<()> {
    let intensities = workload.intensities(config)?;
    let synthetic = config.synthetic.then(|| {
        let mut rng = XorShiftRng::seed_from_u64(config.seed);
        generate_synthetic_arrivals(&intensities, &mut rng)
    });
    let mut verifier = DelayVerifier::new(&workload.series, &intensities);
    if let Some(synthetic) = synthetic.as_ref() {
        verifier = verifier.with_synthetic(synthetic);
    }

    std::fs::create_dir_all(out_dir)?;
    config
        .delays
        .par_iter()
        .map(|&delay| {
            let verification = verifier.verify(delay);
            write_verification(out_dir, &workload.name, &verification)?;
            info!("delay {} verified", delay);
            Ok(())
        })
        .collect::<Result<Vec<()>>>()?;
    info!(
        "verified {} delays for workload {}, results in {}",
        config.delays.len(),
        workload.name,
        out_dir.display()
    );
    Ok(())
}
