mod data;
mod sweep;

use std::{
    fs::File,
    io::BufWriter,
    path::{Path, PathBuf},
};

use clap::{Parser, Subcommand};
use proj_delay_model::{
    burstiness::analyze,
    config::ExperimentConfig,
    intensity::{restricted_universe, zipf_rates},
    io::{save_events_file, write_text_trace},
    report::{write_burstiness, LineSink},
    series::{inter_arrivals, mean},
    skew::fit_skew,
    trace_gen::generate_poisson_trace,
    Result,
};
use rand::SeedableRng;
use rand_xorshift::XorShiftRng;
use tracing::{error, info, warn};

fn analyze_trace(trace_path: &str) -> Result<()> {
    let workload = data::load_workload(trace_path, None)?;
    let counts = workload.series.counts();
    let singletons = counts.values().filter(|&&count| count == 1).count();

    println!("Number of requests: {}", workload.trace.len());
    println!("Number of keys: {}", workload.series.num_keys());
    println!("Keys requested once: {}", singletons);
    if let (Some(first), Some(last)) = (workload.trace.first(), workload.trace.last()) {
        println!("Time span: {}", last.timestamp - first.timestamp);
    }
    let all_times = workload
        .trace
        .iter()
        .map(|request| request.timestamp)
        .collect::<Vec<_>>();
    if let Some(irt) = mean(&inter_arrivals(&all_times)) {
        println!("Mean inter-request time: {}", irt);
    }
    match fit_skew(&workload.trace) {
        Ok(fit) => println!(
            "Zipf exponent: {} (intercept {}, r^2 {})",
            fit.alpha, fit.intercept, fit.r_squared
        ),
        Err(e) => warn!("cannot fit the Zipf exponent: {}", e),
    }
    Ok(())
}

fn run_burstiness(
    trace_path: &str,
    workload: Option<String>,
    config: &ExperimentConfig,
    out_dir: &Path,
) -> Result<()> {
    let workload = data::load_workload(trace_path, workload)?;
    let population = config.population_size(&workload.name)?;
    let universe = restricted_universe(workload.series.keys(), population);
    let report = analyze(&workload.series, universe);
    if !report.failures.is_empty() {
        warn!("{} keys have undefined burstiness scores", report.failures.len());
    }
    info!(
        "pooled dispersion ratio {:?}, pooled B1 {:?}",
        report.pooled_ratio, report.pooled_b1
    );

    std::fs::create_dir_all(out_dir)?;
    let path = out_dir.join(format!("{}_b.txt", workload.name));
    let mut sink = LineSink::new(BufWriter::new(File::create(&path)?));
    write_burstiness(&mut sink, &report)?;
    sink.finish()?;
    info!("burstiness written to {}", path.display());
    Ok(())
}

fn generate_trace(
    output: &Path,
    num_keys: u64,
    alpha: f64,
    num_requests: usize,
    size: u64,
    seed: u64,
) -> Result<()> {
    let mut rng = XorShiftRng::seed_from_u64(seed);
    let rates = zipf_rates(1..=num_keys, alpha)?;
    let trace = generate_poisson_trace(&rates, num_requests, size, &mut rng)?;
    match output.extension().and_then(|ext| ext.to_str()) {
        Some("events") => save_events_file(output, &trace)?,
        _ => write_text_trace(BufWriter::new(File::create(output)?), &trace)?,
    }
    info!("wrote {} requests to {}", trace.len(), output.display());
    Ok(())
}

fn convert(trace_path: &str, output: &Path) -> Result<()> {
    let workload = data::load_workload(trace_path, None)?;
    save_events_file(output, &workload.trace)?;
    info!("wrote {} requests to {}", workload.trace.len(), output.display());
    Ok(())
}

fn head(trace_path: &str, n: usize) -> Result<()> {
    let workload = data::load_workload(trace_path, None)?;
    for request in workload.trace.iter().take(n) {
        println!("{};{};{}", request.timestamp, request.key, request.size)
    }
    Ok(())
}

fn load_config(path: Option<PathBuf>) -> Result<ExperimentConfig> {
    match path {
        Some(path) => ExperimentConfig::load(path),
        None => Ok(ExperimentConfig::default()),
    }
}

#[derive(Debug, Subcommand)]
enum Experiment {
    /// Summarize a trace and fit its Zipf exponent.
    Analysis {
        #[clap(required = true)]
        trace_path: String,
    },
    /// Per-key and population burstiness over the restricted key universe.
    Burstiness {
        #[clap(required = true)]
        trace_path: String,
        #[clap(long, short = 'w', help = "workload name (defaults to the trace file stem)")]
        workload: Option<String>,
        #[clap(long, short = 'c', help = "path to the experiment toml file")]
        config: Option<PathBuf>,
        #[clap(long, short = 'o', default_value = "burst")]
        out_dir: PathBuf,
    },
    /// Evaluate the delay estimators for every configured delay.
    Verify {
        #[clap(required = true)]
        trace_path: String,
        #[clap(long, short = 'w', help = "workload name (defaults to the trace file stem)")]
        workload: Option<String>,
        #[clap(long, short = 'c', help = "path to the experiment toml file")]
        config: Option<PathBuf>,
        #[clap(long, short = 'o', default_value = "verify")]
        out_dir: PathBuf,
        #[clap(
            long,
            short = 'd',
            value_delimiter = ',',
            help = "delays to evaluate, overriding the config (e.g. 1,10,100)"
        )]
        delays: Option<Vec<f64>>,
    },
    /// Write a synthetic trace of independent Poisson processes with Zipf rates.
    Generate {
        #[clap(required = true, help = "output path; `.events` writes the binary format")]
        output: PathBuf,
        #[clap(long, short = 'k', default_value = "1000")]
        num_keys: u64,
        #[clap(long, short = 'a', default_value = "0.8")]
        alpha: f64,
        #[clap(long, short = 'n', default_value = "100000")]
        num_requests: usize,
        #[clap(long, short = 's', default_value = "1")]
        size: u64,
        #[clap(long, default_value = "244")]
        seed: u64,
    },
    /// Convert a text trace to the binary events format.
    Convert {
        #[clap(required = true)]
        trace_path: String,
        #[clap(required = true)]
        output: PathBuf,
    },
    Head {
        #[clap(required = true)]
        trace_path: String,
        #[clap(long, short = 'n', default_value = "10")]
        n: usize,
    },
}

#[derive(Parser, Debug)]
#[command(about = "Run delay-model experiments on request traces.")]
struct Args {
    #[clap(subcommand)]
    experiment: Experiment,
}

fn run(args: Args) -> Result<()> {
    match args.experiment {
        Experiment::Analysis { trace_path } => analyze_trace(&trace_path),
        Experiment::Burstiness {
            trace_path,
            workload,
            config,
            out_dir,
        } => run_burstiness(&trace_path, workload, &load_config(config)?, &out_dir),
        Experiment::Verify {
            trace_path,
            workload,
            config,
            out_dir,
            delays,
        } => {
            let mut config = load_config(config)?;
            if let Some(delays) = delays {
                config = config.with_delays(delays)?;
            }
            let workload = data::load_workload(&trace_path, workload)?;
            sweep::run_verification(&workload, &config, &out_dir)
        }
        Experiment::Generate {
            output,
            num_keys,
            alpha,
            num_requests,
            size,
            seed,
        } => generate_trace(&output, num_keys, alpha, num_requests, size, seed),
        Experiment::Convert { trace_path, output } => convert(&trace_path, &output),
        Experiment::Head { trace_path, n } => head(&trace_path, n),
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();
    let args = Args::parse();
    info!("{:?}", args);
    if let Err(e) = run(args) {
        error!("{}", e);
        std::process::exit(1);
    }
}
