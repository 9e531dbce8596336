use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use burn::backend::Autodiff;
use clap::Parser;
use room_gan::{cli::Args, runner::{self, RunOutcome}};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[cfg(feature = "cuda")]
type TrainBackend = Autodiff<burn::backend::Cuda<f32, i32>>;
#[cfg(not(feature = "cuda"))]
type TrainBackend = Autodiff<burn::backend::NdArray<f32>>;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let options = Args::parse().into_options();
    let mode = options.mode;

    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    ctrlc::set_handler(move || {
        warn!("interrupt received, stopping after the current step");
        flag.store(true, Ordering::SeqCst);
    })
    .context("installing the interrupt handler")?;

    let device = Default::default();
    let outcome = runner::run::<TrainBackend>(options, device, stop)
        .with_context(|| format!("{mode:?} run failed"))?;

    match outcome {
        RunOutcome::Trained(report) if report.stopped => {
            info!("stopped at global step {}", report.global_step)
        }
        RunOutcome::Trained(report) => info!("done at global step {}", report.global_step),
        RunOutcome::Tested { examples } => info!("tested {examples} examples"),
        RunOutcome::Exported(path) => info!("generator written to {}", path.display()),
    }
    Ok(())
}
