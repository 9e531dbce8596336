//! Mode dispatch: resolves the options, prepares the output directory and
//! runs training, a validation pass or a generator export.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use burn::{prelude::*, record::CompactRecorder, tensor::backend::AutodiffBackend};
use tracing::{info, warn};

use crate::config::{self, Mode, RunOptions};
use crate::error::{Error, Result};
use crate::model::{
    architecture::RoomGanConfig,
    checkpoint::restore,
    data::{Loader, RoomChannels, RoomLoader},
    optim::GanTrainer,
    training::{TrainReport, Trainer, validate},
};
use crate::utils::export::Exporter;

/// File stem of the exported generator; the recorder adds the extension.
pub const GENERATOR_FILE: &str = "generator";

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Trained(TrainReport),
    Tested { examples: usize },
    Exported(PathBuf),
}

pub fn run<B: AutodiffBackend>(
    options: RunOptions,
    device: B::Device,
    stop: Arc<AtomicBool>,
) -> Result<RunOutcome> {
    // Everything that can be rejected is rejected before the first write.
    let options = config::resolve(options)?;
    let seed = options.seed.unwrap_or_else(|| rand::random::<u32>() as u64);
    let options = options.with_seed(Some(seed));
    B::seed(seed);

    std::fs::create_dir_all(options.images_dir())?;
    options.log()?;
    options.write(Path::new(&options.output_dir))?;

    let mut loader = RoomLoader::new(&options.data_dir, options.batch_size, seed)?;
    let room_nc = Loader::<B>::room_nc(&loader);
    let room_width = Loader::<B>::room_width(&loader);
    let channels = RoomChannels::new(
        room_nc,
        options.category_channels,
        options.rotation_channels,
    )?;

    let model =
        RoomGanConfig::new(options.ngf, options.ndf, room_nc, room_width).init::<B>(&device)?;
    info!("parameter count = {}", model.num_params());

    let (model, global_step) = match (&options.checkpoint, &options.check_step) {
        (Some(dir), Some(step)) => {
            info!("loading model from checkpoint {dir}");
            restore(Path::new(dir), step, model, &device)?
        }
        _ => (model, 0),
    };

    match options.mode {
        Mode::Train => {
            let gan = GanTrainer::new(model, &options, channels);
            let trainer = Trainer::new(&options, gan, &mut loader, global_step, stop, device)?;
            let (report, _) = trainer.run()?;
            Ok(RunOutcome::Trained(report))
        }
        Mode::Test => {
            let examples = Loader::<B>::nval(&loader);
            if examples == 0 {
                warn!("no validation examples in {}", options.data_dir);
            }
            let exporter = Exporter::new(&options.output_dir, channels);
            validate(&model, channels, &mut loader, &exporter, -1, &device)?;
            Ok(RunOutcome::Tested { examples })
        }
        Mode::Export => {
            let path = Path::new(&options.output_dir).join(GENERATOR_FILE);
            model
                .generator
                .save_file(&path, &CompactRecorder::new())
                .map_err(|e| Error::Recorder(format!("{e:?}")))?;
            let path = path.with_extension("mpk");
            info!("exported generator to {}", path.display());
            Ok(RunOutcome::Exported(path))
        }
    }
}
