//! Fixtures shared by the training tests.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use burn::backend::{Autodiff, NdArray};
use burn::prelude::*;
use burn::tensor::Distribution;

use crate::config::{Mode, RunOptions};
use crate::error::Result;
use crate::model::architecture::RoomGanConfig;
use crate::model::data::{
    CAD_SUFFIX, COLOR_SUFFIX, Loader, RoomBatch, RoomChannels, RoomGrid, Split,
};
use crate::model::optim::GanTrainer;

pub type TestBackend = Autodiff<NdArray<f32>>;

pub const WIDTH: usize = 8;
pub const ROOM_NC: usize = 6;

/// Small model, no pretraining, every cadence off.
pub fn tiny_options(output_dir: &Path) -> RunOptions {
    RunOptions::new(
        Mode::Train,
        output_dir.display().to_string(),
        "unused".to_string(),
    )
    .with_max_epochs(Some(1))
    .with_ngf(2)
    .with_ndf(2)
    .with_category_channels(3)
    .with_rotation_channels(2)
    .with_discrim_freq(1)
    .with_pre_train_g_epoch(0)
    .with_pre_train_d_epoch(0)
    .with_summary_freq(0)
    .with_progress_freq(0)
    .with_display_freq(0)
    .with_save_freq(0)
    .with_validate_freq(0)
}

pub fn tiny_channels(options: &RunOptions) -> RoomChannels {
    RoomChannels::new(ROOM_NC, options.category_channels, options.rotation_channels).unwrap()
}

pub fn tiny_trainer(
    options: &RunOptions,
    device: &<TestBackend as Backend>::Device,
) -> GanTrainer<TestBackend> {
    let model = RoomGanConfig::new(options.ngf, options.ndf, ROOM_NC, WIDTH)
        .init(device)
        .unwrap();
    GanTrainer::new(model, options, tiny_channels(options))
}

/// In-memory batches of size one, counting every fetch per split.
pub struct MemoryLoader<B: Backend> {
    train: Vec<RoomBatch<B>>,
    val: Vec<RoomBatch<B>>,
    pub train_fetches: usize,
    pub val_fetches: usize,
    stop_after: Option<(usize, Arc<AtomicBool>)>,
}

impl<B: Backend> MemoryLoader<B> {
    pub fn new(ntrain: usize, nval: usize, device: &B::Device) -> Self {
        let batch = || RoomBatch {
            inputs: Tensor::random([1, 3, WIDTH, WIDTH], Distribution::Uniform(-1.0, 1.0), device),
            targets: Tensor::random(
                [1, ROOM_NC, WIDTH, WIDTH],
                Distribution::Uniform(0.0, 1.0),
                device,
            ),
        };
        Self {
            train: (0..ntrain).map(|_| batch()).collect(),
            val: (0..nval).map(|_| batch()).collect(),
            train_fetches: 0,
            val_fetches: 0,
            stop_after: None,
        }
    }

    /// Raises `stop` once `fetches` training batches have been handed out.
    pub fn stop_after(mut self, fetches: usize, stop: Arc<AtomicBool>) -> Self {
        self.stop_after = Some((fetches, stop));
        self
    }
}

impl<B: Backend> Loader<B> for MemoryLoader<B> {
    fn ntrain(&self) -> usize {
        self.train.len()
    }

    fn nval(&self) -> usize {
        self.val.len()
    }

    fn room_width(&self) -> usize {
        WIDTH
    }

    fn room_nc(&self) -> usize {
        ROOM_NC
    }

    fn next_batch(&mut self, split: Split, _device: &B::Device) -> Result<RoomBatch<B>> {
        let batch = match split {
            Split::Train => {
                self.train_fetches += 1;
                if let Some((fetches, stop)) = &self.stop_after {
                    if self.train_fetches >= *fetches {
                        stop.store(true, Ordering::SeqCst);
                    }
                }
                self.train[(self.train_fetches - 1) % self.train.len()].clone()
            }
            Split::Validation => {
                self.val_fetches += 1;
                self.val[(self.val_fetches - 1) % self.val.len()].clone()
            }
        };
        Ok(batch)
    }
}

/// Writes `train` and `val` layout/room pairs under `root`. A split with no
/// samples is not created.
pub fn write_room_dataset(root: &Path, train: usize, val: usize, width: u32, channels: usize) {
    for (split, count) in [("train", train), ("val", val)] {
        if count == 0 {
            continue;
        }
        let dir = root.join(split);
        std::fs::create_dir_all(&dir).unwrap();
        for i in 0..count {
            let image = image::RgbImage::from_pixel(width, width, image::Rgb([255, 0, 128]));
            image.save(dir.join(format!("room{i}{COLOR_SUFFIX}"))).unwrap();
            let grid = RoomGrid {
                channels,
                width: width as usize,
                data: vec![0.5; channels * (width * width) as usize],
            };
            std::fs::write(
                dir.join(format!("room{i}{CAD_SUFFIX}")),
                serde_json::to_string(&grid).unwrap(),
            )
            .unwrap();
        }
    }
}
