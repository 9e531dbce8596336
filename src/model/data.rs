use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use image::ImageReader;
use image::imageops::FilterType;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::model::constants::INPUT_CHANNELS;

pub const COLOR_SUFFIX: &str = "_color.png";
pub const CAD_SUFFIX: &str = "_cad.json";

/// How the channels of a room grid are split: category one-hot block,
/// rotation block, then geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomChannels {
    pub categories: usize,
    pub rotations: usize,
    pub geometry: usize,
}

impl RoomChannels {
    pub fn new(total: usize, categories: usize, rotations: usize) -> Result<Self> {
        if categories == 0 || categories + rotations > total {
            return Err(Error::Config(format!(
                "{categories} category + {rotations} rotation channels do not fit in {total}"
            )));
        }
        Ok(Self {
            categories,
            rotations,
            geometry: total - categories - rotations,
        })
    }

    pub fn total(&self) -> usize {
        self.categories + self.rotations + self.geometry
    }
}

/// Target file contents: a `channels x width x width` grid, channel-major.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomGrid {
    pub channels: usize,
    pub width: usize,
    pub data: Vec<f32>,
}

impl RoomGrid {
    pub fn read(path: &Path) -> Result<Self> {
        let grid: RoomGrid = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        if grid.data.len() != grid.channels * grid.width * grid.width {
            return Err(Error::Data(format!(
                "{}: expected {} values, got {}",
                path.display(),
                grid.channels * grid.width * grid.width,
                grid.data.len()
            )));
        }
        Ok(grid)
    }
}

#[derive(Debug, Clone)]
pub struct RoomItem {
    /// Color layout, `[3, w, w]` in `[-1, 1]`.
    pub layout: Vec<f32>,
    /// Room grid, `[room_nc, w, w]`.
    pub room: Vec<f32>,
}

/// Paired `<name>_color.png` / `<name>_cad.json` samples of one directory.
pub struct RoomDataset {
    pub pairs: Vec<(PathBuf, PathBuf)>,
    pub width: usize,
    pub channels: usize,
}

impl RoomDataset {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut pairs = Vec::new();

        for entry in std::fs::read_dir(path)? {
            let color = entry?.path();
            let Some(name) = color.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(stem) = name.strip_suffix(COLOR_SUFFIX) {
                let cad = path.join(format!("{stem}{CAD_SUFFIX}"));
                if cad.is_file() {
                    pairs.push((color, cad));
                } else {
                    warn!("{} has no matching {CAD_SUFFIX}", color.display());
                }
            }
        }
        if pairs.is_empty() {
            return Err(Error::Data(format!(
                "no layout/room pairs found in {}",
                path.display()
            )));
        }
        pairs.sort();

        let probe = RoomGrid::read(&pairs[0].1)?;
        Ok(Self {
            pairs,
            width: probe.width,
            channels: probe.channels,
        })
    }

    fn load(&self, index: usize) -> Result<RoomItem> {
        let (color, cad) = &self.pairs[index];
        let width = self.width as u32;
        let image = ImageReader::open(color)?.decode()?;
        let image = if image.width() != width || image.height() != width {
            image.resize_exact(width, width, FilterType::Nearest)
        } else {
            image
        }
        .to_rgb8();

        let plane = self.width * self.width;
        let mut layout = vec![0.0; INPUT_CHANNELS * plane];
        for (i, pixel) in image.pixels().enumerate() {
            for c in 0..INPUT_CHANNELS {
                // Normalize to [-1, 1]
                layout[c * plane + i] = (pixel[c] as f32 / 127.5) - 1.0;
            }
        }

        let grid = RoomGrid::read(cad)?;
        if grid.channels != self.channels || grid.width != self.width {
            return Err(Error::Data(format!(
                "{}: grid is {}x{}x{}, expected {}x{}x{}",
                cad.display(),
                grid.channels,
                grid.width,
                grid.width,
                self.channels,
                self.width,
                self.width
            )));
        }
        Ok(RoomItem {
            layout,
            room: grid.data,
        })
    }
}

impl Dataset<RoomItem> for RoomDataset {
    fn len(&self) -> usize {
        self.pairs.len()
    }

    fn get(&self, index: usize) -> Option<RoomItem> {
        if index >= self.pairs.len() {
            return None;
        }
        match self.load(index) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("skipping {}: {e}", self.pairs[index].0.display());
                None
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct RoomBatcher {
    pub width: usize,
    pub channels: usize,
}

#[derive(Clone, Debug)]
pub struct RoomBatch<B: Backend> {
    pub inputs: Tensor<B, 4>,  // [batch_size, 3, width, width]
    pub targets: Tensor<B, 4>, // [batch_size, room_nc, width, width]
}

impl<B: Backend> Batcher<B, RoomItem, RoomBatch<B>> for RoomBatcher {
    fn batch(&self, items: Vec<RoomItem>, device: &B::Device) -> RoomBatch<B> {
        let n = items.len();
        let (layouts, rooms): (Vec<_>, Vec<_>) = items
            .into_iter()
            .map(|item| (item.layout, item.room))
            .unzip();

        let inputs = Tensor::<B, 4>::from_data(
            TensorData::new(
                layouts.concat(),
                [n, INPUT_CHANNELS, self.width, self.width],
            )
            .convert::<B::FloatElem>(),
            device,
        );
        let targets = Tensor::<B, 4>::from_data(
            TensorData::new(rooms.concat(), [n, self.channels, self.width, self.width])
                .convert::<B::FloatElem>(),
            device,
        );
        RoomBatch { inputs, targets }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Validation,
}

/// Source of batches for the training loop.
pub trait Loader<B: Backend> {
    /// Training batches per epoch.
    fn ntrain(&self) -> usize;
    /// Validation examples; validation batches hold one example.
    fn nval(&self) -> usize;
    fn room_width(&self) -> usize;
    fn room_nc(&self) -> usize;
    fn next_batch(&mut self, split: Split, device: &B::Device) -> Result<RoomBatch<B>>;
}

/// Reads `<data_dir>/train` and `<data_dir>/val`. Training batches are
/// reshuffled every epoch; validation examples are served in order.
pub struct RoomLoader {
    train: Option<RoomDataset>,
    val: Option<RoomDataset>,
    batcher: RoomBatcher,
    batch_size: usize,
    rng: StdRng,
    order: Vec<usize>,
    train_batch: usize,
    val_cursor: usize,
}

impl RoomLoader {
    pub fn new<P: AsRef<Path>>(data_dir: P, batch_size: usize, seed: u64) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        let open = |split: &str| -> Result<Option<RoomDataset>> {
            let dir = data_dir.join(split);
            if dir.is_dir() {
                RoomDataset::new(dir).map(Some)
            } else {
                warn!("{} does not exist", dir.display());
                Ok(None)
            }
        };
        let train = open("train")?;
        let val = open("val")?;

        let probe = train.as_ref().or(val.as_ref()).ok_or_else(|| {
            Error::Data(format!("no train or val split in {}", data_dir.display()))
        })?;
        let batcher = RoomBatcher {
            width: probe.width,
            channels: probe.channels,
        };
        for dataset in train.iter().chain(val.iter()) {
            if dataset.width != batcher.width || dataset.channels != batcher.channels {
                return Err(Error::Data(
                    "train and val grids have different shapes".into(),
                ));
            }
        }

        let order = (0..train.as_ref().map_or(0, |d| d.len())).collect();
        let mut loader = Self {
            train,
            val,
            batcher,
            batch_size,
            rng: StdRng::seed_from_u64(seed),
            order,
            train_batch: 0,
            val_cursor: 0,
        };
        loader.order.shuffle(&mut loader.rng);
        info!(
            "loaded {} train / {} val examples, grid {}x{}x{}",
            loader.order.len(),
            loader.val.as_ref().map_or(0, |d| d.len()),
            loader.batcher.channels,
            loader.batcher.width,
            loader.batcher.width
        );
        Ok(loader)
    }

    fn fetch(dataset: &RoomDataset, index: usize) -> Result<RoomItem> {
        dataset.get(index).ok_or_else(|| {
            Error::Data(format!("could not load {}", dataset.pairs[index].0.display()))
        })
    }
}

impl<B: Backend> Loader<B> for RoomLoader {
    fn ntrain(&self) -> usize {
        if self.order.is_empty() {
            0
        } else {
            (self.order.len() / self.batch_size).max(1)
        }
    }

    fn nval(&self) -> usize {
        self.val.as_ref().map_or(0, |d| d.len())
    }

    fn room_width(&self) -> usize {
        self.batcher.width
    }

    fn room_nc(&self) -> usize {
        self.batcher.channels
    }

    fn next_batch(&mut self, split: Split, device: &B::Device) -> Result<RoomBatch<B>> {
        let items = match split {
            Split::Train => {
                let dataset = self
                    .train
                    .as_ref()
                    .ok_or_else(|| Error::Data("no training split".into()))?;
                if self.train_batch == <Self as Loader<B>>::ntrain(self) {
                    self.order.shuffle(&mut self.rng);
                    self.train_batch = 0;
                }
                // Wrap around so every batch is full.
                let start = self.train_batch * self.batch_size;
                let items = (0..self.batch_size)
                    .map(|offset| {
                        let index = self.order[(start + offset) % self.order.len()];
                        Self::fetch(dataset, index)
                    })
                    .collect::<Result<Vec<_>>>()?;
                self.train_batch += 1;
                items
            }
            Split::Validation => {
                let dataset = self
                    .val
                    .as_ref()
                    .ok_or_else(|| Error::Data("no validation split".into()))?;
                let item = Self::fetch(dataset, self.val_cursor)?;
                self.val_cursor = (self.val_cursor + 1) % dataset.len();
                vec![item]
            }
        };
        Ok(self.batcher.batch(items, device))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testing::write_room_dataset;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn fixture(train: usize, val: usize) -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        write_room_dataset(root.path(), train, val, 8, 5);
        root
    }

    #[test]
    fn counts_batches_and_shapes() {
        let root = fixture(5, 2);
        let mut loader = RoomLoader::new(root.path(), 2, 7).unwrap();
        let device = Default::default();

        assert_eq!(<RoomLoader as Loader<TestBackend>>::ntrain(&loader), 2);
        assert_eq!(<RoomLoader as Loader<TestBackend>>::nval(&loader), 2);

        let batch: RoomBatch<TestBackend> = loader.next_batch(Split::Train, &device).unwrap();
        assert_eq!(batch.inputs.dims(), [2, 3, 8, 8]);
        assert_eq!(batch.targets.dims(), [2, 5, 8, 8]);

        let val: RoomBatch<TestBackend> = loader.next_batch(Split::Validation, &device).unwrap();
        assert_eq!(val.inputs.dims(), [1, 3, 8, 8]);
    }

    #[test]
    fn layout_is_normalized_channel_major() {
        let root = fixture(1, 0);
        let dataset = RoomDataset::new(root.path().join("train")).unwrap();
        let item = dataset.get(0).unwrap();

        assert!((item.layout[0] - 1.0).abs() < 1e-6); // red plane
        assert!((item.layout[64] + 1.0).abs() < 1e-6); // green plane
    }

    #[test]
    fn empty_directory_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        assert!(matches!(RoomDataset::new(root.path()), Err(Error::Data(_))));
    }

    #[test]
    fn room_channels_must_fit() {
        assert!(RoomChannels::new(5, 3, 3).is_err());
        let channels = RoomChannels::new(6, 3, 2).unwrap();
        assert_eq!(channels.geometry, 1);
    }
}
