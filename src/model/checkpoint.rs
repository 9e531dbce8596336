use std::path::{Path, PathBuf};

use burn::{
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::model::architecture::RoomGan;

pub const CHECKPOINT_INDEX: &str = "checkpoint.json";
const STAGING_DIR: &str = ".staging";
const SNAPSHOT_EXTENSION: &str = "mpk";

/// Full precision, so a resumed run continues from the exact parameters.
pub type CheckpointRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Retained snapshots and the global step of the newest one.
#[derive(Serialize, Deserialize, Default, Debug, PartialEq, Eq)]
pub struct CheckpointIndex {
    pub global_step: usize,
    pub retained: Vec<usize>,
}

/// Written next to each snapshot, checked before its parameters are loaded.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct SnapshotMeta {
    pub global_step: usize,
    pub num_params: usize,
}

pub fn snapshot_name(step: usize) -> String {
    format!("model-{step}")
}

/// Accepts `model-1200` or `1200`.
pub fn parse_step(identifier: &str) -> Result<usize> {
    let digits = identifier.strip_prefix("model-").unwrap_or(identifier);
    digits
        .parse()
        .map_err(|_| Error::Checkpoint(format!("invalid checkpoint step {identifier:?}")))
}

/// Writes parameter snapshots and keeps the newest `max_to_keep`.
pub struct CheckpointManager {
    dir: PathBuf,
    max_to_keep: usize,
    recorder: CheckpointRecorder,
}

impl CheckpointManager {
    pub fn new<P: AsRef<Path>>(dir: P, max_to_keep: usize) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            max_to_keep: max_to_keep.max(1),
            recorder: CheckpointRecorder::new(),
        }
    }

    pub fn snapshot_path(&self, step: usize) -> PathBuf {
        self.dir
            .join(snapshot_name(step))
            .with_extension(SNAPSHOT_EXTENSION)
    }

    fn meta_path(&self, step: usize) -> PathBuf {
        self.dir.join(snapshot_name(step)).with_extension("json")
    }

    pub fn read_index(&self) -> Result<CheckpointIndex> {
        let path = self.dir.join(CHECKPOINT_INDEX);
        if !path.exists() {
            return Ok(CheckpointIndex::default());
        }
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }

    /// Stages the snapshot, then renames it into place, so a snapshot file
    /// is either complete or absent.
    pub fn save<B: Backend>(&self, model: &RoomGan<B>, global_step: usize) -> Result<PathBuf> {
        let staging = self.dir.join(STAGING_DIR);
        std::fs::create_dir_all(&staging)?;

        let name = snapshot_name(global_step);
        model
            .clone()
            .save_file(staging.join(&name), &self.recorder)
            .map_err(|e| Error::Recorder(format!("{e:?}")))?;
        let meta = SnapshotMeta {
            global_step,
            num_params: model.num_params(),
        };
        std::fs::write(
            staging.join(&name).with_extension("json"),
            serde_json::to_string_pretty(&meta)?,
        )?;

        let path = self.snapshot_path(global_step);
        std::fs::rename(
            staging.join(&name).with_extension("json"),
            self.meta_path(global_step),
        )?;
        std::fs::rename(
            staging.join(&name).with_extension(SNAPSHOT_EXTENSION),
            &path,
        )?;

        let mut index = self.read_index()?;
        index.global_step = global_step;
        index.retained.retain(|&step| step != global_step);
        index.retained.push(global_step);
        index.retained.sort_unstable();
        while index.retained.len() > self.max_to_keep {
            let evicted = index.retained.remove(0);
            for file in [self.snapshot_path(evicted), self.meta_path(evicted)] {
                if let Err(e) = std::fs::remove_file(&file) {
                    warn!("could not remove {}: {e}", file.display());
                }
            }
        }
        self.write_index(&index)?;

        info!("saved {}", path.display());
        Ok(path)
    }

    fn write_index(&self, index: &CheckpointIndex) -> Result<()> {
        let path = self.dir.join(CHECKPOINT_INDEX);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(index)?)?;
        std::fs::rename(tmp, path)?;
        Ok(())
    }
}

/// Loads snapshot `identifier` from `dir` into `model`, returning the
/// restored model and its global step. A missing file or a parameter count
/// that does not match `model` is an error, checked before and after the
/// parameters are read.
pub fn restore<B: Backend>(
    dir: &Path,
    identifier: &str,
    model: RoomGan<B>,
    device: &B::Device,
) -> Result<(RoomGan<B>, usize)> {
    let step = parse_step(identifier)?;
    let path = dir.join(snapshot_name(step));
    if !path.with_extension(SNAPSHOT_EXTENSION).is_file() {
        return Err(Error::Checkpoint(format!(
            "{} not found",
            path.with_extension(SNAPSHOT_EXTENSION).display()
        )));
    }

    let expected = model.num_params();
    let meta_path = path.with_extension("json");
    let meta: SnapshotMeta = serde_json::from_str(
        &std::fs::read_to_string(&meta_path)
            .map_err(|e| Error::Checkpoint(format!("{}: {e}", meta_path.display())))?,
    )?;
    if meta.num_params != expected {
        return Err(Error::Checkpoint(format!(
            "{} holds {} parameters, model has {expected}",
            path.display(),
            meta.num_params
        )));
    }

    let restored = model
        .load_file(&path, &CheckpointRecorder::new(), device)
        .map_err(|e| Error::Checkpoint(format!("{}: {e:?}", path.display())))?;
    let found = restored.num_params();
    if found != expected {
        return Err(Error::Checkpoint(format!(
            "{} holds {found} parameters, model has {expected}",
            path.display()
        )));
    }

    info!("restored {} at global step {step}", path.display());
    Ok((restored, step))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::architecture::RoomGanConfig;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;

    fn model(ngf: usize) -> RoomGan<TestBackend> {
        RoomGanConfig::new(ngf, 2, 6, 8)
            .init(&Default::default())
            .unwrap()
    }

    fn outputs(model: &RoomGan<TestBackend>, input: &Tensor<TestBackend, 4>) -> Vec<f32> {
        model
            .generator
            .forward(input.clone())
            .into_data()
            .to_vec()
            .unwrap()
    }

    #[test]
    fn round_trip_reproduces_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let manager = CheckpointManager::new(dir.path(), 5);
        let saved = model(2);
        let input = Tensor::random([1, 3, 8, 8], Distribution::Uniform(-1.0, 1.0), &device);

        manager.save(&saved, 42).unwrap();
        let (restored, step) = restore(dir.path(), "model-42", model(2), &device).unwrap();

        assert_eq!(step, 42);
        let expected = outputs(&saved, &input);
        let actual = outputs(&restored, &input);
        for (a, b) in expected.iter().zip(&actual) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn keeps_only_the_newest_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path(), 2);
        let model = model(2);

        for step in [10, 20, 30] {
            manager.save(&model, step).unwrap();
        }

        assert!(!manager.snapshot_path(10).exists());
        assert!(!dir.path().join("model-10.json").exists());
        assert!(manager.snapshot_path(20).exists());
        assert!(manager.snapshot_path(30).exists());
        assert_eq!(
            manager.read_index().unwrap(),
            CheckpointIndex {
                global_step: 30,
                retained: vec![20, 30]
            }
        );
    }

    #[test]
    fn missing_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = restore(dir.path(), "7", model(2), &Default::default()).unwrap_err();
        assert!(matches!(err, Error::Checkpoint(_)));
    }

    #[test]
    fn shape_mismatch_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        CheckpointManager::new(dir.path(), 5)
            .save(&model(2), 1)
            .unwrap();

        let err = restore(dir.path(), "model-1", model(4), &Default::default()).unwrap_err();

        assert!(matches!(err, Error::Checkpoint(_)));
    }

    #[test]
    fn parses_step_identifiers() {
        assert_eq!(parse_step("model-1200").unwrap(), 1200);
        assert_eq!(parse_step("1200").unwrap(), 1200);
        assert!(parse_step("latest").is_err());
    }
}
