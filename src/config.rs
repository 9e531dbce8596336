use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use burn::config::Config;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use crate::error::{self, Error};
use crate::model::constants::{DEFAULT_CATEGORY_CHANNELS, DEFAULT_ROTATION_CHANNELS};

/// Options that decide the shape of the model. Test and export runs take
/// these from the checkpoint's `options.json` instead of the command line.
pub const SHAPE_KEYS: [&str; 4] = ["ngf", "ndf", "category_channels", "rotation_channels"];

pub const OPTIONS_FILE: &str = "options.json";

#[derive(ValueEnum, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Train,
    Test,
    Export,
}

/// Every parameter of a run. Built once from the command line, optionally
/// merged with a checkpoint's shape options, then only read.
#[derive(Config, Debug)]
pub struct RunOptions {
    pub mode: Mode,
    pub output_dir: String,
    pub data_dir: String,
    pub seed: Option<u64>,
    pub checkpoint: Option<String>,
    pub check_step: Option<String>,
    pub max_epochs: Option<usize>,

    /// Cadences, in epochs. Zero or negative disables.
    #[config(default = 10)]
    pub summary_freq: i64,
    #[config(default = 1)]
    pub progress_freq: i64,
    #[config(default = 1)]
    pub display_freq: i64,
    #[config(default = 10)]
    pub save_freq: i64,
    #[config(default = 10)]
    pub validate_freq: i64,
    #[config(default = 100)]
    pub max_to_keep: usize,

    #[config(default = 1)]
    pub batch_size: usize,
    #[config(default = 64)]
    pub ngf: usize,
    #[config(default = 64)]
    pub ndf: usize,
    #[config(default = "DEFAULT_CATEGORY_CHANNELS")]
    pub category_channels: usize,
    #[config(default = "DEFAULT_ROTATION_CHANNELS")]
    pub rotation_channels: usize,

    #[config(default = 50)]
    pub discrim_freq: usize,
    #[config(default = 0.0002)]
    pub lr_discriminator: f64,
    #[config(default = 0.0002)]
    pub lr_generator: f64,
    #[config(default = 0.5)]
    pub beta1: f64,
    #[config(default = 10.0)]
    pub lam: f64,
    #[config(default = 0.01)]
    pub gp_step: f64,
    #[config(default = 8)]
    pub gp_directions: usize,
    #[config(default = 100.0)]
    pub l1_weight: f64,
    #[config(default = 1.0)]
    pub gan_weight: f64,

    #[config(default = 50)]
    pub pre_train_g_epoch: usize,
    #[config(default = 50)]
    pub pre_train_d_epoch: usize,
}

impl RunOptions {
    pub fn images_dir(&self) -> PathBuf {
        Path::new(&self.output_dir).join("images")
    }

    /// Checks the options against the selected mode. Runs before anything
    /// is written to disk.
    pub fn validate(&self) -> error::Result<()> {
        match self.mode {
            Mode::Test | Mode::Export if self.checkpoint.is_none() => {
                return Err(Error::Config(format!(
                    "checkpoint required for {:?} mode",
                    self.mode
                )));
            }
            Mode::Train if self.max_epochs.is_none() => {
                return Err(Error::Config("max_epochs required for train mode".into()));
            }
            _ => {}
        }
        if self.checkpoint.is_some() && self.check_step.is_none() {
            return Err(Error::Config(
                "check_step required when loading a checkpoint".into(),
            ));
        }
        if self.checkpoint.is_none() && self.check_step.is_some() {
            return Err(Error::Config("check_step given without checkpoint".into()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be positive".into()));
        }
        if self.discrim_freq == 0 {
            return Err(Error::Config("discrim_freq must be positive".into()));
        }
        if self.category_channels == 0 {
            return Err(Error::Config("category_channels must be positive".into()));
        }
        Ok(())
    }

    /// Flat key/value view.
    pub fn to_map(&self) -> error::Result<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(Error::Config(format!("options serialized to {other}"))),
        }
    }

    pub fn log(&self) -> error::Result<()> {
        let sorted: BTreeMap<String, Value> = self.to_map()?.into_iter().collect();
        for (key, value) in sorted {
            info!("{key} = {value}");
        }
        Ok(())
    }

    /// Writes the record as `options.json` in `dir`.
    pub fn write(&self, dir: &Path) -> error::Result<PathBuf> {
        let path = dir.join(OPTIONS_FILE);
        let sorted: BTreeMap<String, Value> = self.to_map()?.into_iter().collect();
        let json = serde_json::to_string_pretty(&sorted)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }
}

/// Reads the options record stored next to a checkpoint.
pub fn read_saved_options(checkpoint_dir: &Path) -> error::Result<Map<String, Value>> {
    let path = checkpoint_dir.join(OPTIONS_FILE);
    if !path.is_file() {
        return Err(Error::Config(format!(
            "{} not found, cannot recover model shape",
            path.display()
        )));
    }
    let contents = std::fs::read_to_string(&path)?;
    match serde_json::from_str(&contents)? {
        Value::Object(map) => Ok(map),
        _ => Err(Error::Config(format!("{} is not a JSON object", path.display()))),
    }
}

/// Returns a copy of `options` whose shape keys are replaced by the values
/// in `saved`. Keys missing from `saved` keep their command-line value.
pub fn merge_shape_options(
    options: &RunOptions,
    saved: &Map<String, Value>,
) -> error::Result<(RunOptions, Vec<(String, Value)>)> {
    let mut merged = options.to_map()?;
    let mut loaded = Vec::new();
    for key in SHAPE_KEYS {
        if let Some(value) = saved.get(key) {
            merged.insert(key.to_string(), value.clone());
            loaded.push((key.to_string(), value.clone()));
        }
    }
    let merged = serde_json::from_value(Value::Object(merged))
        .map_err(|e| Error::Config(format!("invalid saved shape option: {e}")))?;
    Ok((merged, loaded))
}

/// Validates the options and, for test and export runs, pulls the shape
/// options from the checkpoint. Touches nothing on disk besides reading.
pub fn resolve(options: RunOptions) -> error::Result<RunOptions> {
    options.validate()?;
    match (options.mode, options.checkpoint.as_deref()) {
        (Mode::Test | Mode::Export, Some(checkpoint)) => {
            let saved = read_saved_options(Path::new(checkpoint))?;
            let (merged, loaded) = merge_shape_options(&options, &saved)?;
            for (key, value) in loaded {
                info!("loaded {key} = {value}");
            }
            Ok(merged)
        }
        _ => Ok(options),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options(mode: Mode) -> RunOptions {
        RunOptions::new(mode, "out".to_string(), "data".to_string())
    }

    #[test]
    fn test_mode_requires_checkpoint() {
        let err = options(Mode::Test).validate().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn train_mode_requires_max_epochs() {
        assert!(options(Mode::Train).validate().is_err());
        assert!(
            options(Mode::Train)
                .with_max_epochs(Some(1))
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn merge_only_touches_shape_keys() {
        let options = options(Mode::Test)
            .with_ngf(8)
            .with_lr_generator(0.5)
            .with_batch_size(4);
        let saved = json!({ "ngf": 32, "ndf": 16, "lr_generator": 0.1, "batch_size": 9 });
        let saved = saved.as_object().unwrap();

        let (merged, loaded) = merge_shape_options(&options, saved).unwrap();

        assert_eq!(merged.ngf, 32);
        assert_eq!(merged.ndf, 16);
        assert_eq!(merged.lr_generator, 0.5);
        assert_eq!(merged.batch_size, 4);
        assert_eq!(loaded.len(), 2);
        // the input record is untouched
        assert_eq!(options.ngf, 8);
    }

    #[test]
    fn missing_saved_options_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let options = options(Mode::Test)
            .with_checkpoint(Some(dir.path().display().to_string()))
            .with_check_step(Some("model-1".to_string()));

        let err = resolve(options).unwrap_err();

        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn config_record_round_trips_through_burn() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        let options = options(Mode::Train)
            .with_max_epochs(Some(3))
            .with_gp_directions(0);

        options.save(&path).unwrap();
        let loaded = RunOptions::load(&path).unwrap();

        assert_eq!(loaded.max_epochs, Some(3));
        assert_eq!(loaded.gp_directions, 0);
        assert_eq!(loaded.mode, Mode::Train);
    }

    #[test]
    fn written_options_have_sorted_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = options(Mode::Train).write(dir.path()).unwrap();
        let text = std::fs::read_to_string(path).unwrap();

        let batch = text.find("\"batch_size\"").unwrap();
        let ngf = text.find("\"ngf\"").unwrap();
        assert!(batch < ngf);
    }
}
