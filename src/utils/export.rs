use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use burn::prelude::*;
use tracing::warn;

use crate::error::{Error, Result};
use crate::model::data::RoomChannels;
use crate::model::optim::Fetched;
use crate::utils::{first_sample, layout_to_image, room_to_image};

pub const TRAIN_INDEX: &str = "train.html";
pub const VALIDATE_INDEX: &str = "validate.html";

/// File names of one exported row. The zero-padded step keeps negative
/// pretraining tags sorted before step 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportNames {
    pub step: i64,
    pub inputs: String,
    pub outputs: String,
    pub targets: String,
}

impl ExportNames {
    pub fn step(step: i64) -> Self {
        Self::with_prefix(step, format!("{step:010}"))
    }

    /// Names for example `index` of a pass tagged `step`.
    pub fn indexed(step: i64, index: usize) -> Self {
        Self::with_prefix(step, format!("{step:010}_{index:03}"))
    }

    fn with_prefix(step: i64, prefix: String) -> Self {
        Self {
            step,
            inputs: format!("{prefix}_inputs.png"),
            outputs: format!("{prefix}_outputs.png"),
            targets: format!("{prefix}_targets.png"),
        }
    }
}

/// Appends one row to an HTML index, writing the table header first when
/// the file is new.
pub fn append_index(path: &Path, names: &ExportNames) -> Result<()> {
    let is_new = !path.exists();
    let mut index = OpenOptions::new().create(true).append(true).open(path)?;
    if is_new {
        write!(index, "<html><body><table><tr>")?;
        write!(
            index,
            "<th>step</th><th>input</th><th>output</th><th>target</th></tr>"
        )?;
    }

    write!(index, "<tr>")?;
    write!(index, "<td>{}</td>", names.step)?;
    for image in [&names.inputs, &names.outputs, &names.targets] {
        write!(index, "<td><img src='images/{image}'></td>")?;
    }
    writeln!(index, "</tr>")?;
    Ok(())
}

/// Renders (input, output, target) triples into `<output_dir>/images` and
/// indexes them. Failures are logged, never returned: export is best-effort.
pub struct Exporter {
    output_dir: PathBuf,
    channels: RoomChannels,
}

impl Exporter {
    pub fn new<P: AsRef<Path>>(output_dir: P, channels: RoomChannels) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            channels,
        }
    }

    pub fn append<B: Backend>(&self, html_file: &str, fetched: &Fetched<B>, names: &ExportNames) {
        if let Err(e) = self.try_append(html_file, fetched, names) {
            warn!("export of step {} to {html_file} failed: {e}", names.step);
        }
    }

    fn try_append<B: Backend>(
        &self,
        html_file: &str,
        fetched: &Fetched<B>,
        names: &ExportNames,
    ) -> Result<()> {
        let images = self.output_dir.join("images");
        std::fs::create_dir_all(&images)?;

        let (inputs, [_, h, w]) = first_sample(&fetched.inputs)?;
        layout_to_image(&inputs, h, w)
            .ok_or_else(|| Error::Data("input is not a color layout".into()))?
            .save(images.join(&names.inputs))?;

        for (tensor, name) in [
            (&fetched.outputs, &names.outputs),
            (&fetched.targets, &names.targets),
        ] {
            let (room, [_, h, w]) = first_sample(tensor)?;
            room_to_image(&room, self.channels, h, w)
                .ok_or_else(|| Error::Data("room grid does not match channel layout".into()))?
                .save(images.join(name))?;
        }

        append_index(&self.output_dir.join(html_file), names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn names_are_zero_padded_and_sort_pretraining_first() {
        let pretrain = ExportNames::indexed(-3, 7);
        let train = ExportNames::step(12);

        assert_eq!(pretrain.outputs, "-000000003_007_outputs.png");
        assert_eq!(train.inputs, "0000000012_inputs.png");
        assert!(pretrain.targets < train.targets);
    }

    #[test]
    fn index_header_is_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(TRAIN_INDEX);

        append_index(&path, &ExportNames::step(1)).unwrap();
        append_index(&path, &ExportNames::step(2)).unwrap();

        let html = std::fs::read_to_string(path).unwrap();
        assert_eq!(html.matches("<th>step</th>").count(), 1);
        assert_eq!(html.matches("<tr><td>").count(), 2);
        assert!(html.contains("images/0000000002_targets.png"));
    }

    #[test]
    fn exports_images_and_row() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let channels = RoomChannels::new(5, 3, 2).unwrap();
        let fetched = Fetched::<TestBackend> {
            inputs: Tensor::zeros([2, 3, 8, 8], &device),
            outputs: Tensor::ones([2, 5, 8, 8], &device),
            targets: Tensor::zeros([2, 5, 8, 8], &device),
        };
        let names = ExportNames::indexed(4, 0);

        Exporter::new(dir.path(), channels).append(VALIDATE_INDEX, &fetched, &names);

        for name in [&names.inputs, &names.outputs, &names.targets] {
            assert!(dir.path().join("images").join(name).is_file());
        }
        assert!(dir.path().join(VALIDATE_INDEX).is_file());
    }

    #[test]
    fn export_failures_do_not_propagate() {
        let dir = tempfile::tempdir().unwrap();
        let blocked = dir.path().join("blocked");
        std::fs::write(&blocked, "not a directory").unwrap();
        let channels = RoomChannels::new(5, 3, 2).unwrap();
        let device = Default::default();
        let fetched = Fetched::<TestBackend> {
            inputs: Tensor::zeros([1, 3, 8, 8], &device),
            outputs: Tensor::zeros([1, 5, 8, 8], &device),
            targets: Tensor::zeros([1, 5, 8, 8], &device),
        };

        Exporter::new(&blocked, channels).append(TRAIN_INDEX, &fetched, &ExportNames::step(0));

        assert!(blocked.is_file());
    }
}
