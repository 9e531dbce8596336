use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::error::Result;
use crate::model::optim::{CriticStats, GeneratorStats};

pub const SUMMARY_FILE: &str = "summary.jsonl";

/// Every named scalar of one adversarial step.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SummaryRow {
    pub step: usize,
    pub discriminator_loss: f32,
    pub predict_real: f32,
    pub predict_fake: f32,
    pub gradient_penalty: f32,
    #[serde(rename = "generator_loss_GAN")]
    pub generator_loss_gan: f32,
    #[serde(rename = "generator_loss_L1")]
    pub generator_loss_l1: f32,
    pub category_loss: f32,
    pub rotation_loss: f32,
    pub generator_adversarial_loss: f32,
    pub generator_supervised_loss: f32,
}

impl SummaryRow {
    pub fn new(step: usize, critic: CriticStats, generator: GeneratorStats) -> Self {
        Self {
            step,
            discriminator_loss: critic.discriminator_loss,
            predict_real: critic.predict_real,
            predict_fake: critic.predict_fake,
            gradient_penalty: critic.gradient_penalty,
            generator_loss_gan: generator.gan,
            generator_loss_l1: generator.l1,
            category_loss: generator.category,
            rotation_loss: generator.rotation,
            generator_adversarial_loss: generator.adversarial,
            generator_supervised_loss: generator.supervised,
        }
    }
}

/// Appends summary rows as JSON lines.
pub struct SummaryWriter {
    path: PathBuf,
}

impl SummaryWriter {
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Self {
        Self {
            path: output_dir.as_ref().join(SUMMARY_FILE),
        }
    }

    pub fn record(&self, row: &SummaryRow) {
        info!(
            step = row.step,
            discriminator_loss = row.discriminator_loss,
            generator_loss_GAN = row.generator_loss_gan,
            generator_loss_L1 = row.generator_loss_l1,
            category_loss = row.category_loss,
            rotation_loss = row.rotation_loss,
            "recording summary"
        );
        if let Err(e) = self.append(row) {
            warn!("could not write {}: {e}", self.path.display());
        }
    }

    fn append(&self, row: &SummaryRow) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(row)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_appended_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SummaryWriter::new(dir.path());
        let critic = CriticStats {
            discriminator_loss: 1.5,
            ..Default::default()
        };
        let generator = GeneratorStats {
            l1: 0.25,
            ..Default::default()
        };

        writer.record(&SummaryRow::new(3, critic, generator));
        writer.record(&SummaryRow::new(6, critic, generator));

        let text = std::fs::read_to_string(dir.path().join(SUMMARY_FILE)).unwrap();
        let rows: Vec<serde_json::Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["step"], 6);
        assert_eq!(rows[0]["discriminator_loss"], 1.5);
        assert_eq!(rows[0]["generator_loss_L1"], 0.25);
    }
}
