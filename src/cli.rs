use std::path::Path;

use clap::Parser;

use crate::config::{Mode, RunOptions};
use crate::model::constants::{DEFAULT_CATEGORY_CHANNELS, DEFAULT_ROTATION_CHANNELS};

/// Train, test or export a conditional GAN that turns a room layout image
/// into a furnished room grid.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[arg(long, value_enum, default_value = "train")]
    pub mode: Mode,

    /// Where to put output files; defaults to output/<time of launch>
    #[arg(long = "output_dir")]
    pub output_dir: Option<String>,

    /// Directory holding the train/ and val/ splits
    #[arg(long = "data_dir", default_value = "data")]
    pub data_dir: String,

    #[arg(long)]
    pub seed: Option<u64>,

    /// Directory with a checkpoint to resume training from or use for testing
    #[arg(long)]
    pub checkpoint: Option<String>,

    /// Snapshot to load from the checkpoint directory, e.g. model-1200
    #[arg(long = "check_step")]
    pub check_step: Option<String>,

    /// Number of training epochs
    #[arg(long = "max_epochs")]
    pub max_epochs: Option<usize>,

    /// Write a summary row every summary_freq epochs (0 to disable)
    #[arg(long = "summary_freq", default_value_t = 10, allow_negative_numbers = true)]
    pub summary_freq: i64,

    /// Log progress every progress_freq epochs (0 to disable)
    #[arg(long = "progress_freq", default_value_t = 1, allow_negative_numbers = true)]
    pub progress_freq: i64,

    /// Export current training images every display_freq epochs (0 to disable)
    #[arg(long = "display_freq", default_value_t = 1, allow_negative_numbers = true)]
    pub display_freq: i64,

    /// Save the model every save_freq epochs (0 to disable)
    #[arg(long = "save_freq", default_value_t = 10, allow_negative_numbers = true)]
    pub save_freq: i64,

    /// Run the validation split every validate_freq epochs (0 to disable)
    #[arg(long = "validate_freq", default_value_t = 10, allow_negative_numbers = true)]
    pub validate_freq: i64,

    /// Number of snapshots to keep
    #[arg(long = "max_to_keep", default_value_t = 100)]
    pub max_to_keep: usize,

    #[arg(long = "batch_size", default_value_t = 1)]
    pub batch_size: usize,

    /// Generator filters in the first conv layer
    #[arg(long, default_value_t = 64)]
    pub ngf: usize,

    /// Critic filters in the first conv layer
    #[arg(long, default_value_t = 64)]
    pub ndf: usize,

    /// One-hot category channels at the front of each room grid
    #[arg(long = "category_channels", default_value_t = DEFAULT_CATEGORY_CHANNELS)]
    pub category_channels: usize,

    /// Rotation channels following the categories
    #[arg(long = "rotation_channels", default_value_t = DEFAULT_ROTATION_CHANNELS)]
    pub rotation_channels: usize,

    /// Critic updates per generator update
    #[arg(long = "discrim_freq", default_value_t = 50)]
    pub discrim_freq: usize,

    #[arg(long = "lr_discriminator", default_value_t = 0.0002)]
    pub lr_discriminator: f64,

    #[arg(long = "lr_generator", default_value_t = 0.0002)]
    pub lr_generator: f64,

    /// Momentum term of adam
    #[arg(long, default_value_t = 0.5)]
    pub beta1: f64,

    /// Gradient penalty weight
    #[arg(long, default_value_t = 10.0)]
    pub lam: f64,

    /// Finite-difference step of the gradient penalty
    #[arg(long = "gp_step", default_value_t = 0.01)]
    pub gp_step: f64,

    /// Random directions of the gradient norm estimate (0: every coordinate)
    #[arg(long = "gp_directions", default_value_t = 8)]
    pub gp_directions: usize,

    /// Weight on the L1 term for the generator gradient
    #[arg(long = "l1_weight", default_value_t = 100.0)]
    pub l1_weight: f64,

    /// Weight on the GAN term for the generator gradient
    #[arg(long = "gan_weight", default_value_t = 1.0)]
    pub gan_weight: f64,

    /// Supervised generator epochs before adversarial training
    #[arg(long = "pre_train_G_epoch", default_value_t = 50)]
    pub pre_train_g_epoch: usize,

    /// Critic epochs before adversarial training
    #[arg(long = "pre_train_D_epoch", default_value_t = 50)]
    pub pre_train_d_epoch: usize,
}

/// `output/<hh_mmAM_on_Month_dd_yyyy>` for the current local time.
pub fn default_output_dir() -> String {
    let stamp = chrono::Local::now().format("%I_%M%p_on_%B_%d_%Y");
    Path::new("output")
        .join(stamp.to_string())
        .display()
        .to_string()
}

impl Args {
    pub fn into_options(self) -> RunOptions {
        let output_dir = self.output_dir.unwrap_or_else(default_output_dir);
        RunOptions::new(self.mode, output_dir, self.data_dir)
            .with_seed(self.seed)
            .with_checkpoint(self.checkpoint)
            .with_check_step(self.check_step)
            .with_max_epochs(self.max_epochs)
            .with_summary_freq(self.summary_freq)
            .with_progress_freq(self.progress_freq)
            .with_display_freq(self.display_freq)
            .with_save_freq(self.save_freq)
            .with_validate_freq(self.validate_freq)
            .with_max_to_keep(self.max_to_keep)
            .with_batch_size(self.batch_size)
            .with_ngf(self.ngf)
            .with_ndf(self.ndf)
            .with_category_channels(self.category_channels)
            .with_rotation_channels(self.rotation_channels)
            .with_discrim_freq(self.discrim_freq)
            .with_lr_discriminator(self.lr_discriminator)
            .with_lr_generator(self.lr_generator)
            .with_beta1(self.beta1)
            .with_lam(self.lam)
            .with_gp_step(self.gp_step)
            .with_gp_directions(self.gp_directions)
            .with_l1_weight(self.l1_weight)
            .with_gan_weight(self.gan_weight)
            .with_pre_train_g_epoch(self.pre_train_g_epoch)
            .with_pre_train_d_epoch(self.pre_train_d_epoch)
    }
}
