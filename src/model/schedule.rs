use std::fmt;

use crate::config::RunOptions;
use crate::error::{Error, Result};

/// Training phases, run strictly in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    GenPretrain,
    DiscPretrain,
    Adversarial,
    Done,
}

impl Phase {
    pub fn next(self) -> Phase {
        match self {
            Phase::GenPretrain => Phase::DiscPretrain,
            Phase::DiscPretrain => Phase::Adversarial,
            Phase::Adversarial | Phase::Done => Phase::Done,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::GenPretrain => "generator pretraining",
            Phase::DiscPretrain => "discriminator pretraining",
            Phase::Adversarial => "adversarial training",
            Phase::Done => "done",
        };
        f.write_str(name)
    }
}

/// Update budgets of each phase, derived from the options and the number of
/// training batches per epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseBudget {
    pub ntrain: usize,
    pub gen_pretrain_epochs: usize,
    pub disc_pretrain_updates: usize,
    pub discrim_freq: usize,
    pub max_steps: usize,
}

impl PhaseBudget {
    pub fn new(options: &RunOptions, ntrain: usize) -> Result<Self> {
        if ntrain == 0 {
            return Err(Error::Data("training split is empty".into()));
        }
        let max_epochs = options
            .max_epochs
            .ok_or_else(|| Error::Config("max_epochs required for train mode".into()))?;
        Ok(Self {
            ntrain,
            gen_pretrain_epochs: options.pre_train_g_epoch,
            disc_pretrain_updates: options.pre_train_d_epoch * ntrain,
            discrim_freq: options.discrim_freq,
            max_steps: max_epochs * ntrain,
        })
    }

    /// Every tenth pretraining epoch, and the last one, is exported.
    pub fn exports_pretrain_epoch(&self, epoch: usize) -> bool {
        epoch % 10 == 0 || epoch + 1 == self.gen_pretrain_epochs
    }

    /// Step tag of a pretraining epoch: negative, reaching -1 on the last
    /// epoch, so pretraining images sort before step 0.
    pub fn pretrain_tag(&self, epoch: usize) -> i64 {
        epoch as i64 - self.gen_pretrain_epochs as i64
    }
}
