use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use burn::{prelude::*, tensor::backend::AutodiffBackend};
use tracing::info;

use crate::config::RunOptions;
use crate::error::Result;
use crate::model::{
    architecture::RoomGan,
    cadence::{CadenceTable, Progress},
    checkpoint::CheckpointManager,
    data::{Loader, RoomChannels, Split},
    optim::{CriticStats, GanTrainer, generate},
    schedule::{Phase, PhaseBudget},
};
use crate::utils::{
    export::{ExportNames, Exporter, TRAIN_INDEX, VALIDATE_INDEX},
    summary::{SummaryRow, SummaryWriter},
};

/// What a training run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrainReport {
    pub gen_supervised_updates: usize,
    pub disc_pretrain_updates: usize,
    pub critic_updates: usize,
    pub gen_adversarial_updates: usize,
    pub global_step: usize,
    pub stopped: bool,
}

/// Runs every example of the validation split through the generator, one
/// at a time, and exports each under `tag`.
pub fn validate<B: Backend, L: Loader<B>>(
    model: &RoomGan<B>,
    channels: RoomChannels,
    loader: &mut L,
    exporter: &Exporter,
    tag: i64,
    device: &B::Device,
) -> Result<()> {
    let nval = loader.nval();
    info!("validating {nval} examples at step {tag}");
    for index in 0..nval {
        let batch = loader.next_batch(Split::Validation, device)?;
        let fetched = generate(model, batch, channels);
        exporter.append(VALIDATE_INDEX, &fetched, &ExportNames::indexed(tag, index));
    }
    Ok(())
}

/// Drives the phases of a run over one model, loader and output directory.
pub struct Trainer<'a, B: AutodiffBackend, L: Loader<B>> {
    gan: GanTrainer<B>,
    loader: &'a mut L,
    budget: PhaseBudget,
    cadences: CadenceTable,
    exporter: Exporter,
    checkpoints: CheckpointManager,
    summary: Option<SummaryWriter>,
    stop: Arc<AtomicBool>,
    device: B::Device,
    global_step: usize,
    report: TrainReport,
}

impl<'a, B: AutodiffBackend, L: Loader<B>> Trainer<'a, B, L> {
    /// `global_step` is the step restored from a checkpoint, 0 for a fresh
    /// run.
    pub fn new(
        options: &RunOptions,
        gan: GanTrainer<B>,
        loader: &'a mut L,
        global_step: usize,
        stop: Arc<AtomicBool>,
        device: B::Device,
    ) -> Result<Self> {
        let ntrain = loader.ntrain();
        let budget = PhaseBudget::new(options, ntrain)?;
        let cadences = CadenceTable::from_options(options, ntrain);
        let summary = cadences
            .summary
            .is_enabled()
            .then(|| SummaryWriter::new(&options.output_dir));

        Ok(Self {
            exporter: Exporter::new(&options.output_dir, gan.channels()),
            checkpoints: CheckpointManager::new(&options.output_dir, options.max_to_keep),
            gan,
            loader,
            budget,
            cadences,
            summary,
            stop,
            device,
            global_step,
            report: TrainReport::default(),
        })
    }

    pub fn run(mut self) -> Result<(TrainReport, RoomGan<B>)> {
        let mut phase = Phase::GenPretrain;
        while phase != Phase::Done {
            info!("entering {phase}");
            phase = match phase {
                Phase::GenPretrain => {
                    self.pretrain_generator()?;
                    phase.next()
                }
                Phase::DiscPretrain => {
                    self.pretrain_discriminator()?;
                    phase.next()
                }
                Phase::Adversarial => {
                    self.report.stopped = !self.adversarial()?;
                    Phase::Done
                }
                Phase::Done => Phase::Done,
            };
        }

        self.report.global_step = self.global_step;
        info!(report = ?self.report, "training finished");
        Ok((self.report, self.gan.model().clone()))
    }

    fn pretrain_generator(&mut self) -> Result<()> {
        let epochs = self.budget.gen_pretrain_epochs;
        for epoch in 0..epochs {
            let export = self.budget.exports_pretrain_epoch(epoch);
            let tag = self.budget.pretrain_tag(epoch);
            let mut last = None;
            for index in 0..self.budget.ntrain {
                let batch = self.loader.next_batch(Split::Train, &self.device)?;
                let step = self.gan.gen_supervised_train(batch)?;
                self.report.gen_supervised_updates += 1;
                if export {
                    self.exporter
                        .append(TRAIN_INDEX, &step.fetched, &ExportNames::indexed(tag, index));
                }
                last = Some(step.stats);
            }
            if let Some(stats) = last {
                info!(
                    "pretrain generator epoch {}/{epochs}  category {:.5}  rotation {:.5}",
                    epoch + 1,
                    stats.category,
                    stats.rotation
                );
            }
        }
        Ok(())
    }

    fn pretrain_discriminator(&mut self) -> Result<()> {
        let mut last = None;
        for _ in 0..self.budget.disc_pretrain_updates {
            let batch = self.loader.next_batch(Split::Train, &self.device)?;
            last = Some(self.gan.discrim_train(batch, "discriminator pretraining")?);
            self.report.disc_pretrain_updates += 1;
        }
        if let Some(stats) = last {
            info!(
                "pretrain discriminator done  loss {:.5}  gradient penalty {:.5}",
                stats.discriminator_loss, stats.gradient_penalty
            );
        }
        Ok(())
    }

    /// Returns `false` when the stop signal ended the phase early.
    fn adversarial(&mut self) -> Result<bool> {
        let max_steps = self.budget.max_steps;
        let first_step = self.global_step;
        let start = Instant::now();

        while self.global_step < max_steps {
            if self.stop.load(Ordering::SeqCst) {
                info!("stop requested at global step {}", self.global_step);
                return Ok(false);
            }
            let step = self.global_step;

            let mut critic = CriticStats::default();
            for _ in 0..self.budget.discrim_freq {
                let batch = self.loader.next_batch(Split::Train, &self.device)?;
                critic = self.gan.discrim_train(batch, "adversarial training")?;
                self.report.critic_updates += 1;
            }

            let batch = self.loader.next_batch(Split::Train, &self.device)?;
            let generated = self.gan.gen_adversarial_train(batch)?;
            self.report.gen_adversarial_updates += 1;
            self.global_step += 1;

            let fired = self.cadences.evaluate(step, max_steps);

            if fired.validate {
                validate(
                    self.gan.model(),
                    self.gan.channels(),
                    &mut *self.loader,
                    &self.exporter,
                    step as i64,
                    &self.device,
                )?;
            }

            if fired.summary {
                if let Some(summary) = &self.summary {
                    summary.record(&SummaryRow::new(self.global_step, critic, generated.stats));
                }
            }

            if fired.display {
                self.exporter.append(
                    TRAIN_INDEX,
                    &generated.fetched,
                    &ExportNames::step(step as i64),
                );
            }

            if fired.progress {
                let progress = Progress::estimate(
                    step,
                    first_step,
                    max_steps,
                    self.budget.ntrain,
                    start.elapsed(),
                );
                info!(
                    "progress  epoch {}  step {}  {:.2} steps/s  remaining {}m",
                    progress.epoch,
                    step + 1,
                    progress.steps_per_sec,
                    progress.remaining.as_secs() / 60
                );
            }

            if fired.save {
                info!("saving model");
                self.checkpoints.save(self.gan.model(), self.global_step)?;
            }
        }
        Ok(true)
    }
}
