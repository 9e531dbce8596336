use std::marker::PhantomData;

use burn::{
    module::{AutodiffModule, ModuleVisitor, ParamId},
    optim::{Adam, AdamConfig, GradientsParams, Optimizer, adaptor::OptimizerAdaptor},
    prelude::*,
    tensor::{ElementConversion, backend::AutodiffBackend},
};
use tracing::debug;

use crate::config::RunOptions;
use crate::error::{Error, Result};
use crate::model::architecture::{Critic, Generator, RoomGan, activate};
use crate::model::data::{RoomBatch, RoomChannels};
use crate::model::losses::{LossWeights, adversarial_losses, critic_losses, supervised_losses};

/// (input, output, target) of one batch, detached from the graph.
#[derive(Debug, Clone)]
pub struct Fetched<B: Backend> {
    pub inputs: Tensor<B, 4>,
    pub outputs: Tensor<B, 4>,
    pub targets: Tensor<B, 4>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CriticStats {
    pub discriminator_loss: f32,
    pub adversarial: f32,
    pub gradient_penalty: f32,
    pub predict_real: f32,
    pub predict_fake: f32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GeneratorStats {
    pub gan: f32,
    pub l1: f32,
    pub adversarial: f32,
    pub category: f32,
    pub rotation: f32,
    pub supervised: f32,
}

#[derive(Debug, Clone)]
pub struct GeneratorStep<B: Backend> {
    pub stats: GeneratorStats,
    pub fetched: Fetched<B>,
}

fn scalar<B: Backend>(tensor: &Tensor<B, 1>) -> f32 {
    tensor.clone().into_scalar().elem::<f32>()
}

/// Fails the run on a non-finite loss instead of applying its gradients.
pub fn ensure_finite(phase: &'static str, term: &'static str, value: f32) -> Result<f32> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(Error::NonFinite { phase, term, value })
    }
}

/// First non-finite value of `tensor`, if any.
fn first_non_finite<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Option<f32> {
    // x - x is NaN exactly where x is NaN or infinite.
    let flagged = (tensor.clone() - tensor.clone())
        .is_nan()
        .int()
        .sum()
        .into_scalar()
        .elem::<i64>();
    if flagged == 0 {
        return None;
    }
    let value = tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .ok()
        .and_then(|values| values.into_iter().find(|v| !v.is_finite()));
    Some(value.unwrap_or(f32::NAN))
}

struct GradientScan<'a, B: AutodiffBackend> {
    grads: &'a GradientsParams,
    found: Option<f32>,
    _backend: PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for GradientScan<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if self.found.is_some() {
            return;
        }
        if let Some(grad) = self.grads.get::<B::InnerBackend, D>(id) {
            self.found = first_non_finite(grad);
        }
    }
}

/// Fails the run when any gradient of `module` is NaN or infinite, before
/// the optimizer sees it.
pub fn ensure_finite_gradients<B: AutodiffBackend, M: AutodiffModule<B>>(
    phase: &'static str,
    module: &M,
    grads: &GradientsParams,
) -> Result<()> {
    let mut scan = GradientScan::<B> {
        grads,
        found: None,
        _backend: PhantomData,
    };
    module.visit(&mut scan);
    match scan.found {
        Some(value) => Err(Error::NonFinite {
            phase,
            term: "gradient",
            value,
        }),
        None => Ok(()),
    }
}

/// The model together with its two optimizers. Each update computes
/// gradients for one parameter set only.
pub struct GanTrainer<B: AutodiffBackend> {
    model: RoomGan<B>,
    optim_g: OptimizerAdaptor<Adam, Generator<B>, B>,
    optim_d: OptimizerAdaptor<Adam, Critic<B>, B>,
    lr_generator: f64,
    lr_discriminator: f64,
    weights: LossWeights,
    channels: RoomChannels,
}

impl<B: AutodiffBackend> GanTrainer<B> {
    pub fn new(model: RoomGan<B>, options: &RunOptions, channels: RoomChannels) -> Self {
        let adam = AdamConfig::new()
            .with_beta_1(options.beta1 as f32)
            .with_beta_2(0.999);
        Self {
            model,
            optim_g: adam.init(),
            optim_d: adam.init(),
            lr_generator: options.lr_generator,
            lr_discriminator: options.lr_discriminator,
            weights: LossWeights::from_options(options),
            channels,
        }
    }

    pub fn model(&self) -> &RoomGan<B> {
        &self.model
    }

    pub fn channels(&self) -> RoomChannels {
        self.channels
    }

    /// One critic update. The generator output is detached, so only critic
    /// parameters move.
    pub fn discrim_train(
        &mut self,
        batch: RoomBatch<B>,
        phase: &'static str,
    ) -> Result<CriticStats> {
        let fake = self
            .model
            .generate(batch.inputs.clone(), self.channels)
            .detach();
        let losses = critic_losses(
            &self.model.critic,
            batch.inputs,
            batch.targets,
            fake,
            &self.weights,
        );

        let stats = CriticStats {
            discriminator_loss: ensure_finite(phase, "discriminator_loss", scalar(&losses.total))?,
            adversarial: scalar(&losses.adversarial),
            gradient_penalty: scalar(&losses.gradient_penalty),
            predict_real: scalar(&losses.predict_real),
            predict_fake: scalar(&losses.predict_fake),
        };

        let grads = losses.total.backward();
        let grads = GradientsParams::from_grads(grads, &self.model.critic);
        ensure_finite_gradients::<B, _>(phase, &self.model.critic, &grads)?;
        self.model.critic = self
            .optim_d
            .step(self.lr_discriminator, self.model.critic.clone(), grads);

        debug!(phase, loss = stats.discriminator_loss, "critic update");
        Ok(stats)
    }

    /// One generator update on the weighted GAN + L1 objective.
    pub fn gen_adversarial_train(&mut self, batch: RoomBatch<B>) -> Result<GeneratorStep<B>> {
        const PHASE: &str = "adversarial training";

        let logits = self.model.generator.forward(batch.inputs.clone());
        let outputs = activate(logits.clone(), self.channels);
        let adversarial = adversarial_losses(
            &self.model.critic,
            batch.inputs.clone(),
            outputs.clone(),
            batch.targets.clone(),
            &self.weights,
        );
        let supervised = supervised_losses(
            logits.detach(),
            outputs.clone().detach(),
            batch.targets.clone(),
            self.channels,
        );

        let stats = GeneratorStats {
            adversarial: ensure_finite(PHASE, "generator_loss", scalar(&adversarial.total))?,
            gan: scalar(&adversarial.gan),
            l1: scalar(&adversarial.l1),
            category: scalar(&supervised.category),
            rotation: scalar(&supervised.rotation),
            supervised: scalar(&supervised.total),
        };

        let grads = adversarial.total.backward();
        let grads = GradientsParams::from_grads(grads, &self.model.generator);
        ensure_finite_gradients::<B, _>(PHASE, &self.model.generator, &grads)?;
        self.model.generator = self
            .optim_g
            .step(self.lr_generator, self.model.generator.clone(), grads);

        debug!(loss = stats.adversarial, "generator update");
        Ok(GeneratorStep {
            stats,
            fetched: Fetched {
                inputs: batch.inputs,
                outputs: outputs.detach(),
                targets: batch.targets,
            },
        })
    }

    /// One generator update on the category + rotation objective, no critic.
    pub fn gen_supervised_train(&mut self, batch: RoomBatch<B>) -> Result<GeneratorStep<B>> {
        const PHASE: &str = "generator pretraining";

        let logits = self.model.generator.forward(batch.inputs.clone());
        let outputs = activate(logits.clone(), self.channels);
        let supervised =
            supervised_losses(logits, outputs.clone(), batch.targets.clone(), self.channels);

        let stats = GeneratorStats {
            supervised: ensure_finite(
                PHASE,
                "generator_supervised_loss",
                scalar(&supervised.total),
            )?,
            category: scalar(&supervised.category),
            rotation: scalar(&supervised.rotation),
            ..Default::default()
        };

        let grads = supervised.total.backward();
        let grads = GradientsParams::from_grads(grads, &self.model.generator);
        ensure_finite_gradients::<B, _>(PHASE, &self.model.generator, &grads)?;
        self.model.generator = self
            .optim_g
            .step(self.lr_generator, self.model.generator.clone(), grads);

        debug!(loss = stats.supervised, "supervised generator update");
        Ok(GeneratorStep {
            stats,
            fetched: Fetched {
                inputs: batch.inputs,
                outputs: outputs.detach(),
                targets: batch.targets,
            },
        })
    }

    /// Forward pass only.
    pub fn generate(&self, batch: RoomBatch<B>) -> Fetched<B> {
        generate(&self.model, batch, self.channels)
    }
}

pub fn generate<B: Backend>(
    model: &RoomGan<B>,
    batch: RoomBatch<B>,
    channels: RoomChannels,
) -> Fetched<B> {
    Fetched {
        outputs: model.generate(batch.inputs.clone(), channels).detach(),
        inputs: batch.inputs,
        targets: batch.targets,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use crate::model::architecture::RoomGanConfig;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::Distribution;

    type TestBackend = Autodiff<NdArray<f32>>;

    fn trainer() -> (GanTrainer<TestBackend>, RoomBatch<TestBackend>) {
        let device = Default::default();
        let options = RunOptions::new(Mode::Train, "out".into(), "data".into());
        let channels = RoomChannels::new(6, 3, 2).unwrap();
        let model = RoomGanConfig::new(2, 2, 6, 8)
            .init::<TestBackend>(&device)
            .unwrap();
        let batch = RoomBatch {
            inputs: Tensor::random([2, 3, 8, 8], Distribution::Uniform(-1.0, 1.0), &device),
            targets: Tensor::random([2, 6, 8, 8], Distribution::Uniform(0.0, 1.0), &device),
        };
        (GanTrainer::new(model, &options, channels), batch)
    }

    fn generator_output(
        trainer: &GanTrainer<TestBackend>,
        batch: &RoomBatch<TestBackend>,
    ) -> Vec<f32> {
        trainer
            .model()
            .generator
            .forward(batch.inputs.clone())
            .into_data()
            .to_vec()
            .unwrap()
    }

    fn critic_output(
        trainer: &GanTrainer<TestBackend>,
        batch: &RoomBatch<TestBackend>,
    ) -> Vec<f32> {
        trainer
            .model()
            .critic
            .forward(batch.inputs.clone(), batch.targets.clone())
            .into_data()
            .to_vec()
            .unwrap()
    }

    #[test]
    fn critic_update_leaves_generator_untouched() {
        let (mut trainer, batch) = trainer();
        let generator_before = generator_output(&trainer, &batch);
        let critic_before = critic_output(&trainer, &batch);

        trainer.discrim_train(batch.clone(), "test").unwrap();

        assert_eq!(generator_output(&trainer, &batch), generator_before);
        assert_ne!(critic_output(&trainer, &batch), critic_before);
    }

    #[test]
    fn generator_updates_leave_critic_untouched() {
        let (mut trainer, batch) = trainer();
        let generator_before = generator_output(&trainer, &batch);
        let critic_before = critic_output(&trainer, &batch);

        trainer.gen_supervised_train(batch.clone()).unwrap();
        trainer.gen_adversarial_train(batch.clone()).unwrap();

        assert_eq!(critic_output(&trainer, &batch), critic_before);
        assert_ne!(generator_output(&trainer, &batch), generator_before);
    }

    #[test]
    fn non_finite_loss_is_fatal_and_skips_the_update() {
        let (mut trainer, batch) = trainer();
        let critic_before = critic_output(&trainer, &batch);
        let poisoned = RoomBatch {
            inputs: batch.inputs.clone() * f32::NAN,
            targets: batch.targets.clone(),
        };

        let err = trainer.discrim_train(poisoned, "test").unwrap_err();

        assert!(matches!(err, Error::NonFinite { .. }));
        assert_eq!(critic_output(&trainer, &batch), critic_before);
    }

    #[test]
    fn non_finite_gradient_behind_a_finite_loss_is_fatal() {
        let (trainer, batch) = trainer();
        let critic = &trainer.model().critic;
        // sqrt has an infinite slope at zero
        let loss = (critic.score(batch.inputs.clone(), batch.targets.clone()) * 0.0)
            .sqrt()
            .mean();
        assert!(scalar(&loss).is_finite());

        let grads = GradientsParams::from_grads(loss.backward(), critic);
        let err = ensure_finite_gradients::<TestBackend, _>("test", critic, &grads).unwrap_err();

        assert!(matches!(err, Error::NonFinite { term: "gradient", .. }));
    }

    #[test]
    fn finite_gradients_pass() {
        let (trainer, batch) = trainer();
        let critic = &trainer.model().critic;
        let loss = critic.score(batch.inputs, batch.targets).mean();

        let grads = GradientsParams::from_grads(loss.backward(), critic);

        assert!(ensure_finite_gradients::<TestBackend, _>("test", critic, &grads).is_ok());
    }

    #[test]
    fn ensure_finite_rejects_infinity() {
        assert!(ensure_finite("p", "t", f32::INFINITY).is_err());
        assert_eq!(ensure_finite("p", "t", 1.5).unwrap(), 1.5);
    }
}
