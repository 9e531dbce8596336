//! Loss terms and their composition into the critic and generator
//! objectives. Everything here is a pure function of the tensors passed in.

use burn::{
    nn::loss::{MseLoss, Reduction::Mean},
    prelude::*,
    tensor::{Distribution, activation::log_softmax},
};

use crate::config::RunOptions;
use crate::model::architecture::Critic;
use crate::model::data::RoomChannels;

const NORM_EPSILON: f32 = 1e-12;

/// Constant weights of the composite objectives.
#[derive(Debug, Clone, Copy)]
pub struct LossWeights {
    /// Gradient penalty weight.
    pub lam: f32,
    /// Finite-difference step of the gradient norm estimate.
    pub gp_step: f32,
    /// Random directions of the estimate; zero, or at least the candidate
    /// size, differentiates along every coordinate.
    pub gp_directions: usize,
    pub l1_weight: f32,
    pub gan_weight: f32,
}

impl LossWeights {
    pub fn from_options(options: &RunOptions) -> Self {
        Self {
            lam: options.lam as f32,
            gp_step: options.gp_step as f32,
            gp_directions: options.gp_directions,
            l1_weight: options.l1_weight as f32,
            gan_weight: options.gan_weight as f32,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CriticLosses<B: Backend> {
    /// `adversarial + lam * gradient_penalty`
    pub total: Tensor<B, 1>,
    pub adversarial: Tensor<B, 1>,
    pub gradient_penalty: Tensor<B, 1>,
    pub predict_real: Tensor<B, 1>,
    pub predict_fake: Tensor<B, 1>,
}

#[derive(Debug, Clone)]
pub struct AdversarialLosses<B: Backend> {
    /// `gan_weight * gan + l1_weight * l1`
    pub total: Tensor<B, 1>,
    pub gan: Tensor<B, 1>,
    pub l1: Tensor<B, 1>,
}

#[derive(Debug, Clone)]
pub struct SupervisedLosses<B: Backend> {
    /// `category + rotation`
    pub total: Tensor<B, 1>,
    pub category: Tensor<B, 1>,
    pub rotation: Tensor<B, 1>,
}

/// `weight * term()`, where a zero weight never evaluates `term`.
pub fn weighted<B: Backend>(
    weight: f32,
    device: &B::Device,
    term: impl FnOnce() -> Tensor<B, 1>,
) -> (Tensor<B, 1>, Tensor<B, 1>) {
    if weight == 0.0 {
        let zero = Tensor::zeros([1], device);
        return (zero.clone(), zero);
    }
    let term = term();
    (term.clone() * weight, term)
}

pub fn l1_loss<B: Backend>(outputs: Tensor<B, 4>, targets: Tensor<B, 4>) -> Tensor<B, 1> {
    (targets - outputs).abs().mean()
}

/// Softmax cross-entropy over the category block of the logits.
pub fn category_loss<B: Backend>(
    logits: Tensor<B, 4>,
    targets: Tensor<B, 4>,
    channels: RoomChannels,
) -> Tensor<B, 1> {
    let [n, _, h, w] = logits.dims();
    let block = [0..n, 0..channels.categories, 0..h, 0..w];
    let log_probs = log_softmax(logits.slice(block.clone()), 1);
    let targets = targets.slice(block);
    -(targets * log_probs).sum_dim(1).mean()
}

/// Squared error over the rotation block of the activated outputs.
pub fn rotation_loss<B: Backend>(
    outputs: Tensor<B, 4>,
    targets: Tensor<B, 4>,
    channels: RoomChannels,
) -> Tensor<B, 1> {
    if channels.rotations == 0 {
        return Tensor::zeros([1], &outputs.device());
    }
    let [n, _, h, w] = outputs.dims();
    let start = channels.categories;
    let block = [0..n, start..start + channels.rotations, 0..h, 0..w];
    MseLoss::new().forward(outputs.slice(block.clone()), targets.slice(block), Mean)
}

/// `mean((|g| - 1)^2)` over per-sample gradient norms `[n, 1]`: zero
/// exactly when every norm is one.
pub fn gradient_penalty<B: Backend>(norms: Tensor<B, 2>) -> Tensor<B, 1> {
    (norms - 1.0).powf_scalar(2.0).mean()
}

/// Input-gradient norm of `score` at `points`, one per sample, from
/// central differences of step `step`.
///
/// With `directions >= c * h * w` the differences are taken along every
/// coordinate and their squares summed, which recovers the norm up to the
/// finite-difference error. Otherwise they are taken along `directions`
/// standard normal vectors and the squares averaged, an unbiased estimate
/// of the squared norm. Only first-order gradients flow back through
/// `score`.
pub fn gradient_norms<B: Backend>(
    score: impl Fn(Tensor<B, 4>) -> Tensor<B, 2>,
    points: Tensor<B, 4>,
    step: f32,
    directions: usize,
) -> Tensor<B, 2> {
    let [n, c, h, w] = points.dims();
    let device = points.device();
    let size = c * h * w;
    let exhaustive = directions == 0 || directions >= size;
    let count = if exhaustive { size } else { directions };

    let mut squares = Tensor::<B, 2>::zeros([n, 1], &device);
    for i in 0..count {
        let direction = if exhaustive {
            Tensor::<B, 2>::zeros([1, size], &device)
                .slice_assign([0..1, i..i + 1], Tensor::ones([1, 1], &device))
                .reshape([1, c, h, w])
                .repeat_dim(0, n)
        } else {
            Tensor::<B, 4>::random([n, c, h, w], Distribution::Normal(0.0, 1.0), &device)
        };
        let offset = direction * step;
        let ahead = score(points.clone() + offset.clone());
        let behind = score(points.clone() - offset);
        let slope = (ahead - behind) / (2.0 * step);
        squares = squares + slope.powf_scalar(2.0);
    }
    if !exhaustive {
        squares = squares / count as f32;
    }
    // Keeps the derivative of the root finite at a flat critic.
    (squares + NORM_EPSILON).sqrt()
}

/// Critic gradient norms at random points between the real and fake
/// candidates, the interpolation factor drawn per sample.
pub fn critic_gradient_norms<B: Backend>(
    critic: &Critic<B>,
    inputs: Tensor<B, 4>,
    real: Tensor<B, 4>,
    fake: Tensor<B, 4>,
    weights: &LossWeights,
) -> Tensor<B, 2> {
    let [n, _, _, _] = real.dims();
    let alpha =
        Tensor::<B, 4>::random([n, 1, 1, 1], Distribution::Uniform(0.0, 1.0), &real.device());
    let interpolated = real.clone() + (fake - real) * alpha;
    gradient_norms(
        |points| critic.score(inputs.clone(), points),
        interpolated,
        weights.gp_step,
        weights.gp_directions,
    )
}

/// Wasserstein critic loss with gradient penalty. `fake` should already be
/// detached from the generator.
pub fn critic_losses<B: Backend>(
    critic: &Critic<B>,
    inputs: Tensor<B, 4>,
    real: Tensor<B, 4>,
    fake: Tensor<B, 4>,
    weights: &LossWeights,
) -> CriticLosses<B> {
    let device = real.device();
    let predict_real = critic.score(inputs.clone(), real.clone()).mean();
    let predict_fake = critic.score(inputs.clone(), fake.clone()).mean();
    let adversarial = predict_fake.clone() - predict_real.clone();

    let (penalty, gradient_penalty) = weighted(weights.lam, &device, || {
        gradient_penalty(critic_gradient_norms(critic, inputs, real, fake, weights))
    });

    CriticLosses {
        total: adversarial.clone() + penalty,
        adversarial,
        gradient_penalty,
        predict_real,
        predict_fake,
    }
}

/// Generator objective for the adversarial phase. `outputs` are activated.
pub fn adversarial_losses<B: Backend>(
    critic: &Critic<B>,
    inputs: Tensor<B, 4>,
    outputs: Tensor<B, 4>,
    targets: Tensor<B, 4>,
    weights: &LossWeights,
) -> AdversarialLosses<B> {
    let device = outputs.device();
    let (gan_term, gan) = weighted(weights.gan_weight, &device, || {
        -critic.score(inputs, outputs.clone()).mean()
    });
    let (l1_term, l1) = weighted(weights.l1_weight, &device, || l1_loss(outputs, targets));

    AdversarialLosses {
        total: gan_term + l1_term,
        gan,
        l1,
    }
}

/// Generator objective for pretraining, no critic involved.
pub fn supervised_losses<B: Backend>(
    logits: Tensor<B, 4>,
    outputs: Tensor<B, 4>,
    targets: Tensor<B, 4>,
    channels: RoomChannels,
) -> SupervisedLosses<B> {
    let category = category_loss(logits, targets.clone(), channels);
    let rotation = rotation_loss(outputs, targets, channels);
    SupervisedLosses {
        total: category.clone() + rotation.clone(),
        category,
        rotation,
    }
}
