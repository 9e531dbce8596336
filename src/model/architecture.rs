use burn::{
    nn::{
        InstanceNorm, InstanceNormConfig, LeakyRelu, LeakyReluConfig, PaddingConfig2d, Relu,
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
    },
    prelude::*,
    tensor::activation::softmax,
};

use crate::error::{self, Error};
use crate::model::constants::{INPUT_CHANNELS, LEAKY_RELU_SLOPE, WIDTH_DIVISOR};
use crate::model::data::RoomChannels;

/// Generator and critic. The two parameter sets are disjoint and each has
/// its own optimizer.
#[derive(Module, Debug)]
pub struct RoomGan<B: Backend> {
    pub generator: Generator<B>,
    pub critic: Critic<B>,
}

/// Encoder/decoder with skip connections, color layout in, room grid
/// logits out.
#[derive(Module, Debug)]
pub struct Generator<B: Backend> {
    // Encoder
    enc1: Conv2d<B>,
    enc2: Conv2d<B>,
    enc3: Conv2d<B>,
    enc_norm2: InstanceNorm<B>,
    enc_norm3: InstanceNorm<B>,

    // Decoder
    dec3: ConvTranspose2d<B>,
    dec2: ConvTranspose2d<B>,
    dec1: ConvTranspose2d<B>,
    dec_norm3: InstanceNorm<B>,
    dec_norm2: InstanceNorm<B>,

    leaky: LeakyRelu,
    activation: Relu,
}

/// Conditional patch critic. Scores a (layout, room grid) pair; higher
/// means more real. No normalization layers, the gradient penalty is
/// computed per sample.
#[derive(Module, Debug)]
pub struct Critic<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    conv3: Conv2d<B>,
    conv4: Conv2d<B>,
    activation: LeakyRelu,
}

#[derive(Config, Debug)]
pub struct RoomGanConfig {
    /// Generator filters in the first layer.
    pub ngf: usize,
    /// Critic filters in the first layer.
    pub ndf: usize,
    /// Channels of the room grid.
    pub room_nc: usize,
    pub room_width: usize,
    #[config(default = "INPUT_CHANNELS")]
    pub input_channels: usize,
}

fn down(channels: [usize; 2]) -> Conv2dConfig {
    Conv2dConfig::new(channels, [4, 4])
        .with_stride([2, 2])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
}

fn up(channels: [usize; 2]) -> ConvTranspose2dConfig {
    ConvTranspose2dConfig::new(channels, [4, 4])
        .with_stride([2, 2])
        .with_padding([1, 1])
}

impl RoomGanConfig {
    pub fn validate(&self) -> error::Result<()> {
        if self.room_width == 0 || self.room_width % WIDTH_DIVISOR != 0 {
            return Err(Error::Config(format!(
                "room width {} is not a multiple of {WIDTH_DIVISOR}",
                self.room_width
            )));
        }
        if self.ngf == 0 || self.ndf == 0 {
            return Err(Error::Config("ngf and ndf must be positive".into()));
        }
        Ok(())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> error::Result<RoomGan<B>> {
        self.validate()?;
        Ok(RoomGan {
            generator: self.init_generator(device),
            critic: self.init_critic(device),
        })
    }

    pub fn init_generator<B: Backend>(&self, device: &B::Device) -> Generator<B> {
        let ngf = self.ngf;
        Generator {
            enc1: down([self.input_channels, ngf]).init(device), // w -> w/2
            enc2: down([ngf, ngf * 2]).init(device),             // w/2 -> w/4
            enc3: down([ngf * 2, ngf * 4]).init(device),         // w/4 -> w/8
            enc_norm2: InstanceNormConfig::new(ngf * 2).init(device),
            enc_norm3: InstanceNormConfig::new(ngf * 4).init(device),

            dec3: up([ngf * 4, ngf * 2]).init(device), // w/8 -> w/4
            dec2: up([ngf * 4, ngf]).init(device),     // w/4 -> w/2, after skip concat
            dec1: up([ngf * 2, self.room_nc]).init(device), // w/2 -> w
            dec_norm3: InstanceNormConfig::new(ngf * 2).init(device),
            dec_norm2: InstanceNormConfig::new(ngf).init(device),

            leaky: LeakyReluConfig::new()
                .with_negative_slope(LEAKY_RELU_SLOPE)
                .init(),
            activation: Relu::new(),
        }
    }

    pub fn init_critic<B: Backend>(&self, device: &B::Device) -> Critic<B> {
        let ndf = self.ndf;
        Critic {
            conv1: down([self.input_channels + self.room_nc, ndf]).init(device),
            conv2: down([ndf, ndf * 2]).init(device),
            conv3: Conv2dConfig::new([ndf * 2, ndf * 4], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device),
            conv4: Conv2dConfig::new([ndf * 4, 1], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device),
            activation: LeakyReluConfig::new()
                .with_negative_slope(LEAKY_RELU_SLOPE)
                .init(),
        }
    }
}

impl<B: Backend> Generator<B> {
    /// Returns raw logits `[n, room_nc, w, w]`; see [`activate`].
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let e1 = self.leaky.forward(self.enc1.forward(input));

        let e2 = self.enc2.forward(e1.clone());
        let e2 = self.leaky.forward(self.enc_norm2.forward(e2));

        let e3 = self.enc3.forward(e2.clone());
        let e3 = self.leaky.forward(self.enc_norm3.forward(e3));

        let d3 = self.dec3.forward(e3);
        let d3 = self.activation.forward(self.dec_norm3.forward(d3));
        let d3 = Tensor::cat(vec![d3, e2], 1);

        let d2 = self.dec2.forward(d3);
        let d2 = self.activation.forward(self.dec_norm2.forward(d2));
        let d2 = Tensor::cat(vec![d2, e1], 1);

        self.dec1.forward(d2)
    }
}

impl<B: Backend> Critic<B> {
    /// Patch scores `[n, 1, w/4, w/4]`.
    pub fn forward(&self, input: Tensor<B, 4>, candidate: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = Tensor::cat(vec![input, candidate], 1);
        let x = self.activation.forward(self.conv1.forward(x));
        let x = self.activation.forward(self.conv2.forward(x));
        let x = self.activation.forward(self.conv3.forward(x));
        self.conv4.forward(x)
    }

    /// One score per sample, `[n, 1]`.
    pub fn score(&self, input: Tensor<B, 4>, candidate: Tensor<B, 4>) -> Tensor<B, 2> {
        let patches = self.forward(input, candidate);
        let [n, _, _, _] = patches.dims();
        patches.reshape([n as i32, -1]).mean_dim(1)
    }
}

impl<B: Backend> RoomGan<B> {
    /// Activated generator output for a batch of layouts.
    pub fn generate(&self, input: Tensor<B, 4>, channels: RoomChannels) -> Tensor<B, 4> {
        activate(self.generator.forward(input), channels)
    }
}

/// Maps logits to a room grid: softmax over the category block, tanh over
/// the rotation and geometry channels.
pub fn activate<B: Backend>(logits: Tensor<B, 4>, channels: RoomChannels) -> Tensor<B, 4> {
    let [n, nc, h, w] = logits.dims();
    let categories = channels.categories.min(nc);
    let category = softmax(logits.clone().slice([0..n, 0..categories, 0..h, 0..w]), 1);
    if categories == nc {
        return category;
    }
    let rest = logits.slice([0..n, categories..nc, 0..h, 0..w]).tanh();
    Tensor::cat(vec![category, rest], 1)
}
