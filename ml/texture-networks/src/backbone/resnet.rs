//! ResNet convolutional feature extractor.

use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, PaddingConfig2d};
use burn::prelude::Backend;
use burn::tensor::Tensor;
use burn::tensor::activation::relu;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// Strides of the four residual stages.
const STAGE_STRIDES: [usize; 4] = [1, 2, 2, 2];

/// Smallest image side a ResNet accepts; matches its output stride.
pub(crate) const MIN_INPUT_SIZE: usize = 32;

/// Residual block flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum BlockKind {
    /// Two 3x3 convolutions (ResNet-18/34).
    #[default]
    Basic,

    /// 1x1 reduce, 3x3, 1x1 expand (ResNet-50 and deeper).
    Bottleneck,
}

impl BlockKind {
    /// Ratio between a block's output channels and its stage width.
    #[must_use]
    pub const fn expansion(&self) -> usize {
        match self {
            Self::Basic => 1,
            Self::Bottleneck => 4,
        }
    }
}

/// Configuration for a [`ResNet`] feature extractor.
///
/// # Example
///
/// ```
/// use texture_networks::ResNetConfig;
///
/// let config = ResNetConfig::resnet50();
/// assert_eq!(config.out_channels(), 2048);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResNetConfig {
    /// Channels of the input image.
    pub in_channels: usize,

    /// Residual block flavour.
    pub block: BlockKind,

    /// Number of blocks in each of the four stages.
    pub layers: [usize; 4],

    /// Width of the stem and first stage; later stages double it.
    pub base_width: usize,
}

impl Default for ResNetConfig {
    fn default() -> Self {
        Self::resnet50()
    }
}

impl ResNetConfig {
    /// Creates a configuration with 3 input channels and base width 64.
    #[must_use]
    pub const fn new(block: BlockKind, layers: [usize; 4]) -> Self {
        Self {
            in_channels: 3,
            block,
            layers,
            base_width: 64,
        }
    }

    /// ResNet-18.
    #[must_use]
    pub const fn resnet18() -> Self {
        Self::new(BlockKind::Basic, [2, 2, 2, 2])
    }

    /// ResNet-34.
    #[must_use]
    pub const fn resnet34() -> Self {
        Self::new(BlockKind::Basic, [3, 4, 6, 3])
    }

    /// ResNet-50.
    #[must_use]
    pub const fn resnet50() -> Self {
        Self::new(BlockKind::Bottleneck, [3, 4, 6, 3])
    }

    /// ResNet-101.
    #[must_use]
    pub const fn resnet101() -> Self {
        Self::new(BlockKind::Bottleneck, [3, 4, 23, 3])
    }

    /// ResNet-152.
    #[must_use]
    pub const fn resnet152() -> Self {
        Self::new(BlockKind::Bottleneck, [3, 8, 36, 3])
    }

    /// Sets the number of input channels.
    #[must_use]
    pub const fn with_in_channels(mut self, in_channels: usize) -> Self {
        self.in_channels = in_channels;
        self
    }

    /// Sets the base width.
    #[must_use]
    pub const fn with_base_width(mut self, base_width: usize) -> Self {
        self.base_width = base_width;
        self
    }

    /// Channels of the final feature map.
    #[must_use]
    pub const fn out_channels(&self) -> usize {
        self.base_width * 8 * self.block.expansion()
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::InvalidConfig` for zero channels or an empty stage.
    pub fn validate(&self) -> Result<()> {
        if self.in_channels == 0 || self.base_width == 0 {
            return Err(ModelError::invalid_config(
                "resnet in_channels and base_width must be > 0",
            ));
        }
        if let Some(stage) = self.layers.iter().position(|&n| n == 0) {
            return Err(ModelError::invalid_config(format!(
                "resnet stage {stage} has no blocks"
            )));
        }
        Ok(())
    }

    /// Initializes the network.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::InvalidConfig` if the configuration is invalid.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<ResNet<B>> {
        self.validate()?;

        let stem = ConvNorm::new(self.in_channels, self.base_width, 7, 2, device);
        let pool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        let mut blocks = Vec::with_capacity(self.layers.iter().sum());
        let mut fan_in = self.base_width;
        for (stage, (&depth, &stride)) in self.layers.iter().zip(&STAGE_STRIDES).enumerate() {
            let width = self.base_width << stage;
            for idx in 0..depth {
                let stride = if idx == 0 { stride } else { 1 };
                let block = ResidualBlock::new(self.block, fan_in, width, stride, device);
                fan_in = block.out_channels;
                blocks.push(block);
            }
        }

        Ok(ResNet {
            stem,
            pool,
            blocks,
            in_channels: self.in_channels,
            out_channels: fan_in,
        })
    }
}

/// Convolution without bias followed by batch normalization.
#[derive(Debug, Module)]
pub struct ConvNorm<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
}

impl<B: Backend> ConvNorm<B> {
    fn new(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        stride: usize,
        device: &B::Device,
    ) -> Self {
        let padding = kernel / 2;
        let conv = Conv2dConfig::new([in_channels, out_channels], [kernel, kernel])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .with_bias(false)
            .init(device);
        let norm = BatchNormConfig::new(out_channels).init(device);
        Self { conv, norm }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        self.norm.forward(self.conv.forward(input))
    }
}

/// Residual block: a chain of conv/norm pairs plus a shortcut.
#[derive(Debug, Module)]
pub struct ResidualBlock<B: Backend> {
    layers: Vec<ConvNorm<B>>,
    shortcut: Option<ConvNorm<B>>,
    out_channels: usize,
}

impl<B: Backend> ResidualBlock<B> {
    fn new(
        kind: BlockKind,
        in_channels: usize,
        width: usize,
        stride: usize,
        device: &B::Device,
    ) -> Self {
        let out_channels = width * kind.expansion();
        let layers = match kind {
            BlockKind::Basic => vec![
                ConvNorm::new(in_channels, width, 3, stride, device),
                ConvNorm::new(width, width, 3, 1, device),
            ],
            BlockKind::Bottleneck => vec![
                ConvNorm::new(in_channels, width, 1, 1, device),
                ConvNorm::new(width, width, 3, stride, device),
                ConvNorm::new(width, out_channels, 1, 1, device),
            ],
        };
        let shortcut = (stride != 1 || in_channels != out_channels)
            .then(|| ConvNorm::new(in_channels, out_channels, 1, stride, device));

        Self {
            layers,
            shortcut,
            out_channels,
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.shortcut {
            Some(shortcut) => shortcut.forward(input.clone()),
            None => input.clone(),
        };

        let last = self.layers.len().saturating_sub(1);
        let mut x = input;
        for (idx, layer) in self.layers.iter().enumerate() {
            x = layer.forward(x);
            if idx < last {
                x = relu(x);
            }
        }

        relu(x + identity)
    }
}

/// ResNet convolutional stages without the pooling/classifier head.
///
/// Output stride is 32.
#[derive(Debug, Module)]
pub struct ResNet<B: Backend> {
    stem: ConvNorm<B>,
    pool: MaxPool2d,
    blocks: Vec<ResidualBlock<B>>,
    in_channels: usize,
    out_channels: usize,
}

impl<B: Backend> ResNet<B> {
    /// Channels expected on input.
    #[must_use]
    pub const fn in_channels(&self) -> usize {
        self.in_channels
    }

    /// Channels of the produced feature map.
    #[must_use]
    pub const fn out_channels(&self) -> usize {
        self.out_channels
    }

    /// Smallest height and width accepted on input.
    #[must_use]
    pub const fn min_input_size(&self) -> usize {
        MIN_INPUT_SIZE
    }

    /// Number of residual blocks across all stages.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.blocks.len()
    }

    /// Runs the forward pass on an NCHW image batch.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.pool.forward(relu(self.stem.forward(input)));
        self.blocks.iter().fold(x, |x, block| block.forward(x))
    }
}
