//! VGG convolutional feature extractor.

use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::PaddingConfig2d;
use burn::prelude::Backend;
use burn::tensor::Tensor;
use burn::tensor::activation::relu;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// Configuration for a [`Vgg`] feature extractor.
///
/// `blocks` lists the output channels of the 3x3 convolutions in each block;
/// every block ends with a 2x2 stride-2 max pool.
///
/// # Example
///
/// ```
/// use texture_networks::VggConfig;
///
/// let config = VggConfig::vgg16();
/// assert_eq!(config.blocks.len(), 5);
/// assert_eq!(config.out_channels(), 512);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VggConfig {
    /// Channels of the input image.
    pub in_channels: usize,

    /// Convolution widths per block.
    pub blocks: Vec<Vec<usize>>,
}

impl Default for VggConfig {
    fn default() -> Self {
        Self::vgg16()
    }
}

impl VggConfig {
    /// Creates a configuration with a custom block layout and 3 input channels.
    #[must_use]
    pub const fn new(blocks: Vec<Vec<usize>>) -> Self {
        Self {
            in_channels: 3,
            blocks,
        }
    }

    /// Standard layout with `repeats[i]` convolutions in block `i`.
    fn standard(repeats: [usize; 5]) -> Self {
        let widths = [64, 128, 256, 512, 512];
        Self::new(
            widths
                .iter()
                .zip(repeats)
                .map(|(&width, n)| vec![width; n])
                .collect(),
        )
    }

    /// VGG-11 (configuration A).
    #[must_use]
    pub fn vgg11() -> Self {
        Self::standard([1, 1, 2, 2, 2])
    }

    /// VGG-13 (configuration B).
    #[must_use]
    pub fn vgg13() -> Self {
        Self::standard([2, 2, 2, 2, 2])
    }

    /// VGG-16 (configuration D).
    #[must_use]
    pub fn vgg16() -> Self {
        Self::standard([2, 2, 3, 3, 3])
    }

    /// VGG-19 (configuration E).
    #[must_use]
    pub fn vgg19() -> Self {
        Self::standard([2, 2, 4, 4, 4])
    }

    /// Sets the number of input channels.
    #[must_use]
    pub fn with_in_channels(mut self, in_channels: usize) -> Self {
        self.in_channels = in_channels;
        self
    }

    /// Channels of the final feature map.
    #[must_use]
    pub fn out_channels(&self) -> usize {
        self.blocks
            .iter()
            .rev()
            .find_map(|block| block.last().copied())
            .unwrap_or(self.in_channels)
    }

    /// Smallest height and width accepted on input, `2^blocks`.
    #[must_use]
    pub fn min_input_size(&self) -> usize {
        1 << self.blocks.len()
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::InvalidConfig` for zero channels or empty blocks.
    pub fn validate(&self) -> Result<()> {
        if self.in_channels == 0 {
            return Err(ModelError::invalid_config("vgg in_channels must be > 0"));
        }
        if self.blocks.is_empty() {
            return Err(ModelError::invalid_config("vgg needs at least one block"));
        }
        for (idx, block) in self.blocks.iter().enumerate() {
            if block.is_empty() || block.contains(&0) {
                return Err(ModelError::invalid_config(format!(
                    "vgg block {idx} must list positive widths"
                )));
            }
        }
        Ok(())
    }

    /// Initializes the network.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::InvalidConfig` if the configuration is invalid.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Vgg<B>> {
        self.validate()?;

        let mut fan_in = self.in_channels;
        let blocks = self
            .blocks
            .iter()
            .map(|widths| {
                let convs = widths
                    .iter()
                    .map(|&width| {
                        let conv = Conv2dConfig::new([fan_in, width], [3, 3])
                            .with_padding(PaddingConfig2d::Explicit(1, 1))
                            .init(device);
                        fan_in = width;
                        conv
                    })
                    .collect();
                VggBlock {
                    convs,
                    pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
                }
            })
            .collect();

        Ok(Vgg {
            blocks,
            in_channels: self.in_channels,
            out_channels: fan_in,
        })
    }
}

/// One VGG block: 3x3 convolutions followed by a max pool.
#[derive(Debug, Module)]
pub struct VggBlock<B: Backend> {
    convs: Vec<Conv2d<B>>,
    pool: MaxPool2d,
}

impl<B: Backend> VggBlock<B> {
    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self
            .convs
            .iter()
            .fold(input, |x, conv| relu(conv.forward(x)));
        self.pool.forward(x)
    }
}

/// VGG convolutional layers without the classifier head.
///
/// Output stride is `2^blocks`.
#[derive(Debug, Module)]
pub struct Vgg<B: Backend> {
    blocks: Vec<VggBlock<B>>,
    in_channels: usize,
    out_channels: usize,
}

impl<B: Backend> Vgg<B> {
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
    ///
    /// Every block halves the spatial size with a 2x2 pool, so each side
    /// needs at least `2^blocks` pixels.
    #[must_use]
    pub fn min_input_size(&self) -> usize {
        1 << self.blocks.len()
    }

    /// Runs the forward pass on an NCHW image batch.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        self.blocks
            .iter()
            .fold(input, |x, block| block.forward(x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn standard_layouts() {
        let counts = |c: VggConfig| c.blocks.iter().map(Vec::len).sum::<usize>();
        assert_eq!(counts(VggConfig::vgg11()), 8);
        assert_eq!(counts(VggConfig::vgg13()), 10);
        assert_eq!(counts(VggConfig::vgg16()), 13);
        assert_eq!(counts(VggConfig::vgg19()), 16);
    }

    #[test]
    fn config_validation() {
        assert!(VggConfig::new(vec![]).validate().is_err());
        assert!(VggConfig::new(vec![vec![8], vec![]]).validate().is_err());
        assert!(VggConfig::new(vec![vec![8, 0]]).validate().is_err());
        assert!(VggConfig::new(vec![vec![8]]).with_in_channels(0).validate().is_err());
        assert!(VggConfig::new(vec![vec![8]]).validate().is_ok());
    }

    #[test]
    fn forward_halves_spatial_size_per_block() {
        let device = <TestBackend as Backend>::Device::default();
        let vgg = VggConfig::new(vec![vec![4], vec![6, 8]])
            .with_in_channels(1)
            .init::<TestBackend>(&device)
            .unwrap();

        assert_eq!(vgg.in_channels(), 1);
        assert_eq!(vgg.out_channels(), 8);

        let output = vgg.forward(Tensor::zeros([2, 1, 16, 12], &device));
        assert_eq!(output.dims(), [2, 8, 4, 3]);
    }

    #[test]
    fn min_input_size_doubles_per_block() {
        assert_eq!(VggConfig::vgg16().min_input_size(), 32);
        assert_eq!(VggConfig::new(vec![vec![4], vec![8]]).min_input_size(), 4);

        let device = <TestBackend as Backend>::Device::default();
        let vgg = VggConfig::new(vec![vec![2], vec![2], vec![2]])
            .init::<TestBackend>(&device)
            .unwrap();
        assert_eq!(vgg.min_input_size(), 8);

        let output = vgg.forward(Tensor::zeros([1, 3, 8, 8], &device));
        assert_eq!(output.dims(), [1, 2, 1, 1]);
    }
}
