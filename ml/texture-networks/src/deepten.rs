//! Deep Texture Encoding Network assembly.

use std::path::Path;

use burn::module::{Module, ModuleDisplay};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{self, BatchNorm, BatchNormConfig};
use burn::prelude::Backend;
use burn::tensor::Tensor;
use burn::tensor::activation::{relu, softmax};
use serde::{Deserialize, Serialize};
use texture_layers::{DenseStack, DenseStackConfig, Encoding, EncodingConfig};
use tracing::{debug, info};

use crate::backbone::{
    Backbone, BackboneConfig, BackboneSource, FeatureExtractor, check_compatible, make_backbone,
};
use crate::error::{ModelError, Result};
use crate::summary::LayerInfo;

/// Shape of the images fed to the network, in NCHW order without the batch.
///
/// Spatial sizes may be left open; the encoding layer accepts any size.
///
/// # Example
///
/// ```
/// use texture_networks::InputShape;
///
/// let shape = InputShape::new(3).with_spatial(224, 224);
/// assert!(shape.check([8, 3, 224, 224]).is_ok());
/// assert!(shape.check([8, 1, 224, 224]).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputShape {
    /// Image channels.
    pub channels: usize,

    /// Image height, if fixed.
    #[serde(default)]
    pub height: Option<usize>,

    /// Image width, if fixed.
    #[serde(default)]
    pub width: Option<usize>,
}

impl Default for InputShape {
    fn default() -> Self {
        Self::new(3)
    }
}

impl InputShape {
    /// Creates a shape with the given channels and open spatial size.
    #[must_use]
    pub const fn new(channels: usize) -> Self {
        Self {
            channels,
            height: None,
            width: None,
        }
    }

    /// Fixes the spatial size.
    #[must_use]
    pub const fn with_spatial(mut self, height: usize, width: usize) -> Self {
        self.height = Some(height);
        self.width = Some(width);
        self
    }

    /// Validates the shape.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::InvalidConfig` if any given dimension is zero.
    pub fn validate(&self) -> Result<()> {
        if self.channels == 0 || self.height == Some(0) || self.width == Some(0) {
            return Err(ModelError::invalid_config(format!(
                "input shape dimensions must be > 0, got {self}"
            )));
        }
        Ok(())
    }

    /// Checks an `[N, C, H, W]` tensor shape against this shape.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::ShapeMismatch` on disagreement.
    pub fn check(&self, dims: [usize; 4]) -> Result<()> {
        let [_, channels, height, width] = dims;
        let fits = |expected: Option<usize>, actual: usize| expected.is_none_or(|e| e == actual);

        if channels != self.channels || !fits(self.height, height) || !fits(self.width, width) {
            return Err(ModelError::shape_mismatch(
                format!("[N, {self}]"),
                format!("{dims:?}"),
            ));
        }
        Ok(())
    }

    /// Checks that fixed spatial sizes are at least `min`.
    ///
    /// Open sizes always pass.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::ShapeMismatch` if the height or width is below `min`.
    pub fn check_min_spatial(&self, min: usize) -> Result<()> {
        let too_small = |d: Option<usize>| d.is_some_and(|d| d < min);
        if too_small(self.height) || too_small(self.width) {
            return Err(ModelError::shape_mismatch(
                format!("spatial size of at least {min}x{min}"),
                format!("[N, {self}]"),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Display for InputShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let dim = |d: Option<usize>| d.map_or_else(|| "?".to_string(), |d| d.to_string());
        write!(f, "{}, {}, {}", self.channels, dim(self.height), dim(self.width))
    }
}

const fn default_encode_k() -> usize {
    32
}

#[allow(clippy::unnecessary_wraps)]
const fn default_conv1x1() -> Option<usize> {
    Some(128)
}

/// Configuration for a [`DeepTen`] network.
///
/// # Example
///
/// ```
/// use texture_networks::DeepTenConfig;
///
/// let config = DeepTenConfig::new(47).with_backbone("resnet50");
/// assert_eq!(config.encode_k, 32);
/// assert_eq!(config.conv1x1, Some(128));
/// assert!(config.dense_layers.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeepTenConfig {
    /// Number of output classes.
    pub num_classes: usize,

    /// Expected input shape; `None` takes the backbone's channels and any size.
    #[serde(default)]
    pub input_shape: Option<InputShape>,

    /// Named backbone used by [`DeepTenConfig::init`].
    #[serde(default)]
    pub backbone: Option<BackboneConfig>,

    /// Number of codewords in the encoding layer.
    #[serde(default = "default_encode_k")]
    pub encode_k: usize,

    /// Channels of the 1x1 reduction before encoding; `None` skips it.
    #[serde(default = "default_conv1x1")]
    pub conv1x1: Option<usize>,

    /// Widths of hidden dense layers between encoding and classifier.
    #[serde(default)]
    pub dense_layers: Vec<usize>,

    /// Dropout after the encoding and each dense layer.
    #[serde(default)]
    pub dropout_rate: Option<f64>,
}

impl DeepTenConfig {
    /// Creates a configuration with default hyperparameters and no backbone.
    #[must_use]
    pub const fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            input_shape: None,
            backbone: None,
            encode_k: default_encode_k(),
            conv1x1: default_conv1x1(),
            dense_layers: Vec::new(),
            dropout_rate: None,
        }
    }

    /// Sets the input shape.
    #[must_use]
    pub const fn with_input_shape(mut self, input_shape: InputShape) -> Self {
        self.input_shape = Some(input_shape);
        self
    }

    /// Sets the named backbone.
    #[must_use]
    pub fn with_backbone(mut self, backbone: impl Into<BackboneConfig>) -> Self {
        self.backbone = Some(backbone.into());
        self
    }

    /// Sets the number of codewords.
    #[must_use]
    pub const fn with_encode_k(mut self, encode_k: usize) -> Self {
        self.encode_k = encode_k;
        self
    }

    /// Sets the 1x1 reduction width, or disables it with `None`.
    #[must_use]
    pub const fn with_conv1x1(mut self, conv1x1: Option<usize>) -> Self {
        self.conv1x1 = conv1x1;
        self
    }

    /// Sets the hidden dense layer widths.
    #[must_use]
    pub fn with_dense_layers(mut self, dense_layers: Vec<usize>) -> Self {
        self.dense_layers = dense_layers;
        self
    }

    /// Sets the dropout rate.
    #[must_use]
    pub const fn with_dropout_rate(mut self, dropout_rate: Option<f64>) -> Self {
        self.dropout_rate = dropout_rate;
        self
    }

    /// Validates the hyperparameters.
    ///
    /// The backbone is not checked here; see [`deepten`].
    ///
    /// # Errors
    ///
    /// Returns `ModelError::InvalidConfig` describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.num_classes == 0 {
            return Err(ModelError::invalid_config("num_classes must be > 0"));
        }
        if self.encode_k == 0 {
            return Err(ModelError::invalid_config("encode_k must be > 0"));
        }
        if self.conv1x1 == Some(0) {
            return Err(ModelError::invalid_config("conv1x1 must be > 0 when set"));
        }
        if self.dense_layers.contains(&0) {
            return Err(ModelError::invalid_config(
                "dense_layers widths must be > 0",
            ));
        }
        if let Some(p) = self.dropout_rate {
            if !(0.0..1.0).contains(&p) {
                return Err(ModelError::invalid_config(format!(
                    "dropout_rate must be in [0, 1), got {p}"
                )));
            }
        }
        if let Some(shape) = &self.input_shape {
            shape.validate()?;
        }
        Ok(())
    }

    /// Returns `true` if the hyperparameters are valid.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Serializes the configuration to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(ModelError::from)
    }

    /// Deserializes a configuration from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(ModelError::from)
    }

    /// Reads a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::Io` if the file can't be read and
    /// `ModelError::Serialization` if it isn't a valid configuration.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Builds the network using the configured named backbone.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::MissingBackbone` if no backbone is configured,
    /// plus every error of [`deepten`].
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<DeepTen<B, Backbone<B>>> {
        let source = self.backbone.clone().map(BackboneSource::Named);
        deepten(self, source, device)
    }

    /// Builds the network on top of an existing feature extractor.
    ///
    /// The configured named backbone, if any, is ignored.
    ///
    /// # Errors
    ///
    /// See [`assemble`].
    pub fn init_with_backbone<B, M>(&self, backbone: M, device: &B::Device) -> Result<DeepTen<B, M>>
    where
        B: Backend,
        M: FeatureExtractor<B> + ModuleDisplay,
    {
        assemble(self, Some(backbone), device)
    }
}

/// 1x1 convolution with `ReLU` followed by batch normalization.
#[derive(Debug, Module)]
pub struct Reduction<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
}

impl<B: Backend> Reduction<B> {
    fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            conv: Conv2dConfig::new([in_channels, out_channels], [1, 1]).init(device),
            norm: BatchNormConfig::new(out_channels).init(device),
        }
    }

    /// Output channels.
    #[must_use]
    pub fn channels(&self) -> usize {
        self.conv.weight.dims()[0]
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        self.norm.forward(relu(self.conv.forward(input)))
    }
}

/// Deep Texture Encoding Network.
///
/// Architecture: Backbone -> [1x1 Conv + BN] -> Encoding -> [Dense...] -> Softmax
///
/// # Type Parameters
///
/// - `B`: The Burn backend (e.g., `NdArray`, `Wgpu`)
/// - `M`: The feature extractor; [`Backbone`] for named architectures
///
/// # Example
///
/// ```ignore
/// use texture_networks::{Backbone, DeepTen, DeepTenConfig};
///
/// let model: DeepTen<MyBackend, Backbone<MyBackend>> = DeepTenConfig::new(47)
///     .with_backbone("resnet50")
///     .init(&device)?;
///
/// let images = Tensor::zeros([4, 3, 224, 224], &device);
/// let probabilities = model.forward(images);
/// assert_eq!(probabilities.dims(), [4, 47]);
/// ```
#[derive(Debug, Module)]
pub struct DeepTen<B: Backend, M> {
    backbone: M,
    reduction: Option<Reduction<B>>,
    encoding: Encoding<B>,
    dense: DenseStack<B>,
    classifier: nn::Linear<B>,
    in_channels: usize,
    height: Option<usize>,
    width: Option<usize>,
}

impl<B: Backend, M: FeatureExtractor<B>> DeepTen<B, M> {
    /// Runs the forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: Image batch of shape `[batch, channels, height, width]`
    ///
    /// # Returns
    ///
    /// Class probabilities of shape `[batch, num_classes]`; each row sums to 1.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward_logits(input), 1)
    }

    /// Runs the forward pass up to the classifier, before softmax.
    ///
    /// Useful with losses that apply their own softmax.
    pub fn forward_logits(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.backbone.forward(input);
        let x = match &self.reduction {
            Some(reduction) => reduction.forward(x),
            None => x,
        };
        let x = self.encoding.forward(x);
        let x = self.dense.forward(x);
        self.classifier.forward(x)
    }

    /// Checks the input against the configured shape, then runs [`Self::forward`].
    ///
    /// # Errors
    ///
    /// Returns `ModelError::ShapeMismatch` if the input doesn't match or is
    /// smaller than the backbone accepts.
    pub fn predict(&self, input: Tensor<B, 4>) -> Result<Tensor<B, 2>> {
        let dims = input.dims();
        let [_, channels, height, width] = dims;
        self.input_shape().check(dims)?;
        InputShape::new(channels)
            .with_spatial(height, width)
            .check_min_spatial(self.backbone.min_input_size())?;
        Ok(self.forward(input))
    }

    /// Number of output classes.
    #[must_use]
    pub fn num_classes(&self) -> usize {
        self.classifier.weight.dims()[1]
    }

    /// Input shape accepted by [`Self::predict`].
    #[must_use]
    pub const fn input_shape(&self) -> InputShape {
        InputShape {
            channels: self.in_channels,
            height: self.height,
            width: self.width,
        }
    }

    /// The feature extractor.
    #[must_use]
    pub const fn backbone(&self) -> &M {
        &self.backbone
    }

    /// The encoding layer.
    #[must_use]
    pub const fn encoding(&self) -> &Encoding<B> {
        &self.encoding
    }

    /// Stages of the network in forward order.
    #[must_use]
    pub fn layers(&self) -> Vec<LayerInfo> {
        let mut layers = vec![LayerInfo::Backbone {
            family: self.backbone.family().to_string(),
            out_channels: self.backbone.out_channels(),
        }];
        if let Some(reduction) = &self.reduction {
            layers.push(LayerInfo::Reduction {
                channels: reduction.channels(),
            });
        }
        layers.push(LayerInfo::Encoding {
            codewords: self.encoding.codewords(),
            channels: self.encoding.channels(),
        });
        layers.extend(
            self.dense
                .widths()
                .into_iter()
                .map(|width| LayerInfo::Dense { width }),
        );
        layers.push(LayerInfo::Classifier {
            classes: self.num_classes(),
        });
        layers
    }
}

/// Assembles a DeepTEN classifier from a named or built-in backbone.
///
/// Resolves the backbone with [`make_backbone`], then hands it to
/// [`assemble`].
///
/// # Arguments
///
/// - `config`: Hyperparameters (`num_classes`, `encode_k`, `conv1x1`, ...)
/// - `backbone`: Named or prebuilt feature extractor
/// - `device`: The device to create the model on
///
/// # Errors
///
/// Returns `ModelError::MissingBackbone` if `backbone` is `None`, whatever
/// the other arguments. Otherwise returns `ModelError::InvalidConfig` for
/// invalid hyperparameters and the errors of [`make_backbone`].
pub fn deepten<B: Backend>(
    config: &DeepTenConfig,
    backbone: Option<BackboneSource<B>>,
    device: &B::Device,
) -> Result<DeepTen<B, Backbone<B>>> {
    let source = backbone.ok_or(ModelError::MissingBackbone)?;
    config.validate()?;

    let backbone = make_backbone(source, config.input_shape.as_ref(), device)?;
    assemble(config, Some(backbone), device)
}

/// Assembles a DeepTEN classifier on any feature extractor.
///
/// Appends the optional 1x1 reduction, the encoding layer, the dense stack
/// and the softmax classifier to `backbone`, sizing every layer from the one
/// before it.
///
/// # Errors
///
/// Returns `ModelError::MissingBackbone` if `backbone` is `None`, whatever
/// the other arguments. Otherwise returns `ModelError::InvalidConfig` for
/// invalid hyperparameters and `ModelError::ShapeMismatch` if the backbone
/// can't take the configured input shape.
pub fn assemble<B, M>(
    config: &DeepTenConfig,
    backbone: Option<M>,
    device: &B::Device,
) -> Result<DeepTen<B, M>>
where
    B: Backend,
    M: FeatureExtractor<B> + ModuleDisplay,
{
    let backbone = backbone.ok_or(ModelError::MissingBackbone)?;
    config.validate()?;

    let input_shape = config
        .input_shape
        .unwrap_or_else(|| InputShape::new(backbone.in_channels()));
    check_compatible::<B, M>(&backbone, &input_shape)?;
    let mut channels = backbone.out_channels();

    let reduction = config.conv1x1.map(|width| {
        debug!(from = channels, to = width, "Adding 1x1 channel reduction");
        let reduction = Reduction::<B>::new(channels, width, device);
        channels = width;
        reduction
    });

    let encoding = EncodingConfig::new(channels, config.encode_k)
        .with_dropout(config.dropout_rate)
        .init::<B>(device)?;

    let dense_config = DenseStackConfig::new(encoding.output_dim(), config.dense_layers.clone())
        .with_dropout(config.dropout_rate);
    let dense = dense_config.init::<B>(device)?;

    let classifier =
        nn::LinearConfig::new(dense_config.output_dim(), config.num_classes).init::<B>(device);

    let model = DeepTen {
        backbone,
        reduction,
        encoding,
        dense,
        classifier,
        in_channels: input_shape.channels,
        height: input_shape.height,
        width: input_shape.width,
    };

    info!(
        backbone = model.backbone.family(),
        num_classes = config.num_classes,
        encode_k = config.encode_k,
        conv1x1 = ?config.conv1x1,
        dense_layers = ?config.dense_layers,
        params = model.num_params(),
        "Assembled DeepTEN"
    );

    Ok(model)
}
