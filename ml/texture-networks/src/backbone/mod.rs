//! Backbone feature extractors and their resolution from names or modules.

mod resnet;
mod vgg;

use std::path::PathBuf;
use std::str::FromStr;

use burn::module::Module;
use burn::prelude::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::checkpoint::{check_weights_path, load_weights};
use crate::deepten::InputShape;
use crate::error::{ModelError, Result};

pub use resnet::{BlockKind, ConvNorm, ResNet, ResNetConfig, ResidualBlock};
pub use vgg::{Vgg, VggBlock, VggConfig};

/// Named backbone architectures.
///
/// # Example
///
/// ```
/// use texture_networks::BackboneArch;
///
/// assert_eq!(BackboneArch::from_name("ResNet50"), Some(BackboneArch::ResNet50));
/// assert_eq!(BackboneArch::from_name("vgg_16"), Some(BackboneArch::Vgg16));
/// assert_eq!(BackboneArch::from_name("alexnet"), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackboneArch {
    /// VGG-11.
    Vgg11,
    /// VGG-13.
    Vgg13,
    /// VGG-16.
    Vgg16,
    /// VGG-19.
    Vgg19,
    /// ResNet-18.
    ResNet18,
    /// ResNet-34.
    ResNet34,
    /// ResNet-50.
    ResNet50,
    /// ResNet-101.
    ResNet101,
    /// ResNet-152.
    ResNet152,
}

impl BackboneArch {
    /// All named architectures.
    pub const ALL: [Self; 9] = [
        Self::Vgg11,
        Self::Vgg13,
        Self::Vgg16,
        Self::Vgg19,
        Self::ResNet18,
        Self::ResNet34,
        Self::ResNet50,
        Self::ResNet101,
        Self::ResNet152,
    ];

    /// Parses an architecture name.
    ///
    /// Matching ignores case, `-` and `_`.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let key: String = name
            .chars()
            .filter(|c| !matches!(c, '-' | '_'))
            .collect::<String>()
            .to_lowercase();
        Self::ALL.into_iter().find(|arch| arch.name() == key)
    }

    /// Canonical lowercase name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Vgg11 => "vgg11",
            Self::Vgg13 => "vgg13",
            Self::Vgg16 => "vgg16",
            Self::Vgg19 => "vgg19",
            Self::ResNet18 => "resnet18",
            Self::ResNet34 => "resnet34",
            Self::ResNet50 => "resnet50",
            Self::ResNet101 => "resnet101",
            Self::ResNet152 => "resnet152",
        }
    }

    /// Returns `true` for the ResNet family.
    #[must_use]
    pub const fn is_resnet(&self) -> bool {
        matches!(
            self,
            Self::ResNet18 | Self::ResNet34 | Self::ResNet50 | Self::ResNet101 | Self::ResNet152
        )
    }

    fn vgg_config(self) -> VggConfig {
        match self {
            Self::Vgg11 => VggConfig::vgg11(),
            Self::Vgg13 => VggConfig::vgg13(),
            Self::Vgg19 => VggConfig::vgg19(),
            _ => VggConfig::vgg16(),
        }
    }

    const fn resnet_config(self) -> ResNetConfig {
        match self {
            Self::ResNet18 => ResNetConfig::resnet18(),
            Self::ResNet34 => ResNetConfig::resnet34(),
            Self::ResNet101 => ResNetConfig::resnet101(),
            Self::ResNet152 => ResNetConfig::resnet152(),
            _ => ResNetConfig::resnet50(),
        }
    }

    /// Channels of the feature map this architecture produces.
    #[must_use]
    pub fn out_channels(&self) -> usize {
        if self.is_resnet() {
            self.resnet_config().out_channels()
        } else {
            self.vgg_config().out_channels()
        }
    }

    /// Smallest height and width the architecture accepts.
    #[must_use]
    pub fn min_input_size(&self) -> usize {
        if self.is_resnet() {
            resnet::MIN_INPUT_SIZE
        } else {
            self.vgg_config().min_input_size()
        }
    }

    /// Builds the architecture with randomly initialized weights.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::InvalidConfig` if `in_channels` is zero.
    pub fn init<B: Backend>(&self, in_channels: usize, device: &B::Device) -> Result<Backbone<B>> {
        if self.is_resnet() {
            self.resnet_config()
                .with_in_channels(in_channels)
                .init::<B>(device)
                .map(Backbone::from)
        } else {
            self.vgg_config()
                .with_in_channels(in_channels)
                .init::<B>(device)
                .map(Backbone::from)
        }
    }
}

impl FromStr for BackboneArch {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s).ok_or_else(|| ModelError::unknown_backbone(s))
    }
}

impl std::fmt::Display for BackboneArch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A backbone selected by name, optionally with pretrained weights.
///
/// # Example
///
/// ```
/// use texture_networks::BackboneConfig;
///
/// let config = BackboneConfig::new("resnet50").with_weights("weights/resnet50.bin");
/// assert_eq!(config.in_channels, 3);
/// assert!(config.weights.is_some());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackboneConfig {
    /// Architecture name, see [`BackboneArch::from_name`].
    pub name: String,

    /// Channels of the input image.
    #[serde(default = "default_in_channels")]
    pub in_channels: usize,

    /// Weight file to load after construction.
    #[serde(default)]
    pub weights: Option<PathBuf>,
}

const fn default_in_channels() -> usize {
    3
}

impl BackboneConfig {
    /// Creates a configuration for the named architecture.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            in_channels: default_in_channels(),
            weights: None,
        }
    }

    /// Sets the number of input channels.
    #[must_use]
    pub fn with_in_channels(mut self, in_channels: usize) -> Self {
        self.in_channels = in_channels;
        self
    }

    /// Sets the weight file to load.
    #[must_use]
    pub fn with_weights(mut self, path: impl Into<PathBuf>) -> Self {
        self.weights = Some(path.into());
        self
    }

    /// Resolves the architecture name.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::UnknownBackbone` if the name is not recognized.
    pub fn arch(&self) -> Result<BackboneArch> {
        self.name.parse()
    }

    /// Builds the backbone and loads its weights, if any.
    ///
    /// The weight file is checked before any layer is allocated.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::UnknownBackbone` for an unrecognized name and the
    /// errors of [`load_weights`] when a weight file is configured.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Backbone<B>> {
        let arch = self.arch()?;
        if let Some(path) = &self.weights {
            check_weights_path(path)?;
        }

        let backbone = arch.init::<B>(self.in_channels, device)?;
        info!(
            arch = %arch,
            in_channels = self.in_channels,
            out_channels = backbone.out_channels(),
            pretrained = self.weights.is_some(),
            "Built backbone"
        );

        match &self.weights {
            Some(path) => load_weights(backbone, path, device),
            None => Ok(backbone),
        }
    }
}

impl From<&str> for BackboneConfig {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<BackboneArch> for BackboneConfig {
    fn from(arch: BackboneArch) -> Self {
        Self::new(arch.name())
    }
}

/// A module that turns an NCHW image batch into an NCHW feature map.
///
/// [`DeepTen`](crate::DeepTen) sits on top of any implementor. The built-in
/// [`Backbone`], [`ResNet`] and [`Vgg`] implement it; implement it for your
/// own Burn module to use a custom feature extractor.
pub trait FeatureExtractor<B: Backend>: Module<B> {
    /// Runs the forward pass.
    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4>;

    /// Channels expected on input.
    fn in_channels(&self) -> usize;

    /// Channels of the produced feature map.
    fn out_channels(&self) -> usize;

    /// Short architecture family name used in summaries and logs.
    fn family(&self) -> &'static str {
        "custom"
    }

    /// Smallest height and width the extractor accepts.
    fn min_input_size(&self) -> usize {
        1
    }
}

impl<B: Backend> FeatureExtractor<B> for ResNet<B> {
    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        Self::forward(self, input)
    }

    fn in_channels(&self) -> usize {
        Self::in_channels(self)
    }

    fn out_channels(&self) -> usize {
        Self::out_channels(self)
    }

    fn family(&self) -> &'static str {
        "resnet"
    }

    fn min_input_size(&self) -> usize {
        Self::min_input_size(self)
    }
}

impl<B: Backend> FeatureExtractor<B> for Vgg<B> {
    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        Self::forward(self, input)
    }

    fn in_channels(&self) -> usize {
        Self::in_channels(self)
    }

    fn out_channels(&self) -> usize {
        Self::out_channels(self)
    }

    fn family(&self) -> &'static str {
        "vgg"
    }

    fn min_input_size(&self) -> usize {
        Self::min_input_size(self)
    }
}

/// One of the named feature extractors.
///
/// Build it by name through [`BackboneConfig`] or from an already
/// constructed network with `From`.
#[derive(Debug, Module)]
pub enum Backbone<B: Backend> {
    /// A ResNet.
    ResNet(ResNet<B>),

    /// A VGG.
    Vgg(Vgg<B>),
}

impl<B: Backend> FeatureExtractor<B> for Backbone<B> {
    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Self::ResNet(resnet) => resnet.forward(input),
            Self::Vgg(vgg) => vgg.forward(input),
        }
    }

    fn in_channels(&self) -> usize {
        match self {
            Self::ResNet(resnet) => resnet.in_channels(),
            Self::Vgg(vgg) => vgg.in_channels(),
        }
    }

    fn out_channels(&self) -> usize {
        match self {
            Self::ResNet(resnet) => resnet.out_channels(),
            Self::Vgg(vgg) => vgg.out_channels(),
        }
    }

    fn family(&self) -> &'static str {
        match self {
            Self::ResNet(_) => "resnet",
            Self::Vgg(_) => "vgg",
        }
    }

    fn min_input_size(&self) -> usize {
        match self {
            Self::ResNet(resnet) => resnet.min_input_size(),
            Self::Vgg(vgg) => vgg.min_input_size(),
        }
    }
}

impl<B: Backend> From<ResNet<B>> for Backbone<B> {
    fn from(resnet: ResNet<B>) -> Self {
        Self::ResNet(resnet)
    }
}

impl<B: Backend> From<Vgg<B>> for Backbone<B> {
    fn from(vgg: Vgg<B>) -> Self {
        Self::Vgg(vgg)
    }
}

/// Where the assembler gets its backbone from.
#[derive(Debug)]
pub enum BackboneSource<B: Backend> {
    /// Build a named architecture.
    Named(BackboneConfig),

    /// Use an existing feature extractor as-is.
    Prebuilt(Backbone<B>),
}

impl<B: Backend> From<BackboneConfig> for BackboneSource<B> {
    fn from(config: BackboneConfig) -> Self {
        Self::Named(config)
    }
}

impl<B: Backend> From<&str> for BackboneSource<B> {
    fn from(name: &str) -> Self {
        Self::Named(BackboneConfig::new(name))
    }
}

impl<B: Backend> From<Backbone<B>> for BackboneSource<B> {
    fn from(backbone: Backbone<B>) -> Self {
        Self::Prebuilt(backbone)
    }
}

impl<B: Backend> From<ResNet<B>> for BackboneSource<B> {
    fn from(resnet: ResNet<B>) -> Self {
        Self::Prebuilt(resnet.into())
    }
}

impl<B: Backend> From<Vgg<B>> for BackboneSource<B> {
    fn from(vgg: Vgg<B>) -> Self {
        Self::Prebuilt(vgg.into())
    }
}

/// Resolves a backbone source into a concrete feature extractor.
///
/// A named backbone takes its input channels from `input_shape` when given.
/// A prebuilt backbone must agree with `input_shape` on input channels. In
/// both cases a fixed spatial size must not be smaller than the backbone's
/// [`FeatureExtractor::min_input_size`].
///
/// # Errors
///
/// Returns `ModelError::UnknownBackbone` for an unrecognized name,
/// `ModelError::ShapeMismatch` when the backbone can't take `input_shape`,
/// and weight loading errors for named backbones with weights.
pub fn make_backbone<B: Backend>(
    source: BackboneSource<B>,
    input_shape: Option<&InputShape>,
    device: &B::Device,
) -> Result<Backbone<B>> {
    match source {
        BackboneSource::Named(config) => {
            let config = match input_shape {
                Some(shape) => {
                    shape.check_min_spatial(config.arch()?.min_input_size())?;
                    config.with_in_channels(shape.channels)
                }
                None => config,
            };
            debug!(name = %config.name, "Resolving named backbone");
            config.init(device)
        }
        BackboneSource::Prebuilt(backbone) => {
            if let Some(shape) = input_shape {
                check_compatible::<B, _>(&backbone, shape)?;
            }
            debug!(family = backbone.family(), "Using prebuilt backbone");
            Ok(backbone)
        }
    }
}

/// Checks that `extractor` can take images of `shape`.
///
/// # Errors
///
/// Returns `ModelError::ShapeMismatch` if the input channels differ or a
/// fixed spatial size is below the extractor's minimum.
pub fn check_compatible<B, M>(extractor: &M, shape: &InputShape) -> Result<()>
where
    B: Backend,
    M: FeatureExtractor<B>,
{
    if shape.channels != extractor.in_channels() {
        return Err(ModelError::shape_mismatch(
            format!("{} input channels", shape.channels),
            format!("backbone with {} input channels", extractor.in_channels()),
        ));
    }
    shape.check_min_spatial(extractor.min_input_size())
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn device() -> <TestBackend as Backend>::Device {
        <TestBackend as Backend>::Device::default()
    }

    fn tiny_vgg(in_channels: usize) -> Vgg<TestBackend> {
        VggConfig::new(vec![vec![4]])
            .with_in_channels(in_channels)
            .init(&device())
            .unwrap()
    }

    #[test]
    fn arch_names_round_trip() {
        for arch in BackboneArch::ALL {
            assert_eq!(BackboneArch::from_name(arch.name()), Some(arch));
            assert_eq!(arch.to_string(), arch.name());
        }
    }

    #[test]
    fn arch_from_name_is_lenient() {
        assert_eq!(BackboneArch::from_name("VGG16"), Some(BackboneArch::Vgg16));
        assert_eq!(BackboneArch::from_name("resnet-101"), Some(BackboneArch::ResNet101));
        assert_eq!(BackboneArch::from_name("ResNet_152"), Some(BackboneArch::ResNet152));
        assert_eq!(BackboneArch::from_name("inception_v3"), None);
    }

    #[test]
    fn arch_from_str_reports_unknown() {
        let err = "mobilenet".parse::<BackboneArch>();
        assert!(matches!(err, Err(ModelError::UnknownBackbone(name)) if name == "mobilenet"));
    }

    #[test]
    fn arch_out_channels() {
        assert_eq!(BackboneArch::Vgg11.out_channels(), 512);
        assert_eq!(BackboneArch::ResNet18.out_channels(), 512);
        assert_eq!(BackboneArch::ResNet50.out_channels(), 2048);
    }

    #[test]
    fn config_serialization_defaults() {
        let parsed: BackboneConfig = serde_json::from_str(r#"{"name": "resnet34"}"#).unwrap();
        assert_eq!(parsed, BackboneConfig::new("resnet34"));
    }

    #[test]
    fn config_unknown_name() {
        let err = BackboneConfig::new("alexnet").init::<TestBackend>(&device());
        assert!(matches!(err, Err(ModelError::UnknownBackbone(_))));
    }

    #[test]
    fn config_missing_weights() {
        let err = BackboneConfig::new("resnet152")
            .with_weights("/nonexistent/resnet152.bin")
            .init::<TestBackend>(&device());
        assert!(matches!(err, Err(ModelError::CheckpointNotFound(_))));
    }

    #[test]
    fn backbone_wraps_vgg() {
        let backbone = Backbone::from(tiny_vgg(2));
        assert_eq!(backbone.family(), "vgg");
        assert_eq!(backbone.in_channels(), 2);
        assert_eq!(backbone.out_channels(), 4);

        let output = backbone.forward(Tensor::zeros([1, 2, 8, 8], &device()));
        assert_eq!(output.dims(), [1, 4, 4, 4]);
    }

    #[test]
    fn make_backbone_prebuilt_checks_channels() {
        let shape = InputShape::new(3);
        let err = make_backbone(tiny_vgg(1).into(), Some(&shape), &device());
        assert!(matches!(err, Err(ModelError::ShapeMismatch { .. })));

        let ok = make_backbone(tiny_vgg(3).into(), Some(&shape), &device());
        assert!(ok.is_ok());
    }

    #[test]
    fn make_backbone_prebuilt_without_shape() {
        let backbone = make_backbone(tiny_vgg(5).into(), None, &device()).unwrap();
        assert_eq!(backbone.in_channels(), 5);
    }

    #[test]
    fn make_backbone_named_takes_input_channels() {
        let shape = InputShape::new(1);
        let backbone =
            make_backbone::<TestBackend>("resnet18".into(), Some(&shape), &device()).unwrap();
        assert_eq!(backbone.family(), "resnet");
        assert_eq!(backbone.in_channels(), 1);
        assert_eq!(backbone.out_channels(), 512);
    }

    #[test]
    fn arch_min_input_size() {
        for arch in BackboneArch::ALL {
            assert_eq!(arch.min_input_size(), 32);
        }
    }

    #[test]
    fn backbone_min_input_size() {
        let vgg = Backbone::from(tiny_vgg(3));
        assert_eq!(vgg.min_input_size(), 2);

        let resnet: Backbone<TestBackend> = ResNetConfig::new(BlockKind::Basic, [1, 1, 1, 1])
            .with_base_width(2)
            .init(&device())
            .unwrap()
            .into();
        assert_eq!(resnet.family(), "resnet");
        assert_eq!(resnet.min_input_size(), 32);
    }

    #[test]
    fn make_backbone_named_rejects_small_input() {
        let shape = InputShape::new(3).with_spatial(224, 16);
        let err = make_backbone::<TestBackend>("vgg11".into(), Some(&shape), &device());
        assert!(matches!(err, Err(ModelError::ShapeMismatch { .. })));
    }

    #[test]
    fn make_backbone_prebuilt_rejects_small_input() {
        let shape = InputShape::new(3).with_spatial(1, 1);
        let err = make_backbone(tiny_vgg(3).into(), Some(&shape), &device());
        assert!(matches!(err, Err(ModelError::ShapeMismatch { .. })));
    }

    #[test]
    fn prebuilt_weights_load_from_file() {
        use burn::record::{BinFileRecorder, FullPrecisionSettings};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.bin");

        let source = tiny_vgg(3);
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        source.clone().save_file(path.clone(), &recorder).unwrap();

        let input = Tensor::<TestBackend, 4>::ones([1, 3, 4, 4], &device());
        let expected = source.forward(input.clone()).into_data();

        let loaded = load_weights(tiny_vgg(3), &path, &device()).unwrap();
        loaded
            .forward(input)
            .into_data()
            .assert_approx_eq(&expected, 5);
    }
}
