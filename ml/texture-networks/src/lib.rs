//! Deep Texture Encoding Networks (DeepTEN) built with the Burn framework.
//!
//! This crate assembles texture classifiers from a convolutional backbone and
//! the layers of `texture-layers`:
//!
//! ```text
//! Backbone -> [1x1 Conv + BN] -> Encoding -> [Dense...] -> Softmax
//! ```
//!
//! # Assembly
//!
//! - [`deepten`] - Builds a [`DeepTen`] from a [`DeepTenConfig`] and a backbone
//! - [`DeepTenConfig`] - Serializable hyperparameters (`num_classes`,
//!   `encode_k`, `conv1x1`, `dense_layers`, `dropout_rate`, ...)
//!
//! # Backbones
//!
//! - [`BackboneConfig`] - Named architecture (`"resnet50"`, `"vgg16"`, ...)
//!   with optional pretrained weights
//! - [`Backbone`] - Resolved feature extractor, also constructible from a
//!   [`ResNet`] or [`Vgg`] you built yourself
//! - [`make_backbone`] - Resolves a [`BackboneSource`]
//! - [`FeatureExtractor`] - Implement it for your own module and build with
//!   [`assemble`] or [`DeepTenConfig::init_with_backbone`]
//!
//! # Example
//!
//! ```ignore
//! use texture_networks::DeepTenConfig;
//!
//! let model = DeepTenConfig::new(47)
//!     .with_backbone("resnet50")
//!     .with_dense_layers(vec![128])
//!     .init::<MyBackend>(&device)?;
//!
//! let probabilities = model.forward(Tensor::zeros([1, 3, 224, 224], &device));
//! ```
//!
//! # Quality Standards
//!
//! - Zero clippy/doc warnings
//! - Zero `unwrap`/`expect` in library code

#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod backbone;
mod checkpoint;
mod deepten;
mod error;
mod summary;

// Re-export backbone types
pub use backbone::{
    Backbone, BackboneArch, BackboneConfig, BackboneSource, BlockKind, ConvNorm, FeatureExtractor,
    ResNet, ResNetConfig, ResidualBlock, Vgg, VggBlock, VggConfig, check_compatible,
    make_backbone,
};

// Re-export assembly
pub use deepten::{DeepTen, DeepTenConfig, InputShape, Reduction, assemble, deepten};
pub use summary::LayerInfo;

// Re-export weight loading
pub use checkpoint::{WeightsFormat, check_weights_path, load_weights};

// Re-export error types
pub use error::{ModelError, Result};

// Re-export layers used in the public API
pub use texture_layers::{DenseStack, DenseStackConfig, Encoding, EncodingConfig, LayerError};

/// Prelude for convenient imports.
pub mod prelude {
    pub use super::{
        Backbone, BackboneArch, BackboneConfig, BackboneSource, DeepTen, DeepTenConfig,
        FeatureExtractor, InputShape, LayerInfo, ModelError, ResNetConfig, VggConfig, assemble,
        deepten, load_weights, make_backbone,
    };
}
