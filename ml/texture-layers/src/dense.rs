//! Stack of fully connected layers between the encoder and the classifier.

use burn::module::Module;
use burn::nn::{self, Dropout, DropoutConfig};
use burn::prelude::Backend;
use burn::tensor::Tensor;
use burn::tensor::activation::relu;
use serde::{Deserialize, Serialize};

use crate::error::{LayerError, Result, check_dropout};

/// Configuration for a [`DenseStack`].
///
/// # Example
///
/// ```
/// use texture_layers::DenseStackConfig;
///
/// let config = DenseStackConfig::new(256, vec![128, 64]);
/// assert_eq!(config.output_dim(), 64);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DenseStackConfig {
    /// Width of the incoming feature vector.
    pub input_dim: usize,

    /// Output width of each layer, in order.
    pub widths: Vec<usize>,

    /// Dropout applied after each layer.
    pub dropout: Option<f64>,
}

impl DenseStackConfig {
    /// Creates a new configuration.
    #[must_use]
    pub const fn new(input_dim: usize, widths: Vec<usize>) -> Self {
        Self {
            input_dim,
            widths,
            dropout: None,
        }
    }

    /// Sets the dropout rate.
    #[must_use]
    pub fn with_dropout(mut self, dropout: Option<f64>) -> Self {
        self.dropout = dropout;
        self
    }

    /// Width of the vector leaving the stack.
    #[must_use]
    pub fn output_dim(&self) -> usize {
        self.widths.last().copied().unwrap_or(self.input_dim)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `LayerError::InvalidConfig` for a zero width or an out of
    /// range dropout rate.
    pub fn validate(&self) -> Result<()> {
        if self.input_dim == 0 {
            return Err(LayerError::invalid_config("dense input_dim must be > 0"));
        }
        if let Some(idx) = self.widths.iter().position(|&w| w == 0) {
            return Err(LayerError::invalid_config(format!(
                "dense layer {idx} has zero width"
            )));
        }
        check_dropout(self.dropout)
    }

    /// Initializes the stack.
    ///
    /// # Errors
    ///
    /// Returns `LayerError::InvalidConfig` if the configuration is invalid.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<DenseStack<B>> {
        self.validate()?;

        let mut layers = Vec::with_capacity(self.widths.len());
        let mut fan_in = self.input_dim;
        for &width in &self.widths {
            layers.push(nn::LinearConfig::new(fan_in, width).init(device));
            fan_in = width;
        }

        Ok(DenseStack {
            layers,
            dropout: self.dropout.map(|p| DropoutConfig::new(p).init()),
        })
    }
}

/// Sequence of `Linear -> ReLU [-> Dropout]` blocks.
///
/// An empty stack passes its input through unchanged.
#[derive(Debug, Module)]
pub struct DenseStack<B: Backend> {
    layers: Vec<nn::Linear<B>>,
    dropout: Option<Dropout>,
}

impl<B: Backend> DenseStack<B> {
    /// Output widths of the layers, in order.
    #[must_use]
    pub fn widths(&self) -> Vec<usize> {
        self.layers
            .iter()
            .map(|layer| layer.weight.dims()[1])
            .collect()
    }

    /// Number of layers in the stack.
    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Returns `true` if the stack has no layers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Runs the forward pass.
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        self.layers.iter().fold(input, |x, layer| {
            let x = relu(layer.forward(x));
            match &self.dropout {
                Some(dropout) => dropout.forward(x),
                None => x,
            }
        })
    }
}
