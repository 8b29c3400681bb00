//! Residual encoding layer over a learned codebook.

use burn::module::{Module, Param};
use burn::nn::{Dropout, DropoutConfig, Initializer};
use burn::prelude::Backend;
use burn::tensor::Tensor;
use burn::tensor::activation::softmax;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{LayerError, Result, check_dropout};

/// Lower bound on the L2 norm used when normalizing descriptors.
const NORM_EPSILON: f64 = 1e-12;

/// Configuration for the [`Encoding`] layer.
///
/// # Example
///
/// ```
/// use texture_layers::EncodingConfig;
///
/// let config = EncodingConfig::new(128, 32);
/// assert_eq!(config.output_dim(), 128 * 32);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EncodingConfig {
    /// Channel count `D` of the incoming feature map.
    pub channels: usize,

    /// Number of codewords `K` in the codebook.
    pub codewords: usize,

    /// Dropout applied to the encoded descriptor.
    pub dropout: Option<f64>,

    /// Whether to L2-normalize the flattened descriptor.
    pub normalize: bool,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self::new(128, 32)
    }
}

impl EncodingConfig {
    /// Creates a new configuration for `channels` inputs and `codewords` codewords.
    #[must_use]
    pub const fn new(channels: usize, codewords: usize) -> Self {
        Self {
            channels,
            codewords,
            dropout: None,
            normalize: true,
        }
    }

    /// Sets the dropout rate.
    #[must_use]
    pub const fn with_dropout(mut self, dropout: Option<f64>) -> Self {
        self.dropout = dropout;
        self
    }

    /// Disables L2 normalization of the output.
    #[must_use]
    pub const fn without_normalization(mut self) -> Self {
        self.normalize = false;
        self
    }

    /// Width of the descriptor produced per example (`K * D`).
    #[must_use]
    pub const fn output_dim(&self) -> usize {
        self.channels * self.codewords
    }

    /// Validates the configuration.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Validates the configuration, reporting the first problem found.
    ///
    /// # Errors
    ///
    /// Returns `LayerError::InvalidConfig` if a dimension is zero or the
    /// dropout rate is outside `[0, 1)`.
    pub fn validate(&self) -> Result<()> {
        if self.channels == 0 {
            return Err(LayerError::invalid_config("encoding channels must be > 0"));
        }
        if self.codewords == 0 {
            return Err(LayerError::invalid_config("codewords must be > 0"));
        }
        check_dropout(self.dropout)
    }

    /// Initializes the layer.
    ///
    /// Codewords are drawn from `U(-1/sqrt(K*D), 1/sqrt(K*D))` and smoothing
    /// factors from `U(-1, 0)`.
    ///
    /// # Errors
    ///
    /// Returns `LayerError::InvalidConfig` if the configuration is invalid.
    #[allow(clippy::cast_precision_loss)]
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Encoding<B>> {
        self.validate()?;

        let bound = 1.0 / (self.output_dim() as f64).sqrt();
        let codewords = Initializer::Uniform {
            min: -bound,
            max: bound,
        }
        .init([self.codewords, self.channels], device);
        let scale = Initializer::Uniform { min: -1.0, max: 0.0 }.init([self.codewords], device);

        debug!(
            channels = self.channels,
            codewords = self.codewords,
            dropout = ?self.dropout,
            "Initialized encoding layer"
        );

        Ok(Encoding {
            codewords,
            scale,
            dropout: self.dropout.map(|p| DropoutConfig::new(p).init()),
            normalize: self.normalize,
        })
    }
}

/// Residual encoding layer.
///
/// Treats every spatial location of a `[N, D, H, W]` feature map as a
/// descriptor `x_i` and aggregates residuals to `K` learned codewords `c_k`:
///
/// - `a_ik = softmax_k(s_k * |x_i - c_k|^2)`
/// - `e_k = sum_i a_ik (x_i - c_k)`
///
/// The `[K, D]` result is flattened to `[N, K * D]`, so the output width does
/// not depend on `H` or `W`.
#[derive(Debug, Module)]
pub struct Encoding<B: Backend> {
    codewords: Param<Tensor<B, 2>>,
    scale: Param<Tensor<B, 1>>,
    dropout: Option<Dropout>,
    normalize: bool,
}

impl<B: Backend> Encoding<B> {
    /// Number of codewords `K`.
    #[must_use]
    pub fn codewords(&self) -> usize {
        self.codewords.dims()[0]
    }

    /// Channel count `D` expected on input.
    #[must_use]
    pub fn channels(&self) -> usize {
        self.codewords.dims()[1]
    }

    /// Width of the descriptor produced per example.
    #[must_use]
    pub fn output_dim(&self) -> usize {
        self.codewords() * self.channels()
    }

    /// Runs the forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: Feature map of shape `[batch, channels, height, width]`
    ///
    /// # Returns
    ///
    /// Descriptor of shape `[batch, codewords * channels]`
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch, channels, height, width] = input.dims();

        // [N, D, H, W] -> [N, L, D]
        let x = input
            .reshape([batch, channels, height * width])
            .swap_dims(1, 2);

        let assignments = softmax(self.scaled_l2(x.clone()), 2);
        let encoded = self.aggregate(x, assignments);

        let mut output = encoded.reshape([batch, self.output_dim()]);
        if self.normalize {
            let norm = output
                .clone()
                .powf_scalar(2.0)
                .sum_dim(1)
                .sqrt()
                .clamp_min(NORM_EPSILON);
            output = output / norm;
        }

        match &self.dropout {
            Some(dropout) => dropout.forward(output),
            None => output,
        }
    }

    /// Smoothed squared distances `s_k * |x_i - c_k|^2`, shape `[N, L, K]`.
    fn scaled_l2(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch, locations, channels] = x.dims();
        let codewords = self.codewords.val();
        let k = codewords.dims()[0];

        let x_sq: Tensor<B, 3> = x.clone().powf_scalar(2.0).sum_dim(2);
        let c_sq: Tensor<B, 3> = codewords
            .clone()
            .powf_scalar(2.0)
            .sum_dim(1)
            .reshape([1, 1, k]);
        let cross: Tensor<B, 3> = x
            .reshape([batch * locations, channels])
            .matmul(codewords.transpose())
            .reshape([batch, locations, k]);

        // |x|^2 + |c|^2 - 2 x.c can dip below zero from rounding.
        let dist = (x_sq + c_sq - cross.mul_scalar(2.0)).clamp_min(0.0);
        dist * self.scale.val().reshape([1, 1, k])
    }

    /// Weighted residual sum `sum_i a_ik x_i - (sum_i a_ik) c_k`, shape `[N, K, D]`.
    fn aggregate(&self, x: Tensor<B, 3>, assignments: Tensor<B, 3>) -> Tensor<B, 3> {
        let weighted = assignments.clone().swap_dims(1, 2).matmul(x);
        let mass = assignments.sum_dim(1).swap_dims(1, 2);
        let codewords: Tensor<B, 3> = self.codewords.val().unsqueeze();
        weighted - mass * codewords
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn device() -> <TestBackend as Backend>::Device {
        <TestBackend as Backend>::Device::default()
    }

    #[test]
    fn config_default() {
        let config = EncodingConfig::default();
        assert_eq!(config.channels, 128);
        assert_eq!(config.codewords, 32);
        assert!(config.normalize);
        assert!(config.is_valid());
    }

    #[test]
    fn config_rejects_zero_dims() {
        assert!(EncodingConfig::new(0, 8).validate().is_err());
        assert!(EncodingConfig::new(8, 0).validate().is_err());
    }

    #[test]
    fn config_rejects_bad_dropout() {
        let config = EncodingConfig::new(8, 4).with_dropout(Some(1.5));
        assert!(!config.is_valid());
        assert!(config.init::<TestBackend>(&device()).is_err());
    }

    #[test]
    fn config_serialization() {
        let config = EncodingConfig::new(64, 16).with_dropout(Some(0.25));
        let json = serde_json::to_string(&config).unwrap_or_default();
        let parsed = serde_json::from_str::<EncodingConfig>(&json).ok();
        assert_eq!(parsed, Some(config));
    }

    #[test]
    fn forward_shape_ignores_spatial_size() {
        let layer = EncodingConfig::new(6, 4)
            .init::<TestBackend>(&device())
            .unwrap();

        for (height, width) in [(1, 1), (3, 5), (7, 7)] {
            let input = Tensor::<TestBackend, 4>::ones([2, 6, height, width], &device());
            assert_eq!(layer.forward(input).dims(), [2, 24]);
        }
    }

    #[test]
    fn forward_normalizes_rows() {
        let layer = EncodingConfig::new(3, 5)
            .init::<TestBackend>(&device())
            .unwrap();
        let input = Tensor::<TestBackend, 4>::random(
            [3, 3, 4, 4],
            burn::tensor::Distribution::Uniform(-1.0, 1.0),
            &device(),
        );

        let norms = layer
            .forward(input)
            .powf_scalar(2.0)
            .sum_dim(1)
            .sqrt()
            .into_data()
            .to_vec::<f32>()
            .unwrap();

        assert_eq!(norms.len(), 3);
        for norm in norms {
            assert_relative_eq!(norm, 1.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn single_codeword_sums_residuals() {
        // With K = 1 every assignment weight is 1, so e = sum_i (x_i - c).
        let device = device();
        let layer = Encoding::<TestBackend> {
            codewords: Param::from_tensor(Tensor::from_data(
                TensorData::new(vec![1.0_f32, -1.0], [1, 2]),
                &device,
            )),
            scale: Param::from_tensor(Tensor::from_data(
                TensorData::new(vec![-0.5_f32], [1]),
                &device,
            )),
            dropout: None,
            normalize: false,
        };

        // Two channels over a 1x2 grid: x_0 = (1, 3), x_1 = (2, 4).
        let input = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(vec![1.0_f32, 2.0, 3.0, 4.0], [1, 2, 1, 2]),
            &device,
        );
        let output = layer.forward(input).into_data().to_vec::<f32>().unwrap();

        assert_eq!(output.len(), 2);
        assert_relative_eq!(output[0], (1.0 - 1.0) + (2.0 - 1.0), epsilon = 1e-5);
        assert_relative_eq!(output[1], (3.0 + 1.0) + (4.0 + 1.0), epsilon = 1e-5);
    }

    #[test]
    fn accessors_report_dims() {
        let layer = EncodingConfig::new(16, 8)
            .init::<TestBackend>(&device())
            .unwrap();
        assert_eq!(layer.codewords(), 8);
        assert_eq!(layer.channels(), 16);
        assert_eq!(layer.output_dim(), 128);
    }

    #[test]
    fn codebook_size_changes_parameter_count() {
        let small = EncodingConfig::new(4, 2).init::<TestBackend>(&device()).unwrap();
        let large = EncodingConfig::new(4, 8).init::<TestBackend>(&device()).unwrap();
        assert_eq!(small.num_params(), 2 * 4 + 2);
        assert_eq!(large.num_params(), 8 * 4 + 8);
    }
}
