//! Texture encoding layers built with the Burn framework.
//!
//! # Layers
//!
//! - [`Encoding`] - Residual encoding of a feature map against a learned
//!   codebook, producing a fixed-size descriptor for any spatial size
//! - [`DenseStack`] - Sequence of fully connected `ReLU` layers with optional
//!   dropout
//!
//! Both layers follow Burn's config/init split: a serializable `*Config`
//! validates its dimensions and builds the module on a device.
//!
//! # Example
//!
//! ```ignore
//! use texture_layers::{EncodingConfig, DenseStackConfig};
//!
//! let encoding = EncodingConfig::new(128, 32).init::<MyBackend>(&device)?;
//! let dense = DenseStackConfig::new(encoding.output_dim(), vec![64]).init::<MyBackend>(&device)?;
//!
//! let features = Tensor::zeros([1, 128, 7, 7], &device);
//! let descriptor = dense.forward(encoding.forward(features));
//! ```

#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod dense;
mod encoding;
mod error;

pub use dense::{DenseStack, DenseStackConfig};
pub use encoding::{Encoding, EncodingConfig};
pub use error::{LayerError, Result};

/// Prelude for convenient imports.
pub mod prelude {
    pub use super::{DenseStack, DenseStackConfig, Encoding, EncodingConfig, LayerError};
}
