//! Error types for texture-networks crate.

use texture_layers::LayerError;
use thiserror::Error;

/// Errors that can occur while assembling texture networks.
#[derive(Debug, Error)]
pub enum ModelError {
    /// No backbone was supplied to the assembler.
    #[error("a backbone CNN is required")]
    MissingBackbone,

    /// Backbone name not recognized.
    #[error("unknown backbone: {0}")]
    UnknownBackbone(String),

    /// Invalid model configuration.
    #[error("invalid model configuration: {0}")]
    InvalidConfig(String),

    /// Shape mismatch between connected parts of the network.
    #[error("shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch {
        /// Expected shape.
        expected: String,
        /// Actual shape.
        actual: String,
    },

    /// Failed to load checkpoint.
    #[error("failed to load checkpoint from {path}: {reason}")]
    LoadCheckpoint {
        /// Path to the checkpoint file.
        path: String,
        /// Reason for failure.
        reason: String,
    },

    /// Checkpoint file not found.
    #[error("checkpoint not found: {0}")]
    CheckpointNotFound(String),

    /// Unsupported checkpoint format.
    #[error("unsupported checkpoint format: {0}")]
    UnsupportedFormat(String),

    /// Layer construction error.
    #[error(transparent)]
    Layer(#[from] LayerError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ModelError {
    /// Creates an unknown backbone error.
    #[must_use]
    pub fn unknown_backbone(name: impl Into<String>) -> Self {
        Self::UnknownBackbone(name.into())
    }

    /// Creates an invalid config error.
    #[must_use]
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig(reason.into())
    }

    /// Creates a shape mismatch error.
    #[must_use]
    pub fn shape_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates a load checkpoint error.
    #[must_use]
    pub fn load_checkpoint(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::LoadCheckpoint {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates a checkpoint not found error.
    #[must_use]
    pub fn checkpoint_not_found(path: impl Into<String>) -> Self {
        Self::CheckpointNotFound(path.into())
    }

    /// Creates an unsupported format error.
    #[must_use]
    pub fn unsupported_format(format: impl Into<String>) -> Self {
        Self::UnsupportedFormat(format.into())
    }
}

impl From<std::io::Error> for ModelError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for texture-networks operations.
pub type Result<T> = std::result::Result<T, ModelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_missing_backbone() {
        let err = ModelError::MissingBackbone;
        assert!(err.to_string().contains("backbone"));
    }

    #[test]
    fn error_unknown_backbone() {
        let err = ModelError::unknown_backbone("alexnet");
        assert!(err.to_string().contains("alexnet"));
    }

    #[test]
    fn error_shape_mismatch() {
        let err = ModelError::shape_mismatch("3 input channels", "1 input channels");
        assert!(err.to_string().contains("3 input channels"));
        assert!(err.to_string().contains("1 input channels"));
    }

    #[test]
    fn error_load_checkpoint() {
        let err = ModelError::load_checkpoint("resnet50.bin", "record mismatch");
        assert!(err.to_string().contains("resnet50.bin"));
        assert!(err.to_string().contains("record mismatch"));
    }

    #[test]
    fn error_from_layer_error() {
        let err: ModelError = LayerError::invalid_config("codewords must be > 0").into();
        assert!(matches!(err, ModelError::Layer(_)));
        assert!(err.to_string().contains("codewords must be > 0"));
    }

    #[test]
    fn error_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
        let err: ModelError = io_err.into();
        assert!(matches!(err, ModelError::Io(_)));
    }

    #[test]
    fn error_from_json_error() {
        let json_err = serde_json::from_str::<u32>("not json").err();
        let err = json_err.map(ModelError::from);
        assert!(matches!(err, Some(ModelError::Serialization(_))));
    }
}
