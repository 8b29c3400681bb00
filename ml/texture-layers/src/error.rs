//! Error types for texture-layers crate.

use thiserror::Error;

/// Errors that can occur while configuring texture layers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LayerError {
    /// Invalid layer configuration.
    #[error("invalid layer configuration: {0}")]
    InvalidConfig(String),
}

impl LayerError {
    /// Creates an invalid config error.
    #[must_use]
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig(reason.into())
    }
}

/// Result type for texture-layers operations.
pub type Result<T> = std::result::Result<T, LayerError>;

/// Checks that a dropout probability lies in `[0, 1)`.
pub(crate) fn check_dropout(dropout: Option<f64>) -> Result<()> {
    match dropout {
        Some(p) if !(0.0..1.0).contains(&p) => Err(LayerError::invalid_config(format!(
            "dropout must be in [0, 1), got {p}"
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_invalid_config() {
        let err = LayerError::invalid_config("codewords must be > 0");
        assert!(err.to_string().contains("codewords must be > 0"));
    }

    #[test]
    fn dropout_bounds() {
        assert!(check_dropout(None).is_ok());
        assert!(check_dropout(Some(0.0)).is_ok());
        assert!(check_dropout(Some(0.5)).is_ok());
        assert!(check_dropout(Some(1.0)).is_err());
        assert!(check_dropout(Some(-0.1)).is_err());
        assert!(check_dropout(Some(f64::NAN)).is_err());
    }
}
