//! Pretrained weight loading for backbones.

use std::path::Path;

use burn::module::Module;
use burn::prelude::Backend;
use burn::record::{BinFileRecorder, FullPrecisionSettings, PrettyJsonFileRecorder};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ModelError, Result};

/// Weight file formats understood by [`load_weights`].
///
/// # Example
///
/// ```
/// use texture_networks::WeightsFormat;
///
/// let format = WeightsFormat::from_extension("bin");
/// assert_eq!(format, Some(WeightsFormat::Binary));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum WeightsFormat {
    /// Burn's `BinFileRecorder` with full precision.
    #[default]
    Binary,

    /// Burn's `PrettyJsonFileRecorder`, for inspection.
    Json,
}

impl WeightsFormat {
    /// Determines format from file extension.
    ///
    /// - `.bin`, `.burn` -> Binary
    /// - `.json` -> Json
    /// - Other -> None
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "bin" | "burn" => Some(Self::Binary),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    /// Determines format from file path.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    /// Returns the format name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Binary => "binary",
            Self::Json => "json",
        }
    }
}

impl std::fmt::Display for WeightsFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Checks that a weight file exists and has a known format.
///
/// # Errors
///
/// Returns `ModelError::CheckpointNotFound` if the file doesn't exist and
/// `ModelError::UnsupportedFormat` if the extension is not recognized.
pub fn check_weights_path(path: &Path) -> Result<WeightsFormat> {
    if !path.exists() {
        return Err(ModelError::checkpoint_not_found(path.display().to_string()));
    }
    WeightsFormat::from_path(path)
        .ok_or_else(|| ModelError::unsupported_format(path.display().to_string()))
}

/// Loads weights from a file into an already-built module.
///
/// The module's architecture must match the recorded one.
///
/// # Errors
///
/// Returns `ModelError::CheckpointNotFound` if the file doesn't exist,
/// `ModelError::UnsupportedFormat` if the format can't be determined and
/// `ModelError::LoadCheckpoint` if the record doesn't fit the module.
///
/// # Example
///
/// ```ignore
/// use texture_networks::{load_weights, VggConfig};
///
/// let vgg = VggConfig::vgg16().init::<MyBackend>(&device)?;
/// let vgg = load_weights(vgg, Path::new("vgg16.bin"), &device)?;
/// ```
pub fn load_weights<B, M>(module: M, path: &Path, device: &B::Device) -> Result<M>
where
    B: Backend,
    M: Module<B>,
{
    let format = check_weights_path(path)?;
    let shown = path.display().to_string();

    let loaded = match format {
        WeightsFormat::Binary => {
            let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
            module
                .load_file(path, &recorder, device)
                .map_err(|e| ModelError::load_checkpoint(&shown, e.to_string()))?
        }
        WeightsFormat::Json => {
            let recorder = PrettyJsonFileRecorder::<FullPrecisionSettings>::new();
            module
                .load_file(path, &recorder, device)
                .map_err(|e| ModelError::load_checkpoint(&shown, e.to_string()))?
        }
    };

    info!(path = %shown, format = %format, "Loaded pretrained weights");
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_from_extension() {
        assert_eq!(
            WeightsFormat::from_extension("bin"),
            Some(WeightsFormat::Binary)
        );
        assert_eq!(
            WeightsFormat::from_extension("burn"),
            Some(WeightsFormat::Binary)
        );
        assert_eq!(
            WeightsFormat::from_extension("JSON"),
            Some(WeightsFormat::Json)
        );
        assert_eq!(WeightsFormat::from_extension("h5"), None);
    }

    #[test]
    fn format_from_path() {
        assert_eq!(
            WeightsFormat::from_path(Path::new("/weights/resnet50.burn")),
            Some(WeightsFormat::Binary)
        );
        assert_eq!(WeightsFormat::from_path(Path::new("resnet50")), None);
    }

    #[test]
    fn format_display() {
        assert_eq!(format!("{}", WeightsFormat::Binary), "binary");
        assert_eq!(format!("{}", WeightsFormat::Json), "json");
    }

    #[test]
    fn missing_file_is_reported_first() {
        let err = check_weights_path(Path::new("/nonexistent/weights.h5"));
        assert!(matches!(err, Err(ModelError::CheckpointNotFound(_))));
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let file = tempfile::Builder::new().suffix(".h5").tempfile();
        assert!(file.is_ok());
        if let Ok(file) = file {
            let err = check_weights_path(file.path());
            assert!(matches!(err, Err(ModelError::UnsupportedFormat(_))));
        }
    }

    type TestBackend = burn_ndarray::NdArray<f32>;

    fn linear(device: &<TestBackend as Backend>::Device) -> burn::nn::Linear<TestBackend> {
        burn::nn::LinearConfig::new(3, 2).init(device)
    }

    #[test]
    fn json_weights_are_loaded() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("linear.json");

        let saved = linear(&device);
        saved
            .clone()
            .save_file(path.clone(), &PrettyJsonFileRecorder::<FullPrecisionSettings>::new())
            .unwrap();

        let loaded = load_weights(linear(&device), &path, &device).unwrap();
        loaded
            .weight
            .val()
            .into_data()
            .assert_approx_eq(&saved.weight.val().into_data(), 5);
    }

    #[test]
    fn corrupt_binary_weights_are_reported() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("linear.bin");
        std::fs::write(&path, b"not a record").unwrap();

        let err = load_weights(linear(&device), &path, &device);
        assert!(
            matches!(err, Err(ModelError::LoadCheckpoint { path: shown, .. }) if shown.ends_with("linear.bin"))
        );
    }
}
