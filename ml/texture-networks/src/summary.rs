//! Layer-level description of an assembled network.

use serde::{Deserialize, Serialize};

/// One stage of an assembled network, in forward order.
///
/// Two networks built from the same arguments report equal layer lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayerInfo {
    /// Convolutional feature extractor.
    Backbone {
        /// Architecture family.
        family: String,
        /// Channels of the produced feature map.
        out_channels: usize,
    },

    /// 1x1 convolution + `ReLU` + batch norm.
    Reduction {
        /// Output channels.
        channels: usize,
    },

    /// Residual encoding layer.
    Encoding {
        /// Number of codewords.
        codewords: usize,
        /// Channels entering the layer.
        channels: usize,
    },

    /// Hidden fully connected layer.
    Dense {
        /// Output width.
        width: usize,
    },

    /// Softmax classification head.
    Classifier {
        /// Number of classes.
        classes: usize,
    },
}

impl LayerInfo {
    /// Width of the tensor this layer produces along the channel/feature axis.
    #[must_use]
    pub const fn output_width(&self) -> usize {
        match self {
            Self::Backbone { out_channels, .. } => *out_channels,
            Self::Reduction { channels } => *channels,
            Self::Encoding {
                codewords,
                channels,
            } => *codewords * *channels,
            Self::Dense { width } => *width,
            Self::Classifier { classes } => *classes,
        }
    }
}

impl std::fmt::Display for LayerInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Backbone {
                family,
                out_channels,
            } => write!(f, "backbone({family}) -> {out_channels}"),
            Self::Reduction { channels } => write!(f, "conv1x1 -> {channels}"),
            Self::Encoding {
                codewords,
                channels,
            } => write!(f, "encoding(K={codewords}, D={channels}) -> {}", codewords * channels),
            Self::Dense { width } => write!(f, "dense -> {width}"),
            Self::Classifier { classes } => write!(f, "softmax -> {classes}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_width() {
        let encoding = LayerInfo::Encoding {
            codewords: 32,
            channels: 128,
        };
        assert_eq!(encoding.output_width(), 4096);
        assert_eq!(LayerInfo::Dense { width: 64 }.output_width(), 64);
    }

    #[test]
    fn display() {
        let layer = LayerInfo::Backbone {
            family: "resnet".to_string(),
            out_channels: 2048,
        };
        assert_eq!(layer.to_string(), "backbone(resnet) -> 2048");
        assert_eq!(
            LayerInfo::Classifier { classes: 10 }.to_string(),
            "softmax -> 10"
        );
    }

    #[test]
    fn serialization_is_tagged() {
        let json = serde_json::to_string(&LayerInfo::Reduction { channels: 128 }).unwrap();
        assert_eq!(json, r#"{"kind":"reduction","channels":128}"#);

        let parsed: LayerInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, LayerInfo::Reduction { channels: 128 });
    }
}
