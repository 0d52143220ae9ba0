//! Core configuration structures for D2-Net.
//!
//! The configuration is fixed at model construction: it selects the backbone
//! family, how far it is truncated, the fine-tuning policy, and an optional
//! output channel override. Validation happens up front and any violation is
//! a fatal configuration error, never a silently adjusted setting.

use std::path::PathBuf;

use burn::prelude::*;

use super::enums::Backbone;
use crate::error::{D2NetError, D2NetResult};

/// Configuration of the dense feature extraction backbone.
#[derive(Config, Debug)]
pub struct ExtractorConfig {
    /// The chosen backbone architecture.
    #[config(default = "Backbone::Vgg16")]
    pub backbone: Backbone,
    /// How many trailing structural blocks of the backbone to discard.
    /// Supported range: `1..=3`; smaller values keep a deeper, lower
    /// resolution feature map.
    #[config(default = "2")]
    pub truncated_blocks: usize,
    /// Allow a trailing slice of backbone parameters to train.
    #[config(default = "false")]
    pub finetune: bool,
    /// Number of trailing parameters (in declaration order) to unfreeze
    /// when fine-tuning is enabled.
    #[config(default = "2")]
    pub finetune_params: usize,
    /// Override the output channel count of the last kept residual stage.
    /// Residual backbones only.
    #[config(default = "None")]
    pub output_channels: Option<usize>,
}

impl ExtractorConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `D2NetError::InvalidConfiguration` when the truncation depth
    /// is outside the supported set or a channel override is requested for
    /// a non-residual backbone.
    pub fn validate(&self) -> D2NetResult<()> {
        if !(1..=3).contains(&self.truncated_blocks) {
            return Err(D2NetError::InvalidConfiguration {
                reason: format!(
                    "Truncation depth must be 1, 2 or 3, got {}",
                    self.truncated_blocks
                ),
            });
        }

        if self.output_channels.is_some() && !self.backbone.is_residual() {
            return Err(D2NetError::InvalidConfiguration {
                reason: format!(
                    "Output channel override requires a residual backbone, got {:?}",
                    self.backbone
                ),
            });
        }

        if self.output_channels == Some(0) {
            return Err(D2NetError::InvalidConfiguration {
                reason: "Output channel override must be positive".to_owned(),
            });
        }

        Ok(())
    }

    /// Channel count of the produced dense feature map.
    ///
    /// # Errors
    ///
    /// Returns `D2NetError::InvalidConfiguration` for an unsupported
    /// truncation depth.
    pub fn feature_channels(&self) -> D2NetResult<usize> {
        self.validate()?;

        if let Some(channels) = self.output_channels {
            return Ok(channels);
        }

        let channels = match (&self.backbone, self.truncated_blocks) {
            (Backbone::Vgg16, 3) => 256,
            (Backbone::Vgg16, _) => 512,
            (_, 1) => 2048,
            (_, 2) => 1024,
            (_, _) => 512,
        };
        Ok(channels)
    }

    /// Cumulative downsampling stride of the truncated backbone. Callers
    /// must feed spatial dimensions divisible by this value.
    ///
    /// # Errors
    ///
    /// Returns `D2NetError::InvalidConfiguration` for an unsupported
    /// truncation depth.
    pub fn stride(&self) -> D2NetResult<usize> {
        self.validate()?;

        let stride = match (&self.backbone, self.truncated_blocks) {
            (Backbone::Vgg16, depth) => 1 << (5 - depth),
            (_, depth) => 1 << (6 - depth),
        };
        Ok(stride)
    }
}

/// Configuration of the soft detection module.
#[derive(Config, Debug)]
pub struct SoftDetectionConfig {
    /// Side length of the local suppression window. Must be odd.
    #[config(default = "3")]
    pub soft_local_max_size: usize,
}

impl SoftDetectionConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `D2NetError::InvalidConfiguration` for an even window size.
    pub fn validate(&self) -> D2NetResult<()> {
        if self.soft_local_max_size % 2 == 0 {
            return Err(D2NetError::InvalidConfiguration {
                reason: format!(
                    "Local suppression window must be odd, got {}",
                    self.soft_local_max_size
                ),
            });
        }
        Ok(())
    }
}

/// Main configuration for the joint D2-Net model.
#[derive(Config, Debug)]
pub struct D2NetConfig {
    /// Dense feature extraction configuration. Fine-tuning is always
    /// enabled for the joint model; the flag here is overridden at init.
    #[config(default = "ExtractorConfig::new()")]
    pub extractor: ExtractorConfig,
    /// Soft detection configuration.
    #[config(default = "SoftDetectionConfig::new()")]
    pub detection: SoftDetectionConfig,
    /// Optional checkpoint to restore the full parameter set from,
    /// immediately after construction.
    #[config(default = "None")]
    pub checkpoint: Option<PathBuf>,
}

impl D2NetConfig {
    /// Validate the composed configuration.
    ///
    /// # Errors
    ///
    /// Propagates the first violation found in any sub-configuration.
    pub fn validate(&self) -> D2NetResult<()> {
        self.extractor.validate()?;
        self.detection.validate()
    }
}
