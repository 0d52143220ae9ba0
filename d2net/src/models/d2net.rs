//! # D2-Net Model Implementation
//!
//! This module defines the main `D2Net` model: one dense feature extraction
//! backbone feeding one soft detection module, applied jointly to an image
//! pair. Both views share every weight, so they are concatenated and run
//! through a single batched forward pass.

use burn::{
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
};

use super::{detection::SoftDetection, extraction::DenseFeatureExtraction};
use crate::{
    config::D2NetConfig,
    error::{D2NetError, D2NetResult},
};

/// Two equally shaped image batches showing the same scene from different
/// views. Normalization to the backbone's input statistics is the caller's
/// responsibility.
#[derive(Debug, Clone)]
pub struct PairBatch<B: Backend> {
    /// First view, `(batch, 3, H, W)`.
    pub image1: Tensor<B, 4>,
    /// Second view, same shape as `image1`.
    pub image2: Tensor<B, 4>,
}

/// Dense features and detection scores for both views of a pair.
#[derive(Debug, Clone)]
pub struct D2NetOutput<B: Backend> {
    /// View-1 dense feature map, `(batch, C, H', W')`.
    pub dense_features1: Tensor<B, 4>,
    /// View-1 score map, `(batch, H', W')`, summing to 1 per sample.
    pub scores1: Tensor<B, 3>,
    /// View-2 dense feature map.
    pub dense_features2: Tensor<B, 4>,
    /// View-2 score map.
    pub scores2: Tensor<B, 3>,
}

impl D2NetConfig {
    /// Initializes a `D2Net` model with the given configuration.
    ///
    /// Fine-tuning is always enabled on the extraction module; the
    /// configured trailing parameter count decides how much of it trains.
    /// When a checkpoint path is set, the full parameter set is restored
    /// from it before the model is returned; the checkpoint is deserialized
    /// to `device`, so CPU-or-accelerator placement follows the device
    /// choice.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, or if the
    /// checkpoint cannot be read or does not match the constructed model's
    /// parameter topology exactly. Nothing is partially restored on
    /// failure.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> D2NetResult<D2Net<B>> {
        let model = D2Net {
            dense_feature_extraction: self
                .extractor
                .clone()
                .with_finetune(true)
                .init(device)?,
            detection: self.detection.init()?,
        };

        match &self.checkpoint {
            Some(path) => {
                let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
                model
                    .load_file(path.clone(), &recorder, device)
                    .map_err(|e| D2NetError::WeightLoadingFailed {
                        reason: format!("checkpoint {}: {e}", path.display()),
                    })
            }
            None => Ok(model),
        }
    }
}

/// The joint detect-and-describe model.
#[derive(Module, Debug)]
pub struct D2Net<B: Backend> {
    /// The dense feature extraction backbone.
    pub(crate) dense_feature_extraction: DenseFeatureExtraction<B>,
    /// The soft detection module.
    pub(crate) detection: SoftDetection,
}

impl<B: Backend> D2Net<B> {
    /// Forward pass over an image pair.
    ///
    /// The two views are concatenated along the batch dimension (view 1
    /// first), pushed through the backbone and the detector once, then
    /// split back into per-view halves.
    pub fn forward(&self, batch: PairBatch<B>) -> D2NetOutput<B> {
        let [b, _, _, _] = batch.image1.dims();

        let dense_features = self
            .dense_feature_extraction
            .forward(Tensor::cat(vec![batch.image1, batch.image2], 0));

        let scores = self.detection.forward(dense_features.clone());

        D2NetOutput {
            dense_features1: dense_features.clone().narrow(0, 0, b),
            scores1: scores.clone().narrow(0, 0, b),
            dense_features2: dense_features.narrow(0, b, b),
            scores2: scores.narrow(0, b, b),
        }
    }

    /// The dense feature extraction module, exposing the frozen/trainable
    /// parameter partition for the training loop.
    pub fn dense_feature_extraction(&self) -> &DenseFeatureExtraction<B> {
        &self.dense_feature_extraction
    }
}
