//! Dense feature extraction module.
//!
//! Wraps a truncated, partially fine-tunable backbone and carries the
//! frozen/trainable parameter partition computed once at construction. The
//! partition is data for the training-loop collaborator: the module itself
//! never consults it during forward computation.

use burn::module::{Ignored, ModuleVisitor, ParamId};
use burn::prelude::*;

use super::backbones::{build_backbone, BackboneEnum};
use crate::config::ExtractorConfig;
use crate::error::D2NetResult;

/// Disjoint split of the backbone's parameters into a frozen and a
/// trainable subset, fixed at construction.
///
/// Ordering follows module declaration order. The trainable subset is the
/// trailing `finetune_params` slice when fine-tuning is enabled, plus the
/// replaced downsample branch when a channel override was applied, which is
/// trainable regardless of the fine-tune count because its weights are
/// freshly initialized.
#[derive(Debug, Clone, Default)]
pub struct FinetunePartition {
    /// Parameters that must not receive gradient updates.
    pub frozen: Vec<ParamId>,
    /// Parameters the training loop may update.
    pub trainable: Vec<ParamId>,
}

/// Collects parameter ids in module declaration order.
#[derive(Default)]
struct ParamIdCollector {
    ids: Vec<ParamId>,
}

impl<B: Backend> ModuleVisitor<B> for ParamIdCollector {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        self.ids.push(id);
    }
}

fn collect_param_ids<B: Backend, M: Module<B>>(module: &M) -> Vec<ParamId> {
    let mut collector = ParamIdCollector::default();
    module.visit(&mut collector);
    collector.ids
}

fn compute_partition<B: Backend>(
    backbone: &BackboneEnum<B>,
    config: &ExtractorConfig,
) -> FinetunePartition {
    let ids = collect_param_ids(backbone);

    let unfrozen = if config.finetune {
        config.finetune_params.min(ids.len())
    } else {
        0
    };
    let boundary = ids.len() - unfrozen;
    let mut frozen = ids[..boundary].to_vec();
    let mut trainable = ids[boundary..].to_vec();

    // A replaced downsample branch learns from scratch and is trainable no
    // matter where the trailing-count boundary fell.
    if config.output_channels.is_some() {
        if let BackboneEnum::ResNet(backbone) = backbone {
            if let Some(downsample) = backbone.override_downsample() {
                for id in collect_param_ids(downsample) {
                    if let Some(position) = frozen.iter().position(|frozen_id| *frozen_id == id) {
                        frozen.remove(position);
                        trainable.push(id);
                    }
                }
            }
        }
    }

    FinetunePartition { frozen, trainable }
}

/// Truncated backbone producing one dense feature map per image.
#[derive(Module, Debug)]
pub struct DenseFeatureExtraction<B: Backend> {
    backbone: BackboneEnum<B>,
    feature_channels: usize,
    stride: usize,
    partition: Ignored<FinetunePartition>,
}

impl ExtractorConfig {
    /// Initializes a `DenseFeatureExtraction` module with the given
    /// configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid; no partial module
    /// is built.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> D2NetResult<DenseFeatureExtraction<B>> {
        let backbone = build_backbone(self, device)?;
        let partition = compute_partition(&backbone, self);

        Ok(DenseFeatureExtraction {
            backbone,
            feature_channels: self.feature_channels()?,
            stride: self.stride()?,
            partition: Ignored(partition),
        })
    }
}

impl<B: Backend> DenseFeatureExtraction<B> {
    /// Forward pass.
    ///
    /// Input is a `(batch, 3, H, W)` image batch, normalized per the
    /// backbone's expected input statistics, with `H` and `W` divisible by
    /// [`Self::stride`]; that divisibility is the caller's responsibility.
    /// Output is a `(batch, C, H/stride, W/stride)` dense feature map.
    pub fn forward(&self, batch: Tensor<B, 4>) -> Tensor<B, 4> {
        self.backbone.forward(batch)
    }

    /// The frozen/trainable parameter partition fixed at construction.
    pub fn partition(&self) -> &FinetunePartition {
        &self.partition.0
    }

    /// Channel count of the produced feature map.
    pub const fn feature_channels(&self) -> usize {
        self.feature_channels
    }

    /// Cumulative downsampling stride of the backbone.
    pub const fn stride(&self) -> usize {
        self.stride
    }

    /// The wrapped backbone.
    pub(crate) fn backbone(&self) -> &BackboneEnum<B> {
        &self.backbone
    }
}
