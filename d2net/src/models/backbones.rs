//! # Backbone Builder
//!
//! This module provides a factory function `build_backbone` to construct
//! a truncated backbone model based on the configuration.

use burn::prelude::*;
use resnet::TruncatedResNet;
use vgg::TruncatedVgg;

use crate::config::{Backbone, ExtractorConfig};
use crate::error::D2NetResult;

/// An enum to encapsulate the supported backbone architectures.
///
/// This allows a single type to represent any of the supported backbones,
/// with compile-time exhaustiveness over the closed set.
#[derive(Module, Debug)]
pub enum BackboneEnum<B: Backend> {
    /// The VGG model family.
    Vgg(TruncatedVgg<B>),
    /// The ResNet model family.
    ResNet(TruncatedResNet<B>),
}

impl<B: Backend> BackboneEnum<B> {
    /// Forward pass through whichever backbone is wrapped.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Self::Vgg(backbone) => backbone.forward(input),
            Self::ResNet(backbone) => backbone.forward(input),
        }
    }
}

/// Constructs a truncated backbone based on the provided configuration.
///
/// # Errors
///
/// Returns `D2NetError::InvalidConfiguration` when the configuration fails
/// validation; no partial model is built in that case.
pub fn build_backbone<B: Backend>(
    config: &ExtractorConfig,
    device: &Device<B>,
) -> D2NetResult<BackboneEnum<B>> {
    config.validate()?;

    let backbone = match config.backbone {
        Backbone::Vgg16 => BackboneEnum::Vgg(TruncatedVgg::vgg16(config.truncated_blocks, device)),
        Backbone::Resnet50 => BackboneEnum::ResNet(TruncatedResNet::resnet50(
            config.truncated_blocks,
            config.output_channels,
            device,
        )),
        Backbone::Resnet101 => BackboneEnum::ResNet(TruncatedResNet::resnet101(
            config.truncated_blocks,
            config.output_channels,
            device,
        )),
    };
    Ok(backbone)
}
