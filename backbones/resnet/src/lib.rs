//! Truncated ResNet backbones for dense feature extraction.
//!
//! This crate provides ResNet-50/101 models cut off after an intermediate
//! residual stage, exposing a single dense feature map instead of a
//! classification head. The implementation is based on the official
//! torchvision ResNet implementation.
//!
//! Truncation counts trailing stages to drop: depth 1 keeps `layer4`
//! (stride 32), depth 2 keeps up to `layer3` (stride 16), depth 3 keeps up
//! to `layer2` (stride 8). The last kept stage optionally has its output
//! channel count overridden, which swaps the first block's downsample pair
//! and the last block's projection pair for freshly initialized layers while
//! leaving every other weight in place.

use burn::nn::{
    conv::{Conv2d, Conv2dConfig},
    pool::{MaxPool2d, MaxPool2dConfig},
    BatchNorm, BatchNormConfig, Initializer, PaddingConfig2d, Relu,
};
use burn::prelude::*;
use core::f64::consts::SQRT_2;

mod blocks;
pub use blocks::*;

// ResNet residual layer block configs
const RESNET50_BLOCKS: [usize; 4] = [3, 4, 6, 3];
const RESNET101_BLOCKS: [usize; 4] = [3, 4, 23, 3];

/// A ResNet backbone truncated to an intermediate residual stage.
///
/// Stages that fall past the truncation point are absent rather than built
/// and discarded; `layer3`/`layer4` are named optional fields instead of a
/// positionally indexed sequence.
#[derive(Module, Debug)]
pub struct TruncatedResNet<B: Backend> {
    pub conv1_block: Conv1Block<B>,
    pub layer1: LayerBlock<B>,
    pub layer2: LayerBlock<B>,
    pub layer3: Option<LayerBlock<B>>,
    pub layer4: Option<LayerBlock<B>>,
}

impl<B: Backend> TruncatedResNet<B> {
    /// Forward pass producing the dense feature map of the last kept stage.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = self.conv1_block.forward(input);
        let out = self.layer1.forward(out);
        let out = self.layer2.forward(out);
        let out = match &self.layer3 {
            Some(layer3) => layer3.forward(out),
            None => return out,
        };
        match &self.layer4 {
            Some(layer4) => layer4.forward(out),
            None => out,
        }
    }

    /// Create a truncated ResNet-50 backbone.
    pub fn resnet50(
        truncated_blocks: usize,
        output_channels: Option<usize>,
        device: &Device<B>,
    ) -> Self {
        Self::new(RESNET50_BLOCKS, truncated_blocks, output_channels, device)
    }

    /// Create a truncated ResNet-101 backbone.
    pub fn resnet101(
        truncated_blocks: usize,
        output_channels: Option<usize>,
        device: &Device<B>,
    ) -> Self {
        Self::new(RESNET101_BLOCKS, truncated_blocks, output_channels, device)
    }

    fn new(
        blocks: [usize; 4],
        truncated_blocks: usize,
        output_channels: Option<usize>,
        device: &Device<B>,
    ) -> Self {
        assert!(
            (1..=3).contains(&truncated_blocks),
            "truncated ResNet only supports dropping 1, 2 or 3 trailing stages"
        );

        // First conv block: 7x7 conv, 64, stride=2, padding=3
        let conv1_block = Conv1Block::new(3, 64, device);

        // Residual stages, built only up to the truncation point
        let layer1 = LayerBlock::new(blocks[0], 64, 256, 1, device);
        let mut layer2 = LayerBlock::new(blocks[1], 256, 512, 2, device);
        let mut layer3 =
            (truncated_blocks <= 2).then(|| LayerBlock::new(blocks[2], 512, 1024, 2, device));
        let mut layer4 =
            (truncated_blocks <= 1).then(|| LayerBlock::new(blocks[3], 1024, 2048, 2, device));

        if let Some(channels) = output_channels {
            let geometry = Self::last_stage_geometry(truncated_blocks);
            match truncated_blocks {
                1 => {
                    if let Some(layer4) = layer4.as_mut() {
                        layer4.override_output_channels(channels, geometry, device);
                    }
                }
                2 => {
                    if let Some(layer3) = layer3.as_mut() {
                        layer3.override_output_channels(channels, geometry, device);
                    }
                }
                _ => layer2.override_output_channels(channels, geometry, device),
            }
        }

        Self {
            conv1_block,
            layer1,
            layer2,
            layer3,
            layer4,
        }
    }

    /// Geometry of the last kept stage for a given truncation depth.
    const fn last_stage_geometry(truncated_blocks: usize) -> StageGeometry {
        match truncated_blocks {
            1 => StageGeometry {
                in_channels: 1024,
                width: 512,
                stride: 2,
            },
            2 => StageGeometry {
                in_channels: 512,
                width: 256,
                stride: 2,
            },
            _ => StageGeometry {
                in_channels: 256,
                width: 128,
                stride: 2,
            },
        }
    }

    /// The last stage kept by the truncation.
    pub fn last_stage(&self) -> &LayerBlock<B> {
        if let Some(layer4) = &self.layer4 {
            layer4
        } else if let Some(layer3) = &self.layer3 {
            layer3
        } else {
            &self.layer2
        }
    }

    /// The downsample branch targeted by a channel override: the first
    /// block of the last kept stage.
    pub fn override_downsample(&self) -> Option<&Downsample<B>> {
        self.last_stage().first().downsample()
    }
}

/// First conv block: conv1 + bn1 + relu + maxpool
#[derive(Module, Debug)]
pub struct Conv1Block<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    relu: Relu,
    maxpool: MaxPool2d,
}

impl<B: Backend> Conv1Block<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = self.conv1.forward(input);
        let out = self.bn1.forward(out);
        let out = self.relu.forward(out);
        self.maxpool.forward(out)
    }

    /// Create a new Conv1Block.
    pub fn new(in_channels: usize, out_channels: usize, device: &Device<B>) -> Self {
        let initializer = Initializer::KaimingNormal {
            gain: SQRT_2,
            fan_out_only: true,
        };

        // 7x7 conv, stride=2, padding=3
        let conv1 = Conv2dConfig::new([in_channels, out_channels], [7, 7])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(3, 3))
            .with_bias(false)
            .with_initializer(initializer)
            .init(device);

        let bn1 = BatchNormConfig::new(out_channels).init(device);

        // 3x3 maxpool, stride=2, padding=1
        let maxpool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        Self {
            conv1,
            bn1,
            relu: Relu::new(),
            maxpool,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn resnet50_truncation_output_shapes() {
        let device = Default::default();

        let input = Tensor::<TestBackend, 4>::random(
            [1, 3, 64, 64],
            burn::tensor::Distribution::Normal(0.0, 1.0),
            &device,
        );

        let stride_32 = TruncatedResNet::resnet50(1, None, &device);
        assert_eq!(stride_32.forward(input.clone()).dims(), [1, 2048, 2, 2]);

        let stride_16 = TruncatedResNet::resnet50(2, None, &device);
        assert_eq!(stride_16.forward(input.clone()).dims(), [1, 1024, 4, 4]);

        let stride_8 = TruncatedResNet::resnet50(3, None, &device);
        assert_eq!(stride_8.forward(input).dims(), [1, 512, 8, 8]);
    }

    #[test]
    fn resnet101_keeps_23_block_stage_when_not_truncated_past_it() {
        let device = Default::default();
        let model = TruncatedResNet::<TestBackend>::resnet101(2, None, &device);

        let input = Tensor::<TestBackend, 4>::random(
            [1, 3, 32, 32],
            burn::tensor::Distribution::Normal(0.0, 1.0),
            &device,
        );
        assert_eq!(model.forward(input).dims(), [1, 1024, 2, 2]);
    }

    #[test]
    fn channel_override_replaces_projection_and_downsample() {
        let device = Default::default();
        let model = TruncatedResNet::<TestBackend>::resnet50(2, Some(128), &device);

        let stage = model.last_stage();
        assert_eq!(stage.last().output_channels(), 128);
        // The first block keeps a downsample branch after the replacement.
        assert!(stage.first().downsample().is_some());
        // Blocks between the first and last keep their natural width.
        assert_eq!(stage.first().output_channels(), 1024);
    }

    #[test]
    fn no_override_keeps_natural_channels() {
        let device = Default::default();
        let model = TruncatedResNet::<TestBackend>::resnet50(2, None, &device);
        assert_eq!(model.last_stage().last().output_channels(), 1024);
    }
}
