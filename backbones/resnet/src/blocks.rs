//! ResNet block implementations.
//!
//! Building blocks for the truncated backbone: `Bottleneck`, `Downsample`,
//! and `LayerBlock`. Only the bottleneck variant is provided since every
//! supported architecture (ResNet-50/101) uses it.

use core::f64::consts::SQRT_2;

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, Initializer, PaddingConfig2d, Relu,
    },
    prelude::*,
};

/// ResNet bottleneck residual block implementation.
/// Derived from torchvision.models.resnet.Bottleneck
///
/// **NOTE:** Following common practice, this bottleneck block places the stride for downsampling
/// to the second 3x3 convolution while the original paper places it to the first 1x1 convolution.
/// This variant improves the accuracy and is known as ResNet V1.5.
#[derive(Module, Debug)]
pub struct Bottleneck<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    relu: Relu,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B, 2>,
    conv3: Conv2d<B>,
    bn3: BatchNorm<B, 2>,
    downsample: Option<Downsample<B>>,
}

impl<B: Backend> Bottleneck<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = input.clone();

        // Conv block
        let out = self.conv1.forward(input);
        let out = self.bn1.forward(out);
        let out = self.relu.forward(out);
        let out = self.conv2.forward(out);
        let out = self.bn2.forward(out);
        let out = self.relu.forward(out);
        let out = self.conv3.forward(out);
        let out = self.bn3.forward(out);

        // Skip connection
        let out = match &self.downsample {
            Some(downsample) => out + downsample.forward(identity),
            None => out + identity,
        };

        // Activation
        self.relu.forward(out)
    }

    /// Create a new Bottleneck.
    pub fn new(in_channels: usize, out_channels: usize, stride: usize, device: &Device<B>) -> Self {
        // Intermediate output channels w/ expansion = 4
        let int_out_channels = out_channels / 4;

        let initializer = Initializer::KaimingNormal {
            gain: SQRT_2,
            fan_out_only: true,
        };

        // conv1x1
        let conv1 = Conv2dConfig::new([in_channels, int_out_channels], [1, 1])
            .with_stride([1, 1])
            .with_padding(PaddingConfig2d::Explicit(0, 0))
            .with_bias(false)
            .with_initializer(initializer.clone())
            .init(device);
        let bn1 = BatchNormConfig::new(int_out_channels).init(device);

        // conv3x3
        let conv2 = Conv2dConfig::new([int_out_channels, int_out_channels], [3, 3])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .with_initializer(initializer.clone())
            .init(device);
        let bn2 = BatchNormConfig::new(int_out_channels).init(device);

        // conv1x1
        let conv3 = Conv2dConfig::new([int_out_channels, out_channels], [1, 1])
            .with_stride([1, 1])
            .with_padding(PaddingConfig2d::Explicit(0, 0))
            .with_bias(false)
            .with_initializer(initializer)
            .init(device);
        let bn3 = BatchNormConfig::new(out_channels).init(device);

        let downsample = (stride != 1 || in_channels != out_channels)
            .then(|| Downsample::new(in_channels, out_channels, stride, device));

        Self {
            conv1,
            bn1,
            relu: Relu::new(),
            conv2,
            bn2,
            conv3,
            bn3,
            downsample,
        }
    }

    /// Replace the final conv1x1 + batch norm pair with freshly initialized
    /// layers producing `out_channels`. Every other sub-layer keeps its
    /// current weights.
    pub fn replace_projection(&mut self, width: usize, out_channels: usize, device: &Device<B>) {
        let initializer = Initializer::KaimingNormal {
            gain: SQRT_2,
            fan_out_only: true,
        };

        self.conv3 = Conv2dConfig::new([width, out_channels], [1, 1])
            .with_stride([1, 1])
            .with_padding(PaddingConfig2d::Explicit(0, 0))
            .with_bias(false)
            .with_initializer(initializer)
            .init(device);
        self.bn3 = BatchNormConfig::new(out_channels).init(device);
    }

    /// Replace the downsample branch with a freshly initialized one.
    pub fn replace_downsample(&mut self, downsample: Downsample<B>) {
        self.downsample = Some(downsample);
    }

    /// Output channel count of the final projection.
    pub fn output_channels(&self) -> usize {
        self.conv3.weight.val().dims()[0]
    }

    /// The downsample branch, when this block has one.
    pub fn downsample(&self) -> Option<&Downsample<B>> {
        self.downsample.as_ref()
    }
}

/// Downsample layer applies a 1x1 conv to reduce the resolution (H, W) and adjust the number of channels.
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> Downsample<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = self.conv.forward(input);
        self.bn.forward(out)
    }

    /// Create a new Downsample.
    pub fn new(in_channels: usize, out_channels: usize, stride: usize, device: &Device<B>) -> Self {
        let initializer = Initializer::KaimingNormal {
            gain: SQRT_2,
            fan_out_only: true,
        };

        // conv1x1
        let conv = Conv2dConfig::new([in_channels, out_channels], [1, 1])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(0, 0))
            .with_bias(false)
            .with_initializer(initializer)
            .init(device);
        let bn = BatchNormConfig::new(out_channels).init(device);

        Self { conv, bn }
    }
}

/// Explicit geometry of a residual stage, used when a stage's output channel
/// count is overridden: the replacement downsample and projection layers need
/// the stage's input channels, bottleneck width, and entry stride.
#[derive(Debug, Clone, Copy)]
pub struct StageGeometry {
    /// Channels entering the stage (output of the previous stage).
    pub in_channels: usize,
    /// Bottleneck width (channels between the 1x1 projections).
    pub width: usize,
    /// Stride of the stage's first block.
    pub stride: usize,
}

/// Collection of sequential bottleneck blocks.
#[derive(Module, Debug)]
pub struct LayerBlock<B: Backend> {
    blocks: Vec<Bottleneck<B>>,
}

impl<B: Backend> LayerBlock<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut out = input;
        for block in &self.blocks {
            out = block.forward(out);
        }
        out
    }

    /// Create a new LayerBlock.
    pub fn new(
        num_blocks: usize,
        in_channels: usize,
        out_channels: usize,
        stride: usize,
        device: &Device<B>,
    ) -> Self {
        let blocks = (0..num_blocks)
            .map(|b| {
                if b == 0 {
                    // First block uses the specified stride
                    Bottleneck::new(in_channels, out_channels, stride, device)
                } else {
                    // Other blocks use a stride of 1
                    Bottleneck::new(out_channels, out_channels, 1, device)
                }
            })
            .collect();

        Self { blocks }
    }

    /// Override the stage's output channel count.
    ///
    /// Replaces exactly two sub-layer pairs with freshly initialized ones:
    /// the first block's downsample conv + bn, and the last block's final
    /// projection conv + bn. All other weights in the stage are untouched.
    pub fn override_output_channels(
        &mut self,
        channels: usize,
        geometry: StageGeometry,
        device: &Device<B>,
    ) {
        let last = self.blocks.len() - 1;
        self.blocks[0].replace_downsample(Downsample::new(
            geometry.in_channels,
            channels,
            geometry.stride,
            device,
        ));
        self.blocks[last].replace_projection(geometry.width, channels, device);
    }

    /// First block of the stage.
    pub fn first(&self) -> &Bottleneck<B> {
        &self.blocks[0]
    }

    /// Last block of the stage.
    pub fn last(&self) -> &Bottleneck<B> {
        &self.blocks[self.blocks.len() - 1]
    }
}
