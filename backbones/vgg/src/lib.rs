//! Truncated VGG16 backbone for dense feature extraction.
//!
//! VGG16 (without batch normalization) cut off at one of its last three
//! convolution layers, following the torchvision layer ordering. The cut
//! always lands *on* a convolution: the feature map leaves the network
//! before the ReLU that torchvision places after it, so the output carries
//! raw (possibly negative) activations.
//!
//! Truncation depth selects the cut point:
//! - depth 3 ends on `conv3_3` (stride 4, 256 channels),
//! - depth 2 ends on `conv4_3` (stride 8, 512 channels),
//! - depth 1 ends on `conv5_3` (stride 16, 512 channels).

use core::f64::consts::SQRT_2;

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        Initializer, PaddingConfig2d,
    },
    prelude::*,
    tensor::activation::relu,
};

/// VGG16 truncated to an intermediate convolution layer.
///
/// Stages past the truncation point are absent. Every stage ends on a bare
/// convolution; the stage that consumes its output re-applies the ReLU
/// before pooling, which keeps the original layer sequence intact across
/// the stage boundaries.
#[derive(Module, Debug)]
pub struct TruncatedVgg<B: Backend> {
    pub stage1: VggStage1<B>,
    pub stage2: Option<VggStage2<B>>,
    pub stage3: Option<VggStage3<B>>,
}

impl<B: Backend> TruncatedVgg<B> {
    /// Create a truncated VGG16 backbone.
    pub fn vgg16(truncated_blocks: usize, device: &Device<B>) -> Self {
        assert!(
            (1..=3).contains(&truncated_blocks),
            "truncated VGG16 only supports dropping 1, 2 or 3 trailing blocks"
        );

        let stage1 = VggStage1::new(device);
        let stage2 = (truncated_blocks <= 2).then(|| VggStage2::new(device));
        let stage3 = (truncated_blocks <= 1).then(|| VggStage3::new(device));

        Self {
            stage1,
            stage2,
            stage3,
        }
    }

    /// Forward pass producing the dense feature map of the cut convolution.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = self.stage1.forward(input);
        let out = match &self.stage2 {
            Some(stage2) => stage2.forward(out),
            None => return out,
        };
        match &self.stage3 {
            Some(stage3) => stage3.forward(out),
            None => out,
        }
    }
}

/// 3x3 conv, stride 1, padding 1, with bias (torchvision VGG16 layout).
fn conv3x3<B: Backend>(in_channels: usize, out_channels: usize, device: &Device<B>) -> Conv2d<B> {
    let initializer = Initializer::KaimingNormal {
        gain: SQRT_2,
        fan_out_only: true,
    };

    Conv2dConfig::new([in_channels, out_channels], [3, 3])
        .with_stride([1, 1])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .with_bias(true)
        .with_initializer(initializer)
        .init(device)
}

/// 2x2 max pool, stride 2.
fn pool2x2() -> MaxPool2d {
    MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init()
}

/// `conv1_1` through `conv3_3`: the prefix every truncation keeps.
#[derive(Module, Debug)]
pub struct VggStage1<B: Backend> {
    conv1_1: Conv2d<B>,
    conv1_2: Conv2d<B>,
    conv2_1: Conv2d<B>,
    conv2_2: Conv2d<B>,
    conv3_1: Conv2d<B>,
    conv3_2: Conv2d<B>,
    conv3_3: Conv2d<B>,
    pool: MaxPool2d,
}

impl<B: Backend> VggStage1<B> {
    pub fn new(device: &Device<B>) -> Self {
        Self {
            conv1_1: conv3x3(3, 64, device),
            conv1_2: conv3x3(64, 64, device),
            conv2_1: conv3x3(64, 128, device),
            conv2_2: conv3x3(128, 128, device),
            conv3_1: conv3x3(128, 256, device),
            conv3_2: conv3x3(256, 256, device),
            conv3_3: conv3x3(256, 256, device),
            pool: pool2x2(),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = relu(self.conv1_1.forward(input));
        let out = relu(self.conv1_2.forward(out));
        let out = self.pool.forward(out);
        let out = relu(self.conv2_1.forward(out));
        let out = relu(self.conv2_2.forward(out));
        let out = self.pool.forward(out);
        let out = relu(self.conv3_1.forward(out));
        let out = relu(self.conv3_2.forward(out));
        // Bare: the cut for truncation depth 3 lands on this convolution.
        self.conv3_3.forward(out)
    }
}

/// `pool3` plus `conv4_1` through `conv4_3`.
#[derive(Module, Debug)]
pub struct VggStage2<B: Backend> {
    conv4_1: Conv2d<B>,
    conv4_2: Conv2d<B>,
    conv4_3: Conv2d<B>,
    pool: MaxPool2d,
}

impl<B: Backend> VggStage2<B> {
    pub fn new(device: &Device<B>) -> Self {
        Self {
            conv4_1: conv3x3(256, 512, device),
            conv4_2: conv3x3(512, 512, device),
            conv4_3: conv3x3(512, 512, device),
            pool: pool2x2(),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        // Re-apply the activation the previous stage left off.
        let out = self.pool.forward(relu(input));
        let out = relu(self.conv4_1.forward(out));
        let out = relu(self.conv4_2.forward(out));
        self.conv4_3.forward(out)
    }
}

/// `pool4` plus `conv5_1` through `conv5_3`.
#[derive(Module, Debug)]
pub struct VggStage3<B: Backend> {
    conv5_1: Conv2d<B>,
    conv5_2: Conv2d<B>,
    conv5_3: Conv2d<B>,
    pool: MaxPool2d,
}

impl<B: Backend> VggStage3<B> {
    pub fn new(device: &Device<B>) -> Self {
        Self {
            conv5_1: conv3x3(512, 512, device),
            conv5_2: conv3x3(512, 512, device),
            conv5_3: conv3x3(512, 512, device),
            pool: pool2x2(),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = self.pool.forward(relu(input));
        let out = relu(self.conv5_1.forward(out));
        let out = relu(self.conv5_2.forward(out));
        self.conv5_3.forward(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;

    #[test]
    fn truncation_output_shapes() {
        let device = Default::default();

        let input =
            Tensor::<TestBackend, 4>::random([1, 3, 64, 64], Distribution::Normal(0.0, 1.0), &device);

        let stride_4 = TruncatedVgg::vgg16(3, &device);
        assert_eq!(stride_4.forward(input.clone()).dims(), [1, 256, 16, 16]);

        let stride_8 = TruncatedVgg::vgg16(2, &device);
        assert_eq!(stride_8.forward(input.clone()).dims(), [1, 512, 8, 8]);

        let stride_16 = TruncatedVgg::vgg16(1, &device);
        assert_eq!(stride_16.forward(input).dims(), [1, 512, 4, 4]);
    }

    #[test]
    fn output_is_pre_activation() {
        let device = Default::default();
        let model = TruncatedVgg::vgg16(3, &device);

        let input =
            Tensor::<TestBackend, 4>::random([1, 3, 32, 32], Distribution::Normal(0.0, 1.0), &device);
        let out = model.forward(input);

        // A feature map cut before its ReLU should carry negative values
        // for random inputs and weights.
        let min: f32 = out.min().into_scalar();
        assert!(min < 0.0);
    }

    #[test]
    fn deeper_stages_are_absent_when_truncated() {
        let device = Default::default();
        let model = TruncatedVgg::<TestBackend>::vgg16(2, &device);
        assert!(model.stage2.is_some());
        assert!(model.stage3.is_none());
    }
}
