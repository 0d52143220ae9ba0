//! Enumeration types for D2-Net configuration.

use burn::prelude::*;

/// Defines the backbone architecture.
///
/// The set is closed: every variant has an exact truncation and channel
/// layout, so unsupported architectures cannot be expressed at all.
#[derive(Config, Debug, PartialEq, Eq)]
pub enum Backbone {
    /// VGG-16 (the original D2-Net backbone).
    Vgg16,
    /// ResNet-50.
    Resnet50,
    /// ResNet-101.
    Resnet101,
}

impl Backbone {
    /// Whether the architecture is built from residual bottleneck stages.
    /// Only residual backbones support an output channel override.
    #[must_use]
    pub const fn is_residual(&self) -> bool {
        matches!(self, Self::Resnet50 | Self::Resnet101)
    }
}
