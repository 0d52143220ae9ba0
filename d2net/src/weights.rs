//! Pretrained weight import.
//!
//! Two external formats are supported: torchvision classification
//! checkpoints for initializing the backbone, and full detect-and-describe
//! checkpoints in the original PyTorch layout (a `model` entry holding the
//! state dict, with the backbone stored as an index-keyed `Sequential`).
//! Both are remapped onto this crate's named record paths and loaded
//! through `burn-import`'s PyTorch recorder, which also translates
//! BatchNorm `weight`/`bias` entries to `gamma`/`beta`.

use std::path::{Path, PathBuf};

use burn::{
    prelude::*,
    record::{FullPrecisionSettings, Recorder},
};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};

use crate::{
    error::{D2NetError, D2NetResult},
    models::{BackboneEnum, D2Net, D2NetRecord},
};

/// Torchvision `features` indices of the VGG16 convolutions kept by the
/// deepest truncation, paired with their record paths. Shallower
/// truncations simply have no destination for the trailing entries; the
/// recorder skips source keys with no matching record field.
const VGG16_FEATURE_LAYERS: [(usize, &str); 13] = [
    (0, "stage1.conv1_1"),
    (2, "stage1.conv1_2"),
    (5, "stage1.conv2_1"),
    (7, "stage1.conv2_2"),
    (10, "stage1.conv3_1"),
    (12, "stage1.conv3_2"),
    (14, "stage1.conv3_3"),
    (17, "stage2.conv4_1"),
    (19, "stage2.conv4_2"),
    (21, "stage2.conv4_3"),
    (24, "stage3.conv5_1"),
    (26, "stage3.conv5_2"),
    (28, "stage3.conv5_3"),
];

/// `Sequential` child indices of the original checkpoint's residual
/// backbone, paired with their record paths. Index 2 (ReLU) and 3
/// (max pool) carry no parameters.
const RESNET_SEQUENTIAL_STAGES: [(usize, &str); 6] = [
    (0, "conv1_block.conv1"),
    (1, "conv1_block.bn1"),
    (4, "layer1"),
    (5, "layer2"),
    (6, "layer3"),
    (7, "layer4"),
];

const BACKBONE_PREFIX: &str = "dense_feature_extraction.backbone";

/// Directory where downloaded weight files are conventionally cached.
pub fn default_weights_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("d2net"))
}

/// Remaps torchvision VGG16 `features.N` keys onto the named stage paths.
/// `prefix` is the record path of the backbone inside the target record
/// (empty when loading a bare backbone).
fn vgg16_load_args(path: &Path, source_prefix: &str, prefix: &str) -> LoadArgs {
    VGG16_FEATURE_LAYERS
        .iter()
        .fold(LoadArgs::new(path.to_path_buf()), |args, (index, name)| {
            args.with_key_remap(
                &format!("^{source_prefix}\\.{index}\\.(.+)$"),
                &format!("{prefix}{name}.$1"),
            )
        })
}

/// Remaps torchvision residual-network keys onto this crate's layout:
/// the stem moves under `conv1_block`, stage members under
/// `layerN.blocks.M`, and projection shortcuts get their `conv`/`bn`
/// field names.
fn resnet_torchvision_load_args(path: &Path, prefix: &str) -> LoadArgs {
    LoadArgs::new(path.to_path_buf())
        .with_key_remap("^conv1\\.(.+)$", &format!("{prefix}conv1_block.conv1.$1"))
        .with_key_remap("^bn1\\.(.+)$", &format!("{prefix}conv1_block.bn1.$1"))
        .with_key_remap(
            "^layer([1-4])\\.([0-9]+)\\.downsample\\.0\\.(.+)$",
            &format!("{prefix}layer$1.blocks.$2.downsample.conv.$3"),
        )
        .with_key_remap(
            "^layer([1-4])\\.([0-9]+)\\.downsample\\.1\\.(.+)$",
            &format!("{prefix}layer$1.blocks.$2.downsample.bn.$3"),
        )
        .with_key_remap(
            "^layer([1-4])\\.([0-9]+)\\.(.+)$",
            &format!("{prefix}layer$1.blocks.$2.$3"),
        )
}

/// Remaps an original-layout residual backbone (`...model.N.M...`) onto
/// the named stage paths.
fn resnet_original_load_args(path: &Path, prefix: &str) -> LoadArgs {
    let source = "dense_feature_extraction\\.model\\.";
    let args = RESNET_SEQUENTIAL_STAGES.iter().fold(
        LoadArgs::new(path.to_path_buf()).with_top_level_key("model"),
        |args, (index, name)| {
            args.with_key_remap(
                &format!("^{source}{index}\\.(.+)$"),
                &format!("{prefix}{name}.$1"),
            )
        },
    );
    // Stage members and shortcuts, rewritten after the stage rename so a
    // single pass over the already-prefixed keys suffices.
    args.with_key_remap(
        &format!("^{prefix}layer([1-4])\\.([0-9]+)\\.downsample\\.0\\.(.+)$"),
        &format!("{prefix}layer$1.blocks.$2.downsample.conv.$3"),
    )
    .with_key_remap(
        &format!("^{prefix}layer([1-4])\\.([0-9]+)\\.downsample\\.1\\.(.+)$"),
        &format!("{prefix}layer$1.blocks.$2.downsample.bn.$3"),
    )
    .with_key_remap(
        &format!("^{prefix}layer([1-4])\\.([0-9]+)\\.(.+)$"),
        &format!("{prefix}layer$1.blocks.$2.$3"),
    )
}

fn load_into<B: Backend>(
    model: D2Net<B>,
    load_args: LoadArgs,
    device: &Device<B>,
) -> D2NetResult<D2Net<B>> {
    let recorder = PyTorchFileRecorder::<FullPrecisionSettings>::default();
    let record: D2NetRecord<B> =
        recorder
            .load(load_args, device)
            .map_err(|e| D2NetError::WeightLoadingFailed {
                reason: format!("PyTorch weight loading failed: {e}"),
            })?;
    Ok(model.load_record(record))
}

impl<B: Backend> D2Net<B> {
    /// Loads torchvision classification weights into the backbone. The
    /// classifier head and any stage deeper than the truncation are
    /// ignored; the detection module has no parameters.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or the backbone
    /// shapes do not match the checkpoint.
    pub fn load_torchvision_weights(
        self,
        path: impl AsRef<Path>,
        device: &Device<B>,
    ) -> D2NetResult<Self> {
        let prefix = format!("{BACKBONE_PREFIX}.");
        let load_args = match self.dense_feature_extraction.backbone() {
            BackboneEnum::Vgg(_) => vgg16_load_args(path.as_ref(), "features", &prefix),
            BackboneEnum::ResNet(_) => resnet_torchvision_load_args(path.as_ref(), &prefix),
        };
        load_into(self, load_args, device)
    }

    /// Loads a full checkpoint saved by the original PyTorch training
    /// code, where the state dict sits under a `model` entry and the
    /// backbone is an index-keyed `Sequential`.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or its parameter
    /// shapes do not match the constructed model.
    pub fn load_original_checkpoint(
        self,
        path: impl AsRef<Path>,
        device: &Device<B>,
    ) -> D2NetResult<Self> {
        let prefix = format!("{BACKBONE_PREFIX}.");
        let load_args = match self.dense_feature_extraction.backbone() {
            BackboneEnum::Vgg(_) => {
                vgg16_load_args(path.as_ref(), "dense_feature_extraction\\.model", &prefix)
                    .with_top_level_key("model")
            }
            BackboneEnum::ResNet(_) => resnet_original_load_args(path.as_ref(), &prefix),
        };
        load_into(self, load_args, device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Backbone, D2NetConfig, ExtractorConfig};
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn missing_torchvision_file_is_an_error() {
        let device = Default::default();
        let model: D2Net<TestBackend> = D2NetConfig::new()
            .with_extractor(
                ExtractorConfig::new()
                    .with_backbone(Backbone::Vgg16)
                    .with_truncated_blocks(3),
            )
            .init(&device)
            .unwrap();

        let result = model.load_torchvision_weights("does/not/exist.pth", &device);
        assert!(matches!(
            result,
            Err(D2NetError::WeightLoadingFailed { .. })
        ));
    }

    #[test]
    fn missing_original_checkpoint_is_an_error() {
        let device = Default::default();
        let model: D2Net<TestBackend> = D2NetConfig::new()
            .with_extractor(
                ExtractorConfig::new()
                    .with_backbone(Backbone::Resnet50)
                    .with_truncated_blocks(3),
            )
            .init(&device)
            .unwrap();

        let result = model.load_original_checkpoint("does/not/exist.pth", &device);
        assert!(matches!(
            result,
            Err(D2NetError::WeightLoadingFailed { .. })
        ));
    }
}
