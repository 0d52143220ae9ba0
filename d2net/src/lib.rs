mod config;
mod error;
mod models;
#[cfg(test)]
mod tests;
#[cfg(feature = "pretrained")]
mod weights;

pub use config::*;
pub use error::{D2NetError, D2NetResult};
pub use models::{
    build_backbone, BackboneEnum, D2Net, D2NetOutput, D2NetRecord, DenseFeatureExtraction,
    FinetunePartition, PairBatch, SoftDetection,
};
#[cfg(feature = "pretrained")]
pub use weights::default_weights_dir;
