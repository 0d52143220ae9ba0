pub mod backbones;
pub mod d2net;
pub mod detection;
pub mod extraction;

pub use backbones::{build_backbone, BackboneEnum};
pub use d2net::{D2Net, D2NetOutput, D2NetRecord, PairBatch};
pub use detection::SoftDetection;
pub use extraction::{DenseFeatureExtraction, FinetunePartition};
