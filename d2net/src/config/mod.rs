//! Configuration module for D2-Net.
//!
//! It is organized into two submodules:
//! - `core`: the main configuration structures
//! - `enums`: the enumeration types used in configurations

pub mod core;
pub mod enums;

pub use self::core::{D2NetConfig, ExtractorConfig, SoftDetectionConfig};
pub use self::enums::Backbone;
