use thiserror::Error;

/// The error type for `d2net-burn` operations.
///
/// Every failure here is fatal and surfaces at construction or checkpoint
/// load time; forward computation itself does not produce errors.
#[derive(Error, Debug)]
pub enum D2NetError {
    /// Error for when an invalid model configuration is provided.
    /// This can happen if configuration parameters are logically inconsistent.
    #[error("Invalid model configuration: {reason}")]
    InvalidConfiguration {
        /// The reason why the configuration is invalid.
        reason: String,
    },

    /// Error for when loading model weights fails, including any structural
    /// mismatch between a checkpoint and the constructed model.
    #[error("Failed to load weights: {reason}")]
    WeightLoadingFailed {
        /// The reason for the weight loading failure.
        reason: String,
    },
}

/// A specialized `Result` type for `d2net-burn` operations.
pub type D2NetResult<T> = Result<T, D2NetError>;
