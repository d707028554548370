use thiserror::Error;

/// A result type for multi-channel data handling
pub type Result<T> = std::result::Result<T, DataError>;

/// An error when building or querying a [`MultiChannelDataset`](crate::MultiChannelDataset)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataError {
    /// When a channel name is looked up but not present
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),
    /// When a channel index is out of range
    #[error("Channel index {index} out of range (dataset has {count} channels)")]
    ChannelOutOfRange {
        /// Requested index
        index: usize,
        /// Number of channels in the dataset
        count: usize,
    },
    /// When two channels share the same name
    #[error("Duplicate channel name: {0}")]
    DuplicateChannel(String),
    /// When channels do not share the same input dimension
    #[error("Input dimension mismatch: expected {expected}, got {actual} for channel {channel}")]
    DimensionMismatch {
        /// Name of the offending channel
        channel: String,
        /// Expected input dimension
        expected: usize,
        /// Actual input dimension
        actual: usize,
    },
    /// When error due to a bad value
    #[error("InvalidValue error: {0}")]
    InvalidValueError(String),
}
