use thiserror::Error;

/// A result type for spectral estimation and spectral mixture fitting
pub type Result<T> = std::result::Result<T, SpectralError>;

/// An error when estimating spectral peaks or fitting a [`SpectralMixture`](crate::SpectralMixture)
#[derive(Error, Debug)]
pub enum SpectralError {
    /// When a channel has too few valid samples to estimate a spectrum
    #[error("Insufficient data in channel {channel}: {n_valid} valid samples")]
    InsufficientData {
        /// Name of the channel
        channel: String,
        /// Number of valid samples found
        n_valid: usize,
    },
    /// When likelihood computation fails
    #[error("Likelihood computation error: {0}")]
    LikelihoodComputationError(String),
    #[error(transparent)]
    /// When linear algebra computation fails
    LinalgError(#[from] linfa_linalg::LinalgError),
    /// When a linfa error occurs
    #[error(transparent)]
    LinfaError(#[from] linfa::error::Error),
    /// When channel data handling fails
    #[error(transparent)]
    DataError(#[from] mogp_data::DataError),
    /// When error due to a bad value
    #[error("InvalidValue error: {0}")]
    InvalidValueError(String),
}
