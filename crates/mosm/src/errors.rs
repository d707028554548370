use mogp_spectral::SpectralError;
use thiserror::Error;

/// A result type for MOSM modeling
pub type Result<T> = std::result::Result<T, MosmError>;

/// An error when using a [`Mosm`](crate::Mosm) model or its [`ParameterStore`](crate::ParameterStore)
#[derive(Error, Debug)]
pub enum MosmError {
    /// When a component index is outside the range allowed for a parameter
    #[error("Invalid component {component}: model has {n_components} mixture components")]
    InvalidComponent {
        /// Requested component index
        component: usize,
        /// Number of mixture components Q
        n_components: usize,
    },
    /// When a parameter name is not part of the kernel schema
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),
    /// When the estimation of a channel fails
    #[error(
        "Estimation error on channel {channel}{}: {source}",
        .component.map(|q| format!(" (component {q})")).unwrap_or_default()
    )]
    Estimation {
        /// Name of the channel
        channel: String,
        /// Mixture component being estimated, if any
        component: Option<usize>,
        /// Underlying failure
        source: SpectralError,
    },
    /// When spectral computations fail
    #[error(transparent)]
    SpectralError(#[from] SpectralError),
    /// When multi-channel data handling fails
    #[error(transparent)]
    DataError(#[from] mogp_data::DataError),
    #[error(transparent)]
    /// When linear algebra computation fails
    LinalgError(#[from] linfa_linalg::LinalgError),
    /// When a linfa error occurs
    #[error(transparent)]
    LinfaError(#[from] linfa::error::Error),
    /// When error due to a bad value
    #[error("InvalidValue error: {0}")]
    InvalidValueError(String),
}
