//! This library estimates the spectral content of irregularly sampled signals in order to
//! initialize spectral mixture kernels of gaussian process models.
//!
//! Two [SpectralEstimator] strategies are available, selected through [SpectralMethod]:
//!
//! * [LombScargle]: peaks of the [Lomb-Scargle periodogram](https://en.wikipedia.org/wiki/Least-squares_spectral_analysis),
//! * [Bnse]: peaks of the posterior mean spectral density given by
//!   Bayesian Nonparametric Spectral Estimation (Tobar, 2018).
//!
//! Both always return exactly the requested number of [SpectralPeak], best first, padding
//! with frequency spread copies of the weakest peak found when the spectrum shows fewer peaks.
//!
//! Alternatively a single output [SpectralMixture] kernel can be fitted to a channel by
//! maximizing its marginal likelihood with the COBYLA optimizer (see [SmParams]).
//!
//! ```no_run
//! use mogp_data::Channel;
//! use mogp_spectral::{SpectralEstimator, SpectralMethod};
//! use ndarray::Array;
//!
//! let x = Array::linspace(0., 10., 41);
//! let y = x.mapv(|t: f64| (2. * std::f64::consts::PI * 0.5 * t).sin());
//! let channel = Channel::from_series("sin", x, y).unwrap();
//!
//! let peaks = SpectralMethod::lomb_scargle(1000).estimate(&channel, 3).unwrap();
//! assert_eq!(peaks.len(), 3);
//! ```
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod bnse;
mod errors;
mod estimator;
mod likelihood;
mod lombscargle;
mod optimization;
mod peak;
mod sm;
mod sm_parameters;

pub use bnse::*;
pub use errors::*;
pub use estimator::{SpectralEstimator, SpectralMethod};
pub use likelihood::*;
pub use lombscargle::*;
pub use optimization::{
    into_f64, multistart_minimize, optimize_params, prepare_multistart, OptimResult,
    OptimizerParams,
};
pub use peak::SpectralPeak;
pub use sm::SpectralMixture;
pub use sm_parameters::*;
