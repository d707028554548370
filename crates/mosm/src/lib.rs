//! This library implements the Multi-Output Spectral Mixture (MOSM) kernel
//! ([Parra & Tobar, 2017](https://arxiv.org/abs/1709.01298)) for gaussian process
//! modeling of correlated, irregularly sampled channels.
//!
//! Kernel hyperparameters live in a [ParameterStore]: for each of the Q mixture
//! components and each channel a magnitude, a mean (frequency), a variance, a phase
//! and a delay, plus a noise per channel. They are
//!
//! * estimated from the data by spectral estimation ([EstimationMode::Spectral]) or by
//!   fitting single output spectral mixtures ([EstimationMode::SpectralMixture]),
//! * optionally refined by maximizing the marginal likelihood ([Mosm::train]).
//!
//! Pairwise channel parameters are derived in closed form by a [CrossKernel]
//! ([MosmCross]) and can be reported as a [correlation_matrix] or as cross power
//! spectral densities ([cross_psd]).
//!
//! ```no_run
//! use linfa::ParamGuard;
//! use mogp_data::{Channel, MultiChannelDataset};
//! use mogp_mosm::{EstimationMode, Mosm};
//! use mogp_spectral::SpectralMethod;
//! use ndarray::{array, Array};
//!
//! let x = Array::linspace(0., 10., 60);
//! let a = Channel::from_series("A", x.clone(), x.mapv(|t: f64| (3. * t).sin())).unwrap();
//! let b = Channel::from_series("B", x.clone(), x.mapv(|t: f64| (3. * t + 1.).sin())).unwrap();
//! let dataset = MultiChannelDataset::from_channels(vec![a, b]).unwrap();
//!
//! let params = Mosm::params(2)
//!     .estimation(EstimationMode::Spectral(SpectralMethod::lomb_scargle(1000)))
//!     .max_eval(100)
//!     .check()
//!     .unwrap();
//! let mut mosm = Mosm::new(dataset, params).unwrap();
//! mosm.estimate_params().unwrap();
//! println!("correlations {}", mosm.correlation_matrix());
//!
//! let gp = mosm.train().unwrap();
//! let preds = gp.predict(&[array![[10.5], [11.]], array![[10.5]]], 2.).unwrap();
//! println!("B at 10.5: {} +/- {}", preds[1].mean[0], preds[1].upper[0] - preds[1].mean[0]);
//! ```
//!
//! Logs go through the [log](https://docs.rs/log) facade; tests and benches read the
//! filter from the [MOGP_LOG] environment variable.
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod algorithm;
mod cross;
mod errors;
mod kernel;
mod params;
mod parameters;
mod store;

pub use algorithm::*;
pub use cross::*;
pub use errors::*;
pub use kernel::*;
pub use params::*;
pub use parameters::*;
pub use store::*;

/// Name of the environment variable holding the log filter (`env_logger` syntax)
pub const MOGP_LOG: &str = "MOGP_LOG";
