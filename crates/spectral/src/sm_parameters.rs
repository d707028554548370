use crate::errors::{Result, SpectralError};
use crate::estimator::SpectralMethod;
use crate::optimization::OptimizerParams;

use linfa::{Float, ParamGuard};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// Default number of random restarts of the likelihood optimization
pub const SM_OPTIM_N_START: usize = 2;
/// Default seed used to draw random starts and random initializations
pub const SM_SEED: u64 = 42;

/// Initialization source of a spectral mixture fit
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum SmInit {
    /// Peaks found by a spectral estimation method
    Spectral(SpectralMethod),
    /// Seeded random draw: uniform means below the Nyquist frequency
    Random,
}

impl Default for SmInit {
    fn default() -> Self {
        SmInit::Spectral(SpectralMethod::default())
    }
}

/// A set of validated spectral mixture parameters.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub struct SmValidParams<F: Float> {
    /// Number of mixture components Q
    pub(crate) n_components: usize,
    /// Initial guess source
    pub(crate) init: SmInit,
    /// Optimizer settings
    pub(crate) optimizer: OptimizerParams,
    /// Number of random restarts on top of the initial guess
    pub(crate) n_start: usize,
    /// Seed for random restarts
    pub(crate) seed: u64,
    /// Jitter added to the covariance diagonal relative to the output variance
    pub(crate) nugget: F,
}

impl<F: Float> Default for SmValidParams<F> {
    fn default() -> SmValidParams<F> {
        SmValidParams {
            n_components: 1,
            init: SmInit::default(),
            optimizer: OptimizerParams::default(),
            n_start: SM_OPTIM_N_START,
            seed: SM_SEED,
            nugget: F::cast(1e-6),
        }
    }
}

impl<F: Float> SmValidParams<F> {
    /// Get the number of mixture components
    pub fn n_components(&self) -> usize {
        self.n_components
    }

    /// Get the initialization source
    pub fn init(&self) -> &SmInit {
        &self.init
    }

    /// Get optimizer settings
    pub fn optimizer(&self) -> &OptimizerParams {
        &self.optimizer
    }

    /// Get the number of random restarts
    pub fn n_start(&self) -> usize {
        self.n_start
    }

    /// Get the random seed
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Get the relative diagonal jitter
    pub fn nugget(&self) -> F {
        self.nugget
    }
}

#[derive(Clone, Debug)]
/// The set of hyperparameters that can be specified for the fit of a
/// [single output spectral mixture](crate::SpectralMixture).
pub struct SmParams<F: Float>(SmValidParams<F>);

impl<F: Float> SmParams<F> {
    /// A constructor for spectral mixture parameters given the number of components
    pub fn new(n_components: usize) -> SmParams<F> {
        Self(SmValidParams {
            n_components,
            ..Default::default()
        })
    }

    /// A constructor from validated parameters
    pub fn new_from_valid(params: &SmValidParams<F>) -> Self {
        Self(params.clone())
    }

    /// Set the initialization source
    pub fn init(mut self, init: SmInit) -> Self {
        self.0.init = init;
        self
    }

    /// Set optimizer settings
    pub fn optimizer(mut self, optimizer: OptimizerParams) -> Self {
        self.0.optimizer = optimizer;
        self
    }

    /// Set the max number of likelihood evaluations per optimization start
    pub fn max_eval(mut self, max_eval: usize) -> Self {
        self.0.optimizer.max_eval = max_eval;
        self
    }

    /// Set the number of random restarts
    pub fn n_start(mut self, n_start: usize) -> Self {
        self.0.n_start = n_start;
        self
    }

    /// Set the seed of random restarts
    pub fn seed(mut self, seed: u64) -> Self {
        self.0.seed = seed;
        self
    }

    /// Set the relative diagonal jitter
    pub fn nugget(mut self, nugget: F) -> Self {
        self.0.nugget = nugget;
        self
    }
}

impl<F: Float> From<SmValidParams<F>> for SmParams<F> {
    fn from(item: SmValidParams<F>) -> Self {
        SmParams(item)
    }
}

impl<F: Float> ParamGuard for SmParams<F> {
    type Checked = SmValidParams<F>;
    type Error = SpectralError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        if self.0.n_components == 0 {
            return Err(SpectralError::InvalidValueError(
                "Number of components should be positive".to_string(),
            ));
        }
        if self.0.optimizer.max_eval == 0 || self.0.optimizer.rhobeg <= 0. {
            return Err(SpectralError::InvalidValueError(format!(
                "Invalid optimizer settings {:?}",
                self.0.optimizer
            )));
        }
        if let SmInit::Spectral(method) = self.0.init {
            if method.grid_size() == 0 {
                return Err(SpectralError::InvalidValueError(
                    "Spectral grid size should be positive".to_string(),
                ));
            }
        }
        if self.0.nugget < F::zero() {
            return Err(SpectralError::InvalidValueError(
                "Nugget should be non negative".to_string(),
            ));
        }
        Ok(&self.0)
    }

    fn check(self) -> Result<Self::Checked> {
        self.check_ref()?;
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_params() {
        assert!(SmParams::<f64>::new(0).check().is_err());
        assert!(SmParams::<f64>::new(2).max_eval(0).check().is_err());
        assert!(SmParams::<f64>::new(2)
            .init(SmInit::Spectral(SpectralMethod::bnse(0)))
            .check()
            .is_err());
        let valid = SmParams::<f64>::new(2).n_start(0).check().unwrap();
        assert_eq!(valid.n_components(), 2);
        assert_eq!(valid.n_start(), 0);
    }
}
