use crate::errors::{MosmError, Result};

use linfa::{Float, ParamGuard};
use mogp_spectral::{OptimizerParams, SmValidParams, SpectralMethod};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// Default number of random restarts of the training optimization
pub const MOSM_OPTIM_N_START: usize = 2;
/// Default seed of the training restarts
pub const MOSM_SEED: u64 = 42;

/// How initial kernel parameters are estimated from the data
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub enum EstimationMode<F: Float> {
    /// Spectral peaks of each channel
    Spectral(SpectralMethod),
    /// Components of a single output spectral mixture fitted on each channel.
    /// Its number of components must match the model one.
    SpectralMixture(SmValidParams<F>),
}

impl<F: Float> Default for EstimationMode<F> {
    fn default() -> Self {
        EstimationMode::Spectral(SpectralMethod::default())
    }
}

/// A set of validated MOSM parameters.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub struct MosmValidParams<F: Float> {
    /// Number of mixture components Q
    pub(crate) n_components: usize,
    /// Initial parameters estimation
    pub(crate) estimation: EstimationMode<F>,
    /// Training optimizer settings
    pub(crate) optimizer: OptimizerParams,
    /// Random restarts of the training on top of the current parameters
    pub(crate) n_start: usize,
    pub(crate) seed: u64,
    /// Diagonal jitter relative to the mean prior variance
    pub(crate) nugget: F,
}

impl<F: Float> Default for MosmValidParams<F> {
    fn default() -> MosmValidParams<F> {
        MosmValidParams {
            n_components: 1,
            estimation: EstimationMode::default(),
            optimizer: OptimizerParams::default(),
            n_start: MOSM_OPTIM_N_START,
            seed: MOSM_SEED,
            nugget: F::cast(1e-6),
        }
    }
}

impl<F: Float> MosmValidParams<F> {
    /// Get the number of mixture components
    pub fn n_components(&self) -> usize {
        self.n_components
    }

    /// Get the estimation mode
    pub fn estimation(&self) -> &EstimationMode<F> {
        &self.estimation
    }

    /// Get training optimizer settings
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
/// The set of hyperparameters that can be specified for a [MOSM model](crate::Mosm).
pub struct MosmParams<F: Float>(MosmValidParams<F>);

impl<F: Float> MosmParams<F> {
    /// A constructor for MOSM parameters given the number of mixture components
    pub fn new(n_components: usize) -> MosmParams<F> {
        Self(MosmValidParams {
            n_components,
            ..Default::default()
        })
    }

    /// A constructor from validated parameters
    pub fn new_from_valid(params: &MosmValidParams<F>) -> Self {
        Self(params.clone())
    }

    /// Set the estimation mode
    pub fn estimation(mut self, estimation: EstimationMode<F>) -> Self {
        self.0.estimation = estimation;
        self
    }

    /// Set training optimizer settings
    pub fn optimizer(mut self, optimizer: OptimizerParams) -> Self {
        self.0.optimizer = optimizer;
        self
    }

    /// Set the max number of likelihood evaluations per training start
    pub fn max_eval(mut self, max_eval: usize) -> Self {
        self.0.optimizer.max_eval = max_eval;
        self
    }

    /// Set the number of random restarts
    pub fn n_start(mut self, n_start: usize) -> Self {
        self.0.n_start = n_start;
        self
    }

    /// Set the random seed
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

impl<F: Float> From<MosmValidParams<F>> for MosmParams<F> {
    fn from(item: MosmValidParams<F>) -> Self {
        MosmParams(item)
    }
}

/// Check an estimation mode against the number of mixture components
pub(crate) fn check_estimation<F: Float>(
    estimation: &EstimationMode<F>,
    n_components: usize,
) -> Result<()> {
    match estimation {
        EstimationMode::Spectral(method) if method.grid_size() == 0 => Err(
            MosmError::InvalidValueError("Spectral grid size should be positive".to_string()),
        ),
        EstimationMode::SpectralMixture(sm) if sm.n_components() != n_components => {
            Err(MosmError::InvalidValueError(format!(
                "Spectral mixture with {} components cannot initialize {} components",
                sm.n_components(),
                n_components
            )))
        }
        _ => Ok(()),
    }
}

impl<F: Float> ParamGuard for MosmParams<F> {
    type Checked = MosmValidParams<F>;
    type Error = MosmError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        if self.0.n_components == 0 {
            return Err(MosmError::InvalidValueError(
                "Number of components should be positive".to_string(),
            ));
        }
        if self.0.optimizer.max_eval == 0 || self.0.optimizer.rhobeg <= 0. {
            return Err(MosmError::InvalidValueError(format!(
                "Invalid optimizer settings {:?}",
                self.0.optimizer
            )));
        }
        check_estimation(&self.0.estimation, self.0.n_components)?;
        if self.0.nugget < F::zero() {
            return Err(MosmError::InvalidValueError(
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
    use mogp_spectral::SmParams;

    #[test]
    fn test_check_params() {
        assert!(MosmParams::<f64>::new(0).check().is_err());
        assert!(MosmParams::<f64>::new(1).max_eval(0).check().is_err());
        assert!(MosmParams::<f64>::new(1)
            .estimation(EstimationMode::Spectral(SpectralMethod::lomb_scargle(0)))
            .check()
            .is_err());
        let sm = SmParams::new(2).check().unwrap();
        assert!(MosmParams::<f64>::new(3)
            .estimation(EstimationMode::SpectralMixture(sm.clone()))
            .check()
            .is_err());
        let valid = MosmParams::<f64>::new(2)
            .estimation(EstimationMode::SpectralMixture(sm))
            .n_start(0)
            .check()
            .unwrap();
        assert_eq!(valid.n_components(), 2);
        assert_eq!(valid.n_start(), 0);
        assert_eq!(valid.seed(), MOSM_SEED);
    }

    #[cfg(feature = "serializable")]
    #[test]
    fn test_save_load_params() {
        let sm = SmParams::new(2).max_eval(20).check().unwrap();
        let params = MosmParams::<f64>::new(2)
            .estimation(EstimationMode::SpectralMixture(sm))
            .seed(7)
            .check()
            .unwrap();
        let json = serde_json::to_string(&params).unwrap();
        let loaded: MosmValidParams<f64> = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded, params);
    }
}
