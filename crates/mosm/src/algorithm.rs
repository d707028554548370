use crate::cross::{correlation_matrix, CrossKernel, CrossParams, MosmCross};
use crate::errors::{MosmError, Result};
use crate::kernel::MosmKernel;
use crate::params::ParamName;
use crate::parameters::{check_estimation, EstimationMode, MosmParams, MosmValidParams};
use crate::store::{ComponentEstimate, ParameterStore};

use linfa::Float;
use log::{debug, info, warn};
use mogp_data::{Channel, MultiChannelDataset};
use mogp_spectral::{
    into_f64, multistart_minimize, prepare_multistart, ExactPosterior, SpectralError,
    SpectralEstimator, SpectralPeak,
};
use ndarray::{s, Array1, Array2, ArrayBase, ArrayView1, Axis, Data, Ix2, Zip};
use ndarray_stats::QuantileExt;
use rayon::prelude::*;
use std::f64::consts::PI;
use std::time::Instant;

/// Log-transformed parameters are searched within this many e-folds of their start
const LOG_SEARCH_WIDTH: f64 = 5.;
/// Floor applied before taking the log of a non negative parameter
const LOG_FLOOR: f64 = 1e-12;

/// Multi-output spectral mixture (MOSM) gaussian process model of a
/// [MultiChannelDataset].
///
/// The model owns its [ParameterStore]: parameters are first estimated from the data
/// with [Mosm::estimate_params], then optionally refined by [Mosm::train] which returns
/// a conditioned [MosmGp] used for predictions.
///
/// ```no_run
/// use mogp_data::{Channel, MultiChannelDataset};
/// use mogp_mosm::Mosm;
/// use linfa::ParamGuard;
/// use ndarray::{array, Array};
///
/// let x = Array::linspace(0., 10., 50);
/// let a = Channel::from_series("A", x.clone(), x.mapv(|t: f64| t.sin())).unwrap();
/// let b = Channel::from_series("B", x.clone(), x.mapv(|t: f64| t.cos())).unwrap();
/// let dataset = MultiChannelDataset::from_channels(vec![a, b]).unwrap();
///
/// let mut mosm = Mosm::new(dataset, Mosm::params(2).check().unwrap()).unwrap();
/// mosm.estimate_params().unwrap();
/// let gp = mosm.train().unwrap();
/// let xs = vec![array![[10.5]], array![[10.5]]];
/// let preds = gp.predict(&xs, 2.).unwrap();
/// ```
#[derive(Clone, Debug)]
pub struct Mosm<F: Float> {
    dataset: MultiChannelDataset<F>,
    config: MosmValidParams<F>,
    store: ParameterStore<F>,
}

impl<F: Float> Mosm<F> {
    /// MOSM parameters builder given the number of mixture components
    pub fn params(n_components: usize) -> MosmParams<F> {
        MosmParams::new(n_components)
    }

    /// Model of `dataset` with placeholder kernel parameters.
    ///
    /// # Errors
    ///
    /// [`MosmError::DataError`] when channels do not share the same input dimension,
    /// [`MosmError::InvalidValueError`] when the dataset is empty.
    pub fn new(dataset: MultiChannelDataset<F>, config: MosmValidParams<F>) -> Result<Self> {
        let input_dim = dataset.input_dim()?;
        let store = ParameterStore::new(config.n_components(), dataset.channel_count(), input_dim)?;
        Ok(Mosm {
            dataset,
            config,
            store,
        })
    }

    /// Modeled data
    pub fn dataset(&self) -> &MultiChannelDataset<F> {
        &self.dataset
    }

    /// Model configuration
    pub fn config(&self) -> &MosmValidParams<F> {
        &self.config
    }

    /// Current kernel parameters
    pub fn store(&self) -> &ParameterStore<F> {
        &self.store
    }

    /// Current kernel parameters, to set or fix values by hand
    pub fn store_mut(&mut self) -> &mut ParameterStore<F> {
        &mut self.store
    }

    /// Estimate kernel parameters with the configured [EstimationMode]
    pub fn estimate_params(&mut self) -> Result<()> {
        let mode = self.config.estimation().clone();
        self.estimate_params_with(&mode)
    }

    /// Estimate magnitude, mean, variance and noise of every component from the data.
    ///
    /// Peaks (or fitted spectral mixture components) expressed in cycles are converted
    /// to angular frequencies: means are scaled by `2 pi` and variances by `(2 pi)^2`.
    /// The q-th peak of each channel initializes component q, raw magnitudes are
    /// normalized once on storage and the noise of a channel is a thirtieth of its
    /// output variance. Channels are estimated in parallel.
    ///
    /// Either every component is stored or nothing is.
    ///
    /// # Errors
    ///
    /// [`MosmError::Estimation`] naming the failing channel.
    pub fn estimate_params_with(&mut self, mode: &EstimationMode<F>) -> Result<()> {
        let n_components = self.config.n_components();
        check_estimation(mode, n_components)?;
        let channels: Vec<&Channel<F>> = self.dataset.iter().collect();
        let now = Instant::now();
        let peaks = channels
            .par_iter()
            .map(|channel| {
                let found = match mode {
                    EstimationMode::Spectral(method) => method.estimate(channel, n_components),
                    EstimationMode::SpectralMixture(sm) => {
                        sm.fit_channel(channel).map(|fitted| {
                            if !fitted.converged() {
                                warn!(
                                    "Spectral mixture of channel {} did not converge",
                                    channel.name()
                                );
                            }
                            fitted.peaks()
                        })
                    }
                };
                found
                    .map_err(|e| (None, e))
                    .and_then(|peaks| check_peaks(peaks, n_components))
                    .map_err(|(component, source)| MosmError::Estimation {
                        channel: channel.name().to_string(),
                        component,
                        source,
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        debug!("elapsed estimation = {:?}", now.elapsed().as_millis());

        let two_pi = F::cast(2. * PI);
        let (m, d) = (self.store.n_channels(), self.store.input_dim());
        let components: Vec<ComponentEstimate<F>> = (0..n_components)
            .map(|q| ComponentEstimate {
                magnitude: Array1::from_shape_fn(m, |c| peaks[c][q].amplitude),
                mean: Array2::from_shape_fn((d, m), |(n, c)| peaks[c][q].mean[n] * two_pi),
                variance: Array2::from_shape_fn((d, m), |(n, c)| {
                    peaks[c][q].variance[n] * two_pi * two_pi
                }),
            })
            .collect();
        let noise = Array1::from_iter(
            channels
                .iter()
                .map(|c| c.model_y().var(F::zero()) / F::cast(30.)),
        );
        self.store.set_estimates(&components, &noise)
    }

    /// Cross parameters of the current kernel parameters
    pub fn cross_params(&self) -> CrossParams<F> {
        MosmCross.derive(&self.store)
    }

    /// Channel correlation coefficients of the current kernel parameters
    pub fn correlation_matrix(&self) -> Array2<F> {
        correlation_matrix(&self.cross_params())
    }

    /// Report the (channel, component) pairs whose frequency is smaller than its
    /// spread, for which the kernel behaves like a squared exponential one.
    pub fn info(&self) -> Vec<(String, usize)> {
        let mean = self.store.values_of(ParamName::Mean);
        let variance = self.store.values_of(ParamName::Variance);
        let norm = |v: ArrayView1<F>| v.dot(&v).sqrt();
        let mut found = vec![];
        for (c, channel) in self.dataset.iter().enumerate() {
            for q in 0..self.store.n_components() {
                if norm(mean.slice(s![q, .., c])) < norm(variance.slice(s![q, .., c])) {
                    info!(
                        "MOSM approaches RBF kernel for q={q} in channel='{}'",
                        channel.name()
                    );
                    found.push((channel.name().to_string(), q));
                }
            }
        }
        found
    }

    /// GP conditioned on the data with the current kernel parameters, no training
    pub fn gp(&self) -> Result<MosmGp<F>> {
        MosmGp::condition(self.dataset.clone(), self.store.clone(), self.config.nugget(), true, 0)
    }

    /// Optimize the negative log marginal likelihood over every parameter name that is
    /// not fixed, with COBYLA from the current values and seeded random restarts.
    ///
    /// Magnitudes, variances and noises are searched in log space. Running out of
    /// evaluations is not an error: the best iterate is kept and reported by
    /// [MosmGp::converged]. The model store is updated with the optimum.
    pub fn train(&mut self) -> Result<MosmGp<F>> {
        let names = self.store.trainable_names();
        let (x, y) = self.dataset.to_kernel_encoding()?;
        let y = center_outputs(&x, &y, self.dataset.channel_count());
        let space = SearchSpace::new(&self.store, &names, delay_range(&x));
        let nugget = self.config.nugget();

        if space.is_empty() {
            info!("Every parameter is fixed, MOSM training skipped");
            return self.gp();
        }

        let objfn = |theta: &[f64]| -> f64 {
            let mut store = self.store.clone();
            store.assign_flat(&names, &space.to_values(theta));
            let kernel = MosmKernel::from_store(&store);
            match kernel
                .training_covariance(&x, nugget)
                .and_then(|k| ExactPosterior::new(k, &y).map_err(MosmError::from))
            {
                Ok(posterior) => into_f64(posterior.likelihood()),
                Err(_) => f64::INFINITY,
            }
        };

        let starts = prepare_multistart(
            self.config.n_start(),
            &space.theta0,
            &space.bounds,
            self.config.seed(),
        );
        debug!(
            "MOSM training of {} parameters from {} starts",
            space.len(),
            starts.nrows()
        );
        let now = Instant::now();
        let opt = multistart_minimize(objfn, &starts, &space.bounds, self.config.optimizer());
        debug!("elapsed optim = {:?}", now.elapsed().as_millis());
        info!(
            "MOSM training: likelihood={} after {} evaluations",
            opt.fval, opt.n_eval
        );
        if !opt.converged {
            warn!(
                "MOSM training stopped before convergence ({} evaluations)",
                opt.n_eval
            );
        }
        if !opt.fval.is_finite() {
            return Err(MosmError::SpectralError(
                SpectralError::LikelihoodComputationError(
                    "no finite likelihood found during training".to_string(),
                ),
            ));
        }

        let mut store = self.store.clone();
        store.assign_flat(&names, &space.to_values(&opt.x.to_vec()));
        let gp = MosmGp::condition(
            self.dataset.clone(),
            store.clone(),
            nugget,
            opt.converged,
            opt.n_eval,
        )?;
        self.store = store;
        Ok(gp)
    }
}

/// Ensure an estimator output holds one finite peak per component
fn check_peaks<F: Float>(
    peaks: Vec<SpectralPeak<F>>,
    n_components: usize,
) -> std::result::Result<Vec<SpectralPeak<F>>, (Option<usize>, SpectralError)> {
    if peaks.len() != n_components {
        return Err((
            None,
            SpectralError::InvalidValueError(format!(
                "{} peaks estimated for {n_components} components",
                peaks.len()
            )),
        ));
    }
    match peaks.iter().position(|p| {
        !p.amplitude.is_finite()
            || p.mean.iter().chain(p.variance.iter()).any(|v| !v.is_finite())
    }) {
        Some(q) => Err((
            Some(q),
            SpectralError::InvalidValueError("non finite spectral peak".to_string()),
        )),
        None => Ok(peaks),
    }
}

/// Per channel mean of tagged outputs
fn channel_means<F: Float>(
    x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    y: &Array1<F>,
    n_channels: usize,
) -> Array1<F> {
    let mut sums = Array1::<F>::zeros(n_channels);
    let mut counts = Array1::<F>::zeros(n_channels);
    x.column(0).iter().zip(y.iter()).for_each(|(&c, &v)| {
        let c = c.to_usize().unwrap_or(0);
        sums[c] += v;
        counts[c] += F::one();
    });
    sums.iter()
        .zip(counts.iter())
        .map(|(&s, &n)| if n > F::zero() { s / n } else { F::zero() })
        .collect()
}

/// Outputs with their channel mean removed
fn center_outputs<F: Float>(
    x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    y: &Array1<F>,
    n_channels: usize,
) -> Array1<F> {
    let means = channel_means(x, y, n_channels);
    x.column(0)
        .iter()
        .zip(y.iter())
        .map(|(&c, &v)| v - means[c.to_usize().unwrap_or(0)])
        .collect()
}

/// Largest input range over dimensions of tagged inputs, 1 when inputs do not spread
fn delay_range<F: Float>(x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> f64 {
    let range = x
        .axis_iter(Axis(1))
        .skip(1)
        .filter_map(|col| match (col.min(), col.max()) {
            (Ok(&lo), Ok(&hi)) => Some(into_f64(hi - lo)),
            _ => None,
        })
        .fold(0., f64::max);
    if range > 0. {
        range
    } else {
        1.
    }
}

/// Mapping between flat store values and the optimizer search space
struct SearchSpace {
    log: Vec<bool>,
    theta0: Array1<f64>,
    bounds: Vec<(f64, f64)>,
}

impl SearchSpace {
    fn new<F: Float>(store: &ParameterStore<F>, names: &[ParamName], delay_range: f64) -> Self {
        let kinds = names
            .iter()
            .flat_map(|&name| std::iter::repeat(name).take(store.values_of(name).len()));
        let mut log = vec![];
        let mut theta0 = vec![];
        let mut bounds = vec![];
        for (name, v) in kinds.zip(store.flatten(names).into_iter().map(into_f64)) {
            let (t, b) = match name {
                ParamName::Magnitude | ParamName::Variance | ParamName::Noise => {
                    let t = v.max(LOG_FLOOR).ln();
                    (t, (t - LOG_SEARCH_WIDTH, t + LOG_SEARCH_WIDTH))
                }
                ParamName::Mean => {
                    let half = 0.5 * v.abs().max(1.);
                    (v, (v - half, v + half))
                }
                ParamName::Phase => (v, (v - PI, v + PI)),
                ParamName::Delay => (v, (v - delay_range, v + delay_range)),
            };
            log.push(name.non_negative());
            theta0.push(t);
            bounds.push(b);
        }
        SearchSpace {
            log,
            theta0: Array1::from(theta0),
            bounds,
        }
    }

    fn len(&self) -> usize {
        self.log.len()
    }

    fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    fn to_values<F: Float>(&self, theta: &[f64]) -> Vec<F> {
        theta
            .iter()
            .zip(self.log.iter())
            .map(|(&t, &log)| F::cast(if log { t.exp() } else { t }))
            .collect()
    }
}

/// Predictions of one channel
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelPrediction<F: Float> {
    /// Channel name
    pub name: String,
    /// Predictive mean
    pub mean: Array1<F>,
    /// Predictive variance of the latent function
    pub variance: Array1<F>,
    /// `mean - sigma * sqrt(variance)`
    pub lower: Array1<F>,
    /// `mean + sigma * sqrt(variance)`
    pub upper: Array1<F>,
}

/// A MOSM gaussian process conditioned on the training data of a dataset.
///
/// Owned by the caller: it snapshots the kernel parameters it was built with, so later
/// changes of the [Mosm] store do not affect it.
#[derive(Clone, Debug)]
pub struct MosmGp<F: Float> {
    dataset: MultiChannelDataset<F>,
    store: ParameterStore<F>,
    kernel: MosmKernel<F>,
    x_train: Array2<F>,
    y_means: Array1<F>,
    posterior: ExactPosterior<F>,
    converged: bool,
    n_eval: usize,
}

impl<F: Float> MosmGp<F> {
    pub(crate) fn condition(
        dataset: MultiChannelDataset<F>,
        store: ParameterStore<F>,
        nugget: F,
        converged: bool,
        n_eval: usize,
    ) -> Result<Self> {
        let (x_train, y) = dataset.to_kernel_encoding()?;
        let y_means = channel_means(&x_train, &y, dataset.channel_count());
        let yc = center_outputs(&x_train, &y, dataset.channel_count());
        let kernel = MosmKernel::from_store(&store);
        let k = kernel.training_covariance(&x_train, nugget)?;
        let posterior = ExactPosterior::new(k, &yc)?;
        Ok(MosmGp {
            dataset,
            store,
            kernel,
            x_train,
            y_means,
            posterior,
            converged,
            n_eval,
        })
    }

    /// Negative log marginal likelihood of the training data
    pub fn likelihood(&self) -> F {
        self.posterior.likelihood()
    }

    /// Whether training met its stopping tolerance before exhausting its budget
    pub fn converged(&self) -> bool {
        self.converged
    }

    /// Number of likelihood evaluations spent in training
    pub fn n_eval(&self) -> usize {
        self.n_eval
    }

    /// Kernel parameters of this GP
    pub fn store(&self) -> &ParameterStore<F> {
        &self.store
    }

    /// Predict every channel at its own inputs, one `(n_c, D)` array per channel.
    ///
    /// Predictions are expressed in observed units: channel transforms are inverted.
    /// Bounds are `mean +/- sigma * sqrt(variance)`.
    pub fn predict(
        &self,
        xs: &[ArrayBase<impl Data<Elem = F>, Ix2>],
        sigma: F,
    ) -> Result<Vec<ChannelPrediction<F>>> {
        let x = self.dataset.encode_inputs(xs)?;
        let k_star = self.kernel.covariance(&x, &self.x_train)?;
        let k_diag = self.kernel.diag(&x)?;
        let (mut mean, variance) = self.posterior.predict(&k_star, &k_diag)?;
        Zip::from(&mut mean)
            .and(x.column(0))
            .for_each(|m, &c| *m += self.y_means[c.to_usize().unwrap_or(0)]);

        let counts: Vec<usize> = xs.iter().map(|x| x.nrows()).collect();
        let means = self.dataset.split_outputs(&mean, &counts)?;
        let variances = self.dataset.split_outputs(&variance, &counts)?;
        Ok(self
            .dataset
            .iter()
            .zip(xs.iter())
            .zip(means.into_iter().zip(variances))
            .map(|((channel, x), (mean, variance))| {
                let (mean, variance) = channel.invert_transforms(x, &mean, &variance);
                let spread = variance.mapv(|v| sigma * v.sqrt());
                ChannelPrediction {
                    name: channel.name().to_string(),
                    lower: &mean - &spread,
                    upper: &mean + &spread,
                    mean,
                    variance,
                }
            })
            .collect())
    }

    /// Predict the masked out samples of every channel
    pub fn predict_removed(&self, sigma: F) -> Result<Vec<ChannelPrediction<F>>> {
        let xs: Vec<Array2<F>> = self.dataset.iter().map(|c| c.removed_x()).collect();
        self.predict(&xs, sigma)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use linfa::ParamGuard;
    use mogp_spectral::SpectralMethod;
    use ndarray::array;

    fn dataset() -> MultiChannelDataset<f64> {
        let x = Array1::linspace(0., 8., 33);
        let a = Channel::from_series("A", x.clone(), x.mapv(|t| (2. * PI * 0.5 * t).sin()))
            .unwrap();
        let b = Channel::from_series(
            "B",
            x.clone(),
            x.mapv(|t| 2. * (2. * PI * 0.5 * t).sin() + 1.),
        )
        .unwrap();
        MultiChannelDataset::from_channels(vec![a, b]).unwrap()
    }

    #[test]
    fn test_estimate_converts_units() {
        let mut mosm = Mosm::new(
            dataset(),
            Mosm::params(1)
                .estimation(EstimationMode::Spectral(SpectralMethod::lomb_scargle(400)))
                .check()
                .unwrap(),
        )
        .unwrap();
        mosm.estimate_params().unwrap();
        let mean = mosm.store().get(0, "mean").unwrap();
        assert_abs_diff_eq!(mean[[0, 0]], 2. * PI * 0.5, epsilon = 0.1);
        assert_abs_diff_eq!(mean[[0, 1]], 2. * PI * 0.5, epsilon = 0.1);
        let noise = mosm.store().noise();
        let var_b = mosm.dataset().get("B").unwrap().y().var(0.);
        assert_abs_diff_eq!(noise[1], var_b / 30., epsilon = 1e-12);
    }

    #[test]
    fn test_estimation_failure_keeps_store() {
        let mut data = dataset();
        data.get_mut("B")
            .unwrap()
            .remove_indices(&(1..33).collect::<Vec<_>>())
            .unwrap();
        let mut mosm = Mosm::new(data, Mosm::params(2).check().unwrap()).unwrap();
        let before = mosm.store().clone();
        let err = mosm
            .estimate_params_with(&EstimationMode::Spectral(SpectralMethod::bnse(50)))
            .unwrap_err();
        match err {
            MosmError::Estimation {
                channel, source, ..
            } => {
                assert_eq!(channel, "B");
                assert!(matches!(source, SpectralError::InsufficientData { n_valid: 1, .. }));
            }
            e => panic!("unexpected error {e}"),
        }
        assert_eq!(mosm.store(), &before);
    }

    #[test]
    fn test_search_space_follows_value_counts() {
        let mut store = ParameterStore::<f64>::new(2, 3, 2).unwrap();
        store.set(2, "noise", &array![[0.5, 2., 4.]]).unwrap();
        let names = [ParamName::Mean, ParamName::Noise, ParamName::Phase];
        let space = SearchSpace::new(&store, &names, 1.);
        // 2 * 2 * 3 means, 3 noises, 2 * 3 phases
        assert_eq!(space.len(), 21);
        assert!(space.log[..12].iter().all(|&l| !l));
        assert!(space.log[12..15].iter().all(|&l| l));
        assert!(space.log[15..].iter().all(|&l| !l));
        assert_abs_diff_eq!(
            space.theta0.slice(s![12..15]),
            array![0.5f64.ln(), 2f64.ln(), 4f64.ln()],
            epsilon = 1e-12
        );
        assert_eq!(space.bounds[20], (-PI, PI));

        let values: Vec<f64> = space.to_values(space.theta0.as_slice().unwrap());
        assert_eq!(values.len(), store.flatten(&names).len());
        assert_abs_diff_eq!(values[14], 4., epsilon = 1e-12);
    }

    #[test]
    fn test_info_reports_rbf_like_components() {
        let mut mosm = Mosm::new(dataset(), Mosm::params(2).check().unwrap()).unwrap();
        mosm.store_mut().set(0, "mean", &array![[3., 3.]]).unwrap();
        mosm.store_mut().set(1, "mean", &array![[3., 0.1]]).unwrap();
        assert_eq!(mosm.info(), vec![("B".to_string(), 1)]);
    }

    #[test]
    fn test_gp_predicts_training_data() {
        let mut mosm = Mosm::new(
            dataset(),
            Mosm::params(1)
                .estimation(EstimationMode::Spectral(SpectralMethod::lomb_scargle(400)))
                .check()
                .unwrap(),
        )
        .unwrap();
        mosm.estimate_params().unwrap();
        // channel B is an affine copy of channel A
        mosm.store_mut().set(0, "magnitude", &array![[1., 2.]]).unwrap();
        mosm.store_mut().set(1, "noise", &array![[1e-4, 1e-4]]).unwrap();
        let gp = mosm.gp().unwrap();
        let xs = vec![array![[2.25]], array![[2.25]]];
        let preds = gp.predict(&xs, 2.).unwrap();
        assert_eq!(preds.len(), 2);
        assert_eq!(preds[1].name, "B");
        assert_abs_diff_eq!(preds[0].mean[0], (2. * PI * 0.5 * 2.25f64).sin(), epsilon = 0.1);
        assert_abs_diff_eq!(
            preds[1].mean[0],
            2. * (2. * PI * 0.5 * 2.25f64).sin() + 1.,
            epsilon = 0.2
        );
        assert!(preds[0].lower[0] <= preds[0].mean[0] && preds[0].mean[0] <= preds[0].upper[0]);
    }
}
