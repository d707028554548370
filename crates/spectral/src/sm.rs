use crate::errors::{Result, SpectralError};
use crate::estimator::SpectralEstimator;
use crate::likelihood::ExactPosterior;
use crate::optimization::{into_f64, multistart_minimize, prepare_multistart};
use crate::peak::SpectralPeak;
use crate::sm_parameters::{SmInit, SmParams, SmValidParams};

use linfa::prelude::{DatasetBase, Fit, Float};
use log::{debug, warn};
use mogp_data::Channel;
use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix1, Ix2, Zip};
use ndarray_rand::rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::time::Instant;

/// Single output spectral mixture kernel fitted to one channel.
///
/// The covariance between inputs distant of `tau` is
/// `sum_q w_q prod_d exp(-2 pi^2 tau_d^2 s_qd) cos(2 pi tau_d mu_qd)`
/// with weights `w`, means `mu` (frequencies) and scales `s` (spectral variances).
#[derive(Clone, Debug)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub struct SpectralMixture<F: Float> {
    weights: Array1<F>,
    means: Array2<F>,
    scales: Array2<F>,
    noise: F,
    likelihood: F,
    converged: bool,
    n_eval: usize,
}

impl<F: Float> SpectralMixture<F> {
    /// Spectral mixture parameters with `n_components` components
    pub fn params(n_components: usize) -> SmParams<F> {
        SmParams::new(n_components)
    }

    /// Weight of each component `(Q)`
    pub fn weights(&self) -> &Array1<F> {
        &self.weights
    }

    /// Frequency of each component per input dimension `(Q, D)`
    pub fn means(&self) -> &Array2<F> {
        &self.means
    }

    /// Spectral variance of each component per input dimension `(Q, D)`
    pub fn scales(&self) -> &Array2<F> {
        &self.scales
    }

    /// Observation noise variance
    pub fn noise(&self) -> F {
        self.noise
    }

    /// Negative log marginal likelihood of the training data
    pub fn likelihood(&self) -> F {
        self.likelihood
    }

    /// Whether the optimizer met its tolerance before exhausting its budget.
    /// When false, parameters are the best iterate found.
    pub fn converged(&self) -> bool {
        self.converged
    }

    /// Total number of likelihood evaluations
    pub fn n_eval(&self) -> usize {
        self.n_eval
    }

    /// Number of components Q
    pub fn n_components(&self) -> usize {
        self.weights.len()
    }

    /// Kernel matrix between `x1` `(n1, D)` and `x2` `(n2, D)`, noise excluded
    pub fn covariance(
        &self,
        x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Array2<F> {
        sm_covariance(&self.weights, &self.means, &self.scales, x1, x2)
    }

    /// Components as spectral peaks (amplitude is the weight)
    pub fn peaks(&self) -> Vec<SpectralPeak<F>> {
        (0..self.n_components())
            .map(|q| SpectralPeak {
                amplitude: self.weights[q],
                mean: self.means.row(q).to_owned(),
                variance: self.scales.row(q).to_owned(),
            })
            .collect()
    }
}

/// Spectral mixture kernel matrix
pub(crate) fn sm_covariance<F: Float>(
    weights: &Array1<F>,
    means: &Array2<F>,
    scales: &Array2<F>,
    x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
    x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
) -> Array2<F> {
    let two_pi = F::cast(2. * PI);
    let two_pi2 = F::cast(2. * PI * PI);
    let mut k = Array2::zeros((x1.nrows(), x2.nrows()));
    Zip::indexed(&mut k).for_each(|(i, j), kij| {
        let tau = &x1.row(i) - &x2.row(j);
        *kij = (0..weights.len()).fold(F::zero(), |acc, q| {
            let term = Zip::from(&tau)
                .and(means.row(q))
                .and(scales.row(q))
                .fold(F::one(), |prod, &t, &mu, &s| {
                    prod * (-two_pi2 * t * t * s).exp() * (two_pi * t * mu).cos()
                });
            acc + weights[q] * term
        });
    });
    k
}

/// Flat log parameters layout: `[log w (Q), log mu (Q*D), log s (Q*D), log noise]`
struct Layout {
    q: usize,
    d: usize,
}

impl Layout {
    fn len(&self) -> usize {
        self.q * (1 + 2 * self.d) + 1
    }

    fn unpack<F: Float>(&self, theta: &[f64]) -> (Array1<F>, Array2<F>, Array2<F>, F) {
        let (q, d) = (self.q, self.d);
        let exp = |v: &f64| F::cast(v.exp());
        let weights = theta[..q].iter().map(exp).collect::<Array1<F>>();
        let means = Array2::from_shape_fn((q, d), |(i, j)| exp(&theta[q + i * d + j]));
        let scales = Array2::from_shape_fn((q, d), |(i, j)| exp(&theta[q + q * d + i * d + j]));
        (weights, means, scales, exp(&theta[self.len() - 1]))
    }
}

impl<F: Float> SmValidParams<F> {
    /// Fit a spectral mixture on the valid, transformed samples of `channel`
    pub fn fit_channel(&self, channel: &Channel<F>) -> Result<SpectralMixture<F>> {
        let n_valid = channel.n_valid();
        if n_valid < 2 {
            return Err(SpectralError::InsufficientData {
                channel: channel.name().to_string(),
                n_valid,
            });
        }
        let x = channel.valid_x();
        let y = channel.model_y();
        let y = &y - y.mean().unwrap_or(F::zero());
        let var = {
            let v = into_f64(y.mapv(|v| v * v).mean().unwrap_or(F::zero()));
            if v > 0. {
                v
            } else {
                1.
            }
        };
        let nyquist = channel.nyquist_estimate().mapv(into_f64);
        if nyquist.iter().any(|&v| v <= 0.) {
            return Err(SpectralError::InsufficientData {
                channel: channel.name().to_string(),
                n_valid,
            });
        }

        let (q, d) = (self.n_components(), x.ncols());
        let layout = Layout { q, d };
        let (theta0, bounds) = self.initial_guess(channel, &nyquist, var)?;

        let nugget = into_f64(self.nugget()) * var;
        let objfn = |theta: &[f64]| -> f64 {
            if theta.iter().any(|v| !v.is_finite()) {
                return f64::INFINITY;
            }
            let (w, mu, s, noise) = layout.unpack::<F>(theta);
            let mut k = sm_covariance(&w, &mu, &s, &x, &x);
            k.diag_mut()
                .mapv_inplace(|v| v + noise + F::cast(nugget));
            match ExactPosterior::new(k, &y) {
                Ok(post) => into_f64(post.likelihood()),
                Err(_) => f64::INFINITY,
            }
        };

        let starts = prepare_multistart(self.n_start(), &theta0, &bounds, self.seed());
        debug!(
            "Fit spectral mixture on channel {} with {} starts",
            channel.name(),
            starts.nrows()
        );
        let now = Instant::now();
        let res = multistart_minimize(objfn, &starts, &bounds, self.optimizer());
        debug!("elapsed optim = {:?}", now.elapsed().as_millis());
        if !res.converged {
            warn!(
                "Spectral mixture fit on channel {} stopped after {} evaluations without convergence",
                channel.name(),
                res.n_eval
            );
        }

        let (weights, means, scales, noise) = layout.unpack::<F>(&res.x.to_vec());
        let mut k = sm_covariance(&weights, &means, &scales, &x, &x);
        k.diag_mut()
            .mapv_inplace(|v| v + noise + F::cast(nugget));
        let post = ExactPosterior::new(k, &y)?;
        Ok(SpectralMixture {
            weights,
            means,
            scales,
            noise,
            likelihood: post.likelihood(),
            converged: res.converged,
            n_eval: res.n_eval,
        })
    }

    /// Initial log parameters and their bounds
    fn initial_guess(
        &self,
        channel: &Channel<F>,
        nyquist: &Array1<f64>,
        var: f64,
    ) -> Result<(Array1<f64>, Vec<(f64, f64)>)> {
        let (q, d) = (self.n_components(), nyquist.len());
        let mut weights = Array1::from_elem(q, var / q as f64);
        let mut means = Array2::zeros((q, d));
        let mut scales = Array2::zeros((q, d));

        match self.init() {
            SmInit::Spectral(method) => {
                let peaks = method.estimate(channel, q)?;
                let total: f64 = peaks.iter().map(|p| into_f64(p.amplitude)).sum();
                peaks.iter().enumerate().for_each(|(i, p)| {
                    if total > 0. {
                        weights[i] = var * into_f64(p.amplitude) / total;
                    }
                    means.row_mut(i).assign(&p.mean.mapv(into_f64));
                    scales.row_mut(i).assign(&p.variance.mapv(into_f64));
                });
            }
            SmInit::Random => {
                let mut rng = Xoshiro256Plus::seed_from_u64(self.seed());
                Zip::from(means.rows_mut())
                    .and(scales.rows_mut())
                    .for_each(|mut mu, mut scale| {
                        Zip::from(&mut mu)
                            .and(&mut scale)
                            .and(nyquist)
                            .for_each(|m, sc, &nyq| {
                                *m = rng.gen_range(0.0..nyq);
                                *sc = (0.1 * nyq) * (0.1 * nyq);
                            });
                    });
            }
        }

        let mut theta0 = Vec::with_capacity(q * (1 + 2 * d) + 1);
        let mut bounds = Vec::with_capacity(theta0.capacity());
        let mut push = |value: f64, lo: f64, up: f64| {
            let (lo, up) = (lo.ln(), up.ln());
            theta0.push(value.max(f64::MIN_POSITIVE).ln().clamp(lo, up));
            bounds.push((lo, up));
        };
        weights
            .iter()
            .for_each(|&w| push(w, 1e-4 * var, 10. * var));
        means.axis_iter(Axis(0)).for_each(|mu| {
            mu.iter()
                .zip(nyquist.iter())
                .for_each(|(&m, &nyq)| push(m, 1e-3 * nyq, 1.5 * nyq))
        });
        scales.axis_iter(Axis(0)).for_each(|s| {
            s.iter()
                .zip(nyquist.iter())
                .for_each(|(&v, &nyq)| push(v, (1e-4 * nyq).powi(2), nyq * nyq))
        });
        push(var / 10., 1e-6 * var, var);
        Ok((Array1::from(theta0), bounds))
    }
}

impl<F: Float, D: Data<Elem = F>> Fit<ArrayBase<D, Ix2>, ArrayBase<D, Ix1>, SpectralError>
    for SmValidParams<F>
{
    type Object = SpectralMixture<F>;

    /// Fit spectral mixture parameters using maximum likelihood
    fn fit(
        &self,
        dataset: &DatasetBase<ArrayBase<D, Ix2>, ArrayBase<D, Ix1>>,
    ) -> Result<Self::Object> {
        let channel = Channel::new("records", dataset.records().view(), dataset.targets().view())?;
        self.fit_channel(&channel)
    }
}
