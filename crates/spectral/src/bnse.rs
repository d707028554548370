//! Bayesian nonparametric spectral estimation.
//!
//! The signal is modelled by a GP with squared exponential covariance
//! `k(t) = sigma2 * exp(-gamma * t^2)`. Its Fourier transform taken under the window
//! `exp(-alpha * t^2)` is jointly gaussian with the observations, which gives closed forms
//! for the posterior mean and variance of both its real and imaginary parts.
use crate::errors::{Result, SpectralError};
use crate::estimator::{estimate_by_dimension, SpectralEstimator};
use crate::peak::{ranked_maxima, DimPeak, SpectralPeak};

use linfa::Float;
use linfa_linalg::{cholesky::*, triangular::*};
use log::debug;
use mogp_data::Channel;
use ndarray::{Array1, Array2, ArrayBase, ArrayView1, Axis, Data, Ix1, Zip};
use ndarray_stats::QuantileExt;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Default number of frequencies evaluated by BNSE
pub const BNSE_GRID_SIZE: usize = 1000;

/// Peak search on the BNSE posterior mean spectral density.
///
/// Peaks are the local maxima of the posterior mean PSD ranked by height. The amplitude
/// of a peak is the posterior mean PSD there, its variance is derived from the curvature
/// of the PSD at the peak.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct Bnse {
    grid_size: usize,
}

impl Default for Bnse {
    fn default() -> Self {
        Bnse {
            grid_size: BNSE_GRID_SIZE,
        }
    }
}

impl Bnse {
    /// Constructor given the number of evaluated frequencies between 0 (excluded)
    /// and the Nyquist frequency estimate (included)
    pub fn new(grid_size: usize) -> Self {
        Bnse { grid_size }
    }

    /// Number of evaluated frequencies
    pub fn grid_size(&self) -> usize {
        self.grid_size
    }

    fn search<F: Float>(
        x: ArrayView1<F>,
        y: ArrayView1<F>,
        freqs: &Array1<F>,
    ) -> Result<Vec<DimPeak<F>>> {
        let posterior = BnsePosterior::new(&x, &y)?;
        let psd = posterior.psd(freqs);
        let step = freqs[0];
        Ok(ranked_maxima(&psd)
            .into_iter()
            .map(|i| DimPeak {
                amplitude: psd[i],
                frequency: freqs[i],
                variance: posterior.curvature_variance(freqs[i], psd[i], step),
            })
            .collect())
    }
}

impl<F: Float> SpectralEstimator<F> for Bnse {
    fn estimate(&self, channel: &Channel<F>, n_components: usize) -> Result<Vec<SpectralPeak<F>>> {
        estimate_by_dimension(channel, n_components, self.grid_size, Self::search)
    }
}

/// Posterior of the windowed Fourier transform of a one dimensional signal
#[derive(Debug)]
pub struct BnsePosterior<F: Float> {
    /// Centered input locations
    x: Array1<F>,
    /// Signal variance of the prior
    sigma2: F,
    /// Inverse squared lengthscale of the prior
    gamma: F,
    /// Window parameter
    alpha: F,
    /// Cholesky factor of the observations covariance
    chol: Array2<F>,
    /// Solution of K a = y
    weights: Array1<F>,
}

impl<F: Float> BnsePosterior<F> {
    /// Condition the spectral model on samples `(x, y)`.
    ///
    /// Inputs are centered on the middle of their range, outputs on their mean.
    /// Hyperparameters are set from the data: `sigma2 = var(y)`,
    /// `gamma = 1 / (2 (range / n)^2)`, `alpha = 1 / (2 (range / 2)^2)` and a noise
    /// standard deviation of a tenth of the signal one.
    pub fn new(
        x: &ArrayBase<impl Data<Elem = F>, Ix1>,
        y: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Result<Self> {
        let n = x.len();
        let xmin = *x
            .min()
            .map_err(|e| SpectralError::InvalidValueError(e.to_string()))?;
        let xmax = *x
            .max()
            .map_err(|e| SpectralError::InvalidValueError(e.to_string()))?;
        let range = xmax - xmin;
        let two = F::cast(2.);
        let xc = x.mapv(|v| v - (xmin + xmax) / two);
        let ymean = y.mean().unwrap_or(F::zero());
        let yc = y.mapv(|v| v - ymean);

        let mut sigma2 = yc.mapv(|v| v * v).mean().unwrap_or(F::zero());
        if sigma2 <= F::zero() {
            debug!("BNSE: constant signal, unit variance used");
            sigma2 = F::one();
        }
        let spacing = range / F::cast(n);
        let gamma = F::one() / (two * spacing * spacing);
        let half = range / two;
        let alpha = F::one() / (two * half * half);
        let noise = sigma2 / F::cast(100.);

        let mut k = Array2::<F>::zeros((n, n));
        Zip::indexed(&mut k).for_each(|(i, j), kij| {
            let d = xc[i] - xc[j];
            *kij = sigma2 * (-gamma * d * d).exp();
            if i == j {
                *kij += noise;
            }
        });
        let chol = k.cholesky()?;
        let z = chol.solve_triangular(&yc.insert_axis(Axis(1)), UPLO::Lower)?;
        let weights = chol
            .t()
            .solve_triangular_into(z, UPLO::Upper)?
            .remove_axis(Axis(1));

        Ok(BnsePosterior {
            x: xc,
            sigma2,
            gamma,
            alpha,
            chol,
            weights,
        })
    }

    /// Covariances between the real and imaginary parts of the transform at
    /// frequency `xi` and the observations
    fn cross_cov(&self, xi: F) -> (Array1<F>, Array1<F>) {
        let ag = self.alpha + self.gamma;
        let pi = F::cast(PI);
        let scale = self.sigma2 * (pi / ag).sqrt() * (-pi * pi * xi * xi / ag).exp();
        let mut real = Array1::zeros(self.x.len());
        let mut imag = Array1::zeros(self.x.len());
        Zip::from(&mut real)
            .and(&mut imag)
            .and(&self.x)
            .for_each(|r, i, &s| {
                let env = scale * (-self.alpha * self.gamma * s * s / ag).exp();
                let (sin, cos) = (F::cast(2.) * pi * xi * self.gamma * s / ag).sin_cos();
                *r = env * cos;
                *i = -env * sin;
            });
        (real, imag)
    }

    /// Prior covariance of the transform at `u` with its value at `v`, before
    /// splitting into real and imaginary parts
    fn window_cov(&self, u: F, v: F) -> F {
        let pi = F::cast(PI);
        let ag = self.alpha + self.gamma;
        let det = self.alpha * (self.alpha + F::cast(2.) * self.gamma);
        self.sigma2 * pi / det.sqrt()
            * (-pi * pi * (ag * (u * u + v * v) - F::cast(2.) * self.gamma * u * v) / det).exp()
    }

    /// Posterior mean of the real and imaginary parts at `xi`
    pub fn mean_at(&self, xi: F) -> (F, F) {
        let (real, imag) = self.cross_cov(xi);
        (real.dot(&self.weights), imag.dot(&self.weights))
    }

    /// Posterior mean power spectral density `m_r^2 + m_i^2` at given frequencies
    pub fn psd(&self, freqs: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Array1<F> {
        freqs.mapv(|xi| self.psd_at(xi))
    }

    fn psd_at(&self, xi: F) -> F {
        let (mr, mi) = self.mean_at(xi);
        mr * mr + mi * mi
    }

    /// Posterior variances of the real and imaginary parts at given frequencies
    pub fn variance(&self, freqs: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Result<(Array1<F>, Array1<F>)> {
        let half = F::cast(0.5);
        let mut var_real = Array1::zeros(freqs.len());
        let mut var_imag = Array1::zeros(freqs.len());
        for (k, &xi) in freqs.iter().enumerate() {
            let (real, imag) = self.cross_cov(xi);
            let same = self.window_cov(xi, xi);
            let mirror = self.window_cov(xi, -xi);
            let prior_real = half * (same + mirror);
            let prior_imag = half * (same - mirror);

            let mut c = Array2::zeros((self.x.len(), 2));
            c.column_mut(0).assign(&real);
            c.column_mut(1).assign(&imag);
            let v = self.chol.solve_triangular(&c, UPLO::Lower)?;
            let explained = v.mapv(|e| e * e).sum_axis(Axis(0));
            var_real[k] = (prior_real - explained[0]).max(F::zero());
            var_imag[k] = (prior_imag - explained[1]).max(F::zero());
        }
        Ok((var_real, var_imag))
    }

    /// Gaussian variance of a peak at `xi` of height `p` deduced from the curvature of
    /// the PSD `p / |p''|`, or `step^2` when the PSD is not concave there.
    fn curvature_variance(&self, xi: F, p: F, step: F) -> F {
        let before = self.psd_at(xi - step);
        let after = self.psd_at(xi + step);
        let d2 = (after - F::cast(2.) * p + before) / (step * step);
        if d2 < F::zero() && p > F::zero() {
            -p / d2
        } else {
            step * step
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array;
    use ndarray_rand::rand::SeedableRng;
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;
    use rand_xoshiro::Xoshiro256Plus;

    fn two_tones() -> Channel<f64> {
        let mut rng = Xoshiro256Plus::seed_from_u64(42);
        let n = 120;
        let jitter = Array::random_using(n, Uniform::new(-0.1, 0.1), &mut rng);
        let x = Array::from_shape_fn(n, |k| k as f64 * 0.5) + jitter;
        let y = x.mapv(|t| (2. * PI * 0.2 * t).sin() + 0.5 * (2. * PI * 0.05 * t).sin());
        Channel::from_series("tones", x, y).unwrap()
    }

    #[test]
    fn test_bnse_finds_two_tones() {
        let channel = two_tones();
        let peaks = Bnse::new(500).estimate(&channel, 2).unwrap();
        assert_eq!(peaks.len(), 2);
        let mut found = [peaks[0].mean[0], peaks[1].mean[0]];
        found.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_abs_diff_eq!(found[0], 0.05, epsilon = 0.01);
        assert_abs_diff_eq!(found[1], 0.2, epsilon = 0.01);
        assert!(peaks.iter().all(|p| p.variance[0] > 0.));
    }

    #[test]
    fn test_posterior_variance_is_bounded_by_prior() {
        let channel = two_tones();
        let x = channel.valid_x().column(0).to_owned();
        let posterior = BnsePosterior::new(&x, channel.y()).unwrap();
        let freqs = Array::linspace(0.01, 0.5, 20);
        let (vr, vi) = posterior.variance(&freqs).unwrap();
        Zip::from(&freqs).and(&vr).and(&vi).for_each(|&f, &r, &i| {
            assert!(r >= 0. && r <= posterior.window_cov(f, f) + 1e-9);
            assert!(i >= 0. && i <= posterior.window_cov(f, f) + 1e-9);
        });
    }

    #[test]
    fn test_psd_is_even_and_non_negative() {
        let channel = two_tones();
        let x = channel.x().column(0).to_owned();
        let posterior = BnsePosterior::new(&x, channel.y()).unwrap();
        let psd = posterior.psd(&Array::linspace(0., 1., 50));
        assert!(psd.iter().all(|&p| p >= 0.));
        assert_abs_diff_eq!(posterior.psd_at(0.2), posterior.psd_at(-0.2), epsilon = 1e-9);
    }
}
