//! Pairwise (cross channel) parameters of a multi-output spectral mixture.
//!
//! For a component `q` and a pair of channels `(i, j)`, on each input dimension:
//!
//! ```text
//! sv         = variance_i + variance_j
//! covariance = 2 variance_i variance_j / sv
//! mean       = (variance_i mean_j + variance_j mean_i) / sv
//! magnitude  = magnitude_i magnitude_j exp(-1/4 sum_d (mean_i - mean_j)^2 / sv)
//! phase      = phase_j - phase_i
//! delay      = delay_j - delay_i
//! ```
//!
//! When `sv` vanishes the covariance is 0, the mean is the average of both means and the
//! exponential factor takes its limit: 1 when both means are equal, 0 otherwise.
use crate::errors::{MosmError, Result};
use crate::params::ParamName;
use crate::store::ParameterStore;

use linfa::Float;
use mogp_data::DataError;
use ndarray::{Array1, Array2, Array3, Array4, ArrayBase, Data, Ix1};
use num_complex::Complex;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Cross parameters of every component and channel pair, recomputed from a
/// [ParameterStore] on demand.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub struct CrossParams<F: Float> {
    /// `(Q, M, M, D)`
    pub covariance: Array4<F>,
    /// `(Q, M, M, D)`
    pub mean: Array4<F>,
    /// `(Q, M, M)`
    pub magnitude: Array3<F>,
    /// `(Q, M, M)`, antisymmetric
    pub phase: Array3<F>,
    /// `(Q, M, M, D)`, antisymmetric
    pub delay: Array4<F>,
}

impl<F: Float> CrossParams<F> {
    /// Number of mixture components Q
    pub fn n_components(&self) -> usize {
        self.magnitude.dim().0
    }

    /// Number of channels M
    pub fn n_channels(&self) -> usize {
        self.magnitude.dim().1
    }

    /// Input dimension D
    pub fn input_dim(&self) -> usize {
        self.covariance.dim().3
    }

    /// Kernel amplitudes `magnitude (2 pi)^(D/2) sqrt(prod_d covariance)` `(Q, M, M)`
    pub fn alpha(&self) -> Array3<F> {
        let d = self.input_dim();
        let two_pi = F::cast(2. * PI);
        Array3::from_shape_fn(self.magnitude.dim(), |(q, i, j)| {
            let root = (0..d).fold(F::one(), |acc, n| {
                acc * (two_pi * self.covariance[[q, i, j, n]]).sqrt()
            });
            self.magnitude[[q, i, j]] * root
        })
    }
}

/// A kernel family defined by a named parameter schema and the closed forms deriving
/// its cross channel parameters.
pub trait CrossKernel<F: Float> {
    /// Names of the per channel parameters of one mixture component
    fn schema(&self) -> &'static [ParamName];

    /// Derive cross parameters from the current store values.
    ///
    /// Pure: reads the store only, deterministic and total (never NaN for finite inputs).
    fn derive(&self, store: &ParameterStore<F>) -> CrossParams<F>;
}

/// Multi-output spectral mixture kernel family
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct MosmCross;

const MOSM_SCHEMA: [ParamName; 5] = [
    ParamName::Magnitude,
    ParamName::Mean,
    ParamName::Variance,
    ParamName::Phase,
    ParamName::Delay,
];

impl<F: Float> CrossKernel<F> for MosmCross {
    fn schema(&self) -> &'static [ParamName] {
        &MOSM_SCHEMA
    }

    fn derive(&self, store: &ParameterStore<F>) -> CrossParams<F> {
        let (nq, m, d) = (store.n_components(), store.n_channels(), store.input_dim());
        let magnitude = store.values_of(ParamName::Magnitude);
        let mean = store.values_of(ParamName::Mean);
        let variance = store.values_of(ParamName::Variance);
        let phase = store.values_of(ParamName::Phase);
        let delay = store.values_of(ParamName::Delay);

        let two = F::cast(2.);
        let mut cross = CrossParams {
            covariance: Array4::zeros((nq, m, m, d)),
            mean: Array4::zeros((nq, m, m, d)),
            magnitude: Array3::zeros((nq, m, m)),
            phase: Array3::zeros((nq, m, m)),
            delay: Array4::zeros((nq, m, m, d)),
        };
        for q in 0..nq {
            for i in 0..m {
                for j in 0..m {
                    let mut exponent = F::zero();
                    let mut separated = false;
                    for n in 0..d {
                        let (vi, vj) = (variance[[q, n, i]], variance[[q, n, j]]);
                        let (mi, mj) = (mean[[q, n, i]], mean[[q, n, j]]);
                        let (cov, mu) = if i == j {
                            (vi, mi)
                        } else if vi + vj > F::zero() {
                            // weights scaled by the largest variance to stay finite
                            let scale = vi.max(vj);
                            let (wi, wj) = (vi / scale, vj / scale);
                            let sw = wi + wj;
                            let gap = (mi - mj) / (scale.sqrt() * sw.sqrt());
                            exponent += gap * gap;
                            (two * vi * (wj / sw), mj * (wi / sw) + mi * (wj / sw))
                        } else {
                            separated |= mi != mj;
                            (F::zero(), (mi + mj) / two)
                        };
                        cross.covariance[[q, i, j, n]] = cov;
                        cross.mean[[q, i, j, n]] = mu;
                        cross.delay[[q, i, j, n]] = delay[[q, n, j]] - delay[[q, n, i]];
                    }
                    cross.magnitude[[q, i, j]] = if separated {
                        F::zero()
                    } else {
                        magnitude[[q, 0, i]]
                            * magnitude[[q, 0, j]]
                            * (-exponent / F::cast(4.)).exp()
                    };
                    cross.phase[[q, i, j]] = phase[[q, 0, j]] - phase[[q, 0, i]];
                }
            }
        }
        cross
    }
}

/// Channel correlation coefficients `(M, M)`.
///
/// Each component contributes `alpha = magnitude / prod_d sqrt(2 pi covariance_d)`
/// modulated by `exp(-1/2 sum_d delay_d^2 covariance_d) cos(sum_d delay_d mean_d + phase)`.
/// Sums are normalized by the square roots of both channels' self sums. A component
/// with a zero covariance contributes 0, a channel with a zero self sum gets 0 entries.
pub fn correlation_matrix<F: Float>(cross: &CrossParams<F>) -> Array2<F> {
    let (nq, m, d) = (cross.n_components(), cross.n_channels(), cross.input_dim());
    let two_pi = F::cast(2. * PI);
    let half = F::cast(0.5);

    let term = |q: usize, i: usize, j: usize| {
        let mut alpha = cross.magnitude[[q, i, j]];
        let (mut decay, mut angle) = (F::zero(), cross.phase[[q, i, j]]);
        for n in 0..d {
            let cov = cross.covariance[[q, i, j, n]];
            if cov <= F::zero() {
                return F::zero();
            }
            alpha = alpha / (two_pi * cov).sqrt();
            let delay = cross.delay[[q, i, j, n]];
            decay += delay * delay * cov;
            angle += delay * cross.mean[[q, i, j, n]];
        }
        alpha * (-half * decay).exp() * angle.cos()
    };
    let sum = |i: usize, j: usize| (0..nq).fold(F::zero(), |acc, q| acc + term(q, i, j));

    let diag = Array1::from_shape_fn(m, |i| sum(i, i));
    Array2::from_shape_fn((m, m), |(i, j)| {
        if diag[i] > F::zero() && diag[j] > F::zero() {
            sum(i, j) / (diag[i].sqrt() * diag[j].sqrt())
        } else {
            F::zero()
        }
    })
}

/// Cross power spectral density of channels `i` and `j` at angular frequencies `freqs`,
/// along the first input dimension:
/// `sum_q magnitude/2 [g(w - mean) + g(w + mean)] exp(i (w delay + phase))` with
/// `g(x) = exp(-x^2 / (2 covariance))`. Components with a zero covariance contribute 0.
///
/// Real valued (zero imaginary part) when `i == j`.
pub fn cross_psd<F: Float>(
    cross: &CrossParams<F>,
    i: usize,
    j: usize,
    freqs: &ArrayBase<impl Data<Elem = F>, Ix1>,
) -> Result<Array1<Complex<F>>> {
    let count = cross.n_channels();
    if let Some(&index) = [i, j].iter().find(|&&c| c >= count) {
        return Err(MosmError::DataError(DataError::ChannelOutOfRange { index, count }));
    }
    let half = F::cast(0.5);
    Ok(freqs.mapv(|w| {
        (0..cross.n_components()).fold(Complex::new(F::zero(), F::zero()), |acc, q| {
            let cov = cross.covariance[[q, i, j, 0]];
            if cov <= F::zero() {
                return acc;
            }
            let mu = cross.mean[[q, i, j, 0]];
            let g = |x: F| (-half * x * x / cov).exp();
            let amplitude = half * cross.magnitude[[q, i, j]] * (g(w - mu) + g(w + mu));
            let angle = w * cross.delay[[q, i, j, 0]] + cross.phase[[q, i, j]];
            acc + Complex::from_polar(amplitude, angle)
        })
    }))
}
