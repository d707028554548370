use crate::errors::Result;
use crate::estimator::{estimate_by_dimension, SpectralEstimator};
use crate::peak::{fwhm_to_variance, half_power_width, ranked_maxima, DimPeak, SpectralPeak};

use linfa::Float;
use mogp_data::Channel;
use ndarray::{Array1, ArrayBase, ArrayView1, Data, Ix1, Zip};
use std::f64::consts::PI;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// Default number of frequencies evaluated by the periodogram
pub const LS_GRID_SIZE: usize = 10000;

/// Peak search on the Lomb-Scargle periodogram of unevenly sampled data.
///
/// Peaks are the local maxima of the periodogram ranked by power. The amplitude of a peak
/// is the periodogram power, its variance is derived from the half power bandwidth of
/// its lobe, or from a one grid step width when the lobe cannot be resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct LombScargle {
    grid_size: usize,
}

impl Default for LombScargle {
    fn default() -> Self {
        LombScargle {
            grid_size: LS_GRID_SIZE,
        }
    }
}

impl LombScargle {
    /// Constructor given the number of evaluated frequencies between 0 (excluded)
    /// and the Nyquist frequency estimate (included)
    pub fn new(grid_size: usize) -> Self {
        LombScargle { grid_size }
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
        let power = periodogram(&x, &y, freqs);
        let step = freqs[0];
        Ok(ranked_maxima(&power)
            .into_iter()
            .map(|i| {
                let width = half_power_width(freqs, &power, i).unwrap_or(step);
                DimPeak {
                    amplitude: power[i],
                    frequency: freqs[i],
                    variance: fwhm_to_variance(width),
                }
            })
            .collect())
    }
}

impl<F: Float> SpectralEstimator<F> for LombScargle {
    fn estimate(&self, channel: &Channel<F>, n_components: usize) -> Result<Vec<SpectralPeak<F>>> {
        estimate_by_dimension(channel, n_components, self.grid_size, Self::search)
    }
}

/// Lomb-Scargle periodogram of samples `(x, y)` at frequencies `freqs` (in cycles per unit).
///
/// Outputs are used as given (no mean removal). A term whose normalisation vanishes
/// (all phases aligned on a zero of the sine or cosine) contributes nothing.
pub fn periodogram<F: Float>(
    x: &ArrayBase<impl Data<Elem = F>, Ix1>,
    y: &ArrayBase<impl Data<Elem = F>, Ix1>,
    freqs: &ArrayBase<impl Data<Elem = F>, Ix1>,
) -> Array1<F> {
    let two = F::cast(2.);
    let eps = F::epsilon() * F::cast(x.len());
    let mut power = Array1::zeros(freqs.len());
    Zip::from(&mut power).and(freqs).for_each(|p, &f| {
        let w = F::cast(2. * PI) * f;
        let (s2, c2) = x.iter().fold((F::zero(), F::zero()), |(s, c), &xi| {
            (s + (two * w * xi).sin(), c + (two * w * xi).cos())
        });
        let tau = s2.atan2(c2) / (two * w);

        let (mut yc, mut cc, mut ys, mut ss) = (F::zero(), F::zero(), F::zero(), F::zero());
        Zip::from(x).and(y).for_each(|&xi, &yi| {
            let (sin, cos) = (w * (xi - tau)).sin_cos();
            yc += yi * cos;
            cc += cos * cos;
            ys += yi * sin;
            ss += sin * sin;
        });
        let cos_term = if cc > eps { yc * yc / cc } else { F::zero() };
        let sin_term = if ss > eps { ys * ys / ss } else { F::zero() };
        *p = (cos_term + sin_term) / two;
    });
    power
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array};

    #[test]
    fn test_periodogram_alternating_signal() {
        let x = array![0., 1., 2.];
        let y = array![1., -1., 1.];
        let p = periodogram(&x, &y, &array![0.5]);
        assert_abs_diff_eq!(p[0], 1.5, epsilon = 1e-9);
    }

    #[test]
    fn test_alternating_signal_peaks_at_nyquist() {
        let channel = Channel::from_series("A", array![0., 1., 2.], array![1., -1., 1.]).unwrap();
        let peaks = LombScargle::new(100).estimate(&channel, 1).unwrap();
        assert_eq!(peaks.len(), 1);
        assert_abs_diff_eq!(peaks[0].mean[0], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(peaks[0].amplitude, 1.5, epsilon = 1e-9);
        assert!(peaks[0].variance[0] > 0.);
    }

    #[test]
    fn test_three_samples_padded_to_five() {
        let channel = Channel::from_series("A", array![0., 1., 2.], array![1., -1., 1.]).unwrap();
        let peaks = LombScargle::new(100).estimate(&channel, 5).unwrap();
        assert_eq!(peaks.len(), 5);
        peaks.iter().for_each(|p| {
            assert!(p.amplitude >= 0.);
            assert!(p.variance.iter().all(|v: &f64| v.is_finite() && *v > 0.));
        });
        // padded peaks spread from the lowest confidence one
        assert!(peaks[3].mean[0] > peaks[2].mean[0]);
    }

    #[test]
    fn test_sinusoid_frequency() {
        let x = Array::linspace(0., 20., 81);
        let y = x.mapv(|t: f64| (2. * std::f64::consts::PI * 0.3 * t).sin());
        let channel = Channel::from_series("s", x, y).unwrap();
        let peaks = LombScargle::new(2000).estimate(&channel, 2).unwrap();
        assert_abs_diff_eq!(peaks[0].mean[0], 0.3, epsilon = 5e-3);
        assert!(peaks[0].amplitude >= peaks[1].amplitude);
    }
}
