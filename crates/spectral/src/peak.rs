use linfa::Float;
use ndarray::{Array1, ArrayBase, Data, Ix1};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// One estimated frequency domain component of a channel.
///
/// `mean` and `variance` hold one value per input dimension and are expressed
/// in cycles per input unit (resp. squared).
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub struct SpectralPeak<F: Float> {
    /// Non negative height of the spectral density at the peak
    pub amplitude: F,
    /// Peak location (frequency) per input dimension
    pub mean: Array1<F>,
    /// Peak width as a gaussian variance per input dimension
    pub variance: Array1<F>,
}

/// A peak found on the spectrum of a single input dimension
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct DimPeak<F: Float> {
    pub amplitude: F,
    pub frequency: F,
    pub variance: F,
}

/// Indices of the local maxima of `power`, best first.
///
/// A grid edge counts as a maximum when it dominates its only neighbour and a plateau
/// is represented by its lowest frequency point, provided it ends with a descent or at
/// the grid edge. Ties on power are broken by the lowest frequency. Never empty for a
/// non empty spectrum.
pub(crate) fn ranked_maxima<F: Float>(power: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Vec<usize> {
    let n = power.len();
    let mut maxima: Vec<usize> = (0..n)
        .filter(|&i| {
            let rises = i == 0 || power[i] > power[i - 1];
            let end = (i..n).find(|&k| power[k] != power[i]);
            let falls = end.map_or(true, |k| power[k] < power[i]);
            rises && falls
        })
        .collect();
    // stable sort keeps ascending frequency order among equal powers
    maxima.sort_by(|&a, &b| {
        power[b]
            .partial_cmp(&power[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    maxima
}

/// Full width at half power of the lobe around `peak`, linearly interpolated
/// between grid points.
///
/// When only one side of the lobe crosses half power, the lobe is assumed symmetric.
/// When neither side does the lobe is unresolved and `None` is returned.
pub(crate) fn half_power_width<F: Float>(
    freqs: &ArrayBase<impl Data<Elem = F>, Ix1>,
    power: &ArrayBase<impl Data<Elem = F>, Ix1>,
    peak: usize,
) -> Option<F> {
    let half = power[peak] / F::cast(2.);
    let crossing = |from: usize, to: usize| {
        let (p0, p1) = (power[from], power[to]);
        let t = if p0 == p1 {
            F::zero()
        } else {
            (p0 - half) / (p0 - p1)
        };
        freqs[from] + t * (freqs[to] - freqs[from])
    };

    let mut left = None;
    let mut i = peak;
    while i > 0 {
        if power[i - 1] <= half {
            left = Some(freqs[peak] - crossing(i, i - 1));
            break;
        }
        i -= 1;
    }
    let mut right = None;
    let mut i = peak;
    while i + 1 < power.len() {
        if power[i + 1] <= half {
            right = Some(crossing(i, i + 1) - freqs[peak]);
            break;
        }
        i += 1;
    }

    match (left, right) {
        (Some(l), Some(r)) => Some(l + r),
        (Some(h), None) | (None, Some(h)) => Some(F::cast(2.) * h),
        (None, None) => None,
    }
}

/// Gaussian variance matching a given full width at half maximum
pub(crate) fn fwhm_to_variance<F: Float>(fwhm: F) -> F {
    let sigma = fwhm / (F::cast(2.) * (F::cast(2.) * F::cast(2.).ln()).sqrt());
    sigma * sigma
}

/// Complete the ranked `peaks` up to `n` entries.
///
/// The lowest confidence peak is duplicated with its frequency spread by
/// successive multiples of the grid `step`.
pub(crate) fn pad_peaks<F: Float>(mut peaks: Vec<DimPeak<F>>, n: usize, step: F) -> Vec<DimPeak<F>> {
    peaks.truncate(n);
    if let Some(&last) = peaks.last() {
        let missing = n - peaks.len();
        peaks.extend((1..=missing).map(|k| DimPeak {
            frequency: last.frequency + F::cast(k) * step,
            ..last
        }));
    }
    peaks
}

/// Combine ranked peaks found separately on each input dimension: the q-th peak of
/// the channel gathers the q-th peak of every dimension, its amplitude being the
/// average amplitude over dimensions.
pub(crate) fn combine_dims<F: Float>(per_dim: &[Vec<DimPeak<F>>], n: usize) -> Vec<SpectralPeak<F>> {
    let dim = F::cast(per_dim.len());
    (0..n)
        .map(|q| {
            let amplitude = per_dim
                .iter()
                .map(|peaks| peaks[q].amplitude)
                .fold(F::zero(), |acc, a| acc + a)
                / dim;
            SpectralPeak {
                amplitude,
                mean: per_dim.iter().map(|peaks| peaks[q].frequency).collect(),
                variance: per_dim.iter().map(|peaks| peaks[q].variance).collect(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array};

    #[test]
    fn test_ranked_maxima_with_edges_and_ties() {
        let p = array![3., 1., 2., 1., 2., 2., 0., 3.];
        // 0 and 7 are edge maxima with equal power: lowest frequency first,
        // the plateau 4..=5 is represented by 4
        assert_eq!(ranked_maxima(&p), vec![0, 7, 2, 4]);
    }

    #[test]
    fn test_ranked_maxima_skips_shoulders() {
        // 1..=2 is a shoulder of the rising slope, not a maximum
        assert_eq!(ranked_maxima(&array![1., 2., 2., 3., 1.]), vec![3]);
        assert_eq!(ranked_maxima(&array![2., 2., 3.]), vec![2]);
        assert_eq!(ranked_maxima(&array![1., 3., 3.]), vec![1]);
    }

    #[test]
    fn test_ranked_maxima_flat() {
        let p = Array::<f64, _>::zeros(5);
        assert_eq!(ranked_maxima(&p), vec![0]);
    }

    #[test]
    fn test_half_power_width() {
        let f = array![0., 1., 2., 3., 4.];
        let p = array![0., 1., 4., 1., 0.];
        // half power crossed at 4/3 and 8/3
        assert_abs_diff_eq!(half_power_width(&f, &p, 2).unwrap(), 4. / 3., epsilon = 1e-12);

        let p = array![4., 3., 1., 0., 0.];
        // one sided lobe is mirrored
        let w = half_power_width(&f, &p, 0).unwrap();
        assert_abs_diff_eq!(w, 2. * 1.5, epsilon = 1e-12);

        let p = array![1., 1., 1., 1., 1.];
        assert!(half_power_width(&f, &p, 2).is_none());
    }

    #[test]
    fn test_fwhm_to_variance() {
        let sigma: f64 = 0.3;
        let fwhm = 2. * (2. * 2f64.ln()).sqrt() * sigma;
        assert_abs_diff_eq!(fwhm_to_variance(fwhm), sigma * sigma, epsilon = 1e-12);
    }

    #[test]
    fn test_pad_peaks() {
        let peaks = vec![
            DimPeak {
                amplitude: 2.,
                frequency: 0.5,
                variance: 0.01,
            },
            DimPeak {
                amplitude: 1.,
                frequency: 0.1,
                variance: 0.02,
            },
        ];
        let padded = pad_peaks(peaks, 4, 0.05);
        assert_eq!(padded.len(), 4);
        assert_abs_diff_eq!(padded[2].frequency, 0.15, epsilon = 1e-12);
        assert_abs_diff_eq!(padded[3].frequency, 0.2, epsilon = 1e-12);
        assert_abs_diff_eq!(padded[3].amplitude, 1.);

        let truncated = pad_peaks(padded, 1, 0.05);
        assert_eq!(truncated.len(), 1);
    }

    #[test]
    fn test_combine_dims() {
        let d0 = vec![DimPeak {
            amplitude: 1.,
            frequency: 0.5,
            variance: 0.1,
        }];
        let d1 = vec![DimPeak {
            amplitude: 3.,
            frequency: 0.2,
            variance: 0.3,
        }];
        let peaks = combine_dims(&[d0, d1], 1);
        assert_abs_diff_eq!(peaks[0].amplitude, 2.);
        assert_abs_diff_eq!(peaks[0].mean, array![0.5, 0.2]);
        assert_abs_diff_eq!(peaks[0].variance, array![0.1, 0.3]);
    }

    #[cfg(feature = "serializable")]
    #[test]
    fn test_save_load_peak() {
        let peak = SpectralPeak {
            amplitude: 1.5,
            mean: array![0.25, 2.],
            variance: array![1e-3, 0.5],
        };
        let json = serde_json::to_string(&peak).unwrap();
        let loaded: SpectralPeak<f64> = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded, peak);
    }
}
