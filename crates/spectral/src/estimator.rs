use crate::bnse::Bnse;
use crate::errors::{Result, SpectralError};
use crate::lombscargle::LombScargle;
use crate::peak::{combine_dims, pad_peaks, DimPeak, SpectralPeak};

use linfa::Float;
use log::debug;
use mogp_data::Channel;
use ndarray::{Array1, ArrayView1, Axis};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// Capability shared by spectral estimation strategies: find exactly
/// `n_components` spectral peaks of a channel, best first.
pub trait SpectralEstimator<F: Float> {
/// Estimate `n_components` peaks from the valid, transformed samples of `channel`.
    ///
    /// # Errors
    ///
    /// [`SpectralError::InsufficientData`] when the channel holds fewer than 2 valid
    /// samples or when its inputs do not spread along some input dimension.
    fn estimate(&self, channel: &Channel<F>, n_components: usize) -> Result<Vec<SpectralPeak<F>>>;
}

/// Spectral estimation strategy selected by configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum SpectralMethod {
    /// Lomb-Scargle periodogram search
    LombScargle(LombScargle),
    /// Bayesian nonparametric spectral estimation
    Bnse(Bnse),
}

impl Default for SpectralMethod {
    fn default() -> Self {
        SpectralMethod::Bnse(Bnse::default())
    }
}

impl SpectralMethod {
    /// Lomb-Scargle estimation on a grid of `grid_size` frequencies
    pub fn lomb_scargle(grid_size: usize) -> Self {
        SpectralMethod::LombScargle(LombScargle::new(grid_size))
    }

    /// BNSE estimation on a grid of `grid_size` frequencies
    pub fn bnse(grid_size: usize) -> Self {
        SpectralMethod::Bnse(Bnse::new(grid_size))
    }

    /// Number of frequencies of the search grid
    pub fn grid_size(&self) -> usize {
        match self {
            SpectralMethod::LombScargle(ls) => ls.grid_size(),
            SpectralMethod::Bnse(bnse) => bnse.grid_size(),
        }
    }
}

impl<F: Float> SpectralEstimator<F> for SpectralMethod {
    fn estimate(&self, channel: &Channel<F>, n_components: usize) -> Result<Vec<SpectralPeak<F>>> {
        match self {
            SpectralMethod::LombScargle(ls) => ls.estimate(channel, n_components),
            SpectralMethod::Bnse(bnse) => bnse.estimate(channel, n_components),
        }
    }
}

/// Frequency grid of `grid_size` points `nyquist * k / grid_size` for k in 1..=grid_size
pub(crate) fn frequency_grid<F: Float>(nyquist: F, grid_size: usize) -> Array1<F> {
    let step = nyquist / F::cast(grid_size);
    Array1::from_shape_fn(grid_size, |k| step * F::cast(k + 1))
}

/// Run a one dimensional peak search on each input dimension of the channel then
/// assemble `n_components` channel peaks.
///
/// `search` receives the inputs along one dimension, the outputs, and the frequency grid,
/// and returns ranked peaks (at least one).
pub(crate) fn estimate_by_dimension<F, S>(
    channel: &Channel<F>,
    n_components: usize,
    grid_size: usize,
    search: S,
) -> Result<Vec<SpectralPeak<F>>>
where
    F: Float,
    S: Fn(ArrayView1<F>, ArrayView1<F>, &Array1<F>) -> Result<Vec<DimPeak<F>>>,
{
    if n_components == 0 || grid_size == 0 {
        return Err(SpectralError::InvalidValueError(format!(
            "Number of components ({n_components}) and grid size ({grid_size}) should be positive"
        )));
    }
    let n_valid = channel.n_valid();
    let nyquist = channel.nyquist_estimate();
    if n_valid < 2 || nyquist.iter().any(|&v| v <= F::zero()) {
        return Err(SpectralError::InsufficientData {
            channel: channel.name().to_string(),
            n_valid,
        });
    }

    let x = channel.valid_x();
    let y = channel.model_y();
    let per_dim = x
        .axis_iter(Axis(1))
        .zip(nyquist.iter())
        .map(|(xd, &nyq)| {
            let freqs = frequency_grid(nyq, grid_size);
            let found = search(xd, y.view(), &freqs)?;
            if found.len() < n_components {
                debug!(
                    "Channel {}: {} peaks found, padding up to {n_components}",
                    channel.name(),
                    found.len()
                );
            }
            Ok(pad_peaks(found, n_components, freqs[0]))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(combine_dims(&per_dim, n_components))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_frequency_grid() {
        let grid = frequency_grid(0.5, 5);
        assert_abs_diff_eq!(grid, array![0.1, 0.2, 0.3, 0.4, 0.5], epsilon = 1e-12);
    }

    #[test]
    fn test_insufficient_data() {
        let mut channel = Channel::from_series("c", array![0., 1., 2.], array![1., 2., 3.]).unwrap();
        channel.remove_indices(&[0, 1]).unwrap();
        for method in [SpectralMethod::lomb_scargle(10), SpectralMethod::bnse(10)] {
            let res = method.estimate(&channel, 2);
            assert!(matches!(
                res,
                Err(SpectralError::InsufficientData { n_valid: 1, .. })
            ));
        }
    }

    #[test]
    fn test_constant_inputs_are_insufficient() {
        let channel = Channel::from_series("c", array![1., 1., 1.], array![1., 2., 3.]).unwrap();
        let res = SpectralMethod::lomb_scargle(10).estimate(&channel, 1);
        assert!(matches!(res, Err(SpectralError::InsufficientData { .. })));
    }
}
