use crate::errors::{DataError, Result};
use crate::transform::{FittedTransform, Transform};

use linfa::Float;
use log::debug;
use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix1, Ix2};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// One observed signal: `n` input locations (rows of `x`), `n` outputs `y`
/// and a validity mask aligned with both.
///
/// Samples marked invalid by the mask are never removed from the arrays,
/// they are only skipped by the `valid_*` accessors.
///
/// Outputs are stored as observed. Transforms fitted with [Channel::transform] only
/// change the values models see through [Channel::model_y].
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub struct Channel<F: Float> {
    name: String,
    x: Array2<F>,
    y: Array1<F>,
    mask: Array1<bool>,
    transforms: Vec<FittedTransform<F>>,
}

impl<F: Float> Channel<F> {
    /// Constructor given input locations as a `(n, D)` array and `n` outputs.
    ///
    /// All samples are initially valid.
    pub fn new(
        name: &str,
        x: ArrayBase<impl Data<Elem = F>, Ix2>,
        y: ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Result<Self> {
        if x.nrows() != y.len() {
            return Err(DataError::InvalidValueError(format!(
                "Channel {name}: x has {} rows whereas y has {} values",
                x.nrows(),
                y.len()
            )));
        }
        if x.ncols() == 0 {
            return Err(DataError::InvalidValueError(format!(
                "Channel {name}: input dimension should be at least 1"
            )));
        }
        if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
            return Err(DataError::InvalidValueError(format!(
                "Channel {name}: non finite values in data"
            )));
        }
        let n = y.len();
        Ok(Channel {
            name: name.to_string(),
            x: x.to_owned(),
            y: y.to_owned(),
            mask: Array1::from_elem(n, true),
            transforms: Vec::new(),
        })
    }

    /// Constructor for one dimensional inputs (time series)
    pub fn from_series(
        name: &str,
        x: ArrayBase<impl Data<Elem = F>, Ix1>,
        y: ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Result<Self> {
        Self::new(name, x.to_owned().insert_axis(Axis(1)), y)
    }

    /// Channel name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All input locations `(n, D)` including masked ones
    pub fn x(&self) -> &Array2<F> {
        &self.x
    }

    /// All outputs including masked ones
    pub fn y(&self) -> &Array1<F> {
        &self.y
    }

    /// Validity mask
    pub fn mask(&self) -> &Array1<bool> {
        &self.mask
    }

    /// Number of samples including masked ones
    pub fn len(&self) -> usize {
        self.y.len()
    }

    /// Whether the channel holds no sample at all
    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    /// Input dimension D
    pub fn input_dim(&self) -> usize {
        self.x.ncols()
    }

    /// Number of valid samples
    pub fn n_valid(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }

    fn indices_where(&self, valid: bool) -> Vec<usize> {
        self.mask
            .iter()
            .enumerate()
            .filter(|&(_, &m)| m == valid)
            .map(|(i, _)| i)
            .collect()
    }

    /// Input locations of valid samples
    pub fn valid_x(&self) -> Array2<F> {
        self.x.select(Axis(0), &self.indices_where(true))
    }

    /// Outputs of valid samples
    pub fn valid_y(&self) -> Array1<F> {
        self.y.select(Axis(0), &self.indices_where(true))
    }

    /// Input locations of masked samples, usable as test data
    pub fn removed_x(&self) -> Array2<F> {
        self.x.select(Axis(0), &self.indices_where(false))
    }

    /// Outputs of masked samples
    pub fn removed_y(&self) -> Array1<F> {
        self.y.select(Axis(0), &self.indices_where(false))
    }

    /// Replace the validity mask
    pub fn set_mask(&mut self, mask: Array1<bool>) -> Result<()> {
        if mask.len() != self.len() {
            return Err(DataError::InvalidValueError(format!(
                "Channel {}: mask length {} should be {}",
                self.name,
                mask.len(),
                self.len()
            )));
        }
        self.mask = mask;
        Ok(())
    }

    /// Mark every sample valid again
    pub fn reset_mask(&mut self) {
        self.mask.fill(true);
    }

    /// Mask samples whose first input coordinate lies in `[start, end)`
    pub fn remove_range(&mut self, start: F, end: F) {
        let x0 = self.x.column(0);
        let mut count = 0;
        self.mask.iter_mut().zip(x0.iter()).for_each(|(m, &v)| {
            if v >= start && v < end && *m {
                *m = false;
                count += 1;
            }
        });
        debug!("Channel {}: {count} samples masked in range", self.name);
    }

    /// Mask samples given their indices
    pub fn remove_indices(&mut self, indices: &[usize]) -> Result<()> {
        if let Some(&i) = indices.iter().find(|&&i| i >= self.len()) {
            return Err(DataError::InvalidValueError(format!(
                "Channel {}: sample index {i} out of range {}",
                self.name,
                self.len()
            )));
        }
        indices.iter().for_each(|&i| self.mask[i] = false);
        Ok(())
    }

    /// Fit a transform on the valid samples, on top of the transforms already applied
    pub fn transform(&mut self, transform: &Transform<F>) -> Result<()> {
        let fitted = self.fit_transform(transform)?;
        self.transforms.push(fitted);
        Ok(())
    }

    pub(crate) fn fit_transform(&self, transform: &Transform<F>) -> Result<FittedTransform<F>> {
        let fitted = transform
            .fit(&self.valid_x(), &self.model_y())
            .map_err(|e| match e {
                DataError::InvalidValueError(msg) => {
                    DataError::InvalidValueError(format!("Channel {}: {msg}", self.name))
                }
                e => e,
            })?;
        debug!("Channel {}: fitted {:?}", self.name, fitted);
        Ok(fitted)
    }

    pub(crate) fn push_transform(&mut self, fitted: FittedTransform<F>) {
        self.transforms.push(fitted);
    }

    /// Transforms applied to the outputs, in application order
    pub fn transforms(&self) -> &[FittedTransform<F>] {
        &self.transforms
    }

    /// Drop every transform
    pub fn clear_transforms(&mut self) {
        self.transforms.clear();
    }

    /// Outputs of valid samples after every transform: the values models are trained on
    pub fn model_y(&self) -> Array1<F> {
        self.apply_transforms(&self.valid_x(), &self.valid_y())
    }

    /// Apply the channel transforms to outputs `y` observed at inputs `x`
    pub fn apply_transforms(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        y: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Array1<F> {
        self.transforms
            .iter()
            .fold(y.to_owned(), |y, t| t.forward(x, &y))
    }

    /// Map predicted means and variances at inputs `x` from the model space
    /// back to the observed output space
    pub fn invert_transforms(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        mean: &ArrayBase<impl Data<Elem = F>, Ix1>,
        variance: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> (Array1<F>, Array1<F>) {
        self.transforms.iter().rev().fold(
            (mean.to_owned(), variance.to_owned()),
            |(mean, variance), t| (t.backward(x, &mean), t.backward_variance(&variance)),
        )
    }

    /// Nyquist frequency estimate per input dimension computed on valid samples
    /// as `0.5 / smallest positive spacing` between sorted input values.
    ///
    /// A dimension without two distinct values gets a zero estimate.
    pub fn nyquist_estimate(&self) -> Array1<F> {
        let x = self.valid_x();
        Array1::from_iter(x.axis_iter(Axis(1)).map(|col| {
            let mut values = col.to_vec();
            values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let dmin = values
                .windows(2)
                .map(|w| w[1] - w[0])
                .filter(|&d| d > F::zero())
                .fold(F::infinity(), F::min);
            if dmin.is_finite() {
                F::cast(0.5) / dmin
            } else {
                F::zero()
            }
        }))
    }
}
