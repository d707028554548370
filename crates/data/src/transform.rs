use crate::errors::{DataError, Result};

use linfa::Float;
use linfa_linalg::{cholesky::*, triangular::*};
use ndarray::{concatenate, s, Array1, Array2, ArrayBase, Axis, Data, Ix1, Ix2, Zip};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// A transformation of channel outputs to be fitted on the channel data.
///
/// Every transform is affine in the outputs given the inputs, so predictions made
/// in the transformed space map back exactly, variances being scaled accordingly.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub enum Transform<F: Float> {
    /// Remove the least squares linear trend `slope . x + bias` of the outputs
    Detrend,
    /// Remove the given linear trend `slope . x + bias` (one slope per input dimension)
    Linear {
        /// Slope per input dimension
        slope: Array1<F>,
        /// Intercept
        bias: F,
    },
    /// Map outputs onto `[-1, 1]`
    Normalize,
    /// Center outputs and scale them to unit variance
    Whiten,
}

/// A [Transform] fitted on channel data: `y' = (y - slope . x - bias) / scale`
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub struct FittedTransform<F: Float> {
    slope: Array1<F>,
    bias: F,
    scale: F,
}

impl<F: Float> FittedTransform<F> {
    fn offset(dim: usize, bias: F, scale: F) -> Self {
        FittedTransform {
            slope: Array1::zeros(dim),
            bias,
            scale,
        }
    }

    /// Slope per input dimension of the removed trend
    pub fn slope(&self) -> &Array1<F> {
        &self.slope
    }

    /// Removed offset
    pub fn bias(&self) -> F {
        self.bias
    }

    /// Positive output scale
    pub fn scale(&self) -> F {
        self.scale
    }

    /// Transform outputs `y` observed at inputs `x`
    pub fn forward(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        y: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Array1<F> {
        let trend = x.dot(&self.slope);
        Zip::from(y)
            .and(&trend)
            .map_collect(|&v, &t| (v - t - self.bias) / self.scale)
    }

    /// Map transformed outputs at inputs `x` back to the original space
    pub fn backward(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        y: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Array1<F> {
        let trend = x.dot(&self.slope);
        Zip::from(y)
            .and(&trend)
            .map_collect(|&v, &t| v * self.scale + t + self.bias)
    }

    /// Map variances of transformed outputs back to the original space
    pub fn backward_variance(&self, variance: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Array1<F> {
        let factor = self.scale * self.scale;
        variance.mapv(|v| v * factor)
    }
}

impl<F: Float> Transform<F> {
    /// Fit the transform on outputs `y` observed at inputs `x` `(n, D)`
    pub fn fit(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        y: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Result<FittedTransform<F>> {
        let dim = x.ncols();
        match self {
            Transform::Linear { slope, .. } if slope.len() != dim => {
                Err(DataError::InvalidValueError(format!(
                    "Linear transform has {} slopes for {dim} input dimensions",
                    slope.len()
                )))
            }
            Transform::Linear { slope, bias } => Ok(FittedTransform {
                slope: slope.to_owned(),
                bias: *bias,
                scale: F::one(),
            }),
            _ if y.is_empty() => Err(DataError::InvalidValueError(
                "Cannot fit a transform without samples".to_string(),
            )),
            Transform::Detrend => least_squares_trend(x, y),
            Transform::Normalize => {
                let (lo, hi) = y
                    .iter()
                    .fold((F::infinity(), F::neg_infinity()), |(lo, hi), &v| {
                        (lo.min(v), hi.max(v))
                    });
                let half = (hi - lo) / F::cast(2.);
                let scale = if half > F::zero() { half } else { F::one() };
                Ok(FittedTransform::offset(dim, (hi + lo) / F::cast(2.), scale))
            }
            Transform::Whiten => {
                let mean = y.mean().unwrap_or(F::zero());
                let std = y.std(F::zero());
                let scale = if std > F::zero() { std } else { F::one() };
                Ok(FittedTransform::offset(dim, mean, scale))
            }
        }
    }
}

/// Solve the normal equations of `y ~ bias + slope . x`
fn least_squares_trend<F: Float>(
    x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    y: &ArrayBase<impl Data<Elem = F>, Ix1>,
) -> Result<FittedTransform<F>> {
    let ones = Array2::ones((x.nrows(), 1));
    let design = concatenate(Axis(1), &[ones.view(), x.view()])
        .map_err(|e| DataError::InvalidValueError(e.to_string()))?;
    let gram = design.t().dot(&design);
    let rhs = design.t().dot(y).insert_axis(Axis(1));
    let singular =
        |e: linfa_linalg::LinalgError| DataError::InvalidValueError(format!("Cannot fit trend: {e}"));
    let chol = gram.cholesky().map_err(singular)?;
    let (lo, hi) = chol
        .diag()
        .iter()
        .fold((F::infinity(), F::zero()), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if !(lo > hi * F::cast(1e-6)) {
        return Err(DataError::InvalidValueError(
            "Cannot fit trend: inputs do not span every direction".to_string(),
        ));
    }
    let z = chol.solve_triangular(&rhs, UPLO::Lower).map_err(singular)?;
    let beta = chol
        .t()
        .solve_triangular_into(z, UPLO::Upper)
        .map_err(singular)?
        .remove_axis(Axis(1));
    Ok(FittedTransform {
        slope: beta.slice(s![1..]).to_owned(),
        bias: beta[0],
        scale: F::one(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_detrend_removes_plane() {
        let x = array![[0., 0.], [1., 0.], [0., 1.], [2., 3.], [1., 1.]];
        let y = x.column(0).mapv(|v| 2. * v) - x.column(1).mapv(|v| 0.5 * v) + 3.;
        let fitted = Transform::Detrend.fit(&x, &y).unwrap();
        assert_abs_diff_eq!(fitted.slope(), &array![2., -0.5], epsilon = 1e-9);
        assert_abs_diff_eq!(fitted.bias(), 3., epsilon = 1e-9);
        assert_abs_diff_eq!(fitted.forward(&x, &y), Array1::zeros(5), epsilon = 1e-9);
    }

    #[test]
    fn test_detrend_degenerate_inputs() {
        let x = array![[1.], [1.], [1.]];
        assert!(Transform::Detrend.fit(&x, &array![1., 2., 3.]).is_err());
    }

    #[test]
    fn test_normalize_range() {
        let x = array![[0.], [1.], [2.], [3.]];
        let y = array![2., 6., 4., 10.];
        let fitted = Transform::Normalize.fit(&x, &y).unwrap();
        let t = fitted.forward(&x, &y);
        assert_abs_diff_eq!(t, array![-1., 0., -0.5, 1.], epsilon = 1e-12);
        assert_abs_diff_eq!(fitted.backward(&x, &t), y, epsilon = 1e-12);
        assert_abs_diff_eq!(fitted.backward_variance(&array![1.]), array![16.], epsilon = 1e-12);
    }

    #[test]
    fn test_whiten_moments() {
        let x = array![[0.], [1.], [2.], [3.]];
        let y = array![1., 3., 5., 7.];
        let t = Transform::Whiten.fit(&x, &y).unwrap().forward(&x, &y);
        assert_abs_diff_eq!(t.mean().unwrap(), 0., epsilon = 1e-12);
        assert_abs_diff_eq!(t.std(0.), 1., epsilon = 1e-12);

        // constant outputs are only centered
        let fitted = Transform::Whiten.fit(&x, &array![4., 4., 4., 4.]).unwrap();
        assert_eq!(fitted.scale(), 1.);
        assert_eq!(fitted.bias(), 4.);
    }

    #[test]
    fn test_linear_checks_dimension() {
        let x = array![[0.], [1.]];
        let linear = Transform::Linear {
            slope: array![1., 2.],
            bias: 0.,
        };
        assert!(linear.fit(&x, &array![0., 1.]).is_err());
        let linear = Transform::Linear {
            slope: array![1.],
            bias: 2.,
        };
        let fitted = linear.fit(&x, &array![2., 3.]).unwrap();
        assert_abs_diff_eq!(fitted.forward(&x, &array![2., 3.]), array![0., 0.]);
    }

    #[test]
    fn test_fit_without_samples() {
        let x = Array2::<f64>::zeros((0, 1));
        assert!(Transform::Whiten.fit(&x, &Array1::zeros(0)).is_err());
    }
}
