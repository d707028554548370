use crate::errors::{Result, SpectralError};

use linfa::Float;
use linfa_linalg::{cholesky::*, triangular::*};
use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix1, Ix2};
use std::f64::consts::PI;

/// Exact gaussian process conditioning on a covariance matrix already
/// including noise terms: Cholesky factor `L` of `K` and weights `K^-1 y`.
#[derive(Debug, Clone)]
pub struct ExactPosterior<F: Float> {
    chol: Array2<F>,
    weights: Array1<F>,
    likelihood: F,
}

impl<F: Float> ExactPosterior<F> {
    /// Factorize the `(n, n)` training covariance `k` given `n` (centered) outputs `y`
    pub fn new(k: Array2<F>, y: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Result<Self> {
        if k.nrows() != y.len() || k.ncols() != y.len() {
            return Err(SpectralError::InvalidValueError(format!(
                "Covariance of shape {:?} does not match {} outputs",
                k.dim(),
                y.len()
            )));
        }
        let chol = k.cholesky()?;
        let z = chol.solve_triangular(&y.to_owned().insert_axis(Axis(1)), UPLO::Lower)?;
        // log|K| = 2 sum(log(diag(L)))
        let logdet = chol.diag().mapv(|v| v.ln()).sum();
        let n = F::cast(y.len());
        let likelihood = F::cast(0.5) * z.mapv(|v| v * v).sum()
            + logdet
            + F::cast(0.5) * n * F::cast(2. * PI).ln();
        if !likelihood.is_finite() {
            return Err(SpectralError::LikelihoodComputationError(
                "non finite negative log likelihood".to_string(),
            ));
        }
        let weights = chol
            .t()
            .solve_triangular_into(z, UPLO::Upper)?
            .remove_axis(Axis(1));
        Ok(ExactPosterior {
            chol,
            weights,
            likelihood,
        })
    }

    /// Negative log marginal likelihood of the training outputs
    pub fn likelihood(&self) -> F {
        self.likelihood
    }

    /// Weights `K^-1 y`
    pub fn weights(&self) -> &Array1<F> {
        &self.weights
    }

    /// Predictive mean and variance given cross covariances `k_star` `(m, n)` between
    /// test and training points and prior variances `k_diag` `(m)` at test points.
    pub fn predict(
        &self,
        k_star: &ArrayBase<impl Data<Elem = F>, Ix2>,
        k_diag: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Result<(Array1<F>, Array1<F>)> {
        let mean = k_star.dot(&self.weights);
        let v = self
            .chol
            .solve_triangular(&k_star.t().to_owned(), UPLO::Lower)?;
        let explained = v.mapv(|e| e * e).sum_axis(Axis(0));
        let var = (k_diag - &explained).mapv(|e| e.max(F::zero()));
        Ok((mean, var))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_independent_likelihood() {
        // K = I: nll = 0.5 |y|^2 + n/2 ln(2 pi)
        let y = array![1., -2.];
        let post = ExactPosterior::new(Array2::eye(2), &y).unwrap();
        let expected = 0.5 * 5. + (2. * PI).ln();
        assert_abs_diff_eq!(post.likelihood(), expected, epsilon = 1e-12);
        assert_abs_diff_eq!(*post.weights(), y, epsilon = 1e-12);
    }

    #[test]
    fn test_predict_at_training_point() {
        let k = array![[1.01, 0.5], [0.5, 1.01]];
        let y = array![1., 0.5];
        let post = ExactPosterior::new(k, &y).unwrap();
        let (mean, var) = post
            .predict(&array![[1., 0.5]], &array![1.01])
            .unwrap();
        assert_abs_diff_eq!(mean[0], 1., epsilon = 0.05);
        assert!(var[0] < 0.02);
    }

    #[test]
    fn test_not_positive_definite() {
        let k = array![[1., 2.], [2., 1.]];
        assert!(ExactPosterior::new(k, &array![1., 1.]).is_err());
    }
}
