use crate::cross::{CrossKernel, CrossParams, MosmCross};
use crate::errors::{MosmError, Result};
use crate::store::ParameterStore;

use linfa::Float;
use ndarray::{Array1, Array2, Array3, ArrayBase, ArrayView1, Data, Ix2, Zip};

/// Multi-output spectral mixture covariance on channel tagged inputs.
///
/// Inputs are rows `[c, x_1, ..., x_D]` where `c` is the channel index. Between a row of
/// channel `i` and a row of channel `j` separated by `tau`:
///
/// ```text
/// k_ij(tau) = sum_q alpha_ijq exp(-1/2 sum_d (tau_d + delay_ijqd)^2 covariance_ijqd)
///                             cos(sum_d (tau_d + delay_ijqd) mean_ijqd + phase_ijq)
/// ```
///
/// with `alpha_ijq = magnitude_ijq (2 pi)^(D/2) sqrt(prod_d covariance_ijqd)`.
#[derive(Clone, Debug)]
pub struct MosmKernel<F: Float> {
    cross: CrossParams<F>,
    alpha: Array3<F>,
    noise: Array1<F>,
}

impl<F: Float> MosmKernel<F> {
    /// Kernel from derived cross parameters and per channel noise
    pub fn new(cross: CrossParams<F>, noise: Array1<F>) -> Self {
        let alpha = cross.alpha();
        MosmKernel {
            cross,
            alpha,
            noise,
        }
    }

    /// Kernel for the current values of a store
    pub fn from_store(store: &ParameterStore<F>) -> Self {
        Self::new(MosmCross.derive(store), store.noise())
    }

    /// Cross parameters in use
    pub fn cross(&self) -> &CrossParams<F> {
        &self.cross
    }

    /// Per channel noise variances
    pub fn noise(&self) -> &Array1<F> {
        &self.noise
    }

    /// Covariance between channel `i` and channel `j` at lag `tau` (D)
    pub fn value(&self, i: usize, j: usize, tau: ArrayView1<F>) -> F {
        let half = F::cast(0.5);
        (0..self.cross.n_components()).fold(F::zero(), |acc, q| {
            let (mut decay, mut angle) = (F::zero(), self.cross.phase[[q, i, j]]);
            for (n, &t) in tau.iter().enumerate() {
                let shifted = t + self.cross.delay[[q, i, j, n]];
                decay += shifted * shifted * self.cross.covariance[[q, i, j, n]];
                angle += shifted * self.cross.mean[[q, i, j, n]];
            }
            acc + self.alpha[[q, i, j]] * (-half * decay).exp() * angle.cos()
        })
    }

    /// Channel indices of tagged inputs
    fn channels(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Vec<usize>> {
        let count = self.cross.n_channels();
        if x.ncols() != self.cross.input_dim() + 1 {
            return Err(MosmError::InvalidValueError(format!(
                "Tagged inputs should have {} columns, got {}",
                self.cross.input_dim() + 1,
                x.ncols()
            )));
        }
        x.column(0)
            .iter()
            .map(|&c| match c.to_usize() {
                Some(i) if i < count && F::cast(i) == c => Ok(i),
                _ => Err(MosmError::InvalidValueError(format!(
                    "Invalid channel tag {c} for {count} channels"
                ))),
            })
            .collect()
    }

    /// Covariance matrix `(n1, n2)` between tagged inputs, without noise
    pub fn covariance(
        &self,
        x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<Array2<F>> {
        let c1 = self.channels(x1)?;
        let c2 = self.channels(x2)?;
        let mut k = Array2::zeros((x1.nrows(), x2.nrows()));
        let (p1, p2) = (x1.slice(ndarray::s![.., 1..]), x2.slice(ndarray::s![.., 1..]));
        Zip::indexed(&mut k).par_for_each(|(a, b), kab| {
            let tau = &p1.row(a) - &p2.row(b);
            *kab = self.value(c1[a], c2[b], tau.view());
        });
        Ok(k)
    }

    /// Prior variances `k_cc(0)` of tagged inputs, without noise
    pub fn diag(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array1<F>> {
        let zero = Array1::zeros(self.cross.input_dim());
        Ok(self
            .channels(x)?
            .into_iter()
            .map(|c| self.value(c, c, zero.view()))
            .collect())
    }

    /// Training covariance: kernel matrix of `x` with the noise of each row's channel
    /// and a `nugget` jitter relative to the mean prior variance on the diagonal
    pub fn training_covariance(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        nugget: F,
    ) -> Result<Array2<F>> {
        let mut k = self.covariance(x, x)?;
        let channels = self.channels(x)?;
        let jitter = nugget * k.diag().mean().unwrap_or(F::one()).abs();
        for (a, &c) in channels.iter().enumerate() {
            k[[a, a]] += self.noise[c] + jitter;
        }
        Ok(k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use std::f64::consts::PI;

    fn kernel() -> MosmKernel<f64> {
        let mut store = ParameterStore::new(1, 2, 1).unwrap();
        store.set(0, "magnitude", &array![[1., 0.5]]).unwrap();
        store.set(0, "mean", &array![[2., 2.]]).unwrap();
        store.set(0, "variance", &array![[0.5, 0.5]]).unwrap();
        store.set(0, "phase", &array![[0., 0.3]]).unwrap();
        store.set(0, "delay", &array![[0., 0.2]]).unwrap();
        store.set(1, "noise", &array![[0.01, 0.02]]).unwrap();
        MosmKernel::from_store(&store)
    }

    #[test]
    fn test_auto_covariance() {
        let kernel = kernel();
        let alpha = (2. * PI).sqrt() * 0.5f64.sqrt();
        assert_abs_diff_eq!(kernel.value(0, 0, array![0.].view()), alpha, epsilon = 1e-12);
        let expected = alpha * (-0.5 * 0.25 * 0.5f64).exp() * (0.5 * 2.0f64).cos();
        assert_abs_diff_eq!(kernel.value(0, 0, array![0.5].view()), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_cross_covariance_shift() {
        let kernel = kernel();
        // channel 1 is delayed by 0.2 with respect to channel 0
        let alpha = 0.5 * (2. * PI).sqrt() * 0.5f64.sqrt();
        let expected = alpha * (0.3f64).cos();
        assert_abs_diff_eq!(kernel.value(0, 1, array![-0.2].view()), expected, epsilon = 1e-12);
        assert_abs_diff_eq!(
            kernel.value(0, 1, array![0.7].view()),
            kernel.value(1, 0, array![-0.7].view()),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_training_covariance() {
        let kernel = kernel();
        let x = array![[0., 0.], [0., 1.], [1., 0.], [1., 0.5]];
        let k = kernel.training_covariance(&x, 0.).unwrap();
        assert_abs_diff_eq!(k, k.t(), epsilon = 1e-12);
        let prior = kernel.diag(&x).unwrap();
        assert_abs_diff_eq!(k[[0, 0]], prior[0] + 0.01, epsilon = 1e-12);
        assert_abs_diff_eq!(k[[3, 3]], prior[3] + 0.02, epsilon = 1e-12);
        assert_abs_diff_eq!(k[[0, 2]], kernel.value(0, 1, array![0.].view()), epsilon = 1e-12);
    }

    #[test]
    fn test_bad_tags() {
        let kernel = kernel();
        assert!(kernel.covariance(&array![[2., 0.]], &array![[0., 0.]]).is_err());
        assert!(kernel.covariance(&array![[0.5, 0.]], &array![[0., 0.]]).is_err());
        assert!(kernel.diag(&array![[0., 0., 1.]]).is_err());
    }
}
