use crate::errors::{MosmError, Result};
use crate::params::{ParamKey, ParamName};

use linfa::Float;
use ndarray::{Array1, Array2, Array3, ArrayBase, ArrayView2, ArrayView3, Axis, Data, Ix2};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Raw estimate of one mixture component across all channels, before storage
#[derive(Clone, Debug, PartialEq)]
pub struct ComponentEstimate<F: Float> {
    /// Un-normalized magnitude per channel `(M)`
    pub magnitude: Array1<F>,
    /// Mean `(D, M)`
    pub mean: Array2<F>,
    /// Variance `(D, M)`
    pub variance: Array2<F>,
}

/// Named parameters of a multi-output spectral mixture kernel.
///
/// Each of the Q mixture components holds `magnitude (1, M)`, `mean (D, M)`,
/// `variance (D, M)`, `phase (1, M)` and `delay (D, M)` values, M being the number
/// of channels and D the input dimension. The extra additive term at component
/// index Q holds the per channel `noise (1, M)`.
///
/// Parameter names can be fixed to exclude them from training. Fixing applies to a
/// name across every component.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub struct ParameterStore<F: Float> {
    n_components: usize,
    n_channels: usize,
    input_dim: usize,
    /// Values by name, `(Q, rows, M)` for mixture names and `(1, 1, M)` for noise
    values: BTreeMap<ParamName, Array3<F>>,
    fixed: BTreeSet<ParamName>,
}

impl<F: Float> ParameterStore<F> {
    /// Store of `n_components` components for `n_channels` channels of inputs in
    /// dimension `input_dim`, filled with placeholder values: unit magnitude, variance
    /// and noise, zero mean, phase and delay.
    pub fn new(n_components: usize, n_channels: usize, input_dim: usize) -> Result<Self> {
        if n_components == 0 || n_channels == 0 || input_dim == 0 {
            return Err(MosmError::InvalidValueError(format!(
                "Store needs positive sizes, got Q={n_components}, M={n_channels}, D={input_dim}"
            )));
        }
        let values = ParamName::ALL
            .iter()
            .map(|&name| {
                let (rows, cols) = name.shape(input_dim, n_channels);
                let terms = if name == ParamName::Noise {
                    1
                } else {
                    n_components
                };
                let init = match name {
                    ParamName::Magnitude | ParamName::Variance | ParamName::Noise => F::one(),
                    _ => F::zero(),
                };
                (name, Array3::from_elem((terms, rows, cols), init))
            })
            .collect();
        Ok(ParameterStore {
            n_components,
            n_channels,
            input_dim,
            values,
            fixed: BTreeSet::new(),
        })
    }

    /// Number of mixture components Q
    pub fn n_components(&self) -> usize {
        self.n_components
    }

    /// Number of channels M
    pub fn n_channels(&self) -> usize {
        self.n_channels
    }

    /// Input dimension D
    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    /// Index of the values of `name` for component `q` in its `Array3`
    fn term_index(&self, name: ParamName, q: usize) -> Result<usize> {
        let valid = if name == ParamName::Noise {
            q == self.n_components
        } else {
            q < self.n_components
        };
        if valid {
            Ok(if name == ParamName::Noise { 0 } else { q })
        } else {
            Err(MosmError::InvalidComponent {
                component: q,
                n_components: self.n_components,
            })
        }
    }

    fn check_value(
        &self,
        name: ParamName,
        value: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<()> {
        let shape = name.shape(self.input_dim, self.n_channels);
        if value.dim() != shape {
            return Err(MosmError::InvalidValueError(format!(
                "{name} expects shape {shape:?}, got {:?}",
                value.dim()
            )));
        }
        if value.iter().any(|v| !v.is_finite()) {
            return Err(MosmError::InvalidValueError(format!(
                "{name} values should be finite"
            )));
        }
        if name.non_negative() && value.iter().any(|&v| v < F::zero()) {
            return Err(MosmError::InvalidValueError(format!(
                "{name} values should be non negative"
            )));
        }
        Ok(())
    }

    /// Set the values of `key` for component `q`.
    ///
    /// # Errors
    ///
    /// * [`MosmError::UnknownParameter`] when `key` is not a recognized name
    /// * [`MosmError::InvalidComponent`] when `q` is not in `[0, Q)` for a mixture
    ///   parameter, or is not `Q` for `noise`
    /// * [`MosmError::InvalidValueError`] on a shape mismatch, a non finite value or a
    ///   negative magnitude, variance or noise
    pub fn set(
        &mut self,
        q: usize,
        key: impl ParamKey,
        value: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<()> {
        let name = key.param_name()?;
        let term = self.term_index(name, q)?;
        self.check_value(name, value)?;
        if let Some(values) = self.values.get_mut(&name) {
            values.index_axis_mut(Axis(0), term).assign(value);
        }
        Ok(())
    }

    /// Values of `key` for component `q`, same errors as [ParameterStore::set]
    pub fn get(&self, q: usize, key: impl ParamKey) -> Result<ArrayView2<'_, F>> {
        let name = key.param_name()?;
        let term = self.term_index(name, q)?;
        Ok(self.values_of(name).index_axis(Axis(0), term))
    }

    /// Values of `key` for every component, `(Q, rows, M)` (`(1, 1, M)` for noise)
    pub fn get_all_across(&self, key: impl ParamKey) -> Result<ArrayView3<'_, F>> {
        let name = key.param_name()?;
        Ok(self.values_of(name).view())
    }

    /// Per channel noise `(M)`
    pub fn noise(&self) -> Array1<F> {
        self.values_of(ParamName::Noise)
            .slice(ndarray::s![0, 0, ..])
            .to_owned()
    }

    pub(crate) fn values_of(&self, name: ParamName) -> &Array3<F> {
        // every name is inserted at construction
        &self.values[&name]
    }

    /// Exclude `key` from training, for every component
    pub fn fix(&mut self, key: impl ParamKey) -> Result<()> {
        self.fixed.insert(key.param_name()?);
        Ok(())
    }

    /// Make `key` trainable again, no-op when it was not fixed
    pub fn unfix(&mut self, key: impl ParamKey) -> Result<()> {
        self.fixed.remove(&key.param_name()?);
        Ok(())
    }

    /// Whether `key` is fixed
    pub fn is_fixed(&self, key: impl ParamKey) -> Result<bool> {
        Ok(self.fixed.contains(&key.param_name()?))
    }

    /// Fixed names
    pub fn fixed(&self) -> Vec<ParamName> {
        self.fixed.iter().copied().collect()
    }

    /// Names to optimize during training, in schema order
    pub fn trainable_names(&self) -> Vec<ParamName> {
        ParamName::ALL
            .iter()
            .filter(|name| !self.fixed.contains(name))
            .copied()
            .collect()
    }

    /// Commit a complete estimate: one [ComponentEstimate] per component and the
    /// per channel noise.
    ///
    /// Raw magnitudes are normalized with [normalize_magnitudes] here and only here.
    /// Phases and delays are left untouched. Nothing is written unless every value
    /// is valid.
    pub fn set_estimates(
        &mut self,
        components: &[ComponentEstimate<F>],
        noise: &Array1<F>,
    ) -> Result<()> {
        if components.len() != self.n_components {
            return Err(MosmError::InvalidValueError(format!(
                "{} component estimates given for Q={}",
                components.len(),
                self.n_components
            )));
        }
        let mut staged = self.clone();
        for (q, estimate) in components.iter().enumerate() {
            let magnitude = normalize_magnitudes(&estimate.magnitude).insert_axis(Axis(0));
            staged.set(q, ParamName::Magnitude, &magnitude)?;
            staged.set(q, ParamName::Mean, &estimate.mean)?;
            staged.set(q, ParamName::Variance, &estimate.variance)?;
        }
        staged.set(
            self.n_components,
            ParamName::Noise,
            &noise.view().insert_axis(Axis(0)),
        )?;
        *self = staged;
        Ok(())
    }

    /// Concatenated values of `names` in schema order
    pub(crate) fn flatten(&self, names: &[ParamName]) -> Vec<F> {
        names
            .iter()
            .flat_map(|name| self.values_of(*name).iter().copied())
            .collect()
    }

    /// Inverse of [ParameterStore::flatten], values are not validated
    pub(crate) fn assign_flat(&mut self, names: &[ParamName], flat: &[F]) {
        let mut offset = 0;
        for name in names {
            if let Some(values) = self.values.get_mut(name) {
                let n = values.len();
                values
                    .iter_mut()
                    .zip(flat[offset..offset + n].iter())
                    .for_each(|(v, &f)| *v = f);
                offset += n;
            }
        }
    }
}

/// Renormalize raw magnitudes as `sqrt(m / mean(m))` so that products over channel
/// pairs share a consistent scale.
///
/// Ratios between channels are preserved (as square roots). When the mean is zero or
/// not finite every magnitude is set to 1.
pub fn normalize_magnitudes<F: Float>(raw: &Array1<F>) -> Array1<F> {
    let mean = raw.mean().unwrap_or(F::zero());
    if mean <= F::zero() || !mean.is_finite() {
        return Array1::ones(raw.len());
    }
    raw.mapv(|m| (m.max(F::zero()) / mean).sqrt())
}
