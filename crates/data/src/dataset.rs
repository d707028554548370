use crate::channel::Channel;
use crate::errors::{DataError, Result};
use crate::transform::Transform;

use linfa::Float;
use ndarray::{concatenate, s, Array1, Array2, ArrayBase, Axis, Data, Ix1, Ix2};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// A way to designate a channel of a [MultiChannelDataset]: by position or by name
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelRef<'a> {
    /// Position of the channel in the dataset
    Index(usize),
    /// Name of the channel
    Name(&'a str),
}

impl From<usize> for ChannelRef<'_> {
    fn from(index: usize) -> Self {
        ChannelRef::Index(index)
    }
}

impl<'a> From<&'a str> for ChannelRef<'a> {
    fn from(name: &'a str) -> Self {
        ChannelRef::Name(name)
    }
}

/// An ordered collection of uniquely named channels
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub struct MultiChannelDataset<F: Float> {
    channels: Vec<Channel<F>>,
}

impl<F: Float> MultiChannelDataset<F> {
    /// Empty dataset
    pub fn new() -> Self {
        MultiChannelDataset {
            channels: Vec::new(),
        }
    }

    /// Dataset built from a list of channels
    pub fn from_channels(channels: Vec<Channel<F>>) -> Result<Self> {
        let mut dataset = Self::new();
        for channel in channels {
            dataset.push(channel)?;
        }
        Ok(dataset)
    }

    /// Append a channel, its name must not be used yet
    pub fn push(&mut self, channel: Channel<F>) -> Result<()> {
        if self.channels.iter().any(|c| c.name() == channel.name()) {
            return Err(DataError::DuplicateChannel(channel.name().to_string()));
        }
        self.channels.push(channel);
        Ok(())
    }

    /// Number of channels
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Input dimension of each channel
    pub fn input_dims(&self) -> Vec<usize> {
        self.channels.iter().map(|c| c.input_dim()).collect()
    }

    /// Common input dimension of all channels, fails if channels disagree or
    /// if the dataset is empty
    pub fn input_dim(&self) -> Result<usize> {
        let first = self.channels.first().ok_or_else(|| {
            DataError::InvalidValueError("Dataset should hold at least one channel".to_string())
        })?;
        let expected = first.input_dim();
        match self.channels.iter().find(|c| c.input_dim() != expected) {
            Some(c) => Err(DataError::DimensionMismatch {
                channel: c.name().to_string(),
                expected,
                actual: c.input_dim(),
            }),
            None => Ok(expected),
        }
    }

    /// Channel names in channel order
    pub fn names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    /// Channel lookup by index or by name
    pub fn get<'a>(&self, channel: impl Into<ChannelRef<'a>>) -> Result<&Channel<F>> {
        let index = self.index_of(channel)?;
        Ok(&self.channels[index])
    }

    /// Mutable channel lookup, used to change masks
    pub fn get_mut<'a>(&mut self, channel: impl Into<ChannelRef<'a>>) -> Result<&mut Channel<F>> {
        let index = self.index_of(channel)?;
        Ok(&mut self.channels[index])
    }

    /// Position of a channel in the dataset
    pub fn index_of<'a>(&self, channel: impl Into<ChannelRef<'a>>) -> Result<usize> {
        match channel.into() {
            ChannelRef::Index(index) if index < self.channels.len() => Ok(index),
            ChannelRef::Index(index) => Err(DataError::ChannelOutOfRange {
                index,
                count: self.channels.len(),
            }),
            ChannelRef::Name(name) => self
                .channels
                .iter()
                .position(|c| c.name() == name)
                .ok_or_else(|| DataError::UnknownChannel(name.to_string())),
        }
    }

    /// Iterate over channels in order
    pub fn iter(&self) -> std::slice::Iter<'_, Channel<F>> {
        self.channels.iter()
    }

    /// Nyquist frequency estimates as a `(channel_count, D)` array
    pub fn nyquist_estimate(&self) -> Result<Array2<F>> {
        let dim = self.input_dim()?;
        let mut nyquist = Array2::zeros((self.channel_count(), dim));
        nyquist
            .rows_mut()
            .into_iter()
            .zip(self.channels.iter())
            .for_each(|(mut row, c)| row.assign(&c.nyquist_estimate()));
        Ok(nyquist)
    }

    /// Fit a transform on every channel. Either all channels get it or none does.
    pub fn transform(&mut self, transform: &Transform<F>) -> Result<()> {
        let fitted = self
            .channels
            .iter()
            .map(|c| c.fit_transform(transform))
            .collect::<Result<Vec<_>>>()?;
        self.channels
            .iter_mut()
            .zip(fitted)
            .for_each(|(c, f)| c.push_transform(f));
        Ok(())
    }

    /// Kernel encoding of the training data: valid inputs of all channels stacked
    /// in channel order as a `(N, D+1)` array whose first column is the channel index,
    /// together with the corresponding `N` transformed outputs.
    pub fn to_kernel_encoding(&self) -> Result<(Array2<F>, Array1<F>)> {
        let xs: Vec<Array2<F>> = self.channels.iter().map(|c| c.valid_x()).collect();
        let x = self.encode_inputs(&xs)?;
        let ys: Vec<Array1<F>> = self.channels.iter().map(|c| c.model_y()).collect();
        let views: Vec<_> = ys.iter().map(|y| y.view()).collect();
        let y = concatenate(Axis(0), &views)
            .map_err(|e| DataError::InvalidValueError(e.to_string()))?;
        Ok((x, y))
    }

    /// Kernel encoding of arbitrary inputs, one `(n_c, D)` array per channel
    /// (typically prediction locations). Channels may be given no input (zero rows).
    pub fn encode_inputs(&self, xs: &[ArrayBase<impl Data<Elem = F>, Ix2>]) -> Result<Array2<F>> {
        if xs.len() != self.channel_count() {
            return Err(DataError::InvalidValueError(format!(
                "Expected inputs for {} channels, got {}",
                self.channel_count(),
                xs.len()
            )));
        }
        let dim = self.input_dim()?;
        if let Some((c, x)) = self
            .channels
            .iter()
            .zip(xs.iter())
            .find(|(_, x)| x.ncols() != dim)
        {
            return Err(DataError::DimensionMismatch {
                channel: c.name().to_string(),
                expected: dim,
                actual: x.ncols(),
            });
        }
        let n: usize = xs.iter().map(|x| x.nrows()).sum();
        let mut encoded = Array2::zeros((n, dim + 1));
        let mut offset = 0;
        for (i, x) in xs.iter().enumerate() {
            let rows = x.nrows();
            let mut block = encoded.slice_mut(s![offset..offset + rows, ..]);
            block.column_mut(0).fill(F::cast(i));
            block.slice_mut(s![.., 1..]).assign(x);
            offset += rows;
        }
        Ok(encoded)
    }

    /// Split kernel ordered values back into per channel arrays given
    /// the number of values belonging to each channel.
    pub fn split_outputs(
        &self,
        values: &ArrayBase<impl Data<Elem = F>, Ix1>,
        counts: &[usize],
    ) -> Result<Vec<Array1<F>>> {
        if counts.len() != self.channel_count() || counts.iter().sum::<usize>() != values.len() {
            return Err(DataError::InvalidValueError(format!(
                "Cannot split {} values with counts {:?}",
                values.len(),
                counts
            )));
        }
        let mut offset = 0;
        Ok(counts
            .iter()
            .map(|&n| {
                let part = values.slice(s![offset..offset + n]).to_owned();
                offset += n;
                part
            })
            .collect())
    }
}

impl<'a, F: Float> IntoIterator for &'a MultiChannelDataset<F> {
    type Item = &'a Channel<F>;
    type IntoIter = std::slice::Iter<'a, Channel<F>>;

    fn into_iter(self) -> Self::IntoIter {
        self.channels.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn two_channels() -> MultiChannelDataset<f64> {
        let a = Channel::from_series("A", array![0., 1., 2.], array![1., -1., 1.]).unwrap();
        let mut b =
            Channel::from_series("B", array![0., 0.5, 1., 1.5], array![4., 3., 2., 1.]).unwrap();
        b.remove_indices(&[1]).unwrap();
        MultiChannelDataset::from_channels(vec![a, b]).unwrap()
    }

    #[test]
    fn test_get_by_index_or_name() {
        let ds = two_channels();
        assert_eq!(ds.channel_count(), 2);
        assert_eq!(ds.get(1_usize).unwrap().name(), "B");
        assert_eq!(ds.get("A").unwrap().len(), 3);
        assert_eq!(ds.names(), vec!["A", "B"]);
        assert!(matches!(ds.get("C"), Err(DataError::UnknownChannel(_))));
        assert!(matches!(
            ds.get(2_usize),
            Err(DataError::ChannelOutOfRange { index: 2, count: 2 })
        ));
    }

    #[test]
    fn test_duplicate_names() {
        let a = Channel::from_series("A", array![0., 1.], array![1., -1.]).unwrap();
        let res = MultiChannelDataset::from_channels(vec![a.clone(), a]);
        assert!(matches!(res, Err(DataError::DuplicateChannel(_))));
    }

    #[test]
    fn test_kernel_encoding() {
        let ds = two_channels();
        let (x, y) = ds.to_kernel_encoding().unwrap();
        let expected_x = array![
            [0., 0.],
            [0., 1.],
            [0., 2.],
            [1., 0.],
            [1., 1.],
            [1., 1.5]
        ];
        assert_abs_diff_eq!(x, expected_x);
        assert_abs_diff_eq!(y, array![1., -1., 1., 4., 2., 1.]);
    }

    #[test]
    fn test_transform_all_or_nothing() {
        let mut ds = two_channels();
        ds.transform(&Transform::Whiten).unwrap();
        let (_, y) = ds.to_kernel_encoding().unwrap();
        assert_abs_diff_eq!(y.slice(s![..3]).mean().unwrap(), 0., epsilon = 1e-12);
        assert_abs_diff_eq!(y.slice(s![3..]).std(0.), 1., epsilon = 1e-12);

        // a single valid sample cannot carry a trend: A is left untouched too
        ds.get_mut("B").unwrap().remove_indices(&[2, 3]).unwrap();
        assert!(ds.transform(&Transform::Detrend).is_err());
        assert!(ds.iter().all(|c| c.transforms().len() == 1));
    }

    #[test]
    fn test_nyquist_per_channel() {
        let ds = two_channels();
        assert_abs_diff_eq!(ds.nyquist_estimate().unwrap(), array![[0.5], [1.]]);
    }

    #[test]
    fn test_split_outputs() {
        let ds = two_channels();
        let parts = ds
            .split_outputs(&array![1., 2., 3., 4., 5.], &[2, 3])
            .unwrap();
        assert_abs_diff_eq!(parts[0], array![1., 2.]);
        assert_abs_diff_eq!(parts[1], array![3., 4., 5.]);
        assert!(ds.split_outputs(&array![1., 2.], &[2, 3]).is_err());
    }

    #[test]
    fn test_dimension_mismatch() {
        let a = Channel::from_series("A", array![0., 1.], array![1., -1.]).unwrap();
        let b = Channel::new("B", array![[0., 1.], [1., 2.]], array![1., -1.]).unwrap();
        let ds = MultiChannelDataset::from_channels(vec![a, b]).unwrap();
        assert_eq!(ds.input_dims(), vec![1, 2]);
        assert!(matches!(
            ds.to_kernel_encoding(),
            Err(DataError::DimensionMismatch { .. })
        ));
    }
}
