//! This library provides the data containers used by multi-output gaussian process models.
//!
//! A [Channel] holds one observed signal: input locations `x` as a `(n, D)` array, outputs `y`
//! and a boolean mask marking which samples are used for training. Masked samples are kept
//! in place so that they can be restored or used as test data later on.
//!
//! A [MultiChannelDataset] gathers channels and exposes the *kernel encoding* expected by
//! multi-output kernels: the training inputs of every channel stacked in channel order
//! with a leading column holding the channel index.
//!
//! Channel outputs can be detrended, normalized or whitened with a [Transform]. Observed
//! values are kept as is, models get the transformed ones and predictions are mapped back
//! with [Channel::invert_transforms].
//!
//! ```
//! use mogp_data::{Channel, MultiChannelDataset};
//! use ndarray::array;
//!
//! let a = Channel::from_series("A", array![0., 1., 2.], array![1., -1., 1.]).unwrap();
//! let b = Channel::from_series("B", array![0., 1., 2.], array![-1., 1., -1.]).unwrap();
//! let dataset = MultiChannelDataset::from_channels(vec![a, b]).unwrap();
//!
//! let (x, y) = dataset.to_kernel_encoding().unwrap();
//! assert_eq!(x.dim(), (6, 2));
//! assert_eq!(y.len(), 6);
//! assert_eq!(dataset.get("B").unwrap().name(), "B");
//! ```
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod channel;
mod dataset;
mod errors;
mod transform;

pub use channel::*;
pub use dataset::*;
pub use errors::*;
pub use transform::*;
