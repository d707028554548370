use crate::errors::{MosmError, Result};

#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Recognized kernel parameter names
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum ParamName {
    /// Per channel weight of a component (non negative)
    Magnitude,
    /// Per channel, per input dimension frequency of a component
    Mean,
    /// Per channel, per input dimension spectral variance of a component (non negative)
    Variance,
    /// Per channel phase of a component (radians)
    Phase,
    /// Per channel, per input dimension delay of a component
    Delay,
    /// Per channel observation noise variance (non negative), held by the extra term
    Noise,
}

impl ParamName {
    /// Every recognized name
    pub const ALL: [ParamName; 6] = [
        ParamName::Magnitude,
        ParamName::Mean,
        ParamName::Variance,
        ParamName::Phase,
        ParamName::Delay,
        ParamName::Noise,
    ];

    /// Lower case name
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamName::Magnitude => "magnitude",
            ParamName::Mean => "mean",
            ParamName::Variance => "variance",
            ParamName::Phase => "phase",
            ParamName::Delay => "delay",
            ParamName::Noise => "noise",
        }
    }

    /// Whether values are given per input dimension, i.e. as a `(D, M)` array
    /// instead of a `(1, M)` one
    pub fn per_input_dim(&self) -> bool {
        matches!(
            self,
            ParamName::Mean | ParamName::Variance | ParamName::Delay
        )
    }

    /// Whether values must be non negative
    pub fn non_negative(&self) -> bool {
        matches!(
            self,
            ParamName::Magnitude | ParamName::Variance | ParamName::Noise
        )
    }

    /// Shape `(rows, n_channels)` of the values of one component
    pub fn shape(&self, input_dim: usize, n_channels: usize) -> (usize, usize) {
        if self.per_input_dim() {
            (input_dim, n_channels)
        } else {
            (1, n_channels)
        }
    }
}

impl fmt::Display for ParamName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ParamName {
    type Err = MosmError;

    fn from_str(s: &str) -> Result<Self> {
        ParamName::ALL
            .iter()
            .find(|name| name.as_str() == s)
            .copied()
            .ok_or_else(|| MosmError::UnknownParameter(s.to_string()))
    }
}

/// Anything usable as a parameter key: a [ParamName] or its string form
pub trait ParamKey {
    /// Resolve the key, failing with [`MosmError::UnknownParameter`]
    fn param_name(&self) -> Result<ParamName>;
}

impl ParamKey for ParamName {
    fn param_name(&self) -> Result<ParamName> {
        Ok(*self)
    }
}

impl ParamKey for &str {
    fn param_name(&self) -> Result<ParamName> {
        self.parse()
    }
}

impl ParamKey for String {
    fn param_name(&self) -> Result<ParamName> {
        self.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names() {
        for name in ParamName::ALL {
            assert_eq!(name.to_string().parse::<ParamName>().unwrap(), name);
        }
        assert!(matches!(
            "lengthscale".parse::<ParamName>(),
            Err(MosmError::UnknownParameter(s)) if s == "lengthscale"
        ));
        assert!("Mean".parse::<ParamName>().is_err());
    }

    #[test]
    fn test_shapes() {
        assert_eq!(ParamName::Magnitude.shape(3, 2), (1, 2));
        assert_eq!(ParamName::Delay.shape(3, 2), (3, 2));
        assert!(ParamName::Noise.non_negative());
        assert!(!ParamName::Phase.non_negative());
    }
}
